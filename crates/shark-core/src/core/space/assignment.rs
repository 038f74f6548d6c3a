use std::fmt;

/// A (possibly partial) assignment of choice indices to sites.
///
/// `None` marks an unassigned site. Assignments are the identity of bound-tree nodes and the
/// keys of correction lookups, so they are cheap to hash and compare.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Assignment(Box<[Option<usize>]>);

impl Assignment {
    pub fn unassigned(num_sites: usize) -> Self {
        Self(vec![None; num_sites].into_boxed_slice())
    }

    pub fn from_choices(choices: &[usize]) -> Self {
        Self(choices.iter().map(|&c| Some(c)).collect())
    }

    #[inline]
    pub fn num_sites(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn get(&self, site: usize) -> Option<usize> {
        self.0[site]
    }

    #[inline]
    pub fn set(&mut self, site: usize, choice: Option<usize>) {
        self.0[site] = choice;
    }

    pub fn with(&self, site: usize, choice: usize) -> Self {
        let mut next = self.clone();
        next.0[site] = Some(choice);
        next
    }

    pub fn num_assigned(&self) -> usize {
        self.0.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_full(&self) -> bool {
        self.0.iter().all(Option::is_some)
    }

    pub fn assigned(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(site, c)| c.map(|choice| (site, choice)))
    }

    pub fn as_slice(&self) -> &[Option<usize>] {
        &self.0
    }

    pub fn to_tuple(&self) -> ChoiceTuple {
        ChoiceTuple::new(self.assigned().collect())
    }

    /// Moves this assignment into a larger space. `mapping[i]` is the index in the target
    /// space of site `i` of this assignment.
    pub fn remap(&self, mapping: &[usize], target_sites: usize) -> Self {
        let mut out = Self::unassigned(target_sites);
        for (site, choice) in self.assigned() {
            out.0[mapping[site]] = Some(choice);
        }
        out
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match c {
                Some(choice) => write!(f, "{}", choice)?,
                None => write!(f, "-")?,
            }
        }
        write!(f, "]")
    }
}

/// Defined/undefined site lists of an assignment, used as scratch while scoring.
#[derive(Debug, Clone, Default)]
pub struct AssignmentIndex {
    pub defined: Vec<(usize, usize)>,
    pub undefined: Vec<usize>,
}

impl AssignmentIndex {
    pub fn new(assignment: &Assignment) -> Self {
        let mut index = Self::default();
        index.reset(assignment);
        index
    }

    pub fn reset(&mut self, assignment: &Assignment) {
        self.defined.clear();
        self.undefined.clear();
        for (site, c) in assignment.as_slice().iter().enumerate() {
            match c {
                Some(choice) => self.defined.push((site, *choice)),
                None => self.undefined.push(site),
            }
        }
    }

    /// Marks `site` as assigned to `choice`. The site must currently be undefined.
    pub fn assign(&mut self, site: usize, choice: usize) {
        if let Some(pos) = self.undefined.iter().position(|&s| s == site) {
            self.undefined.remove(pos);
            let at = self.defined.partition_point(|&(s, _)| s < site);
            self.defined.insert(at, (site, choice));
        }
    }

    pub fn unassign(&mut self, site: usize) {
        if let Some(pos) = self.defined.iter().position(|&(s, _)| s == site) {
            self.defined.remove(pos);
            let at = self.undefined.partition_point(|&s| s < site);
            self.undefined.insert(at, site);
        }
    }

    pub fn is_defined(&self, site: usize) -> bool {
        self.defined.iter().any(|&(s, _)| s == site)
    }
}

/// A sorted set of `(site, choice)` pairs. Corrections are keyed by these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChoiceTuple(Vec<(usize, usize)>);

impl ChoiceTuple {
    pub fn new(mut pairs: Vec<(usize, usize)>) -> Self {
        pairs.sort_unstable();
        pairs.dedup_by_key(|p| p.0);
        Self(pairs)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.0
    }

    pub fn sites(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().map(|&(s, _)| s)
    }

    pub fn is_contained_in(&self, assignment: &Assignment) -> bool {
        self.0
            .iter()
            .all(|&(site, choice)| site < assignment.num_sites() && assignment.get(site) == Some(choice))
    }

    pub fn shares_site_with(&self, other: &ChoiceTuple) -> bool {
        self.0
            .iter()
            .any(|&(s, _)| other.0.iter().any(|&(o, _)| o == s))
    }

    /// Pairs present, with the same choice, in both tuples.
    pub fn intersect(&self, other: &ChoiceTuple) -> ChoiceTuple {
        ChoiceTuple(
            self.0
                .iter()
                .filter(|p| other.0.contains(p))
                .copied()
                .collect(),
        )
    }

    pub fn remap(&self, mapping: &[usize]) -> ChoiceTuple {
        ChoiceTuple::new(self.0.iter().map(|&(s, c)| (mapping[s], c)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unassigned_assignment_has_no_defined_sites() {
        let a = Assignment::unassigned(3);
        assert_eq!(a.num_assigned(), 0);
        assert!(!a.is_full());
        assert_eq!(a.to_string(), "[- - -]");
    }

    #[test]
    fn with_assigns_one_site_without_touching_the_original() {
        let a = Assignment::unassigned(3);
        let b = a.with(1, 4);
        assert_eq!(a.get(1), None);
        assert_eq!(b.get(1), Some(4));
        assert_eq!(b.assigned().collect::<Vec<_>>(), vec![(1, 4)]);
    }

    #[test]
    fn index_tracks_defined_and_undefined_sites() {
        let a = Assignment::unassigned(4).with(2, 1);
        let mut index = AssignmentIndex::new(&a);
        assert_eq!(index.defined, vec![(2, 1)]);
        assert_eq!(index.undefined, vec![0, 1, 3]);

        index.assign(0, 3);
        assert_eq!(index.defined, vec![(0, 3), (2, 1)]);
        assert_eq!(index.undefined, vec![1, 3]);

        index.unassign(0);
        assert_eq!(index.defined, vec![(2, 1)]);
        assert_eq!(index.undefined, vec![0, 1, 3]);
    }

    #[test]
    fn tuple_is_sorted_and_checks_containment() {
        let tuple = ChoiceTuple::new(vec![(2, 0), (0, 1)]);
        assert_eq!(tuple.pairs(), &[(0, 1), (2, 0)]);

        let full = Assignment::from_choices(&[1, 5, 0]);
        assert!(tuple.is_contained_in(&full));
        let other = Assignment::from_choices(&[1, 5, 1]);
        assert!(!tuple.is_contained_in(&other));
    }

    #[test]
    fn tuple_intersection_keeps_matching_pairs_only() {
        let a = ChoiceTuple::new(vec![(0, 1), (1, 2), (2, 3)]);
        let b = ChoiceTuple::new(vec![(0, 1), (1, 0), (2, 3)]);
        assert_eq!(a.intersect(&b).pairs(), &[(0, 1), (2, 3)]);
        assert!(a.shares_site_with(&b));
    }

    #[test]
    fn remap_moves_sites_into_larger_space() {
        let small = Assignment::from_choices(&[3, 4]);
        let big = small.remap(&[1, 3], 5);
        assert_eq!(big.as_slice(), &[None, Some(3), None, Some(4), None]);

        let tuple = ChoiceTuple::new(vec![(0, 3), (1, 4)]);
        assert_eq!(tuple.remap(&[3, 1]).pairs(), &[(1, 4), (3, 3)]);
    }
}
