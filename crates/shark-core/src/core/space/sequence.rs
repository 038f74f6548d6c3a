use super::site::ConfSpace;
use std::fmt;

/// Labels fixed at the mutable sites of a space.
///
/// A sequence partitions the conformation space: two full assignments belong to the same
/// sequence iff they carry the same label at every mutable site. `None` at a mutable site leaves
/// it open (any label); immutable sites are always `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sequence {
    labels: Vec<Option<String>>,
}

impl Sequence {
    pub fn unassigned(space: &ConfSpace) -> Self {
        Self {
            labels: vec![None; space.num_sites()],
        }
    }

    pub fn wild_type(space: &ConfSpace) -> Self {
        Self {
            labels: space
                .sites()
                .iter()
                .map(|s| s.mutable.then(|| s.wild_type.clone()))
                .collect(),
        }
    }

    pub fn num_sites(&self) -> usize {
        self.labels.len()
    }

    pub fn get(&self, site: usize) -> Option<&str> {
        self.labels.get(site).and_then(|l| l.as_deref())
    }

    pub fn with_assignment(&self, site: usize, label: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.labels[site] = Some(label.into());
        next
    }

    pub fn is_fully_assigned(&self, space: &ConfSpace) -> bool {
        space
            .mutable_sites()
            .into_iter()
            .all(|site| self.labels[site].is_some())
    }

    pub fn first_unassigned(&self, space: &ConfSpace) -> Option<usize> {
        space
            .mutable_sites()
            .into_iter()
            .find(|&site| self.labels[site].is_none())
    }

    pub fn count_assignments(&self) -> usize {
        self.labels.iter().filter(|l| l.is_some()).count()
    }

    pub fn count_mutations(&self, space: &ConfSpace) -> usize {
        space
            .mutable_sites()
            .into_iter()
            .filter(|&site| {
                self.labels[site]
                    .as_deref()
                    .is_some_and(|label| label != space.site(site).wild_type)
            })
            .count()
    }

    pub fn fill_wild_type(&self, space: &ConfSpace) -> Self {
        let mut next = self.clone();
        for site in space.mutable_sites() {
            if next.labels[site].is_none() {
                next.labels[site] = Some(space.site(site).wild_type.clone());
            }
        }
        next
    }

    /// Legal choices per site under this sequence.
    pub fn choices(&self, space: &ConfSpace) -> ChoiceSet {
        let per_site = space
            .sites()
            .iter()
            .zip(&self.labels)
            .map(|(site, label)| match label {
                Some(label) if site.mutable => site.choices_with_label(label).collect(),
                _ => (0..site.num_choices()).collect(),
            })
            .collect();
        ChoiceSet { per_site }
    }

    /// Carries the labels of this sequence over to another space, matching sites by name.
    /// Sites of `to` that do not exist in `from` are left unassigned.
    pub fn project(&self, from: &ConfSpace, to: &ConfSpace) -> Self {
        let mut labels = vec![None; to.num_sites()];
        for (to_index, site) in to.sites().iter().enumerate() {
            if !site.mutable {
                continue;
            }
            if let Some(from_index) = from.find_site(&site.name) {
                labels[to_index] = self.labels[from_index].clone();
            }
        }
        Self { labels }
    }

    /// Moves this sequence into a larger space through a site index mapping.
    pub fn remap(&self, mapping: &[usize], target_sites: usize) -> Self {
        let mut labels = vec![None; target_sites];
        for (site, label) in self.labels.iter().enumerate() {
            labels[mapping[site]] = label.clone();
        }
        Self { labels }
    }

    pub fn describe(&self, space: &ConfSpace) -> String {
        space
            .mutable_sites()
            .into_iter()
            .map(|site| {
                format!(
                    "{}={}",
                    space.site(site).name,
                    self.labels[site].as_deref().unwrap_or("*")
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .labels
            .iter()
            .map(|l| l.as_deref().unwrap_or("*"))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

/// The legal choice indices of every site under some sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceSet {
    per_site: Vec<Vec<usize>>,
}

impl ChoiceSet {
    pub fn all(space: &ConfSpace) -> Self {
        Self {
            per_site: space
                .sites()
                .iter()
                .map(|s| (0..s.num_choices()).collect())
                .collect(),
        }
    }

    pub fn from_lists(per_site: Vec<Vec<usize>>) -> Self {
        Self { per_site }
    }

    #[inline]
    pub fn legal(&self, site: usize) -> &[usize] {
        &self.per_site[site]
    }

    pub fn contains(&self, site: usize, choice: usize) -> bool {
        self.per_site[site].contains(&choice)
    }

    pub fn num_sites(&self) -> usize {
        self.per_site.len()
    }

    /// Natural log of the number of full assignments, `-inf` if a site has no legal choice.
    pub fn ln_num_conformations(&self) -> f64 {
        self.per_site
            .iter()
            .map(|choices| (choices.len() as f64).ln())
            .sum()
    }

    pub fn restrict(&self, sites: &[usize]) -> Self {
        Self {
            per_site: sites.iter().map(|&s| self.per_site[s].clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::space::site::{Choice, Site};

    fn space() -> ConfSpace {
        ConfSpace::new(vec![
            Site::new(
                "A1",
                "ALA",
                true,
                vec![Choice::new("ALA"), Choice::new("ALA"), Choice::new("GLY")],
            ),
            Site::new("A2", "LEU", false, vec![Choice::new("LEU"), Choice::new("LEU")]),
            Site::new("A3", "SER", true, vec![Choice::new("SER"), Choice::new("THR")]),
        ])
        .unwrap()
    }

    #[test]
    fn unassigned_sequence_allows_every_choice() {
        let space = space();
        let seq = Sequence::unassigned(&space);
        let choices = seq.choices(&space);
        assert_eq!(choices.legal(0), &[0, 1, 2]);
        assert_eq!(choices.legal(1), &[0, 1]);
        assert_eq!(choices.legal(2), &[0, 1]);
        assert!(!seq.is_fully_assigned(&space));
    }

    #[test]
    fn assigned_label_restricts_choices_to_that_label() {
        let space = space();
        let seq = Sequence::unassigned(&space).with_assignment(0, "GLY");
        assert_eq!(seq.choices(&space).legal(0), &[2]);
        assert_eq!(seq.first_unassigned(&space), Some(2));
    }

    #[test]
    fn wild_type_is_fully_assigned_and_has_no_mutations() {
        let space = space();
        let wt = Sequence::wild_type(&space);
        assert!(wt.is_fully_assigned(&space));
        assert_eq!(wt.count_mutations(&space), 0);
        assert_eq!(wt.describe(&space), "A1=ALA A3=SER");
    }

    #[test]
    fn fill_wild_type_only_touches_open_mutable_sites() {
        let space = space();
        let seq = Sequence::unassigned(&space)
            .with_assignment(2, "THR")
            .fill_wild_type(&space);
        assert_eq!(seq.get(0), Some("ALA"));
        assert_eq!(seq.get(1), None);
        assert_eq!(seq.get(2), Some("THR"));
        assert_eq!(seq.count_mutations(&space), 1);
    }

    #[test]
    fn project_matches_sites_by_name() {
        let big = space();
        let small = ConfSpace::new(vec![Site::new(
            "A3",
            "SER",
            true,
            vec![Choice::new("SER"), Choice::new("THR")],
        )])
        .unwrap();
        let seq = Sequence::wild_type(&big).with_assignment(2, "THR");
        let projected = seq.project(&big, &small);
        assert_eq!(projected.get(0), Some("THR"));
        assert_eq!(projected.num_sites(), 1);
    }

    #[test]
    fn sequences_are_usable_as_hash_keys() {
        let space = space();
        let mut map = std::collections::HashMap::new();
        map.insert(Sequence::wild_type(&space), 1);
        assert_eq!(map.get(&Sequence::wild_type(&space)), Some(&1));
        assert_eq!(map.get(&Sequence::unassigned(&space)), None);
    }

    #[test]
    fn conformation_count_is_product_of_legal_choices() {
        let space = space();
        let choices = ChoiceSet::all(&space);
        assert!((choices.ln_num_conformations() - (12f64).ln()).abs() < 1e-12);
    }
}
