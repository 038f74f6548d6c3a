use super::scorer::{NodeScorer, ScoringTables};
use crate::core::space::{Assignment, AssignmentIndex, ChoiceSet};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::debug;

/// The static order in which sites are branched on.
///
/// Every node branches on the first site of the order it leaves unassigned, so all nodes at
/// one level of the tree share the same branching site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchOrder {
    sites: Vec<usize>,
}

impl BranchOrder {
    pub fn natural(num_sites: usize) -> Self {
        Self {
            sites: (0..num_sites).collect(),
        }
    }

    /// Orders sites by how strongly their choices separate the root's children: the spread of
    /// the children's lower free-energy bounds, largest first. Ties keep index order.
    pub fn by_spread(tables: &ScoringTables, choices: &ChoiceSet) -> Self {
        let num_sites = choices.num_sites();
        let root = Assignment::unassigned(num_sites);

        let spread_of = |site: usize| -> f64 {
            let mut index = AssignmentIndex::new(&root);
            let mut lowest = f64::INFINITY;
            let mut highest = f64::NEG_INFINITY;
            for &choice in choices.legal(site) {
                index.assign(site, choice);
                let bound = NodeScorer::PairwiseLower.score(tables, &index, choices)
                    + NodeScorer::UnassignedLower.score(tables, &index, choices);
                index.unassign(site);
                if bound.is_finite() {
                    lowest = lowest.min(bound);
                    highest = highest.max(bound);
                }
            }
            if highest >= lowest { highest - lowest } else { 0.0 }
        };

        #[cfg(feature = "parallel")]
        let spreads: Vec<f64> = (0..num_sites).into_par_iter().map(spread_of).collect();
        #[cfg(not(feature = "parallel"))]
        let spreads: Vec<f64> = (0..num_sites).map(spread_of).collect();

        let mut sites: Vec<usize> = (0..num_sites).collect();
        sites.sort_by(|&a, &b| spreads[b].total_cmp(&spreads[a]).then(a.cmp(&b)));
        debug!("Branch order by child-bound spread: {:?}", sites);
        Self { sites }
    }

    /// Puts `prefix` first, then the remaining sites in their current order.
    pub fn with_precomputed_prefix(&self, prefix: &[usize]) -> Self {
        let mut sites = prefix.to_vec();
        sites.extend(self.sites.iter().copied().filter(|s| !prefix.contains(s)));
        Self { sites }
    }

    pub fn sites(&self) -> &[usize] {
        &self.sites
    }

    /// The site a node with this assignment branches on, `None` for full assignments.
    pub fn next_site(&self, assignment: &Assignment) -> Option<usize> {
        self.sites
            .iter()
            .copied()
            .find(|&s| assignment.get(s).is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::energy::EnergyMatrix;
    use crate::core::math::BoltzmannCalculator;
    use crate::core::space::{Choice, ConfSpace, Site};

    fn space(n: usize) -> ConfSpace {
        ConfSpace::new(
            (0..n)
                .map(|i| {
                    Site::new(
                        format!("S{}", i),
                        "A",
                        false,
                        vec![Choice::new("A"), Choice::new("A")],
                    )
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn next_site_follows_the_order() {
        let order = BranchOrder {
            sites: vec![2, 0, 1],
        };
        let a = Assignment::unassigned(3);
        assert_eq!(order.next_site(&a), Some(2));
        assert_eq!(order.next_site(&a.with(2, 0)), Some(0));
        assert_eq!(order.next_site(&Assignment::from_choices(&[0, 0, 0])), None);
    }

    #[test]
    fn sites_with_larger_spread_come_first() {
        let space = space(3);
        let mut lower = EnergyMatrix::new(&space);
        lower.set_one_body(1, 0, -4.0);
        lower.set_one_body(2, 1, 1.0);
        let tables = ScoringTables {
            rigid: lower.clone(),
            lower,
            calculator: BoltzmannCalculator::new(),
        };
        let order = BranchOrder::by_spread(&tables, &ChoiceSet::all(&space));
        assert_eq!(order.sites(), &[1, 2, 0]);
    }

    #[test]
    fn precomputed_prefix_goes_first() {
        let order = BranchOrder {
            sites: vec![3, 1, 0, 2],
        };
        let grafted = order.with_precomputed_prefix(&[2, 0]);
        assert_eq!(grafted.sites(), &[2, 0, 3, 1]);
    }
}
