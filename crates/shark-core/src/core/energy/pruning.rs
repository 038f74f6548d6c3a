use crate::core::space::Assignment;
use std::collections::HashSet;

/// Statically pruned pairs of `(site, choice)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruningMatrix {
    pairs: HashSet<(usize, usize, usize, usize)>,
}

impl PruningMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(site1: usize, choice1: usize, site2: usize, choice2: usize) -> (usize, usize, usize, usize) {
        if site1 < site2 {
            (site1, choice1, site2, choice2)
        } else {
            (site2, choice2, site1, choice1)
        }
    }

    pub fn prune_pair(&mut self, site1: usize, choice1: usize, site2: usize, choice2: usize) {
        self.pairs.insert(Self::key(site1, choice1, site2, choice2));
    }

    #[inline]
    pub fn is_pair_pruned(&self, site1: usize, choice1: usize, site2: usize, choice2: usize) -> bool {
        !self.pairs.is_empty() && self.pairs.contains(&Self::key(site1, choice1, site2, choice2))
    }

    /// Whether assigning `choice` at `site` would pair it with a pruned partner in `assignment`.
    pub fn conflicts_with(&self, assignment: &Assignment, site: usize, choice: usize) -> bool {
        assignment
            .assigned()
            .any(|(s, c)| s != site && self.is_pair_pruned(site, choice, s, c))
    }

    pub fn pruned_pairs(&self) -> impl Iterator<Item = (usize, usize, usize, usize)> + '_ {
        self.pairs.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Pruned pairs among the given sites, reindexed to their position in `sites`.
    pub fn restrict(&self, sites: &[usize]) -> Self {
        let position = |s: usize| sites.iter().position(|&x| x == s);
        let mut out = Self::new();
        for (s1, c1, s2, c2) in self.pruned_pairs() {
            if let (Some(a), Some(b)) = (position(s1), position(s2)) {
                out.prune_pair(a, c1, b, c2);
            }
        }
        out
    }
}

/// Dynamic pruning hook consulted while generating children.
pub trait DynamicPruner: Send + Sync {
    fn is_pruned(&self, parent: &Assignment, site: usize, choice: usize) -> bool;
}
