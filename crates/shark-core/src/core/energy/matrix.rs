use crate::core::space::{Assignment, ChoiceTuple, ConfSpace};

/// One-body and pairwise energy tables over every `(site, choice)` of a space.
///
/// Pair energies are stored densely and symmetrically; spaces handled by this engine are small
/// enough per state that a flat table is both the simplest and the fastest layout.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyMatrix {
    offsets: Vec<usize>,
    counts: Vec<usize>,
    one_body: Vec<f64>,
    pair: Vec<f64>,
}

impl EnergyMatrix {
    pub fn new(space: &ConfSpace) -> Self {
        let counts: Vec<usize> = space.sites().iter().map(|s| s.num_choices()).collect();
        Self::with_counts(counts)
    }

    pub fn with_counts(counts: Vec<usize>) -> Self {
        let mut offsets = Vec::with_capacity(counts.len());
        let mut total = 0;
        for &count in &counts {
            offsets.push(total);
            total += count;
        }
        Self {
            offsets,
            counts,
            one_body: vec![0.0; total],
            pair: vec![0.0; total * total],
        }
    }

    #[inline]
    pub fn num_sites(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    pub fn num_choices(&self, site: usize) -> usize {
        self.counts[site]
    }

    #[inline]
    fn flat(&self, site: usize, choice: usize) -> usize {
        self.offsets[site] + choice
    }

    #[inline]
    fn total(&self) -> usize {
        self.one_body.len()
    }

    #[inline]
    pub fn one_body(&self, site: usize, choice: usize) -> f64 {
        self.one_body[self.flat(site, choice)]
    }

    #[inline]
    pub fn pair(&self, site1: usize, choice1: usize, site2: usize, choice2: usize) -> f64 {
        self.pair[self.flat(site1, choice1) * self.total() + self.flat(site2, choice2)]
    }

    pub fn set_one_body(&mut self, site: usize, choice: usize, energy: f64) {
        let i = self.flat(site, choice);
        self.one_body[i] = energy;
    }

    pub fn set_pair(&mut self, site1: usize, choice1: usize, site2: usize, choice2: usize, energy: f64) {
        let n = self.total();
        let a = self.flat(site1, choice1);
        let b = self.flat(site2, choice2);
        self.pair[a * n + b] = energy;
        self.pair[b * n + a] = energy;
    }

    /// Energy of the assigned sites only: one-body terms plus pairs among assigned sites.
    pub fn conf_energy(&self, assignment: &Assignment) -> f64 {
        let assigned: Vec<(usize, usize)> = assignment.assigned().collect();
        self.pairs_energy(&assigned)
    }

    pub fn tuple_energy(&self, tuple: &ChoiceTuple) -> f64 {
        self.pairs_energy(tuple.pairs())
    }

    fn pairs_energy(&self, assigned: &[(usize, usize)]) -> f64 {
        let mut energy = 0.0;
        for (i, &(s1, c1)) in assigned.iter().enumerate() {
            energy += self.one_body(s1, c1);
            for &(s2, c2) in &assigned[..i] {
                energy += self.pair(s1, c1, s2, c2);
            }
        }
        energy
    }

    /// Per-site and per-pair decomposition of [`conf_energy`](Self::conf_energy).
    pub fn breakdown(&self, assignment: &Assignment) -> EnergyBreakdown {
        let mut out = EnergyBreakdown::new(self.num_sites());
        let assigned: Vec<(usize, usize)> = assignment.assigned().collect();
        for (i, &(s1, c1)) in assigned.iter().enumerate() {
            out.add_one_body(s1, self.one_body(s1, c1));
            for &(s2, c2) in &assigned[..i] {
                out.add_pair(s1, s2, self.pair(s1, c1, s2, c2));
            }
        }
        out
    }

    /// Sets every entry involving a pruned pair to `+inf`, so relaxations and conformation
    /// energies give such combinations zero weight.
    pub fn with_pruned(&self, pruning: &super::PruningMatrix) -> Self {
        let mut out = self.clone();
        for (s1, c1, s2, c2) in pruning.pruned_pairs() {
            out.set_pair(s1, c1, s2, c2, f64::INFINITY);
        }
        out
    }

    /// A matrix over the given sites only, in the given order.
    pub fn restrict(&self, sites: &[usize]) -> Self {
        let counts = sites.iter().map(|&s| self.counts[s]).collect();
        let mut out = Self::with_counts(counts);
        for (i, &s1) in sites.iter().enumerate() {
            for c1 in 0..self.counts[s1] {
                out.set_one_body(i, c1, self.one_body(s1, c1));
                for (j, &s2) in sites.iter().enumerate().take(i) {
                    for c2 in 0..self.counts[s2] {
                        out.set_pair(i, c1, j, c2, self.pair(s1, c1, s2, c2));
                    }
                }
            }
        }
        out
    }

    /// Checks `self <= other` entry by entry, returning the first offending entry.
    pub fn first_entry_above(&self, other: &EnergyMatrix) -> Option<(usize, usize)> {
        for site in 0..self.num_sites() {
            for choice in 0..self.counts[site] {
                if self.one_body(site, choice) > other.one_body(site, choice) {
                    return Some((site, choice));
                }
                for s2 in 0..site {
                    for c2 in 0..self.counts[s2] {
                        if self.pair(site, choice, s2, c2) > other.pair(site, choice, s2, c2) {
                            return Some((site, choice));
                        }
                    }
                }
            }
        }
        None
    }

    pub fn same_shape(&self, other: &EnergyMatrix) -> bool {
        self.counts == other.counts
    }
}

/// Energy of one conformation split into one-body and pair contributions.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyBreakdown {
    num_sites: usize,
    one_body: Vec<f64>,
    pair: Vec<f64>,
}

impl EnergyBreakdown {
    pub fn new(num_sites: usize) -> Self {
        Self {
            num_sites,
            one_body: vec![0.0; num_sites],
            pair: vec![0.0; num_sites * num_sites],
        }
    }

    #[inline]
    pub fn num_sites(&self) -> usize {
        self.num_sites
    }

    #[inline]
    pub fn one_body(&self, site: usize) -> f64 {
        self.one_body[site]
    }

    #[inline]
    pub fn pair(&self, site1: usize, site2: usize) -> f64 {
        self.pair[site1 * self.num_sites + site2]
    }

    pub fn add_one_body(&mut self, site: usize, energy: f64) {
        self.one_body[site] += energy;
    }

    pub fn add_pair(&mut self, site1: usize, site2: usize, energy: f64) {
        self.pair[site1 * self.num_sites + site2] += energy;
        if site1 != site2 {
            self.pair[site2 * self.num_sites + site1] += energy;
        }
    }

    pub fn total(&self) -> f64 {
        let pairs: f64 = (0..self.num_sites)
            .flat_map(|i| (0..i).map(move |j| (i, j)))
            .map(|(i, j)| self.pair(i, j))
            .sum();
        self.one_body.iter().sum::<f64>() + pairs
    }

    /// Entry-wise `self - other`.
    pub fn difference(&self, other: &EnergyBreakdown) -> EnergyBreakdown {
        EnergyBreakdown {
            num_sites: self.num_sites,
            one_body: self
                .one_body
                .iter()
                .zip(&other.one_body)
                .map(|(a, b)| a - b)
                .collect(),
            pair: self
                .pair
                .iter()
                .zip(&other.pair)
                .map(|(a, b)| a - b)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> EnergyMatrix {
        let mut m = EnergyMatrix::with_counts(vec![2, 2, 1]);
        m.set_one_body(0, 0, 1.0);
        m.set_one_body(0, 1, 2.0);
        m.set_one_body(1, 0, -1.0);
        m.set_one_body(1, 1, 0.5);
        m.set_one_body(2, 0, 3.0);
        m.set_pair(0, 1, 1, 0, -2.0);
        m.set_pair(2, 0, 0, 1, 0.25);
        m
    }

    #[test]
    fn pairs_are_symmetric() {
        let m = matrix();
        assert_eq!(m.pair(0, 1, 1, 0), -2.0);
        assert_eq!(m.pair(1, 0, 0, 1), -2.0);
    }

    #[test]
    fn conf_energy_counts_only_assigned_sites() {
        let m = matrix();
        let partial = Assignment::unassigned(3).with(0, 1).with(1, 0);
        assert_eq!(m.conf_energy(&partial), 2.0 - 1.0 - 2.0);

        let full = Assignment::from_choices(&[1, 0, 0]);
        assert_eq!(m.conf_energy(&full), 2.0 - 1.0 + 3.0 - 2.0 + 0.25);
    }

    #[test]
    fn breakdown_total_matches_conf_energy() {
        let m = matrix();
        let full = Assignment::from_choices(&[1, 0, 0]);
        let breakdown = m.breakdown(&full);
        assert!((breakdown.total() - m.conf_energy(&full)).abs() < 1e-12);
        assert_eq!(breakdown.pair(1, 0), -2.0);
    }

    #[test]
    fn restrict_reindexes_sites() {
        let m = matrix();
        let r = m.restrict(&[2, 0]);
        assert_eq!(r.num_sites(), 2);
        assert_eq!(r.one_body(0, 0), 3.0);
        assert_eq!(r.pair(0, 0, 1, 1), 0.25);
    }

    #[test]
    fn first_entry_above_detects_violations() {
        let lower = matrix();
        let mut rigid = lower.clone();
        assert_eq!(lower.first_entry_above(&rigid), None);
        rigid.set_pair(0, 1, 1, 0, -3.0);
        assert_eq!(lower.first_entry_above(&rigid), Some((1, 0)));
    }
}
