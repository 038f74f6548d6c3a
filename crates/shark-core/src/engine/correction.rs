use crate::core::energy::EnergyMatrix;
use crate::core::space::{Assignment, ChoiceTuple};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Non-negative energy corrections layered over the lower-bound table.
///
/// A correction for tuple `t` states that every conformation containing `t` has an exact energy
/// at least `lower(conf) + correction(t)`. Corrections of disjoint tuples add up, so the
/// corrected energy of an assignment sums a set of pairwise disjoint contained tuples, chosen
/// greedily from the largest correction down.
///
/// The table is written from the correction listener and read from scoring workers.
#[derive(Debug, Default)]
pub struct CorrectionMatrix {
    corrections: RwLock<HashMap<ChoiceTuple, f64>>,
}

impl CorrectionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a correction, keeping the larger value if the tuple is already known.
    /// Returns `true` if the table changed.
    pub fn insert(&self, tuple: ChoiceTuple, correction: f64) -> bool {
        if !(correction > 0.0) || !correction.is_finite() {
            return false;
        }
        let mut corrections = self.corrections.write();
        match corrections.get_mut(&tuple) {
            Some(existing) if *existing >= correction => false,
            Some(existing) => {
                *existing = correction;
                true
            }
            None => {
                corrections.insert(tuple, correction);
                true
            }
        }
    }

    pub fn get(&self, tuple: &ChoiceTuple) -> Option<f64> {
        self.corrections.read().get(tuple).copied()
    }

    pub fn contains(&self, tuple: &ChoiceTuple) -> bool {
        self.corrections.read().contains_key(tuple)
    }

    pub fn len(&self) -> usize {
        self.corrections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.corrections.read().is_empty()
    }

    /// Snapshot of every correction, sorted by tuple.
    pub fn entries(&self) -> Vec<(ChoiceTuple, f64)> {
        let mut entries: Vec<_> = self
            .corrections
            .read()
            .iter()
            .map(|(t, c)| (t.clone(), *c))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Total correction applicable to `assignment`.
    pub fn correction_for(&self, assignment: &Assignment) -> f64 {
        let corrections = self.corrections.read();
        let mut applicable: Vec<(&ChoiceTuple, f64)> = corrections
            .iter()
            .filter(|(tuple, _)| tuple.is_contained_in(assignment))
            .map(|(tuple, c)| (tuple, *c))
            .collect();
        if applicable.is_empty() {
            return 0.0;
        }
        applicable.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let mut used = vec![false; assignment.num_sites()];
        let mut total = 0.0;
        for (tuple, correction) in applicable {
            if tuple.sites().any(|s| used[s]) {
                continue;
            }
            for s in tuple.sites() {
                used[s] = true;
            }
            total += correction;
        }
        total
    }

    /// Lower-table energy of the assigned sites plus the applicable corrections.
    pub fn corrected_energy(&self, lower: &EnergyMatrix, assignment: &Assignment) -> f64 {
        lower.conf_energy(assignment) + self.correction_for(assignment)
    }

    /// Copies corrections of a smaller space in, moving each tuple through `mapping`.
    pub fn merge_remapped(&self, other: &CorrectionMatrix, mapping: &[usize]) -> usize {
        other
            .entries()
            .into_iter()
            .filter(|(tuple, correction)| self.insert(tuple.remap(mapping), *correction))
            .count()
    }
}
