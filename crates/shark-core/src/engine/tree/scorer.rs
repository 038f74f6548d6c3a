use super::node::RemainderBounds;
use super::order::BranchOrder;
use crate::core::energy::{CostOracle, DynamicPruner, EnergyMatrix, PruningMatrix};
use crate::core::math::{BoltzmannCalculator, Weight};
use crate::core::space::{Assignment, AssignmentIndex, ChoiceSet};
use crate::engine::correction::CorrectionMatrix;
use crate::engine::pool::ObjectPool;
use std::sync::Arc;

/// The pairwise tables used for scoring, with statically pruned pairs set to `+inf`.
#[derive(Debug, Clone)]
pub struct ScoringTables {
    pub lower: EnergyMatrix,
    pub rigid: EnergyMatrix,
    pub calculator: BoltzmannCalculator,
}

impl ScoringTables {
    pub fn from_oracle(oracle: &dyn CostOracle) -> Self {
        let pruning = oracle.pruning();
        Self {
            lower: oracle.lower_matrix().with_pruned(pruning),
            rigid: oracle.rigid_matrix().with_pruned(pruning),
            calculator: BoltzmannCalculator::new(),
        }
    }
}

/// The four node scorers of the bound tree.
///
/// The pairwise scorers bound the energy of the assigned sites. The unassigned scorers bound the
/// free energy of all completions of the unassigned sites under a set of legal choices: every
/// unassigned site contributes the Boltzmann sum of its choices, with interactions towards
/// lower-indexed unassigned sites replaced by their most favorable (or least favorable) value.
/// Because each site's term then depends on its own choice only, the sum over completions
/// factorizes into a product over sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeScorer {
    PairwiseLower,
    PairwiseRigid,
    UnassignedLower,
    UnassignedUpper,
}

impl NodeScorer {
    pub fn score(&self, tables: &ScoringTables, index: &AssignmentIndex, choices: &ChoiceSet) -> f64 {
        match self {
            Self::PairwiseLower => assigned_energy(&tables.lower, index),
            Self::PairwiseRigid => assigned_energy(&tables.rigid, index),
            Self::UnassignedLower => relaxed_free_energy(
                &tables.lower,
                index,
                choices,
                &tables.calculator,
                Extremum::Min,
            ),
            Self::UnassignedUpper => relaxed_free_energy(
                &tables.rigid,
                index,
                choices,
                &tables.calculator,
                Extremum::Max,
            ),
        }
    }

    /// Change of the score when `site` gets `choice`. `index` is left unchanged.
    pub fn differential(
        &self,
        tables: &ScoringTables,
        index: &mut AssignmentIndex,
        choices: &ChoiceSet,
        site: usize,
        choice: usize,
    ) -> f64 {
        match self {
            Self::PairwiseLower => site_energy(&tables.lower, index, site, choice),
            Self::PairwiseRigid => site_energy(&tables.rigid, index, site, choice),
            Self::UnassignedLower | Self::UnassignedUpper => {
                let before = self.score(tables, index, choices);
                index.assign(site, choice);
                let after = self.score(tables, index, choices);
                index.unassign(site);
                after - before
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Extremum {
    Min,
    Max,
}

impl Extremum {
    #[inline]
    fn pick(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Min => a.min(b),
            Self::Max => a.max(b),
        }
    }

    fn identity(self) -> f64 {
        match self {
            Self::Min => f64::INFINITY,
            Self::Max => f64::NEG_INFINITY,
        }
    }
}

fn assigned_energy(matrix: &EnergyMatrix, index: &AssignmentIndex) -> f64 {
    let mut energy = 0.0;
    for (i, &(s1, c1)) in index.defined.iter().enumerate() {
        energy += matrix.one_body(s1, c1);
        for &(s2, c2) in &index.defined[..i] {
            energy += matrix.pair(s1, c1, s2, c2);
        }
    }
    energy
}

fn site_energy(matrix: &EnergyMatrix, index: &AssignmentIndex, site: usize, choice: usize) -> f64 {
    let mut energy = matrix.one_body(site, choice);
    for &(s, c) in &index.defined {
        if s != site {
            energy += matrix.pair(site, choice, s, c);
        }
    }
    energy
}

fn relaxed_free_energy(
    matrix: &EnergyMatrix,
    index: &AssignmentIndex,
    choices: &ChoiceSet,
    calculator: &BoltzmannCalculator,
    extremum: Extremum,
) -> f64 {
    if index.undefined.iter().any(|&s| choices.legal(s).is_empty()) {
        return f64::INFINITY;
    }
    let mut ln_total = 0.0;
    for (i, &site) in index.undefined.iter().enumerate() {
        let mut site_weight = Weight::ZERO;
        for &choice in choices.legal(site) {
            let mut energy = site_energy(matrix, index, site, choice);
            for &other in &index.undefined[..i] {
                let best = choices
                    .legal(other)
                    .iter()
                    .map(|&c| matrix.pair(site, choice, other, c))
                    .fold(extremum.identity(), |acc, e| extremum.pick(acc, e));
                energy += best;
            }
            site_weight += calculator.weight(energy);
        }
        if site_weight.is_zero() {
            return f64::INFINITY;
        }
        ln_total += site_weight.ln();
    }
    -calculator.rt() * ln_total
}

/// Partial energies and per-sequence remainder of a freshly scored child.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildScore {
    pub site: usize,
    pub choice: usize,
    pub assignment: Assignment,
    pub partial_lower: f64,
    pub partial_upper: f64,
    pub remainder: RemainderBounds,
}

impl ChildScore {
    pub fn is_valid(&self) -> bool {
        !self.partial_lower.is_nan() && !self.partial_upper.is_nan() && self.remainder.is_valid()
    }

    /// Lower free-energy bound of the child, used to pick the most promising child.
    pub fn lower_energy(&self) -> f64 {
        self.partial_lower + self.remainder.lower
    }
}

/// Snapshot of a node handed to a scoring worker.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub assignment: Assignment,
    pub partial_lower: f64,
    pub partial_upper: f64,
}

/// Read-only scoring context shared by all workers of one state.
pub struct ScoringEnv {
    pub tables: ScoringTables,
    pub order: BranchOrder,
    pub pruning: PruningMatrix,
    pub corrections: Arc<CorrectionMatrix>,
    pub dynamic_pruner: Option<Arc<dyn DynamicPruner>>,
    scratch: ObjectPool<AssignmentIndex>,
}

impl ScoringEnv {
    pub fn new(
        tables: ScoringTables,
        order: BranchOrder,
        pruning: PruningMatrix,
        corrections: Arc<CorrectionMatrix>,
        dynamic_pruner: Option<Arc<dyn DynamicPruner>>,
    ) -> Self {
        Self {
            tables,
            order,
            pruning,
            corrections,
            dynamic_pruner,
            scratch: ObjectPool::new(AssignmentIndex::default),
        }
    }

    /// Legal, unpruned choices at `site` below `assignment`.
    pub fn legal_children(&self, assignment: &Assignment, site: usize, choices: &ChoiceSet) -> Vec<usize> {
        choices
            .legal(site)
            .iter()
            .copied()
            .filter(|&c| !self.pruning.conflicts_with(assignment, site, c))
            .filter(|&c| {
                self.dynamic_pruner
                    .as_ref()
                    .is_none_or(|p| !p.is_pruned(assignment, site, c))
            })
            .collect()
    }

    /// Bounds on the unassigned sites of `assignment` under `choices`.
    pub fn remainder(&self, assignment: &Assignment, choices: &ChoiceSet) -> RemainderBounds {
        if assignment.is_full() {
            return RemainderBounds::NONE;
        }
        let mut index = self.scratch.checkout();
        index.reset(assignment);
        RemainderBounds {
            lower: NodeScorer::UnassignedLower.score(&self.tables, &index, choices),
            upper: NodeScorer::UnassignedUpper.score(&self.tables, &index, choices),
        }
    }

    /// Scores the child of `parent` that assigns `choice` at `site`.
    ///
    /// The child's corrected lower energy is never below the parent's corrected energy plus
    /// the lower-table differential, so corrections found for the parent carry over.
    pub fn score_child(
        &self,
        parent: &NodeSnapshot,
        site: usize,
        choice: usize,
        choices: &ChoiceSet,
    ) -> ChildScore {
        let mut index = self.scratch.checkout();
        index.reset(&parent.assignment);
        let lower_delta =
            NodeScorer::PairwiseLower.differential(&self.tables, &mut index, choices, site, choice);
        let rigid_delta =
            NodeScorer::PairwiseRigid.differential(&self.tables, &mut index, choices, site, choice);
        drop(index);

        let assignment = parent.assignment.with(site, choice);
        let corrected = self
            .corrections
            .corrected_energy(&self.tables.lower, &assignment);
        let partial_lower = corrected.max(parent.partial_lower + lower_delta);
        let remainder = self.remainder(&assignment, choices);
        ChildScore {
            site,
            choice,
            partial_lower,
            partial_upper: parent.partial_upper + rigid_delta,
            remainder,
            assignment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::space::{Choice, ConfSpace, Site};

    fn space(counts: &[usize]) -> ConfSpace {
        ConfSpace::new(
            counts
                .iter()
                .enumerate()
                .map(|(i, &k)| {
                    Site::new(
                        format!("S{}", i),
                        "A",
                        false,
                        (0..k).map(|_| Choice::new("A")).collect(),
                    )
                })
                .collect(),
        )
        .unwrap()
    }

    fn tables(space: &ConfSpace) -> ScoringTables {
        let mut lower = EnergyMatrix::new(space);
        lower.set_one_body(0, 0, -1.0);
        lower.set_one_body(0, 1, 0.5);
        lower.set_one_body(1, 1, -0.3);
        lower.set_pair(0, 0, 1, 0, 0.4);
        lower.set_pair(0, 1, 1, 1, -0.8);
        lower.set_pair(1, 0, 2, 1, 0.2);
        lower.set_pair(0, 1, 2, 0, -0.1);
        let mut rigid = lower.clone();
        rigid.set_pair(0, 0, 1, 0, 1.4);
        rigid.set_pair(1, 1, 2, 1, 0.6);
        rigid.set_one_body(2, 0, 0.3);
        ScoringTables {
            lower,
            rigid,
            calculator: BoltzmannCalculator::new(),
        }
    }

    fn brute_force_z(matrix: &EnergyMatrix, calc: &BoltzmannCalculator, counts: &[usize]) -> Weight {
        let mut total = Weight::ZERO;
        let mut conf = vec![0; counts.len()];
        loop {
            total += calc.weight(matrix.conf_energy(&Assignment::from_choices(&conf)));
            let mut site = 0;
            loop {
                if site == counts.len() {
                    return total;
                }
                conf[site] += 1;
                if conf[site] < counts[site] {
                    break;
                }
                conf[site] = 0;
                site += 1;
            }
        }
    }

    #[test]
    fn pairwise_scores_match_table_energies() {
        let space = space(&[2, 2, 2]);
        let tables = tables(&space);
        let conf = Assignment::from_choices(&[1, 1, 0]);
        let index = AssignmentIndex::new(&conf);
        let choices = ChoiceSet::all(&space);
        let lower = NodeScorer::PairwiseLower.score(&tables, &index, &choices);
        assert!((lower - tables.lower.conf_energy(&conf)).abs() < 1e-12);
        let rigid = NodeScorer::PairwiseRigid.score(&tables, &index, &choices);
        assert!((rigid - tables.rigid.conf_energy(&conf)).abs() < 1e-12);
    }

    #[test]
    fn differential_equals_score_change() {
        let space = space(&[2, 2, 2]);
        let tables = tables(&space);
        let choices = ChoiceSet::all(&space);
        let parent = Assignment::unassigned(3).with(0, 1);
        let mut index = AssignmentIndex::new(&parent);
        for scorer in [
            NodeScorer::PairwiseLower,
            NodeScorer::PairwiseRigid,
            NodeScorer::UnassignedLower,
            NodeScorer::UnassignedUpper,
        ] {
            let before = scorer.score(&tables, &index, &choices);
            let delta = scorer.differential(&tables, &mut index, &choices, 2, 0);
            let child = AssignmentIndex::new(&parent.with(2, 0));
            let after = scorer.score(&tables, &child, &choices);
            assert!((before + delta - after).abs() < 1e-9, "{:?}", scorer);
            assert_eq!(index.undefined, vec![1, 2]);
        }
    }

    #[test]
    fn root_relaxations_bracket_the_partition_function() {
        let counts = [2, 2, 2];
        let space = space(&counts);
        let tables = tables(&space);
        let choices = ChoiceSet::all(&space);
        let root = AssignmentIndex::new(&Assignment::unassigned(3));
        let calc = &tables.calculator;

        let upper = calc.weight(NodeScorer::UnassignedLower.score(&tables, &root, &choices));
        let lower = calc.weight(NodeScorer::UnassignedUpper.score(&tables, &root, &choices));
        assert!(upper >= brute_force_z(&tables.lower, calc, &counts));
        assert!(lower <= brute_force_z(&tables.rigid, calc, &counts));
    }

    #[test]
    fn pruned_pairs_remove_weight() {
        let space = space(&[2, 1]);
        let mut lower = EnergyMatrix::new(&space);
        lower.set_one_body(0, 0, -5.0);
        let mut pruning = PruningMatrix::new();
        pruning.prune_pair(0, 0, 1, 0);
        let tables = ScoringTables {
            lower: lower.with_pruned(&pruning),
            rigid: lower.with_pruned(&pruning),
            calculator: BoltzmannCalculator::new(),
        };
        let choices = ChoiceSet::all(&space);
        let blocked = AssignmentIndex::new(&Assignment::unassigned(2).with(0, 0));
        assert_eq!(
            NodeScorer::UnassignedLower.score(&tables, &blocked, &choices),
            f64::INFINITY
        );
        let open = AssignmentIndex::new(&Assignment::unassigned(2).with(0, 1));
        assert!(NodeScorer::UnassignedLower.score(&tables, &open, &choices).abs() < 1e-9);
    }

    #[test]
    fn unsatisfiable_remainder_has_infinite_free_energy() {
        let space = space(&[1, 1]);
        let mut lower = EnergyMatrix::new(&space);
        lower.set_pair(0, 0, 1, 0, f64::INFINITY);
        let tables = ScoringTables {
            rigid: lower.clone(),
            lower,
            calculator: BoltzmannCalculator::new(),
        };
        let choices = ChoiceSet::all(&space);
        let root = AssignmentIndex::new(&Assignment::unassigned(2));
        assert_eq!(
            NodeScorer::UnassignedUpper.score(&tables, &root, &choices),
            f64::INFINITY
        );
    }

    #[test]
    fn score_child_keeps_parent_corrections() {
        let space = space(&[2, 2, 2]);
        let tables = tables(&space);
        let choices = ChoiceSet::all(&space);
        let env = ScoringEnv::new(
            tables.clone(),
            BranchOrder::natural(3),
            PruningMatrix::new(),
            Arc::new(CorrectionMatrix::new()),
            None,
        );
        let assignment = Assignment::unassigned(3).with(0, 0);
        let parent = NodeSnapshot {
            partial_lower: tables.lower.conf_energy(&assignment) + 2.0,
            partial_upper: tables.rigid.conf_energy(&assignment),
            assignment,
        };
        let child = env.score_child(&parent, 1, 0, &choices);
        let plain = tables.lower.conf_energy(&child.assignment);
        assert!((child.partial_lower - (plain + 2.0)).abs() < 1e-12);
        assert!(child.is_valid());
    }
}
