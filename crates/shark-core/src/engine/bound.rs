use super::queue::{NodeQueue, QueueEntry};
use super::tree::NodeId;
use crate::core::math::{BoltzmannCalculator, Weight};
use crate::core::space::{ChoiceSet, Sequence};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Relative widths below this are treated as converged.
const NEGLIGIBLE_WIDTH: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// More work can still tighten the bound.
    Estimating,
    /// The relative gap reached the target.
    Estimated,
    /// The upper bound fell below the stability threshold, or the state has no weight at all.
    Unstable,
    /// No node is left to refine, but the target was not reached.
    Exhausted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Estimating => "estimating",
            Status::Estimated => "estimated",
            Status::Unstable => "unstable",
            Status::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundStatistics {
    pub internal_processed: usize,
    pub leaves_minimized: usize,
    pub partial_minimizations: usize,
    pub corrections_applied: usize,
    pub reduction_by_minimization: Weight,
    pub reduction_by_expansion: Weight,
    pub internal_time: Duration,
    pub leaf_time: Duration,
}

/// Snapshot of a sequence bound as reported to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundResult {
    pub status: Status,
    pub lower: Weight,
    pub upper: Weight,
    pub epsilon: f64,
    pub num_minimized: usize,
}

impl BoundResult {
    /// Free-energy interval `[-RT ln upper, -RT ln lower]`.
    pub fn free_energy(&self, calculator: &BoltzmannCalculator) -> (f64, f64) {
        (
            calculator.free_energy(self.upper),
            calculator.free_energy(self.lower),
        )
    }
}

/// Relative gap `(upper - lower) / upper` of a weight interval.
pub fn epsilon(lower: Weight, upper: Weight) -> f64 {
    if upper.is_zero() {
        return 0.0;
    }
    let gap = upper.saturating_sub(lower).ratio(upper);
    if gap < NEGLIGIBLE_WIDTH { 0.0 } else { gap }
}

/// The partition-function bound of one sequence.
///
/// Every node of the tree that contributes to this sequence sits in exactly one of the four
/// collections: the fringe, the internal and leaf batches, or the finished list. The bound is
/// the sum of their weight intervals.
#[derive(Debug, Clone)]
pub struct SequenceBound {
    pub(crate) sequence: Sequence,
    pub(crate) choices: Arc<ChoiceSet>,
    pub(crate) fringe: NodeQueue,
    pub(crate) internal: NodeQueue,
    pub(crate) leaves: NodeQueue,
    pub(crate) finished: Vec<NodeId>,
    pub(crate) finished_weight: Weight,
    pub(crate) stats: BoundStatistics,
    lower: Weight,
    upper: Weight,
    epsilon: f64,
    status: Status,
}

impl SequenceBound {
    pub(crate) fn new(sequence: Sequence, choices: ChoiceSet) -> Self {
        Self {
            sequence,
            choices: Arc::new(choices),
            fringe: NodeQueue::new(),
            internal: NodeQueue::new(),
            leaves: NodeQueue::new(),
            finished: Vec::new(),
            finished_weight: Weight::ZERO,
            stats: BoundStatistics::default(),
            lower: Weight::ZERO,
            upper: Weight::ZERO,
            epsilon: 1.0,
            status: Status::Estimating,
        }
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn lower(&self) -> Weight {
        self.lower
    }

    pub fn upper(&self) -> Weight {
        self.upper
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub fn statistics(&self) -> &BoundStatistics {
        &self.stats
    }

    /// Work units spent on this bound: processed internal nodes, minimized leaves and
    /// partial minimizations.
    pub fn work_done(&self) -> usize {
        self.stats.internal_processed + self.stats.leaves_minimized + self.stats.partial_minimizations
    }

    pub(crate) fn has_active_nodes(&self) -> bool {
        !self.fringe.is_empty() || !self.internal.is_empty() || !self.leaves.is_empty()
    }

    pub(crate) fn num_queued(&self) -> usize {
        self.fringe.len() + self.internal.len() + self.leaves.len()
    }

    pub(crate) fn finish(&mut self, id: NodeId, weight: Weight) {
        self.finished.push(id);
        self.finished_weight += weight;
    }

    pub(crate) fn enqueue(&mut self, entry: QueueEntry) {
        self.fringe.push(entry);
    }

    /// Recomputes the aggregate from the four collections.
    pub(crate) fn update_bound(&mut self) {
        let queues = [&self.fringe, &self.internal, &self.leaves];
        self.lower = queues.iter().map(|q| q.lower_sum()).sum::<Weight>() + self.finished_weight;
        self.upper = queues.iter().map(|q| q.upper_sum()).sum::<Weight>() + self.finished_weight;
        self.epsilon = epsilon(self.lower, self.upper);
    }

    pub fn result(&self) -> BoundResult {
        BoundResult {
            status: self.status,
            lower: self.lower,
            upper: self.upper,
            epsilon: self.epsilon,
            num_minimized: self.stats.leaves_minimized,
        }
    }
}
