use super::bound::{BoundResult, SequenceBound, Status};
use super::config::BoundConfig;
use super::correction::CorrectionMatrix;
use super::error::EngineError;
use super::executor::TaskExecutor;
use super::progress::{Progress, ProgressReporter};
use super::queue::QueueEntry;
use super::tree::{BoundTree, BranchOrder, NodeId, ScoringEnv, ScoringTables};
use crate::core::energy::{CostOracle, DynamicPruner, OracleError};
use crate::core::math::{BoltzmannCalculator, Weight};
use crate::core::space::{ChoiceSet, ChoiceTuple, ConfSpace, Sequence};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Running averages of task durations, used to size the phase batches.
#[derive(Debug, Clone, Default)]
pub(crate) struct PhaseTiming {
    internal_mean: f64,
    internal_count: u64,
    leaf_mean: f64,
    leaf_count: u64,
    pub(crate) max_minimizations: usize,
}

impl PhaseTiming {
    fn new() -> Self {
        Self {
            max_minimizations: 1,
            ..Self::default()
        }
    }

    pub(crate) fn record_internal(&mut self, elapsed: Duration) {
        self.internal_count += 1;
        self.internal_mean +=
            (elapsed.as_secs_f64() - self.internal_mean) / self.internal_count as f64;
    }

    pub(crate) fn record_leaf(&mut self, elapsed: Duration) {
        self.leaf_count += 1;
        self.leaf_mean += (elapsed.as_secs_f64() - self.leaf_mean) / self.leaf_count as f64;
    }

    pub(crate) fn max_internal(&self, ratio: f64) -> usize {
        if self.leaf_mean > 0.0 && self.internal_mean > 0.0 {
            ((ratio * self.leaf_mean / self.internal_mean).floor() as usize).max(1)
        } else {
            1
        }
    }
}

/// Partition-function bounds for many sequences of one state over a single shared tree.
///
/// Every sequence gets its own [`SequenceBound`], created on first use from the nodes the tree
/// already holds. Work done for one sequence (expanded nodes, minimized leaves, corrections) is
/// reused by every other sequence it is compatible with.
pub struct MultiSequenceBound {
    pub(crate) oracle: Arc<dyn CostOracle>,
    pub(crate) config: BoundConfig,
    pub(crate) env: Arc<ScoringEnv>,
    pub(crate) tree: BoundTree,
    pub(crate) bounds: HashMap<Sequence, SequenceBound>,
    pub(crate) loop_tasks: TaskExecutor,
    pub(crate) oracle_tasks: TaskExecutor,
    pub(crate) corrected_tuples: HashSet<ChoiceTuple>,
    pub(crate) correction_failure: Arc<Mutex<Option<OracleError>>>,
    pub(crate) timing: PhaseTiming,
    pub(crate) stability_threshold: Option<Weight>,
    pub(crate) reporter: Arc<ProgressReporter<'static>>,
}

impl MultiSequenceBound {
    #[instrument(skip_all, name = "bound_setup", fields(sites = oracle.space().num_sites()))]
    pub fn new(
        oracle: Arc<dyn CostOracle>,
        config: BoundConfig,
        reporter: Arc<ProgressReporter<'static>>,
    ) -> Result<Self, EngineError> {
        let space = oracle.space();
        let tables = ScoringTables::from_oracle(oracle.as_ref());
        if !tables.lower.same_shape(&tables.rigid) {
            return Err(EngineError::InvalidProblem(
                "lower and rigid tables differ in shape".to_string(),
            ));
        }
        let order = BranchOrder::by_spread(&tables, &ChoiceSet::all(space));
        let env = ScoringEnv::new(
            tables,
            order,
            oracle.pruning().clone(),
            Arc::new(CorrectionMatrix::new()),
            None,
        );

        let loop_tasks =
            TaskExecutor::start("bound-loop", config.parallelism, config.queue_capacity)?;
        let oracle_tasks =
            TaskExecutor::start("bound-oracle", config.parallelism, config.queue_capacity)?;

        debug!(
            "Bound engine ready for {} sites ({} pruned pairs).",
            space.num_sites(),
            oracle.pruning().len()
        );
        Ok(Self {
            tree: BoundTree::new(space.num_sites(), 0.0, 0.0),
            stability_threshold: config.stability_threshold,
            oracle,
            config,
            env: Arc::new(env),
            bounds: HashMap::new(),
            loop_tasks,
            oracle_tasks,
            corrected_tuples: HashSet::new(),
            correction_failure: Arc::new(Mutex::new(None)),
            timing: PhaseTiming::new(),
            reporter,
        })
    }

    /// Installs a dynamic pruner consulted whenever children are generated.
    pub fn with_dynamic_pruner(mut self, pruner: Arc<dyn DynamicPruner>) -> Self {
        self.rebuild_env(self.env.order.clone(), Some(pruner));
        self
    }

    pub(crate) fn rebuild_env(
        &mut self,
        order: BranchOrder,
        pruner: Option<Arc<dyn DynamicPruner>>,
    ) {
        self.env = Arc::new(ScoringEnv::new(
            self.env.tables.clone(),
            order,
            self.env.pruning.clone(),
            self.env.corrections.clone(),
            pruner,
        ));
    }

    pub fn space(&self) -> &ConfSpace {
        self.oracle.space()
    }

    pub fn oracle(&self) -> &Arc<dyn CostOracle> {
        &self.oracle
    }

    pub fn config(&self) -> &BoundConfig {
        &self.config
    }

    pub fn tree(&self) -> &BoundTree {
        &self.tree
    }

    pub fn branch_order(&self) -> &BranchOrder {
        &self.env.order
    }

    pub fn corrections(&self) -> &CorrectionMatrix {
        &self.env.corrections
    }

    pub fn calculator(&self) -> &BoltzmannCalculator {
        &self.env.tables.calculator
    }

    pub fn stability_threshold(&self) -> Option<Weight> {
        self.stability_threshold
    }

    /// Sets the weight below which a bound that has minimized something counts as unstable.
    pub fn set_stability_threshold(&mut self, threshold: Option<Weight>) {
        self.stability_threshold = threshold;
    }

    pub fn bound(&self, sequence: &Sequence) -> Option<&SequenceBound> {
        self.bounds.get(sequence)
    }

    pub fn result(&self, sequence: &Sequence) -> Option<BoundResult> {
        self.bounds.get(sequence).map(SequenceBound::result)
    }

    pub fn num_sequences(&self) -> usize {
        self.bounds.len()
    }

    /// Tightens the bound of `sequence` by at most `max_work` work units, or until it reaches
    /// the target epsilon or becomes unstable.
    #[instrument(skip_all, name = "bound_compute", fields(sequence = %sequence, max_work))]
    pub fn compute(
        &mut self,
        sequence: &Sequence,
        max_work: usize,
    ) -> Result<BoundResult, EngineError> {
        if sequence.num_sites() != self.space().num_sites() {
            return Err(EngineError::InvalidProblem(format!(
                "sequence has {} sites, space has {}",
                sequence.num_sites(),
                self.space().num_sites()
            )));
        }
        let mut bound = match self.bounds.remove(sequence) {
            Some(bound) => bound,
            None => self.create_bound(sequence)?,
        };
        match self.compute_bound(&mut bound, max_work) {
            Ok(result) => {
                self.bounds.insert(sequence.clone(), bound);
                Ok(result)
            }
            Err(e) => {
                // A failed phase can leave nodes outside every queue. The next call rebuilds
                // the bound from the tree.
                warn!("Discarding the bound for {} after an error: {}", sequence, e);
                Err(e)
            }
        }
    }

    fn compute_bound(
        &mut self,
        bound: &mut SequenceBound,
        max_work: usize,
    ) -> Result<BoundResult, EngineError> {
        if bound.status() != Status::Estimating {
            return Ok(bound.result());
        }
        let start_work = bound.work_done();
        let target = self.config.target_epsilon;
        bound.update_bound();

        if bound.finished.is_empty() && bound.has_active_nodes() {
            self.run_until_nonzero(bound)?;
        }

        let mut stalled = false;
        while bound.epsilon() > target
            && bound.work_done() - start_work < max_work
            && self.is_stable(bound)
        {
            if !bound.has_active_nodes() || !self.tighten(bound)? {
                stalled = true;
                break;
            }
        }

        self.drain_oracle_tasks()?;

        let status = if !self.is_stable(bound) {
            Status::Unstable
        } else if bound.epsilon() <= target {
            if bound.lower().is_zero() {
                Status::Unstable
            } else {
                Status::Estimated
            }
        } else if stalled {
            Status::Exhausted
        } else {
            Status::Estimating
        };
        bound.set_status(status);

        debug!(
            status = %status,
            epsilon = bound.epsilon(),
            work = bound.work_done() - start_work,
            "Bound for {} updated: [{}, {}].",
            bound.sequence(),
            bound.lower(),
            bound.upper()
        );
        Ok(bound.result())
    }

    pub(crate) fn is_stable(&self, bound: &SequenceBound) -> bool {
        match self.stability_threshold {
            None => true,
            Some(threshold) => bound.upper() >= threshold,
        }
    }

    /// Builds the bound of a sequence seen for the first time from the existing tree.
    pub(crate) fn create_bound(&mut self, sequence: &Sequence) -> Result<SequenceBound, EngineError> {
        let choices = sequence.choices(self.space());
        let mut bound = SequenceBound::new(sequence.clone(), choices);
        let calculator = self.env.tables.calculator;

        let mut fringe = Vec::new();
        let mut stack = vec![self.tree.root()];
        while let Some(id) = stack.pop() {
            let node = self.node(id)?;
            if let Some(energy) = node.minimized_energy() {
                bound.finish(id, calculator.weight(energy));
                continue;
            }
            let site = match self.env.order.next_site(node.assignment()) {
                Some(site) if !node.children().is_empty() => site,
                _ => {
                    fringe.push(id);
                    continue;
                }
            };
            let legal = self
                .env
                .legal_children(node.assignment(), site, &bound.choices);
            if legal.is_empty() {
                continue;
            }
            let found: Vec<NodeId> = legal
                .iter()
                .filter_map(|&c| self.tree.find_child(id, site, c))
                .collect();
            if found.len() == legal.len() {
                stack.extend(found);
            } else {
                fringe.push(id);
            }
        }

        self.score_remainders(&bound, &fringe)?;
        for id in fringe {
            let entry = self.entry_for(id, sequence)?;
            bound.enqueue(entry);
        }
        bound.update_bound();
        info!(
            fringe = bound.fringe.len(),
            finished = bound.finished.len(),
            "Created bound for {}.",
            sequence
        );
        Ok(bound)
    }

    /// Scores the remainder bounds missing for `bound`'s sequence on the given nodes.
    fn score_remainders(&mut self, bound: &SequenceBound, ids: &[NodeId]) -> Result<(), EngineError> {
        let sink = Arc::new(Mutex::new(Vec::new()));
        for &id in ids {
            let node = self.node(id)?;
            if node.has_remainder(&bound.sequence) {
                continue;
            }
            let env = self.env.clone();
            let choices = bound.choices.clone();
            let assignment = node.assignment().clone();
            let sink = sink.clone();
            self.loop_tasks.submit(
                move || env.remainder(&assignment, &choices),
                move |remainder| sink.lock().push((id, remainder)),
            )?;
        }
        self.loop_tasks.wait_for_finish()?;
        for (id, remainder) in std::mem::take(&mut *sink.lock()) {
            self.tree.set_remainder(id, &bound.sequence, remainder);
        }
        Ok(())
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&super::tree::BoundNode, EngineError> {
        self.tree
            .get(id)
            .ok_or_else(|| EngineError::Internal(format!("unknown node {:?}", id)))
    }

    pub(crate) fn entry_for(
        &self,
        id: NodeId,
        sequence: &Sequence,
    ) -> Result<QueueEntry, EngineError> {
        let node = self.node(id)?;
        let weights = node
            .weights(sequence, &self.env.tables.calculator)
            .ok_or_else(|| {
                EngineError::Internal(format!(
                    "node {} has no bounds for {}",
                    node.assignment(),
                    sequence
                ))
            })?;
        Ok(QueueEntry::new(id, weights))
    }

    /// Queues a tuple-restricted minimization unless the tuple was queued before. Returns
    /// `true` if a new minimization was queued.
    pub(crate) fn submit_correction(&mut self, tuple: ChoiceTuple) -> Result<bool, EngineError> {
        if !self.corrected_tuples.insert(tuple.clone()) {
            return Ok(false);
        }
        super::tasks::energy_correction::submit(
            &self.oracle_tasks,
            self.oracle.clone(),
            self.env.clone(),
            self.correction_failure.clone(),
            tuple,
        )?;
        Ok(true)
    }

    pub(crate) fn drain_oracle_tasks(&mut self) -> Result<(), EngineError> {
        self.oracle_tasks.wait_for_finish()?;
        if let Some(error) = self.correction_failure.lock().take() {
            return Err(error.into());
        }
        Ok(())
    }

    pub(crate) fn report(&self, event: Progress) {
        self.reporter.report(event);
    }
}
