use super::bound::SequenceBound;
use super::error::EngineError;
use super::multi::MultiSequenceBound;
use super::progress::Progress;
use super::queue::QueueEntry;
use super::tasks::energy_correction::{select_candidates, shared_tuple};
use super::tasks::scoring::{self, DrillLevel};
use super::tree::{ChildScore, NodeId, NodeSnapshot};
use crate::core::energy::{MinimizedConf, OracleError};
use crate::core::math::Weight;
use crate::core::space::ChoiceTuple;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Internal nodes from the top of the fringe considered for partial minimization.
const PREMINIMIZE_CANDIDATES: usize = 8;
/// Partial minimization only pays off once a node fixes this many sites.
const PREMINIMIZE_MIN_LEVEL: usize = 3;

enum InternalOutcome {
    Expanded {
        parent: NodeId,
        scored: Vec<ChildScore>,
        known: Vec<NodeId>,
        elapsed: Duration,
    },
    Drilled {
        parent: NodeId,
        levels: Vec<DrillLevel>,
        elapsed: Duration,
    },
}

struct LeafOutcome {
    id: NodeId,
    minimized: Result<MinimizedConf, OracleError>,
    candidates: Vec<ChoiceTuple>,
    elapsed: Duration,
}

/// Nodes produced by one internal batch.
#[derive(Default)]
struct InternalBatch {
    new_nodes: Vec<NodeId>,
    drilled_leaves: Vec<NodeId>,
}

impl MultiSequenceBound {
    /// One phase of the tightening loop. Returns `true` if any work was done.
    pub(crate) fn tighten(&mut self, bound: &mut SequenceBound) -> Result<bool, EngineError> {
        let previous_epsilon = bound.epsilon();
        let previous_work = bound.work_done();

        // === Phase 1: Partial minimization ===
        if self.config.preminimize {
            self.preminimize(bound)?;
        }

        // === Phase 2: Queue population ===
        self.populate_queues(bound)?;
        bound.update_bound();

        // === Phase 3: Batch processing ===
        let internal_error: Weight = bound.internal.iter().map(QueueEntry::error).sum();
        let leaf_error: Weight = bound.leaves.iter().map(QueueEntry::error).sum();
        let run_leaves = if bound.internal.is_empty() {
            !bound.leaves.is_empty()
        } else {
            !bound.leaves.is_empty() && internal_error < leaf_error
        };

        let new_nodes = if run_leaves {
            let batch = bound.leaves.take(bound.leaves.len());
            bound.fringe.extend(bound.internal.take(bound.internal.len()));
            self.process_leaves(bound, batch)?
        } else {
            let batch = bound.internal.take(bound.internal.len());
            bound.fringe.extend(bound.leaves.take(bound.leaves.len()));
            self.process_internal(bound, batch, false)?.new_nodes
        };

        // === Phase 4: Cleanup ===
        self.loop_cleanup(bound, new_nodes)?;
        bound.update_bound();

        let current = bound.epsilon();
        if current > previous_epsilon + self.config.looseness_tolerance {
            return Err(EngineError::BoundsLoosened {
                previous: previous_epsilon,
                current,
            });
        }
        Ok(bound.work_done() > previous_work)
    }

    /// Moves fringe nodes into the internal and leaf batches until both are full or the fringe
    /// runs dry. Nodes whose corrected energy went up are re-scored and put back first.
    fn populate_queues(&mut self, bound: &mut SequenceBound) -> Result<(), EngineError> {
        let max_internal = self.timing.max_internal(self.config.internal_batch_ratio);
        let max_leaves = self.timing.max_minimizations;
        let calculator = self.env.tables.calculator;
        let check_corrections = self.config.correction.enabled && !self.env.corrections.is_empty();

        let mut deferred = Vec::new();
        while bound.internal.len() < max_internal || bound.leaves.len() < max_leaves {
            let Some(entry) = bound.fringe.pop() else {
                break;
            };
            let node = self.node(entry.id)?;
            if let Some(energy) = node.minimized_energy() {
                bound.finish(entry.id, calculator.weight(energy));
                continue;
            }
            let is_leaf = node.is_leaf();
            let corrected = check_corrections.then(|| {
                self.env
                    .corrections
                    .corrected_energy(&self.env.tables.lower, node.assignment())
            });

            if let Some(corrected) = corrected {
                if self.tree.raise_partial_lower(entry.id, corrected) {
                    bound.stats.corrections_applied += 1;
                    bound.fringe.push(self.entry_for(entry.id, &bound.sequence)?);
                    continue;
                }
            }

            if is_leaf && bound.leaves.len() < max_leaves {
                bound.leaves.push(entry);
            } else if !is_leaf && bound.internal.len() < max_internal {
                bound.internal.push(entry);
            } else {
                deferred.push(entry);
            }
        }
        bound.fringe.extend(deferred);
        Ok(())
    }

    /// Expands each node of the batch by one level, or drills it down to a leaf when it
    /// carries most of the remaining weight.
    fn process_internal(
        &mut self,
        bound: &mut SequenceBound,
        batch: Vec<QueueEntry>,
        drill_all: bool,
    ) -> Result<InternalBatch, EngineError> {
        let drill_share = 1.0 - self.config.target_epsilon;
        let sink = Arc::new(Mutex::new(Vec::with_capacity(batch.len())));

        for entry in &batch {
            let node = self.node(entry.id)?;
            let parent = entry.id;
            let snapshot = NodeSnapshot {
                assignment: node.assignment().clone(),
                partial_lower: node.partial_lower(),
                partial_upper: node.partial_upper(),
            };
            let env = self.env.clone();
            let choices = bound.choices.clone();
            let sink = sink.clone();

            let drill = drill_all
                || (entry.weights.lower <= Weight::ONE
                    && entry.weights.upper.ratio(bound.upper()) > drill_share);
            if drill {
                self.loop_tasks.submit(
                    move || {
                        let start = Instant::now();
                        let levels = scoring::drill_down(&env, &snapshot, &choices);
                        (levels, start.elapsed())
                    },
                    move |(levels, elapsed)| {
                        sink.lock().push(InternalOutcome::Drilled {
                            parent,
                            levels,
                            elapsed,
                        })
                    },
                )?;
                continue;
            }

            let Some(site) = self.env.order.next_site(node.assignment()) else {
                return Err(EngineError::Internal(format!(
                    "internal node {} has no site left to branch on",
                    node.assignment()
                )));
            };
            let legal = self.env.legal_children(node.assignment(), site, &bound.choices);
            let mut known = Vec::new();
            let mut to_score = Vec::new();
            for choice in legal {
                match self.tree.find_child(parent, site, choice) {
                    Some(child)
                        if self
                            .tree
                            .get(child)
                            .is_some_and(|c| c.has_remainder(&bound.sequence)) =>
                    {
                        known.push(child)
                    }
                    _ => to_score.push(choice),
                }
            }
            self.loop_tasks.submit(
                move || {
                    let start = Instant::now();
                    let scored = scoring::expand(&env, &snapshot, site, &to_score, &choices);
                    (scored, start.elapsed())
                },
                move |(scored, elapsed)| {
                    sink.lock().push(InternalOutcome::Expanded {
                        parent,
                        scored,
                        known,
                        elapsed,
                    })
                },
            )?;
        }
        self.loop_tasks.wait_for_finish()?;

        let mut outcomes = std::mem::take(&mut *sink.lock());
        outcomes.sort_by_key(|outcome| match outcome {
            InternalOutcome::Expanded { parent, .. } | InternalOutcome::Drilled { parent, .. } => {
                *parent
            }
        });

        let mut result = InternalBatch::default();
        for outcome in outcomes {
            let (parent, children, elapsed) = match outcome {
                InternalOutcome::Expanded {
                    parent,
                    scored,
                    known,
                    elapsed,
                } => {
                    let mut children = self.fold_expansion(bound, parent, scored)?;
                    children.extend(known);
                    (parent, children, elapsed)
                }
                InternalOutcome::Drilled {
                    parent,
                    levels,
                    elapsed,
                } => {
                    let (children, leaf) = self.fold_drill(bound, parent, levels)?;
                    result.drilled_leaves.extend(leaf);
                    (parent, children, elapsed)
                }
            };

            let before = batch
                .iter()
                .find(|e| e.id == parent)
                .map(QueueEntry::error)
                .unwrap_or(Weight::ZERO);
            let mut after = Weight::ZERO;
            for &child in &children {
                after += self.entry_for(child, &bound.sequence)?.error();
            }
            bound.stats.reduction_by_expansion += before.saturating_sub(after);
            bound.stats.internal_processed += 1;
            bound.stats.internal_time += elapsed;
            self.timing.record_internal(elapsed);

            let node = self.node(parent)?;
            let (lower, upper) = node.energy_bounds(&bound.sequence).unwrap_or((
                node.partial_lower(),
                node.partial_upper(),
            ));
            self.report(Progress::InternalNode {
                level: node.level(),
                lower,
                upper,
                queue_size: bound.num_queued(),
                children: children.len(),
                epsilon: bound.epsilon(),
            });
            result.new_nodes.extend(children);
        }
        Ok(result)
    }

    fn insert_child(
        &mut self,
        bound: &SequenceBound,
        parent: NodeId,
        score: ChildScore,
    ) -> Result<NodeId, EngineError> {
        if !score.is_valid() {
            return Err(EngineError::Internal(format!(
                "invalid bounds for child {}: [{}, {}]",
                score.assignment, score.partial_lower, score.partial_upper
            )));
        }
        let id = self.tree.get_or_insert_child(
            parent,
            score.assignment,
            score.partial_lower,
            score.partial_upper,
        );
        self.tree.raise_partial_lower(id, score.partial_lower);
        self.tree.set_remainder(id, &bound.sequence, score.remainder);
        Ok(id)
    }

    fn fold_expansion(
        &mut self,
        bound: &SequenceBound,
        parent: NodeId,
        scored: Vec<ChildScore>,
    ) -> Result<Vec<NodeId>, EngineError> {
        scored
            .into_iter()
            .map(|score| self.insert_child(bound, parent, score))
            .collect()
    }

    /// Inserts every level of a drill-down. Returns the nodes to queue and the leaf the descent
    /// ended on, if it reached one.
    fn fold_drill(
        &mut self,
        bound: &SequenceBound,
        parent: NodeId,
        levels: Vec<DrillLevel>,
    ) -> Result<(Vec<NodeId>, Option<NodeId>), EngineError> {
        let mut new_nodes = Vec::new();
        let mut current = parent;
        let mut last_chosen = None;
        for level in levels {
            let mut next = None;
            for (i, score) in level.children.into_iter().enumerate() {
                let id = self.insert_child(bound, current, score)?;
                if level.chosen == Some(i) {
                    next = Some(id);
                } else {
                    new_nodes.push(id);
                }
            }
            match next {
                Some(id) => {
                    current = id;
                    last_chosen = Some(id);
                }
                None => {
                    last_chosen = None;
                    break;
                }
            }
        }
        let leaf = match last_chosen {
            Some(id) => {
                new_nodes.push(id);
                self.node(id)?.is_leaf().then_some(id)
            }
            None => None,
        };
        Ok((new_nodes, leaf))
    }

    /// Minimizes the leaves of the batch and checks each result against its bounds.
    fn process_leaves(
        &mut self,
        bound: &mut SequenceBound,
        batch: Vec<QueueEntry>,
    ) -> Result<Vec<NodeId>, EngineError> {
        let sink = Arc::new(Mutex::new(Vec::with_capacity(batch.len())));
        let correction = self.config.correction.clone();
        for entry in &batch {
            let id = entry.id;
            let assignment = self.node(id)?.assignment().clone();
            let oracle = self.oracle.clone();
            let env = self.env.clone();
            let correction = correction.clone();
            let sink = sink.clone();
            self.loop_tasks.submit(
                move || {
                    let start = Instant::now();
                    let minimized = oracle.minimize(&assignment);
                    let candidates = match &minimized {
                        Ok(conf) if correction.enabled => {
                            select_candidates(&assignment, &conf.breakdown, &env.tables, &correction)
                        }
                        _ => Vec::new(),
                    };
                    LeafOutcome {
                        id,
                        minimized,
                        candidates,
                        elapsed: start.elapsed(),
                    }
                },
                move |outcome| sink.lock().push(outcome),
            )?;
        }
        self.loop_tasks.wait_for_finish()?;

        let mut outcomes = std::mem::take(&mut *sink.lock());
        outcomes.sort_by_key(|o| o.id);

        let tolerance = self.config.soundness_tolerance;
        let mut new_nodes = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let conf = outcome.minimized?;
            let node = self.node(outcome.id)?;
            let (lower, upper) = (node.partial_lower(), node.partial_upper());
            if conf.energy < lower - tolerance {
                return Err(EngineError::SoundnessViolation {
                    assignment: node.assignment().to_string(),
                    energy: conf.energy,
                    lower_bound: lower,
                });
            }
            let mut energy = conf.energy.max(lower);
            if energy > upper && upper >= lower {
                warn!(
                    "Minimized energy {:.4} of {} exceeds its rigid bound {:.4}; clamping.",
                    energy,
                    node.assignment(),
                    upper
                );
                energy = upper;
            }

            let error = batch
                .iter()
                .find(|e| e.id == outcome.id)
                .map(QueueEntry::error)
                .unwrap_or(Weight::ZERO);
            self.tree.set_minimized(outcome.id, energy);
            bound.stats.leaves_minimized += 1;
            bound.stats.reduction_by_minimization += error;
            bound.stats.leaf_time += outcome.elapsed;
            self.timing.record_leaf(outcome.elapsed);
            new_nodes.push(outcome.id);

            trace!(energy, "Minimized leaf {:?}.", outcome.id);
            self.report(Progress::LeafNode {
                energy,
                queue_size: bound.num_queued(),
                epsilon: bound.epsilon(),
            });
            for tuple in outcome.candidates {
                self.submit_correction(tuple)?;
            }
        }

        self.timing.max_minimizations =
            (self.timing.max_minimizations + 1).min(self.config.parallelism.max(1));
        Ok(new_nodes)
    }

    /// Files every new node: minimized nodes are finished, nodes without weight are dropped,
    /// and the rest go back onto the fringe.
    pub(crate) fn loop_cleanup(
        &mut self,
        bound: &mut SequenceBound,
        new_nodes: Vec<NodeId>,
    ) -> Result<(), EngineError> {
        let calculator = self.env.tables.calculator;
        for id in new_nodes {
            if let Some(energy) = self.node(id)?.minimized_energy() {
                bound.finish(id, calculator.weight(energy));
                continue;
            }
            let entry = self.entry_for(id, &bound.sequence)?;
            if entry.weights.upper.is_zero() {
                continue;
            }
            bound.fringe.push(entry);
        }
        Ok(())
    }

    /// Drills from the best fringe nodes until one leaf is minimized, so that the bound has a
    /// nonzero lower weight.
    pub(crate) fn run_until_nonzero(
        &mut self,
        bound: &mut SequenceBound,
    ) -> Result<(), EngineError> {
        let calculator = self.env.tables.calculator;
        while bound.finished.is_empty() {
            let Some(entry) = bound.fringe.pop() else {
                break;
            };
            let node = self.node(entry.id)?;
            if let Some(energy) = node.minimized_energy() {
                bound.finish(entry.id, calculator.weight(energy));
                continue;
            }
            let leaf = if node.is_leaf() {
                Some(entry)
            } else {
                let InternalBatch {
                    mut new_nodes,
                    drilled_leaves,
                } = self.process_internal(bound, vec![entry], true)?;
                new_nodes.retain(|id| !drilled_leaves.contains(id));
                self.loop_cleanup(bound, new_nodes)?;
                match drilled_leaves.first() {
                    Some(&id) => Some(self.entry_for(id, &bound.sequence)?),
                    None => None,
                }
            };
            if let Some(leaf) = leaf {
                let minimized = self.process_leaves(bound, vec![leaf])?;
                self.loop_cleanup(bound, minimized)?;
            }
            bound.update_bound();
        }
        Ok(())
    }

    /// Minimizes the tuples shared by the most promising internal nodes ahead of time, so
    /// their corrections are ready before the nodes below them are scored.
    fn preminimize(&mut self, bound: &mut SequenceBound) -> Result<(), EngineError> {
        let mut assignments = Vec::new();
        for entry in bound.fringe.top(PREMINIMIZE_CANDIDATES) {
            let node = self.node(entry.id)?;
            if !node.is_leaf() && node.level() >= PREMINIMIZE_MIN_LEVEL {
                assignments.push(node.assignment().clone());
            }
        }
        let mut count = 0;
        for (i, a) in assignments.iter().enumerate() {
            for b in &assignments[i + 1..] {
                if let Some(tuple) = shared_tuple(a, b) {
                    if self.submit_correction(tuple)? {
                        count += 1;
                    }
                }
            }
        }
        if count > 0 {
            bound.stats.partial_minimizations += count;
            self.report(Progress::PartialMinimization {
                count,
                epsilon: bound.epsilon(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::energy::{CostOracle, EnergyMatrix, PruningMatrix, TableOracle};
    use crate::core::space::{Choice, ConfSpace, Sequence, Site};
    use crate::engine::bound::Status;
    use crate::core::math::BoltzmannCalculator;
    use crate::core::space::Assignment;
    use crate::engine::config::{BoundConfigBuilder, CorrectionConfig};
    use crate::engine::progress::ProgressReporter;

    fn space(n: usize, k: usize) -> ConfSpace {
        ConfSpace::new(
            (0..n)
                .map(|i| {
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

    fn loose_oracle(n: usize, k: usize) -> Arc<dyn CostOracle> {
        let space = space(n, k);
        let mut lower = EnergyMatrix::new(&space);
        let mut rigid = EnergyMatrix::new(&space);
        for s in 0..n {
            for c in 0..k {
                lower.set_one_body(s, c, -0.2 * c as f64);
                rigid.set_one_body(s, c, 0.3 * s as f64 - 0.1 * c as f64);
            }
        }
        rigid.set_pair(0, 0, 1, 0, 1.0);
        let mut oracle = TableOracle::new(space, lower, rigid, PruningMatrix::new()).unwrap();
        if n >= 3 {
            oracle
                .add_higher_order(ChoiceTuple::new(vec![(0, 0), (1, 0), (2, 0)]), 0.8)
                .unwrap();
        }
        Arc::new(oracle)
    }

    fn engine(oracle: Arc<dyn CostOracle>, preminimize: bool) -> MultiSequenceBound {
        let config = BoundConfigBuilder::new()
            .target_epsilon(0.01)
            .parallelism(2)
            .preminimize(preminimize)
            .build()
            .unwrap();
        MultiSequenceBound::new(oracle, config, Arc::new(ProgressReporter::new())).unwrap()
    }

    fn new_bound(engine: &mut MultiSequenceBound) -> SequenceBound {
        let sequence = Sequence::unassigned(engine.space());
        engine.compute(&sequence, 0).unwrap();
        engine.bounds.remove(&sequence).unwrap()
    }

    fn active_nodes(bound: &SequenceBound) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = bound
            .fringe
            .iter()
            .chain(bound.internal.iter())
            .chain(bound.leaves.iter())
            .map(|e| e.id)
            .chain(bound.finished.iter().copied())
            .collect();
        ids.sort();
        ids
    }

    fn engine_without_corrections(oracle: Arc<dyn CostOracle>) -> MultiSequenceBound {
        let config = BoundConfigBuilder::new()
            .target_epsilon(0.01)
            .parallelism(2)
            .correction(CorrectionConfig {
                enabled: false,
                ..CorrectionConfig::default()
            })
            .build()
            .unwrap();
        MultiSequenceBound::new(oracle, config, Arc::new(ProgressReporter::new())).unwrap()
    }

    fn collection_sums(bound: &SequenceBound) -> (Weight, Weight) {
        let queues = [&bound.fringe, &bound.internal, &bound.leaves];
        let lower = queues.iter().map(|q| q.lower_sum()).sum::<Weight>() + bound.finished_weight;
        let upper = queues.iter().map(|q| q.upper_sum()).sum::<Weight>() + bound.finished_weight;
        (lower, upper)
    }

    fn exact_z(oracle: &dyn CostOracle, n: usize, k: usize) -> Weight {
        let calc = BoltzmannCalculator::new();
        let mut total = Weight::ZERO;
        for index in 0..k.pow(n as u32) {
            let conf: Vec<usize> = (0..n).map(|s| (index / k.pow(s as u32)) % k).collect();
            let energy = oracle
                .minimize(&Assignment::from_choices(&conf))
                .unwrap()
                .energy;
            total += calc.weight(energy);
        }
        total
    }

    fn assert_same_weight(a: Weight, b: Weight) {
        assert!((a.ln() - b.ln()).abs() < 1e-9, "{} != {}", a, b);
    }

    fn uniform_oracle(energy: f64) -> Arc<dyn CostOracle> {
        let space = space(3, 2);
        let mut energies = EnergyMatrix::new(&space);
        for s in 0..3 {
            for c in 0..2 {
                energies.set_one_body(s, c, energy);
            }
        }
        Arc::new(TableOracle::exact(space, energies).unwrap())
    }

    fn expand_root(energy: f64) -> (MultiSequenceBound, InternalBatch) {
        let mut engine = engine(uniform_oracle(energy), false);
        let sequence = Sequence::unassigned(engine.space());
        let mut bound = engine.create_bound(&sequence).unwrap();
        engine.populate_queues(&mut bound).unwrap();
        let batch = bound.internal.take(bound.internal.len());
        assert_eq!(batch.len(), 1);
        let result = engine.process_internal(&mut bound, batch, false).unwrap();
        (engine, result)
    }

    #[test]
    fn first_pass_minimizes_exactly_one_leaf() {
        let mut engine = engine(loose_oracle(3, 2), false);
        let bound = new_bound(&mut engine);
        assert_eq!(bound.finished.len(), 1);
        assert_eq!(bound.stats.leaves_minimized, 1);
        assert!(!bound.lower().is_zero());
    }

    #[test]
    fn every_node_sits_in_exactly_one_collection() {
        let mut engine = engine(loose_oracle(4, 2), false);
        let mut bound = new_bound(&mut engine);
        for _ in 0..6 {
            if !bound.has_active_nodes() {
                break;
            }
            engine.tighten(&mut bound).unwrap();
            let ids = active_nodes(&bound);
            let mut unique = ids.clone();
            unique.dedup();
            assert_eq!(ids, unique);
            for id in ids {
                let node = engine.tree().get(id).unwrap();
                assert!(node.children().is_empty() || node.is_minimized());
            }
        }
    }

    #[test]
    fn requeueing_and_tightening_conserve_the_aggregate_weight() {
        let oracle = loose_oracle(4, 2);
        let z = exact_z(oracle.as_ref(), 4, 2);
        let mut engine = engine_without_corrections(oracle);
        let mut bound = new_bound(&mut engine);

        for _ in 0..6 {
            if !bound.has_active_nodes() {
                break;
            }
            let (lower, upper) = collection_sums(&bound);
            engine.populate_queues(&mut bound).unwrap();
            let (populated_lower, populated_upper) = collection_sums(&bound);
            assert_same_weight(lower, populated_lower);
            assert_same_weight(upper, populated_upper);

            let internal = bound.internal.take(bound.internal.len());
            let leaves = bound.leaves.take(bound.leaves.len());
            bound.fringe.extend(internal);
            bound.fringe.extend(leaves);
            let (drained_lower, drained_upper) = collection_sums(&bound);
            assert_same_weight(lower, drained_lower);
            assert_same_weight(upper, drained_upper);

            engine.tighten(&mut bound).unwrap();
            let (tightened_lower, tightened_upper) = collection_sums(&bound);
            assert!(tightened_upper.ln() <= upper.ln() + 1e-9);
            assert!(tightened_lower.ln() <= z.ln() + 1e-9);
            assert!(tightened_upper.ln() >= z.ln() - 1e-9);
        }
    }

    #[test]
    fn dominant_nodes_with_small_weight_are_drilled_to_a_leaf() {
        let (_, result) = expand_root(2.0);
        assert_eq!(result.drilled_leaves.len(), 1);
    }

    #[test]
    fn dominant_nodes_with_large_weight_are_expanded_one_level() {
        let (engine, result) = expand_root(-2.0);
        assert!(result.drilled_leaves.is_empty());
        assert_eq!(result.new_nodes.len(), 2);
        for id in result.new_nodes {
            assert_eq!(engine.tree().get(id).unwrap().level(), 1);
        }
    }

    #[test]
    fn tightening_never_widens_the_gap() {
        let mut engine = engine(loose_oracle(4, 3), false);
        let mut bound = new_bound(&mut engine);
        let mut previous = bound.epsilon();
        let mut previous_upper = bound.upper();
        while bound.has_active_nodes() && bound.epsilon() > 0.01 {
            assert!(engine.tighten(&mut bound).unwrap());
            assert!(bound.epsilon() <= previous + 0.01);
            assert!(bound.upper().ln() <= previous_upper.ln() + 1e-9);
            previous = bound.epsilon();
            previous_upper = bound.upper();
        }
        engine.drain_oracle_tasks().unwrap();
        assert!(bound.epsilon() <= 0.01);
        assert!(bound.stats.internal_processed > 0);
    }

    #[test]
    fn batch_sizes_follow_measured_timings() {
        let mut timing = crate::engine::multi::PhaseTiming::default();
        assert_eq!(timing.max_internal(0.1), 1);
        timing.record_leaf(Duration::from_millis(100));
        timing.record_internal(Duration::from_millis(1));
        assert_eq!(timing.max_internal(0.1), 10);
        timing.record_internal(Duration::from_millis(199));
        assert_eq!(timing.max_internal(0.1), 1);
    }

    #[test]
    fn preminimization_counts_as_work() {
        let mut engine = engine(loose_oracle(5, 2), true);
        let sequence = Sequence::unassigned(engine.space());
        let result = engine.compute(&sequence, 10_000).unwrap();
        assert_eq!(result.status, Status::Estimated);
        let stats = engine.bound(&sequence).unwrap().statistics();
        assert_eq!(
            engine.bound(&sequence).unwrap().work_done(),
            stats.internal_processed + stats.leaves_minimized + stats.partial_minimizations
        );
    }

    #[test]
    fn corrections_raise_partial_lower_energies() {
        let mut engine = engine(loose_oracle(3, 2), false);
        let sequence = Sequence::unassigned(engine.space());
        engine.compute(&sequence, 10_000).unwrap();
        let tuple = ChoiceTuple::new(vec![(0, 0), (1, 0), (2, 0)]);
        assert_eq!(engine.corrections().get(&tuple), Some(0.8));
        for (_, node) in engine.tree().iter() {
            if node.is_leaf() && tuple.is_contained_in(node.assignment()) {
                assert!(node.partial_lower() >= 0.8 - 1e-9 || node.is_minimized());
            }
        }
    }
}
