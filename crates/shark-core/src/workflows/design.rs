use super::sampling::{product_lower, sampled_upper};
use crate::core::energy::CostOracle;
use crate::core::io::DesignProblem;
use crate::core::math::Weight;
use crate::core::space::{ConfSpace, Sequence};
use crate::engine::bound::{BoundResult, Status};
use crate::engine::config::DesignConfig;
use crate::engine::error::EngineError;
use crate::engine::multi::MultiSequenceBound;
use crate::engine::precompute::{PrecomputedTree, precompute_immutable};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::remote::SharedTable;
use crate::engine::tree::ScoringTables;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// The three states of a binding design.
#[derive(Clone)]
pub struct DesignStates {
    pub protein: Arc<dyn CostOracle>,
    pub ligand: Arc<dyn CostOracle>,
    pub complex: Arc<dyn CostOracle>,
}

impl DesignStates {
    pub fn new(
        protein: Arc<dyn CostOracle>,
        ligand: Arc<dyn CostOracle>,
        complex: Arc<dyn CostOracle>,
    ) -> Self {
        Self {
            protein,
            ligand,
            complex,
        }
    }

    /// Every mutable site of a half must be a mutable site of the complex, since sequences are
    /// chosen over the complex and carried to the halves by site name.
    fn validate(&self) -> Result<(), EngineError> {
        let complex = self.complex.space();
        for (name, half) in [("protein", &self.protein), ("ligand", &self.ligand)] {
            for site in half.space().sites().iter().filter(|s| s.mutable) {
                let matches = complex
                    .find_site(&site.name)
                    .is_some_and(|i| complex.site(i).mutable);
                if !matches {
                    return Err(EngineError::InvalidProblem(format!(
                        "mutable site '{}' of the {} is not a mutable site of the complex",
                        site.name, name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl From<DesignProblem> for DesignStates {
    fn from(problem: DesignProblem) -> Self {
        Self::new(
            Arc::new(problem.protein),
            Arc::new(problem.ligand),
            Arc::new(problem.complex),
        )
    }
}

/// Combined state of the three bounds of one complete sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// No bound can make progress, but not all of them reached the target.
    Blocked,
    Estimating,
    Estimated,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Blocked => "blocked",
            NodeStatus::Estimating => "estimating",
            NodeStatus::Estimated => "estimated",
        };
        f.write_str(name)
    }
}

/// Interval on the base-10 log binding score `log10(Z_complex / (Z_protein * Z_ligand))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BindingScore {
    pub lower: f64,
    pub upper: f64,
}

impl BindingScore {
    pub fn from_bounds(protein: &BoundResult, ligand: &BoundResult, complex: &BoundResult) -> Self {
        Self {
            lower: log_ratio(complex.lower, protein.upper, ligand.upper),
            upper: log_ratio(complex.upper, protein.lower, ligand.lower),
        }
    }
}

/// `log10(numerator / (a * b))`, infinite when a denominator has no weight.
fn log_ratio(numerator: Weight, a: Weight, b: Weight) -> f64 {
    if a.is_zero() || b.is_zero() {
        return f64::INFINITY;
    }
    numerator.log10() - a.log10() - b.log10()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSequence {
    /// Position in the ranking; `None` for the wild-type reference.
    pub rank: Option<usize>,
    pub sequence: Sequence,
    pub description: String,
    pub status: NodeStatus,
    pub protein: BoundResult,
    pub ligand: BoundResult,
    pub complex: BoundResult,
    pub score: BindingScore,
}

/// Receives results as the search emits them.
pub trait ScoreWriter {
    fn write(&mut self, scored: &ScoredSequence) -> Result<(), EngineError>;
}

/// Keeps every written result in memory.
#[derive(Debug, Default)]
pub struct ScoreCollector {
    pub scores: Vec<ScoredSequence>,
}

impl ScoreWriter for ScoreCollector {
    fn write(&mut self, scored: &ScoredSequence) -> Result<(), EngineError> {
        self.scores.push(scored.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub wild_type: ScoredSequence,
    pub sequences: Vec<ScoredSequence>,
    /// The queue ran empty before the requested number of sequences was found.
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
struct Halves {
    protein: BoundResult,
    ligand: BoundResult,
    complex: BoundResult,
}

impl Halves {
    fn status(&self) -> NodeStatus {
        let all = [&self.protein, &self.ligand, &self.complex];
        if all.iter().all(|r| r.status == Status::Estimated) {
            NodeStatus::Estimated
        } else if all.iter().any(|r| r.status == Status::Estimating) {
            NodeStatus::Estimating
        } else {
            NodeStatus::Blocked
        }
    }

    fn score(&self) -> BindingScore {
        BindingScore::from_bounds(&self.protein, &self.ligand, &self.complex)
    }
}

#[derive(Debug)]
enum NodeKind {
    Partial,
    Complete(Option<Halves>),
}

#[derive(Debug)]
struct SearchNode {
    score: f64,
    order: u64,
    sequence: Sequence,
    kind: NodeKind,
}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchNode {}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchNode {
    // Highest score first; older nodes first among equals.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then(other.order.cmp(&self.order))
    }
}

/// The tables and stability threshold of one state, as used for scoring partial sequences.
struct HalfModel {
    space: ConfSpace,
    tables: ScoringTables,
    threshold: Option<Weight>,
}

impl HalfModel {
    fn new(oracle: &dyn CostOracle) -> Self {
        Self {
            space: oracle.space().clone(),
            tables: ScoringTables::from_oracle(oracle),
            threshold: None,
        }
    }
}

/// Optimistic score of every sequence below a partial sequence.
struct PartialScorer {
    design_space: ConfSpace,
    protein: HalfModel,
    ligand: HalfModel,
    complex: HalfModel,
    sample_size: usize,
}

impl PartialScorer {
    /// `None` if a half is unstable for every refining sequence.
    fn score(&self, sequence: &Sequence) -> Option<f64> {
        let protein = self.half_lower(&self.protein, sequence)?;
        let ligand = self.half_lower(&self.ligand, sequence)?;
        let complex_choices = sequence
            .project(&self.design_space, &self.complex.space)
            .choices(&self.complex.space);
        let complex = sampled_upper(&self.complex.tables, &complex_choices, self.sample_size);
        Some(log_ratio(complex, protein, ligand))
    }

    fn half_lower(&self, half: &HalfModel, sequence: &Sequence) -> Option<Weight> {
        let choices = sequence
            .project(&self.design_space, &half.space)
            .choices(&half.space);
        if let Some(threshold) = half.threshold {
            if sampled_upper(&half.tables, &choices, self.sample_size) < threshold {
                return None;
            }
        }
        Some(product_lower(&half.tables, &half.space, &choices))
    }
}

struct StateEngine {
    name: &'static str,
    bound: MultiSequenceBound,
}

struct DesignSearch<'a> {
    config: &'a DesignConfig,
    reporter: Arc<ProgressReporter<'static>>,
    space: ConfSpace,
    states: [StateEngine; 3],
    scorer: PartialScorer,
    queue: BinaryHeap<SearchNode>,
    next_order: u64,
}

const PROTEIN: usize = 0;
const LIGAND: usize = 1;
const COMPLEX: usize = 2;

/// Runs the best-first search for the `num_sequences` sequences with the best binding score.
///
/// The wild type is scored first and written with no rank. Every ranked result is written as
/// soon as it is found, in non-increasing order of its score upper bound.
#[instrument(skip_all, name = "design_workflow", fields(k = config.num_sequences))]
pub fn run(
    states: &DesignStates,
    config: &DesignConfig,
    reporter: Arc<ProgressReporter<'static>>,
    writer: &mut dyn ScoreWriter,
) -> Result<SearchOutcome, EngineError> {
    // === Phase 0: Setup ===
    reporter.report(Progress::PhaseStart { name: "Setup" });
    states.validate()?;
    let mut search = DesignSearch::new(states, config, reporter.clone())?;
    reporter.report(Progress::PhaseFinish);

    // === Phase 1: Immutable-site precompute (optional) ===
    if config.precompute_flexible {
        reporter.report(Progress::PhaseStart {
            name: "Precomputing Immutable Sites",
        });
        search.graft_precomputed(states)?;
        reporter.report(Progress::PhaseFinish);
    }

    // === Phase 2: Wild type ===
    reporter.report(Progress::PhaseStart { name: "Wild Type" });
    let wild_type = search.score_wild_type()?;
    writer.write(&wild_type)?;
    reporter.report(Progress::PhaseFinish);

    // === Phase 3: Best-first search ===
    reporter.report(Progress::PhaseStart {
        name: "Sequence Search",
    });
    let (sequences, exhausted) = search.search(writer)?;
    reporter.report(Progress::PhaseFinish);

    info!(
        "Design search complete. Reported {} sequence(s){}.",
        sequences.len(),
        if exhausted { ", sequence space exhausted" } else { "" }
    );
    Ok(SearchOutcome {
        wild_type,
        sequences,
        exhausted,
    })
}

impl<'a> DesignSearch<'a> {
    fn new(
        states: &DesignStates,
        config: &'a DesignConfig,
        reporter: Arc<ProgressReporter<'static>>,
    ) -> Result<Self, EngineError> {
        let engine = |name: &'static str, oracle: &Arc<dyn CostOracle>| {
            MultiSequenceBound::new(oracle.clone(), config.bound.clone(), reporter.clone())
                .map(|bound| StateEngine { name, bound })
        };
        let engines = [
            engine("protein", &states.protein)?,
            engine("ligand", &states.ligand)?,
            engine("complex", &states.complex)?,
        ];
        let space = states.complex.space().clone();
        Ok(Self {
            config,
            reporter,
            scorer: PartialScorer {
                design_space: space.clone(),
                protein: HalfModel::new(states.protein.as_ref()),
                ligand: HalfModel::new(states.ligand.as_ref()),
                complex: HalfModel::new(states.complex.as_ref()),
                sample_size: config.partial_sample_size,
            },
            space,
            states: engines,
            queue: BinaryHeap::new(),
            next_order: 0,
        })
    }

    /// Solves the immutable sites of every state on background threads and grafts the results.
    fn graft_precomputed(&mut self, states: &DesignStates) -> Result<(), EngineError> {
        let table: Arc<SharedTable<String, Option<Arc<PrecomputedTree>>>> =
            Arc::new(SharedTable::new());
        let mut handles = Vec::with_capacity(3);
        for (name, oracle) in [
            ("protein", &states.protein),
            ("ligand", &states.ligand),
            ("complex", &states.complex),
        ] {
            let table = table.clone();
            let oracle = oracle.clone();
            let config = self.config.bound.clone();
            let reporter = self.reporter.clone();
            let handle = std::thread::Builder::new()
                .name(format!("precompute-{}", name))
                .spawn(move || {
                    let tree = match precompute_immutable(&oracle, &config, reporter) {
                        Ok(tree) => tree.map(Arc::new),
                        Err(e) => {
                            warn!("Precompute for the {} failed: {}", name, e);
                            None
                        }
                    };
                    table.publish(name.to_string(), tree);
                })
                .map_err(|e| EngineError::Initialization(e.to_string()))?;
            handles.push(handle);
        }

        for state in &mut self.states {
            let tree = table.get_or_wait(
                &state.name.to_string(),
                self.config.precompute_poll,
                self.config.precompute_timeout,
            )?;
            if let Some(tree) = tree {
                let added = state.bound.graft(&tree)?;
                debug!("Grafted {} precomputed nodes into the {}.", added, state.name);
            }
        }
        for handle in handles {
            if handle.join().is_err() {
                warn!("A precompute thread panicked after publishing.");
            }
        }
        Ok(())
    }

    fn project(&self, state: usize, sequence: &Sequence) -> Sequence {
        sequence.project(&self.space, self.states[state].bound.space())
    }

    fn work_done(&self, sequence: &Sequence) -> usize {
        (0..3)
            .filter_map(|i| {
                let projected = self.project(i, sequence);
                self.states[i].bound.bound(&projected).map(|b| b.work_done())
            })
            .sum()
    }

    fn compute(
        &mut self,
        state: usize,
        sequence: &Sequence,
        max_work: usize,
    ) -> Result<BoundResult, EngineError> {
        let projected = self.project(state, sequence);
        self.states[state].bound.compute(&projected, max_work)
    }

    fn scored(&self, rank: Option<usize>, sequence: &Sequence, halves: &Halves) -> ScoredSequence {
        ScoredSequence {
            rank,
            sequence: sequence.clone(),
            description: sequence.describe(&self.space),
            status: halves.status(),
            protein: halves.protein.clone(),
            ligand: halves.ligand.clone(),
            complex: halves.complex.clone(),
            score: halves.score(),
        }
    }

    /// Bounds the wild type to the target and derives the stability thresholds from it.
    fn score_wild_type(&mut self) -> Result<ScoredSequence, EngineError> {
        let sequence = Sequence::wild_type(&self.space);
        let halves = Halves {
            protein: self.compute(PROTEIN, &sequence, usize::MAX)?,
            ligand: self.compute(LIGAND, &sequence, usize::MAX)?,
            complex: self.compute(COMPLEX, &sequence, usize::MAX)?,
        };

        if let Some(margin) = self.config.stability_threshold {
            for (state, result) in [(PROTEIN, &halves.protein), (LIGAND, &halves.ligand)] {
                let rt = self.states[state].bound.calculator().rt();
                let threshold = Weight::from_ln(result.lower.ln() - margin / rt);
                self.states[state]
                    .bound
                    .set_stability_threshold(Some(threshold));
                let model = if state == PROTEIN {
                    &mut self.scorer.protein
                } else {
                    &mut self.scorer.ligand
                };
                model.threshold = Some(threshold);
                debug!(
                    "Stability threshold for the {}: {}",
                    self.states[state].name, threshold
                );
            }
        }

        let scored = self.scored(None, &sequence, &halves);
        info!(
            "Wild type {}: score [{:.4}, {:.4}]",
            scored.description, scored.score.lower, scored.score.upper
        );
        Ok(scored)
    }

    fn push(&mut self, score: f64, sequence: Sequence, kind: NodeKind) {
        let score = if score.is_nan() { f64::NEG_INFINITY } else { score };
        self.queue.push(SearchNode {
            score,
            order: self.next_order,
            sequence,
            kind,
        });
        self.next_order += 1;
    }

    fn search(
        &mut self,
        writer: &mut dyn ScoreWriter,
    ) -> Result<(Vec<ScoredSequence>, bool), EngineError> {
        let wanted = self.config.num_sequences;
        self.reporter.report(Progress::TaskStart {
            total_steps: wanted as u64,
        });

        let root = Sequence::unassigned(&self.space);
        if root.is_fully_assigned(&self.space) {
            self.push(f64::INFINITY, root, NodeKind::Complete(None));
        } else {
            self.push(f64::INFINITY, root, NodeKind::Partial);
        }

        let mut reported = Vec::new();
        while reported.len() < wanted {
            let Some(node) = self.queue.pop() else {
                break;
            };
            match node.kind {
                NodeKind::Partial => self.expand(node.score, &node.sequence)?,
                NodeKind::Complete(Some(halves))
                    if halves.status() != NodeStatus::Estimating =>
                {
                    let mut scored =
                        self.scored(Some(reported.len() + 1), &node.sequence, &halves);
                    scored.score.upper = scored.score.upper.min(node.score);
                    info!(
                        rank = reported.len() + 1,
                        status = %scored.status,
                        "Sequence {}: score [{:.4}, {:.4}]",
                        scored.description,
                        scored.score.lower,
                        scored.score.upper
                    );
                    writer.write(&scored)?;
                    self.reporter.report(Progress::TaskIncrement);
                    reported.push(scored);
                }
                NodeKind::Complete(previous) => {
                    self.refine(node.score, node.sequence, previous)?;
                }
            }
        }
        self.reporter.report(Progress::TaskFinish);

        let exhausted = reported.len() < wanted;
        if exhausted {
            warn!(
                "Only {} of {} requested sequences exist under the given constraints.",
                reported.len(),
                wanted
            );
        }
        Ok((reported, exhausted))
    }

    /// Branches a partial sequence on its first unassigned mutable site.
    fn expand(&mut self, parent_score: f64, sequence: &Sequence) -> Result<(), EngineError> {
        let Some(site) = sequence.first_unassigned(&self.space) else {
            return Err(EngineError::Internal(format!(
                "partial sequence {} has no unassigned mutable site",
                sequence
            )));
        };
        let info = self.space.site(site);
        let mut labels: BTreeSet<&str> = info.labels().into_iter().collect();
        let limit = self.config.max_simultaneous_mutations;
        if limit.is_some_and(|l| l < self.space.mutable_sites().len()) {
            labels.insert(info.wild_type.as_str());
        }

        let mut children = Vec::with_capacity(labels.len());
        for label in labels {
            let mut child = sequence.with_assignment(site, label);
            if let Some(limit) = limit {
                let mutations = child.count_mutations(&self.space);
                if mutations > limit {
                    continue;
                }
                if mutations == limit {
                    child = child.fill_wild_type(&self.space);
                }
            }
            children.push(child);
        }

        let scorer = &self.scorer;
        #[cfg(feature = "parallel")]
        let scores: Vec<Option<f64>> = children.par_iter().map(|c| scorer.score(c)).collect();
        #[cfg(not(feature = "parallel"))]
        let scores: Vec<Option<f64>> = children.iter().map(|c| scorer.score(c)).collect();

        for (child, score) in children.into_iter().zip(scores) {
            let Some(score) = score else {
                debug!("Dropping {}: a half is unstable.", child);
                continue;
            };
            let kind = if child.is_fully_assigned(&self.space) {
                NodeKind::Complete(None)
            } else {
                NodeKind::Partial
            };
            self.push(score.min(parent_score), child, kind);
        }
        Ok(())
    }

    /// Spends one batch of work on each bound of a complete sequence and re-queues it.
    fn refine(
        &mut self,
        score: f64,
        sequence: Sequence,
        previous: Option<Halves>,
    ) -> Result<(), EngineError> {
        let batch = self.config.confs_per_batch;
        let before = self.work_done(&sequence);

        let protein = self.compute(PROTEIN, &sequence, batch)?;
        if protein.status == Status::Unstable {
            debug!("Dropping {}: the protein is unstable.", sequence);
            return Ok(());
        }
        let ligand = self.compute(LIGAND, &sequence, batch)?;
        if ligand.status == Status::Unstable {
            debug!("Dropping {}: the ligand is unstable.", sequence);
            return Ok(());
        }
        let complex = self.compute(COMPLEX, &sequence, batch)?;
        if complex.status == Status::Unstable {
            debug!("Dropping {}: the complex has no weight.", sequence);
            return Ok(());
        }
        let halves = Halves {
            protein,
            ligand,
            complex,
        };

        let status = halves.status();
        let stalled = previous.is_some_and(|p| p.status() == status)
            && status == NodeStatus::Estimating
            && self.work_done(&sequence) == before;
        if stalled {
            return Err(EngineError::SearchStalled {
                sequence: sequence.describe(&self.space),
                queued: self.queue.len(),
            });
        }

        let next = halves.score().upper.min(score);
        self.push(next, sequence, NodeKind::Complete(Some(halves)));
        Ok(())
    }
}
