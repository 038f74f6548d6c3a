use crate::core::energy::{CostOracle, EnergyBreakdown, OracleError};
use crate::core::space::{Assignment, ChoiceTuple};
use crate::engine::config::CorrectionConfig;
use crate::engine::executor::{ExecutorError, TaskExecutor};
use crate::engine::tree::{ScoringEnv, ScoringTables};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

/// Tuples of a minimized leaf worth a tuple-restricted minimization.
///
/// Site pairs are ranked by how far the exact pair energy rose above the lower table. A pair
/// qualifies if its gap is at least `min_difference`, or within `pair_threshold` of the
/// largest gap. Each qualifying pair is extended by every other site into a triple, and a
/// triple is kept if its rigid and lower energies differ by at least `triple_threshold`.
pub fn select_candidates(
    leaf: &Assignment,
    exact: &EnergyBreakdown,
    tables: &ScoringTables,
    config: &CorrectionConfig,
) -> Vec<ChoiceTuple> {
    let num_sites = leaf.num_sites();
    if num_sites < 3 || exact.num_sites() != num_sites {
        return Vec::new();
    }
    let lower = tables.lower.breakdown(leaf);
    let gaps = exact.difference(&lower);

    let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
    for i in 0..num_sites {
        for j in 0..i {
            let gap = gaps.pair(i, j);
            if gap > 0.0 && gap.is_finite() {
                pairs.push((j, i, gap));
            }
        }
    }
    if pairs.is_empty() {
        return Vec::new();
    }
    pairs.sort_by(|a, b| b.2.total_cmp(&a.2).then((a.0, a.1).cmp(&(b.0, b.1))));
    let largest = pairs[0].2;

    let mut out = BTreeSet::new();
    for &(i, j, gap) in &pairs {
        if gap < config.min_difference && largest - gap > config.pair_threshold {
            break;
        }
        for k in (0..num_sites).filter(|&k| k != i && k != j) {
            let (Some(ci), Some(cj), Some(ck)) = (leaf.get(i), leaf.get(j), leaf.get(k)) else {
                continue;
            };
            let triple = ChoiceTuple::new(vec![(i, ci), (j, cj), (k, ck)]);
            let spread = tables.rigid.tuple_energy(&triple) - tables.lower.tuple_energy(&triple);
            if spread >= config.triple_threshold {
                out.insert(triple);
            }
        }
    }
    out.into_iter().collect()
}

/// The largest set of assignments shared by two nodes, if it spans at least three sites.
pub fn shared_tuple(a: &Assignment, b: &Assignment) -> Option<ChoiceTuple> {
    let overlap = a.to_tuple().intersect(&b.to_tuple());
    (overlap.len() >= 3).then_some(overlap)
}

/// Queues a tuple-restricted minimization. The listener stores `exact - lower` as a correction
/// when positive; an oracle failure is kept in `failure` for the engine to raise later.
pub fn submit(
    executor: &TaskExecutor,
    oracle: Arc<dyn CostOracle>,
    env: Arc<ScoringEnv>,
    failure: Arc<Mutex<Option<OracleError>>>,
    tuple: ChoiceTuple,
) -> Result<(), ExecutorError> {
    let corrections = env.corrections.clone();
    executor.submit(
        move || {
            let lower = env.tables.lower.tuple_energy(&tuple);
            let exact = oracle.minimize_tuple(&tuple);
            (tuple, lower, exact)
        },
        move |(tuple, lower, exact)| match exact {
            Ok(exact) => {
                let correction = exact - lower;
                if corrections.insert(tuple.clone(), correction) {
                    trace!(correction, "Recorded correction for {:?}.", tuple.pairs());
                }
            }
            Err(e) => {
                failure.lock().get_or_insert(e);
            }
        },
    )
}
