use super::config::BoundConfig;
use super::error::EngineError;
use super::multi::MultiSequenceBound;
use super::progress::ProgressReporter;
use crate::core::energy::CostOracle;
use crate::core::space::{Assignment, ChoiceTuple, ConfSpace, Sequence};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Site index mapping from a restricted space into the full space it was cut from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfSpaceMapping {
    to_full: Vec<usize>,
    full_sites: usize,
}

impl ConfSpaceMapping {
    /// Matches the sites of `small` to those of `big` by name. Matched sites must offer the same
    /// number of choices.
    pub fn between(small: &ConfSpace, big: &ConfSpace) -> Result<Self, EngineError> {
        let to_full = small
            .sites()
            .iter()
            .map(|site| {
                let index = big.find_site(&site.name).ok_or_else(|| {
                    EngineError::InvalidProblem(format!(
                        "site '{}' does not exist in the full space",
                        site.name
                    ))
                })?;
                if big.site(index).num_choices() != site.num_choices() {
                    return Err(EngineError::InvalidProblem(format!(
                        "site '{}' has {} choices in the full space but {} in the restricted one",
                        site.name,
                        big.site(index).num_choices(),
                        site.num_choices()
                    )));
                }
                Ok(index)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            to_full,
            full_sites: big.num_sites(),
        })
    }

    #[inline]
    pub fn site(&self, restricted: usize) -> usize {
        self.to_full[restricted]
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.to_full
    }

    pub fn assignment(&self, assignment: &Assignment) -> Assignment {
        assignment.remap(&self.to_full, self.full_sites)
    }

    pub fn tuple(&self, tuple: &ChoiceTuple) -> ChoiceTuple {
        tuple.remap(&self.to_full)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrecomputedNode {
    pub assignment: Assignment,
    /// Index of the parent in [`PrecomputedTree::nodes`]; `None` for the root.
    pub parent: Option<usize>,
    pub partial_lower: f64,
    pub partial_upper: f64,
    pub minimized: Option<f64>,
}

/// A solved bound tree over a restricted space, detached from its engine.
///
/// Nodes are stored breadth-first, so every parent precedes its children.
#[derive(Debug, Clone)]
pub struct PrecomputedTree {
    pub space: ConfSpace,
    pub order: Vec<usize>,
    pub nodes: Vec<PrecomputedNode>,
    pub corrections: Vec<(ChoiceTuple, f64)>,
}

impl PrecomputedTree {
    pub fn num_minimized(&self) -> usize {
        self.nodes.iter().filter(|n| n.minimized.is_some()).count()
    }
}

/// Solves the unassigned sequence over the immutable sites of `oracle`'s space.
///
/// Returns `None` when the space has no immutable sites or the oracle cannot be restricted.
#[instrument(skip_all, name = "precompute_immutable")]
pub fn precompute_immutable(
    oracle: &Arc<dyn CostOracle>,
    config: &BoundConfig,
    reporter: Arc<ProgressReporter<'static>>,
) -> Result<Option<PrecomputedTree>, EngineError> {
    let sites = oracle.space().immutable_sites();
    if sites.is_empty() {
        return Ok(None);
    }
    let Some(restricted) = oracle.restrict(&sites) else {
        warn!("Cost oracle does not support restriction; skipping the precompute.");
        return Ok(None);
    };
    let mut engine = MultiSequenceBound::new(restricted, config.clone(), reporter)?;
    let sequence = Sequence::unassigned(engine.space());
    let result = engine.compute(&sequence, usize::MAX)?;
    info!(
        sites = sites.len(),
        status = %result.status,
        epsilon = result.epsilon,
        nodes = engine.tree().len(),
        "Precomputed the immutable-site tree."
    );
    Ok(Some(engine.export()))
}

impl MultiSequenceBound {
    /// Copies the tree, branch order and corrections out of this engine.
    pub fn export(&self) -> PrecomputedTree {
        let mut nodes = Vec::with_capacity(self.tree.len());
        let mut queue = VecDeque::from([(self.tree.root(), None)]);
        while let Some((id, parent)) = queue.pop_front() {
            let Some(node) = self.tree.get(id) else {
                continue;
            };
            let index = nodes.len();
            nodes.push(PrecomputedNode {
                assignment: node.assignment().clone(),
                parent,
                partial_lower: node.partial_lower(),
                partial_upper: node.partial_upper(),
                minimized: node.minimized_energy(),
            });
            queue.extend(node.children().iter().map(|&c| (c, Some(index))));
        }
        PrecomputedTree {
            space: self.space().clone(),
            order: self.branch_order().sites().to_vec(),
            nodes,
            corrections: self.corrections().entries(),
        }
    }

    /// Grafts a tree solved over a restricted space onto the root of this engine's tree.
    ///
    /// The restricted sites become the first sites of the branch order. Grafted nodes keep
    /// their partial bounds; their remainders are scored per sequence as usual. Minimized
    /// restricted leaves are not full conformations here, so they turn into corrections for
    /// their tuple instead. Returns the number of nodes added.
    #[instrument(skip_all, name = "precompute_graft", fields(nodes = precomputed.nodes.len()))]
    pub fn graft(&mut self, precomputed: &PrecomputedTree) -> Result<usize, EngineError> {
        if !self.bounds.is_empty() || self.tree.len() != 1 {
            return Err(EngineError::InvalidProblem(
                "a precomputed tree can only be grafted onto a fresh engine".to_string(),
            ));
        }
        let mapping = ConfSpaceMapping::between(&precomputed.space, self.space())?;

        let prefix: Vec<usize> = precomputed.order.iter().map(|&s| mapping.site(s)).collect();
        let order = self.env.order.with_precomputed_prefix(&prefix);
        self.rebuild_env(order, self.env.dynamic_pruner.clone());

        let mut corrections = 0;
        for (tuple, correction) in &precomputed.corrections {
            if self.env.corrections.insert(mapping.tuple(tuple), *correction) {
                corrections += 1;
            }
        }
        for node in &precomputed.nodes {
            if let Some(energy) = node.minimized {
                let tuple = mapping.assignment(&node.assignment).to_tuple();
                let lower = self.env.tables.lower.tuple_energy(&tuple);
                if self.env.corrections.insert(tuple, energy - lower) {
                    corrections += 1;
                }
            }
        }

        let mut ids = Vec::with_capacity(precomputed.nodes.len());
        let mut added = 0;
        for (index, node) in precomputed.nodes.iter().enumerate() {
            if node.assignment.num_sites() != precomputed.space.num_sites() {
                return Err(EngineError::InvalidProblem(format!(
                    "precomputed node {} does not cover the restricted space",
                    node.assignment
                )));
            }
            let parent = match node.parent {
                None => {
                    ids.push(self.tree.root());
                    continue;
                }
                Some(parent) if parent < index => ids[parent],
                Some(parent) => {
                    return Err(EngineError::InvalidProblem(format!(
                        "precomputed node {} lists parent {} out of order",
                        index, parent
                    )));
                }
            };
            let assignment = mapping.assignment(&node.assignment);
            let partial_upper = self.env.tables.rigid.conf_energy(&assignment);
            let partial_lower = self
                .env
                .corrections
                .corrected_energy(&self.env.tables.lower, &assignment)
                .max(node.partial_lower)
                .min(partial_upper);
            ids.push(
                self.tree
                    .get_or_insert_child(parent, assignment, partial_lower, partial_upper),
            );
            added += 1;
        }

        info!(
            added,
            corrections,
            "Grafted precomputed tree over {} sites.",
            prefix.len()
        );
        Ok(added)
    }
}
