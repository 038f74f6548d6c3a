use crate::core::math::{BoltzmannCalculator, Weight};
use crate::core::space::{Assignment, Sequence};
use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;

const RAISE_EPSILON: f64 = 1e-9;

new_key_type! {
    /// Stable handle to a node of the [`BoundTree`] arena.
    pub struct NodeId;
}

/// Free-energy bounds on the unassigned part of a node under one sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemainderBounds {
    pub lower: f64,
    pub upper: f64,
}

impl RemainderBounds {
    pub const NONE: Self = Self {
        lower: 0.0,
        upper: 0.0,
    };

    pub fn is_valid(&self) -> bool {
        !self.lower.is_nan() && !self.upper.is_nan()
    }
}

/// Weight bounds of the conformations under a node for one sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeWeights {
    pub lower: Weight,
    pub upper: Weight,
}

impl NodeWeights {
    #[inline]
    pub fn error(&self) -> Weight {
        self.upper.saturating_sub(self.lower)
    }
}

/// One node of the shared branch-and-bound tree.
///
/// The partial energies cover the assigned sites only and are shared by every sequence whose
/// legal choices include this node. The bounds on the unassigned sites depend on the sequence
/// and are stored per sequence.
#[derive(Debug, Clone)]
pub struct BoundNode {
    assignment: Assignment,
    level: usize,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Corrected lower-table energy of the assigned sites.
    pub(crate) partial_lower: f64,
    /// Rigid-table energy of the assigned sites.
    pub(crate) partial_upper: f64,
    remainder: HashMap<Sequence, RemainderBounds>,
    minimized: Option<f64>,
}

impl BoundNode {
    fn new(
        assignment: Assignment,
        parent: Option<NodeId>,
        partial_lower: f64,
        partial_upper: f64,
    ) -> Self {
        Self {
            level: assignment.num_assigned(),
            assignment,
            parent,
            children: Vec::new(),
            partial_lower,
            partial_upper,
            remainder: HashMap::new(),
            minimized: None,
        }
    }

    #[inline]
    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.assignment.is_full()
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized.is_some()
    }

    pub fn minimized_energy(&self) -> Option<f64> {
        self.minimized
    }

    pub fn partial_lower(&self) -> f64 {
        self.partial_lower
    }

    pub fn partial_upper(&self) -> f64 {
        self.partial_upper
    }

    /// Leaves have nothing left to bound, so they answer for every sequence.
    pub fn remainder(&self, sequence: &Sequence) -> Option<RemainderBounds> {
        if self.is_leaf() {
            return Some(RemainderBounds::NONE);
        }
        self.remainder.get(sequence).copied()
    }

    pub fn has_remainder(&self, sequence: &Sequence) -> bool {
        self.is_leaf() || self.remainder.contains_key(sequence)
    }

    pub(crate) fn clear_remainders(&mut self) {
        self.remainder.clear();
    }

    /// Lower and upper free-energy bounds over the conformations below this node.
    pub fn energy_bounds(&self, sequence: &Sequence) -> Option<(f64, f64)> {
        if let Some(energy) = self.minimized {
            return Some((energy, energy));
        }
        let rest = self.remainder(sequence)?;
        Some((
            self.partial_lower + rest.lower,
            self.partial_upper + rest.upper,
        ))
    }

    pub fn weights(
        &self,
        sequence: &Sequence,
        calculator: &BoltzmannCalculator,
    ) -> Option<NodeWeights> {
        let (lower_energy, upper_energy) = self.energy_bounds(sequence)?;
        let upper = calculator.weight(lower_energy);
        let lower = calculator.weight(upper_energy).min(upper);
        Some(NodeWeights { lower, upper })
    }
}

/// Arena of bound nodes shared by every sequence bound of one state.
///
/// Nodes are never removed, so a node's id stays valid for the lifetime of the tree.
#[derive(Debug)]
pub struct BoundTree {
    nodes: SlotMap<NodeId, BoundNode>,
    root: NodeId,
}

impl BoundTree {
    pub fn new(num_sites: usize, root_lower: f64, root_upper: f64) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(BoundNode::new(
            Assignment::unassigned(num_sites),
            None,
            root_lower,
            root_upper,
        ));
        Self { nodes, root }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&BoundNode> {
        self.nodes.get(id)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut BoundNode> {
        self.nodes.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &BoundNode)> {
        self.nodes.iter()
    }

    /// The child of `parent` that assigns `choice` at `site`, if it was created already.
    pub fn find_child(&self, parent: NodeId, site: usize, choice: usize) -> Option<NodeId> {
        let node = self.nodes.get(parent)?;
        node.children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].assignment.get(site) == Some(choice))
    }

    /// Returns the existing child with `assignment`, or creates it with the given partial
    /// energies. Existing children keep their energies.
    pub(crate) fn get_or_insert_child(
        &mut self,
        parent: NodeId,
        assignment: Assignment,
        partial_lower: f64,
        partial_upper: f64,
    ) -> NodeId {
        if let Some(existing) = self.nodes.get(parent).and_then(|node| {
            node.children
                .iter()
                .copied()
                .find(|&c| self.nodes[c].assignment == assignment)
        }) {
            return existing;
        }
        let id = self.nodes.insert(BoundNode::new(
            assignment,
            Some(parent),
            partial_lower,
            partial_upper,
        ));
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(id);
        }
        id
    }

    pub(crate) fn set_remainder(
        &mut self,
        id: NodeId,
        sequence: &Sequence,
        bounds: RemainderBounds,
    ) {
        if let Some(node) = self.nodes.get_mut(id) {
            if !node.is_leaf() {
                node.remainder.insert(sequence.clone(), bounds);
            }
        }
    }

    pub(crate) fn set_minimized(&mut self, id: NodeId, energy: f64) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.minimized = Some(energy);
        }
    }

    /// Raises the corrected partial lower energy of a node, capped at its rigid energy.
    /// Returns `true` if it grew.
    pub(crate) fn raise_partial_lower(&mut self, id: NodeId, energy: f64) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        let raised = energy.min(node.partial_upper);
        if node.is_minimized() || !(raised > node.partial_lower + RAISE_EPSILON) {
            return false;
        }
        node.partial_lower = raised;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::space::{Choice, ConfSpace, Site};

    fn sequence(num_sites: usize) -> Sequence {
        let space = ConfSpace::new(
            (0..num_sites)
                .map(|i| Site::new(format!("S{}", i), "A", false, vec![Choice::new("A")]))
                .collect(),
        )
        .unwrap();
        Sequence::unassigned(&space)
    }

    #[test]
    fn get_or_insert_child_reuses_existing_children() {
        let mut tree = BoundTree::new(3, 0.0, 0.0);
        let root = tree.root();
        let a = tree.get_or_insert_child(root, Assignment::unassigned(3).with(1, 2), -1.0, 1.0);
        let b = tree.get_or_insert_child(root, Assignment::unassigned(3).with(1, 2), -5.0, 5.0);
        assert_eq!(a, b);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get(a).unwrap().partial_lower(), -1.0);
        assert_eq!(tree.find_child(root, 1, 2), Some(a));
        assert_eq!(tree.find_child(root, 1, 0), None);
        assert_eq!(tree.get(a).unwrap().level(), 1);
    }

    #[test]
    fn leaves_need_no_remainder() {
        let mut tree = BoundTree::new(2, 0.0, 0.0);
        let root = tree.root();
        let leaf = tree.get_or_insert_child(root, Assignment::from_choices(&[0, 1]), -2.0, 1.0);
        let seq = sequence(2);
        let node = tree.get(leaf).unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.energy_bounds(&seq), Some((-2.0, 1.0)));
        assert!(tree.get(root).unwrap().energy_bounds(&seq).is_none());
    }

    #[test]
    fn weights_bracket_the_node_energy_range() {
        let mut tree = BoundTree::new(3, -1.0, 2.0);
        let root = tree.root();
        let seq = sequence(3);
        tree.set_remainder(
            root,
            &seq,
            RemainderBounds {
                lower: -3.0,
                upper: 0.5,
            },
        );
        let calc = BoltzmannCalculator::new();
        let weights = tree.get(root).unwrap().weights(&seq, &calc).unwrap();
        assert_eq!(weights.upper, calc.weight(-4.0));
        assert_eq!(weights.lower, calc.weight(2.5));
        assert!(weights.error() > Weight::ZERO);
    }

    #[test]
    fn minimized_node_has_zero_error() {
        let mut tree = BoundTree::new(1, 0.0, 0.0);
        let root = tree.root();
        let leaf = tree.get_or_insert_child(root, Assignment::from_choices(&[0]), -1.0, 1.0);
        tree.set_minimized(leaf, 0.25);
        let calc = BoltzmannCalculator::new();
        let weights = tree
            .get(leaf)
            .unwrap()
            .weights(&sequence(1), &calc)
            .unwrap();
        assert_eq!(weights.error(), Weight::ZERO);
        assert!(!tree.raise_partial_lower(leaf, 0.5));
    }

    #[test]
    fn raise_partial_lower_never_lowers() {
        let mut tree = BoundTree::new(2, 0.0, 0.0);
        let root = tree.root();
        let node = tree.get_or_insert_child(root, Assignment::unassigned(2).with(0, 0), -1.0, 3.0);
        assert!(!tree.raise_partial_lower(node, -2.0));
        assert!(tree.raise_partial_lower(node, 0.5));
        assert_eq!(tree.get(node).unwrap().partial_lower(), 0.5);
        assert!(tree.raise_partial_lower(node, 10.0));
        assert_eq!(tree.get(node).unwrap().partial_lower(), 3.0);
        assert!(!tree.raise_partial_lower(node, 10.0));
    }
}
