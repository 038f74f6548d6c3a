use super::tree::{NodeId, NodeWeights};
use crate::core::math::Weight;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A node in a queue, together with the weight bounds it had when it was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: NodeId,
    pub weights: NodeWeights,
}

impl QueueEntry {
    pub fn new(id: NodeId, weights: NodeWeights) -> Self {
        Self { id, weights }
    }

    #[inline]
    pub fn error(&self) -> Weight {
        self.weights.error()
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.error()
            .cmp(&other.error())
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-heap of nodes keyed by the width of their weight interval.
#[derive(Debug, Clone, Default)]
pub struct NodeQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl NodeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueueEntry) {
        self.heap.push(entry);
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }

    pub fn peek(&self) -> Option<&QueueEntry> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Removes up to `max` entries, widest first.
    pub fn take(&mut self, max: usize) -> Vec<QueueEntry> {
        let mut out = Vec::with_capacity(max.min(self.heap.len()));
        while out.len() < max {
            match self.heap.pop() {
                Some(entry) => out.push(entry),
                None => break,
            }
        }
        out
    }

    /// The `k` widest entries, without removing them.
    pub fn top(&self, k: usize) -> Vec<QueueEntry> {
        let mut entries: Vec<_> = self.heap.iter().copied().collect();
        entries.sort_unstable_by(|a, b| b.cmp(a));
        entries.truncate(k);
        entries
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = QueueEntry>) {
        self.heap.extend(entries);
    }

    pub fn lower_sum(&self) -> Weight {
        self.heap.iter().map(|e| e.weights.lower).sum()
    }

    pub fn upper_sum(&self) -> Weight {
        self.heap.iter().map(|e| e.weights.upper).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.heap.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tree::BoundTree;
    use crate::core::space::Assignment;

    fn ids(n: usize) -> Vec<NodeId> {
        let mut tree = BoundTree::new(1, 0.0, 0.0);
        let root = tree.root();
        let mut out = vec![root];
        for c in 1..n {
            out.push(tree.get_or_insert_child(root, Assignment::from_choices(&[c]), 0.0, 0.0));
        }
        out
    }

    fn entry(id: NodeId, lower: f64, upper: f64) -> QueueEntry {
        QueueEntry::new(
            id,
            NodeWeights {
                lower: Weight::from_f64(lower),
                upper: Weight::from_f64(upper),
            },
        )
    }

    #[test]
    fn pops_widest_interval_first() {
        let ids = ids(3);
        let mut queue = NodeQueue::new();
        queue.push(entry(ids[0], 1.0, 2.0));
        queue.push(entry(ids[1], 0.0, 5.0));
        queue.push(entry(ids[2], 3.0, 3.5));
        assert_eq!(queue.pop().unwrap().id, ids[1]);
        assert_eq!(queue.pop().unwrap().id, ids[0]);
        assert_eq!(queue.pop().unwrap().id, ids[2]);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn sums_cover_every_entry() {
        let ids = ids(2);
        let mut queue = NodeQueue::new();
        queue.push(entry(ids[0], 1.0, 2.0));
        queue.push(entry(ids[1], 0.5, 4.0));
        assert!((queue.lower_sum().to_f64() - 1.5).abs() < 1e-12);
        assert!((queue.upper_sum().to_f64() - 6.0).abs() < 1e-12);
        assert_eq!(NodeQueue::new().upper_sum(), Weight::ZERO);
    }

    #[test]
    fn take_and_top_respect_limits() {
        let ids = ids(3);
        let mut queue = NodeQueue::new();
        queue.push(entry(ids[0], 0.0, 1.0));
        queue.push(entry(ids[1], 0.0, 3.0));
        queue.push(entry(ids[2], 0.0, 2.0));
        let top: Vec<_> = queue.top(2).into_iter().map(|e| e.id).collect();
        assert_eq!(top, vec![ids[1], ids[2]]);
        assert_eq!(queue.len(), 3);
        let taken = queue.take(5);
        assert_eq!(taken.len(), 3);
        assert!(queue.is_empty());
    }
}
