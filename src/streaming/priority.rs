//! Traversal priority queue ordered by projected node weight

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::octree::NodeId;

/// A node waiting to be visited during traversal
#[derive(Clone, Copy, Debug)]
pub struct QueueEntry {
    /// Index of the dataset in the frame's dataset slice
    pub dataset: usize,
    pub node: NodeId,
    /// Higher = more important
    pub weight: f64,
    /// Insertion order, used to break weight ties
    seq: u64,
}

// Max-heap on weight; equal weights pop in insertion order
impl Eq for QueueEntry {}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Frame-local queue of nodes to visit, highest weight first
#[derive(Debug, Default)]
pub struct TraversalQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl TraversalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a node; NaN weights are treated as zero
    pub fn push(&mut self, dataset: usize, node: NodeId, weight: f64) {
        let weight = if weight.is_nan() { 0.0 } else { weight };
        self.heap.push(QueueEntry {
            dataset,
            node,
            weight,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    /// Take the highest weight entry
    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.next_seq = 0;
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
