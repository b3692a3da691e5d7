//! LRU residency cache for loaded nodes
//!
//! Tracks every loaded node that was visible recently, in recency order, along
//! with the running total of resident points. Under memory pressure whole
//! loaded subtrees are evicted, starting at the least recently used node.

use std::collections::HashMap;

use crate::backend::RenderBackend;
use crate::dataset::Dataset;
use crate::octree::{DatasetId, NodeRecord, NodeRef};

/// What the cache needs to know about a node it tracks
pub trait Resident {
    fn is_loaded(&self) -> bool;
    fn num_points(&self) -> u64;
}

impl Resident for NodeRecord {
    fn is_loaded(&self) -> bool {
        NodeRecord::is_loaded(self)
    }

    fn num_points(&self) -> u64 {
        NodeRecord::num_points(self)
    }
}

/// The node store eviction walks and disposes.
pub trait EvictionTarget {
    /// Children of `node` that currently hold decoded data
    fn loaded_children(&self, node: NodeRef) -> Vec<NodeRef>;

    /// Drop decoded data and GPU resources of `node`
    fn dispose(&mut self, node: NodeRef);
}

/// Eviction over the engine's datasets, releasing GPU handles as it goes
pub struct DatasetEviction<'a> {
    datasets: &'a mut [Dataset],
    backend: &'a mut dyn RenderBackend,
}

impl<'a> DatasetEviction<'a> {
    pub fn new(datasets: &'a mut [Dataset], backend: &'a mut dyn RenderBackend) -> Self {
        Self { datasets, backend }
    }
}

impl EvictionTarget for DatasetEviction<'_> {
    fn loaded_children(&self, node: NodeRef) -> Vec<NodeRef> {
        self.datasets
            .iter()
            .find(|d| d.id() == node.dataset)
            .map(|d| {
                d.octree()
                    .loaded_children(node.node)
                    .into_iter()
                    .map(|child| NodeRef::new(node.dataset, child))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn dispose(&mut self, node: NodeRef) {
        let Some(dataset) = self.datasets.iter_mut().find(|d| d.id() == node.dataset) else {
            return;
        };
        if let Some(handle) = dataset.octree_mut().dispose(node.node) {
            self.backend.release(handle);
        }
    }
}

#[derive(Clone, Debug)]
struct CacheEntry {
    node: NodeRef,
    num_points: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// LRU cache over resident nodes
///
/// Entries form a doubly linked list (head = least recently used) stored in a
/// slab, so touch and remove are O(1).
#[derive(Debug, Default)]
pub struct ResidencyCache {
    /// Map of node to slab slot
    index: HashMap<NodeRef, usize>,
    /// Slab of entries; `None` marks a free slot
    entries: Vec<Option<CacheEntry>>,
    free_slots: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    /// Sum of point counts of all entries
    num_points: u64,
}

impl ResidencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a node as most recently used
    ///
    /// No-op for nodes that are not loaded. New nodes add their point count to
    /// the running total; touching a present node only moves it to the tail.
    pub fn touch<N: Resident>(&mut self, key: NodeRef, node: &N) {
        if !node.is_loaded() {
            return;
        }

        if let Some(&slot) = self.index.get(&key) {
            self.unlink(slot);
            self.link_tail(slot);
            return;
        }

        let entry = CacheEntry {
            node: key,
            num_points: node.num_points(),
            prev: None,
            next: None,
        };
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.entries[slot] = Some(entry);
                slot
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.link_tail(slot);
        self.num_points = self.num_points.saturating_add(node.num_points());
    }

    /// Forget a node
    ///
    /// # Returns
    /// True if the node was tracked
    pub fn remove(&mut self, key: NodeRef) -> bool {
        let Some(slot) = self.index.remove(&key) else {
            return false;
        };
        self.unlink(slot);
        if let Some(entry) = self.entries[slot].take() {
            self.num_points = self.num_points.saturating_sub(entry.num_points);
        }
        self.free_slots.push(slot);
        true
    }

    /// Oldest tracked node, if any
    pub fn least_recently_used(&self) -> Option<NodeRef> {
        self.head.and_then(|slot| self.entry(slot)).map(|e| e.node)
    }

    /// Evict whole loaded subtrees until the resident total fits `point_load_limit`
    ///
    /// No new eviction round starts while a single entry or less remains.
    ///
    /// # Returns
    /// Every disposed node, in disposal order
    pub fn free_memory<T: EvictionTarget>(&mut self, point_load_limit: u64, target: &mut T) -> Vec<NodeRef> {
        let mut evicted = Vec::new();

        while self.num_points > point_load_limit && self.len() > 1 {
            let Some(oldest) = self.least_recently_used() else {
                break;
            };
            self.dispose_subtree(oldest, target, &mut evicted);
        }

        if !evicted.is_empty() {
            log::debug!(
                "Evicted {} nodes (resident points: {}, limit: {})",
                evicted.len(), self.num_points, point_load_limit
            );
        }

        evicted
    }

    /// Depth-first disposal of `root` and its loaded descendants
    fn dispose_subtree<T: EvictionTarget>(&mut self, root: NodeRef, target: &mut T, evicted: &mut Vec<NodeRef>) {
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            let children = target.loaded_children(current);
            target.dispose(current);
            self.remove(current);
            evicted.push(current);
            stack.extend(children);
        }
    }

    /// Drop every entry of a dataset without disposing anything
    pub fn remove_dataset(&mut self, dataset: DatasetId) -> usize {
        let keys: Vec<NodeRef> = self.index.keys().filter(|k| k.dataset == dataset).copied().collect();
        for key in &keys {
            self.remove(*key);
        }
        keys.len()
    }

    pub fn contains(&self, key: NodeRef) -> bool {
        self.index.contains_key(&key)
    }

    /// Number of tracked nodes
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Sum of point counts of tracked nodes
    pub fn num_points(&self) -> u64 {
        self.num_points
    }

    /// Tracked nodes from least to most recently used
    pub fn iter(&self) -> impl Iterator<Item = NodeRef> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let entry = self.entry(cursor?)?;
            cursor = entry.next;
            Some(entry.node)
        })
    }

    fn entry(&self, slot: usize) -> Option<&CacheEntry> {
        self.entries.get(slot).and_then(Option::as_ref)
    }

    fn entry_mut(&mut self, slot: usize) -> Option<&mut CacheEntry> {
        self.entries.get_mut(slot).and_then(Option::as_mut)
    }

    /// Detach a slot from the recency list
    fn unlink(&mut self, slot: usize) {
        let Some((prev, next)) = self.entry(slot).map(|e| (e.prev, e.next)) else {
            return;
        };

        match prev {
            Some(p) => {
                if let Some(e) = self.entry_mut(p) {
                    e.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(e) = self.entry_mut(n) {
                    e.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(e) = self.entry_mut(slot) {
            e.prev = None;
            e.next = None;
        }
    }

    /// Append a detached slot at the most recent end
    fn link_tail(&mut self, slot: usize) {
        let old_tail = self.tail;
        if let Some(e) = self.entry_mut(slot) {
            e.prev = old_tail;
            e.next = None;
        }
        match old_tail {
            Some(t) => {
                if let Some(e) = self.entry_mut(t) {
                    e.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }
}
