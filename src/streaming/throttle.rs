//! Per-frame limits on GPU promotions and node loads

use crate::dataset::Dataset;
use crate::octree::NodeRef;

use super::config::StreamingConfig;
use super::loader::{LoadRequest, NodeLoader};

/// Bounds the work a single frame may start
#[derive(Clone, Debug)]
pub struct StreamingThrottle {
    max_promotions: usize,
    max_nodes_loading: usize,
    promoted_this_frame: usize,
}

impl StreamingThrottle {
    pub fn new(max_promotions: usize, max_nodes_loading: usize) -> Self {
        Self {
            max_promotions,
            max_nodes_loading,
            promoted_this_frame: 0,
        }
    }

    pub fn from_config(config: &StreamingConfig) -> Self {
        Self::new(config.max_promotions_per_frame, config.max_nodes_loading)
    }

    pub fn max_nodes_loading(&self) -> usize {
        self.max_nodes_loading
    }

    pub fn set_max_nodes_loading(&mut self, max: usize) {
        self.max_nodes_loading = max;
    }

    pub fn promoted_this_frame(&self) -> usize {
        self.promoted_this_frame
    }

    /// Reset the promotion counter
    pub fn begin_frame(&mut self) {
        self.promoted_this_frame = 0;
    }

    /// Claim one LOADED -> RENDERED promotion slot
    pub fn try_promote(&mut self) -> bool {
        if self.promoted_this_frame < self.max_promotions {
            self.promoted_this_frame += 1;
            true
        } else {
            false
        }
    }

    /// Start loads for the first `max_nodes_loading` unloaded nodes
    ///
    /// Nodes already loading or loaded are skipped, and nothing new starts
    /// while the loader has `max_nodes_loading` loads in flight. Earlier list
    /// entries get higher priority.
    ///
    /// # Returns
    /// Number of loads started
    pub fn schedule_loads(
        &self,
        unloaded: &[NodeRef],
        datasets: &mut [Dataset],
        loader: &mut dyn NodeLoader,
    ) -> usize {
        let candidates = unloaded.len().min(self.max_nodes_loading);
        let mut started = 0;

        for (i, node) in unloaded.iter().take(candidates).enumerate() {
            if loader.pending_count() >= self.max_nodes_loading {
                break;
            }
            let Some(dataset) = datasets.iter_mut().find(|d| d.id() == node.dataset) else {
                continue;
            };
            let Some(record) = dataset.node(node.node) else {
                continue;
            };
            if record.is_loading() || record.is_loaded() {
                continue;
            }

            let request = LoadRequest {
                node: *node,
                priority: (candidates - i) as f32,
            };
            if loader.request(request) {
                dataset.octree_mut().begin_loading(node.node);
                started += 1;
                log::trace!("Load started for {}", node);
            }
        }

        if started > 0 {
            log::debug!("Started {} loads ({} in flight)", started, loader.pending_count());
        }

        started
    }
}
