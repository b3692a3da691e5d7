//! Per-viewer frame orchestration
//!
//! [`VisibilityEngine`] owns the state that is shared by all datasets of one
//! viewer (configuration, residency cache, throttle) and runs the frame
//! pipeline once per render tick.

use std::time::{Duration, Instant};

use crate::backend::RenderBackend;
use crate::core::camera::{Camera, Viewport};
use crate::core::error::Error;
use crate::core::types::Result;
use crate::dataset::{Dataset, DatasetId};
use crate::octree::{NodeRef, Octree};
use crate::streaming::{
    traverse, DatasetEviction, LoadError, NodeLoader, ResidencyCache, StreamingConfig, StreamingThrottle,
};

/// Aggregate results of one frame
#[derive(Clone, Debug)]
pub struct FrameStats {
    /// Frame counter, starting at 1
    pub frame: u64,
    pub num_visible_points: u64,
    /// Smallest spacing over admitted nodes; infinite when nothing is visible
    pub lowest_spacing: f32,
    pub visible_nodes: Vec<NodeRef>,
    /// Load results integrated at the start of the frame
    pub loads_integrated: usize,
    pub loads_started: usize,
    /// Nodes disposed by eviction
    pub evicted: usize,
    /// Datasets whose world matrix changed this frame
    pub transform_changed: Vec<DatasetId>,
    /// Datasets the DEM updater should refresh
    pub dem_updates: Vec<DatasetId>,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            frame: 0,
            num_visible_points: 0,
            lowest_spacing: f32::INFINITY,
            visible_nodes: Vec::new(),
            loads_integrated: 0,
            loads_started: 0,
            evicted: 0,
            transform_changed: Vec::new(),
            dem_updates: Vec::new(),
        }
    }
}

/// Visibility, streaming and residency state of one viewer.
pub struct VisibilityEngine {
    config: StreamingConfig,
    cache: ResidencyCache,
    throttle: StreamingThrottle,
    frame: u64,
    next_dataset_id: u32,
}

impl VisibilityEngine {
    pub fn new(config: StreamingConfig) -> Self {
        let throttle = StreamingThrottle::from_config(&config);
        Self {
            config,
            cache: ResidencyCache::new(),
            throttle,
            frame: 0,
            next_dataset_id: 0,
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Global visible point budget; also moves the eviction limit
    pub fn set_point_budget(&mut self, budget: u64) {
        self.config.point_budget = budget;
    }

    pub fn set_max_nodes_loading(&mut self, max: usize) {
        self.config.max_nodes_loading = max;
        self.throttle.set_max_nodes_loading(max);
    }

    pub fn point_load_limit(&self) -> u64 {
        self.config.point_load_limit()
    }

    pub fn cache(&self) -> &ResidencyCache {
        &self.cache
    }

    /// Frames run so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Create a dataset under an id unique to this viewer
    pub fn create_dataset(&mut self, name: impl Into<String>, octree: Octree) -> Dataset {
        let id = DatasetId(self.next_dataset_id);
        self.next_dataset_id += 1;
        Dataset::new(id, name, octree)
    }

    /// Drop all cache entries of a dataset that is being unloaded
    pub fn forget_dataset(&mut self, id: DatasetId) -> usize {
        let removed = self.cache.remove_dataset(id);
        log::debug!("Forgot dataset {:?} ({} cache entries)", id, removed);
        removed
    }

    /// Cancel every profile request of one dataset
    pub fn cancel_profiles(&mut self, datasets: &mut [Dataset], id: DatasetId) -> Result<()> {
        let dataset = datasets
            .iter_mut()
            .find(|d| d.id() == id)
            .ok_or(Error::UnknownDataset(id))?;
        dataset.cancel_profile_requests();
        Ok(())
    }

    /// Run one frame
    ///
    /// Integrates finished loads, advances profile requests, traverses all
    /// datasets, starts new loads, refreshes the LRU order of visible nodes and
    /// evicts down to the point load limit.
    pub fn update(
        &mut self,
        datasets: &mut [Dataset],
        camera: &Camera,
        viewport: Viewport,
        loader: &mut dyn NodeLoader,
        backend: &mut dyn RenderBackend,
    ) -> FrameStats {
        self.frame += 1;

        let loads_integrated = integrate_loads(datasets, loader);
        self.update_profiles(datasets, loader);

        self.throttle.begin_frame();
        let result = traverse(datasets, camera, viewport, &self.config, &mut self.throttle, backend);

        let loads_started = self.throttle.schedule_loads(&result.unloaded, datasets, loader);

        for node in &result.visible_nodes {
            let record = datasets
                .iter()
                .find(|d| d.id() == node.dataset)
                .and_then(|d| d.node(node.node));
            if let Some(record) = record {
                self.cache.touch(*node, record);
            }
        }

        let limit = self.config.point_load_limit();
        let evicted = {
            let mut target = DatasetEviction::new(datasets, backend);
            self.cache.free_memory(limit, &mut target)
        };
        if !evicted.is_empty() {
            for dataset in datasets.iter_mut() {
                let disposed: Vec<_> = evicted
                    .iter()
                    .filter(|n| n.dataset == dataset.id())
                    .map(|n| n.node)
                    .collect();
                dataset.prune_disposed(&disposed);
            }
        }

        let dem_updates = datasets
            .iter()
            .filter(|d| d.config().generate_dem && d.config().visible && d.is_initialized())
            .map(Dataset::id)
            .collect();

        log::trace!(
            "Frame {}: {} visible nodes, {} points, {} resident",
            self.frame,
            result.visible_nodes.len(),
            result.num_visible_points,
            self.cache.num_points()
        );

        FrameStats {
            frame: self.frame,
            num_visible_points: result.num_visible_points,
            lowest_spacing: result.lowest_spacing,
            visible_nodes: result.visible_nodes,
            loads_integrated,
            loads_started,
            evicted: evicted.len(),
            transform_changed: result.transform_changed,
            dem_updates,
        }
    }

    /// Advance profile requests of each dataset within the time slice
    fn update_profiles(&mut self, datasets: &mut [Dataset], loader: &mut dyn NodeLoader) {
        let slice = Duration::from_secs_f32(self.config.profile_time_slice_ms.max(0.0) / 1000.0);

        for dataset in datasets.iter_mut() {
            if dataset.profile_requests.is_empty() {
                continue;
            }
            let deadline = Instant::now() + slice;
            let mut requests = std::mem::take(&mut dataset.profile_requests);

            for request in requests.iter_mut() {
                request.update(dataset, &mut self.cache, loader, self.config.max_nodes_loading, deadline);
                if Instant::now() >= deadline {
                    break;
                }
            }

            requests.retain(|r| !r.is_finished());
            dataset.profile_requests = requests;
        }
    }
}

impl Default for VisibilityEngine {
    fn default() -> Self {
        Self::new(StreamingConfig::default())
    }
}

/// Move completed loads into their nodes
///
/// Results for nodes that are no longer loading, or for datasets that are
/// gone, are dropped.
fn integrate_loads(datasets: &mut [Dataset], loader: &mut dyn NodeLoader) -> usize {
    let mut integrated = 0;

    for result in loader.poll_results() {
        let Some(dataset) = datasets.iter_mut().find(|d| d.id() == result.node.dataset) else {
            log::debug!("Dropping load result for unknown dataset: {}", result.node);
            continue;
        };
        let tree = dataset.octree_mut();

        match result.result {
            Ok(geometry) => {
                if tree.finish_loading(result.node.node, geometry) {
                    integrated += 1;
                } else {
                    log::debug!("Dropping stale load result for {}", result.node);
                }
            }
            Err(LoadError::Cancelled) => {
                log::debug!("Load of {} was cancelled", result.node);
                tree.fail_loading(result.node.node);
            }
            Err(e) => {
                log::warn!("Failed to load {}: {}", result.node, e);
                tree.fail_loading(result.node.node);
            }
        }
    }

    integrated
}
