//! Datasets: one streamed point cloud each
//!
//! A dataset owns its octree arena, its world transform, per-dataset limits,
//! clip volumes, and the visibility results of the latest frame.

pub mod clip;
pub mod transform;

use serde::{Deserialize, Serialize};

use crate::core::types::Mat4;
use crate::math::Aabb;
use crate::octree::{NodeId, NodeRecord, Octree};
use crate::profile::{ProfileRequest, ProfileRequestId};

pub use crate::octree::DatasetId;
pub use clip::{ClipEvaluator, ClipMethod, ClipTask, ClipTest, ClipVolume};
pub use transform::TransformTracker;

/// Per-dataset overrides of streaming behavior
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Hidden datasets are skipped entirely
    pub visible: bool,
    /// Maximum visible points of this dataset
    pub point_budget: u64,
    /// Nodes at this level or deeper are never shown
    pub max_level: u32,
    /// Children projecting to fewer pixels than this are not traversed
    pub minimum_node_pixel_size: f32,
    pub clip_task: ClipTask,
    pub clip_method: ClipMethod,
    /// Report this dataset to the external DEM updater
    pub generate_dem: bool,
    /// Deepest level handed to the DEM updater
    pub max_dem_level: u32,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            visible: true,
            point_budget: u64::MAX,
            max_level: u32::MAX,
            minimum_node_pixel_size: 150.0,
            clip_task: ClipTask::None,
            clip_method: ClipMethod::InsideAny,
            generate_dem: false,
            max_dem_level: 5,
        }
    }
}

/// Visibility results of the latest traversal
#[derive(Clone, Debug, Default)]
pub struct VisibilityState {
    /// Rendered nodes shown this frame, in admission order
    pub visible_nodes: Vec<NodeId>,
    /// Admitted nodes that are not GPU-resident yet
    pub visible_geometry: Vec<NodeId>,
    pub num_visible_nodes: usize,
    pub num_visible_points: u64,
    pub deepest_visible_level: u32,
    /// Object-space union of the rendered visible nodes
    pub visible_bounds: Option<Aabb>,
}

/// One streamed point cloud.
pub struct Dataset {
    id: DatasetId,
    name: String,
    octree: Octree,
    world: Mat4,
    config: DatasetConfig,
    clip_volumes: Vec<ClipVolume>,
    transform: TransformTracker,
    pub(crate) visibility: VisibilityState,
    pub(crate) profile_requests: Vec<ProfileRequest>,
    next_profile_id: u32,
}

impl Dataset {
    /// Create a dataset under a caller-chosen id
    ///
    /// Ids must be unique among the datasets of one viewer;
    /// `VisibilityEngine::create_dataset` hands out fresh ones.
    pub fn new(id: DatasetId, name: impl Into<String>, octree: Octree) -> Self {
        Self {
            id,
            name: name.into(),
            octree,
            world: Mat4::IDENTITY,
            config: DatasetConfig::default(),
            clip_volumes: Vec::new(),
            transform: TransformTracker::new(),
            visibility: VisibilityState::default(),
            profile_requests: Vec::new(),
            next_profile_id: 0,
        }
    }

    pub fn with_config(mut self, config: DatasetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_world_matrix(mut self, world: Mat4) -> Self {
        self.world = world;
        self
    }

    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn octree(&self) -> &Octree {
        &self.octree
    }

    pub fn octree_mut(&mut self) -> &mut Octree {
        &mut self.octree
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.octree.get(id)
    }

    /// A dataset is initialized once its hierarchy has a root
    pub fn is_initialized(&self) -> bool {
        self.octree.root().is_some()
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DatasetConfig {
        &mut self.config
    }

    pub fn world_matrix(&self) -> &Mat4 {
        &self.world
    }

    pub fn set_world_matrix(&mut self, world: Mat4) {
        self.world = world;
    }

    pub fn clip_volumes(&self) -> &[ClipVolume] {
        &self.clip_volumes
    }

    pub fn set_clip_volumes(&mut self, volumes: Vec<ClipVolume>) {
        self.clip_volumes = volumes;
    }

    pub fn add_clip_volume(&mut self, volume: ClipVolume) {
        self.clip_volumes.push(volume);
    }

    /// Clip policy prepared in this dataset's object space
    pub fn clip_evaluator(&self) -> ClipEvaluator {
        ClipEvaluator::new(
            &self.clip_volumes,
            &self.world,
            self.config.clip_task,
            self.config.clip_method,
        )
    }

    pub fn transform_version(&self) -> u64 {
        self.transform.version()
    }

    pub(crate) fn transform_tracker(&self) -> &TransformTracker {
        &self.transform
    }

    // --- Visibility results ---

    pub fn visibility(&self) -> &VisibilityState {
        &self.visibility
    }

    pub fn visible_nodes(&self) -> &[NodeId] {
        &self.visibility.visible_nodes
    }

    pub fn visible_geometry(&self) -> &[NodeId] {
        &self.visibility.visible_geometry
    }

    pub fn num_visible_points(&self) -> u64 {
        self.visibility.num_visible_points
    }

    /// Visible rendered nodes the DEM updater consumes
    pub fn dem_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        let max_level = self.config.max_dem_level;
        self.visibility
            .visible_nodes
            .iter()
            .copied()
            .filter(move |id| self.octree.get(*id).is_some_and(|n| n.level() <= max_level))
    }

    /// Reset last frame's results and observe the world transform.
    ///
    /// Previously visible render nodes are hidden. Returns true when the
    /// world matrix changed since the last frame.
    pub(crate) fn begin_visibility_frame(&mut self) -> bool {
        for id in std::mem::take(&mut self.visibility.visible_nodes) {
            if let Some(render) = self.octree.get_mut(id).and_then(NodeRecord::render_state_mut) {
                render.visible = false;
            }
        }
        self.visibility = VisibilityState::default();
        self.transform.observe(&self.world)
    }

    /// Record a rendered node admitted this frame
    pub(crate) fn record_visible(&mut self, id: NodeId) {
        let Some(node) = self.octree.get(id) else {
            return;
        };
        let bounds = *node.bounding_box();
        let level = node.level();

        let state = &mut self.visibility;
        state.visible_nodes.push(id);
        state.deepest_visible_level = state.deepest_visible_level.max(level);
        state.visible_bounds = Some(match state.visible_bounds {
            Some(b) => b.merged(&bounds),
            None => bounds,
        });
    }

    /// Drop nodes disposed after traversal from this frame's results
    ///
    /// Counters, deepest level and bounds are rebuilt from what remains.
    pub(crate) fn prune_disposed(&mut self, disposed: &[NodeId]) {
        if disposed.is_empty() {
            return;
        }
        let octree = &self.octree;
        let state = &mut self.visibility;
        let mut removed_points = 0;

        for list in [&mut state.visible_nodes, &mut state.visible_geometry] {
            list.retain(|id| {
                if !disposed.contains(id) {
                    return true;
                }
                removed_points += octree.get(*id).map_or(0, NodeRecord::num_points);
                false
            });
        }

        state.num_visible_points = state.num_visible_points.saturating_sub(removed_points);
        state.num_visible_nodes = state.visible_nodes.len();
        state.deepest_visible_level = 0;
        state.visible_bounds = None;
        for id in &state.visible_nodes {
            let Some(node) = octree.get(*id) else {
                continue;
            };
            state.deepest_visible_level = state.deepest_visible_level.max(node.level());
            let bounds = *node.bounding_box();
            state.visible_bounds = Some(match state.visible_bounds {
                Some(b) => b.merged(&bounds),
                None => bounds,
            });
        }
    }

    // --- Profile requests ---

    /// Attach a profile extraction request; returns its id
    pub fn add_profile_request(&mut self, mut request: ProfileRequest) -> ProfileRequestId {
        let id = ProfileRequestId(self.next_profile_id);
        self.next_profile_id += 1;
        request.attach(id, self);
        self.profile_requests.push(request);
        id
    }

    pub fn profile_request(&self, id: ProfileRequestId) -> Option<&ProfileRequest> {
        self.profile_requests.iter().find(|r| r.id() == id)
    }

    pub fn profile_request_mut(&mut self, id: ProfileRequestId) -> Option<&mut ProfileRequest> {
        self.profile_requests.iter_mut().find(|r| r.id() == id)
    }

    pub fn profile_requests(&self) -> &[ProfileRequest] {
        &self.profile_requests
    }

    /// Abort every active profile request of this dataset
    pub fn cancel_profile_requests(&mut self) {
        for request in &mut self.profile_requests {
            request.cancel();
        }
        self.profile_requests.clear();
    }
}
