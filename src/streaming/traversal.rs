//! Best-first visibility traversal
//!
//! Expands the octrees of all datasets through one shared priority queue,
//! highest projected size first, and admits nodes until the point budget is
//! spent. Admitted rendered nodes are shown; admitted nodes without GPU data
//! are either promoted on the spot or reported for loading.

use crate::backend::RenderBackend;
use crate::core::camera::{Camera, Projection, Viewport};
use crate::core::types::Vec3;
use crate::dataset::{ClipEvaluator, Dataset, DatasetId};
use crate::math::Frustum;
use crate::octree::{NodeId, NodeRecord, NodeRef};

use super::budget::PointBudget;
use super::config::StreamingConfig;
use super::priority::TraversalQueue;
use super::throttle::StreamingThrottle;

/// Outcome of one traversal
#[derive(Clone, Debug)]
pub struct TraversalResult {
    /// Rendered nodes shown this frame, in admission order
    pub visible_nodes: Vec<NodeRef>,
    /// Points of every admitted node
    pub num_visible_points: u64,
    /// Smallest spacing over admitted nodes; infinite when nothing was admitted
    pub lowest_spacing: f32,
    /// Admitted nodes still waiting for GPU data, in admission order
    pub unloaded: Vec<NodeRef>,
    /// Datasets whose world matrix changed since the previous traversal
    pub transform_changed: Vec<DatasetId>,
}

impl Default for TraversalResult {
    fn default() -> Self {
        Self {
            visible_nodes: Vec::new(),
            num_visible_points: 0,
            lowest_spacing: f32::INFINITY,
            unloaded: Vec::new(),
            transform_changed: Vec::new(),
        }
    }
}

/// Per-dataset values fixed for the duration of one traversal
struct DatasetFrame {
    /// Camera frustum in object space
    frustum: Frustum,
    /// Camera position in object space
    camera_position: Vec3,
    clip: ClipEvaluator,
    min_pixel_size: f64,
    max_level: u32,
}

impl DatasetFrame {
    fn new(dataset: &Dataset, camera: &Camera, near_clamp: f32) -> Self {
        let world = *dataset.world_matrix();
        let projection = camera.projection_matrix_with_near(camera.near.min(near_clamp));
        let frustum = Frustum::from_view_projection(&(projection * camera.view_matrix() * world));
        let camera_position = world.inverse().transform_point3(camera.position);

        Self {
            frustum,
            camera_position,
            clip: dataset.clip_evaluator(),
            min_pixel_size: dataset.config().minimum_node_pixel_size as f64,
            max_level: dataset.config().max_level,
        }
    }

    /// Queue weight of a child, or `None` when it is too small on screen
    fn child_weight(&self, child: &NodeRecord, projection: &Projection, viewport: Viewport) -> Option<f64> {
        let center = child.center();
        let distance = center.distance(self.camera_position) as f64;

        match *projection {
            Projection::Perspective { fov_y, .. } => {
                let radius = child.bounding_sphere().radius as f64;
                let slope = (fov_y as f64 / 2.0).tan();
                let proj_factor = (0.5 * viewport.height as f64) / (slope * distance);
                let screen_pixel_radius = sanitize(radius * proj_factor);

                if screen_pixel_radius < self.min_pixel_size {
                    return None;
                }
                if distance - radius < 0.0 {
                    return Some(f64::INFINITY);
                }
                Some(screen_pixel_radius)
            }
            Projection::Orthographic { .. } => {
                let diagonal = child.bounding_box().diagonal() as f64;
                Some(sanitize(diagonal / distance))
            }
        }
    }
}

/// Degenerate spheres must not poison the queue ordering
fn sanitize(weight: f64) -> f64 {
    if weight.is_nan() { 0.0 } else { weight }
}

/// Run one visibility traversal over all datasets
///
/// Resets each dataset's visibility results, admits nodes best-first under
/// the global and per-dataset point budgets, promotes up to the throttle's
/// limit of loaded nodes to the GPU, and refreshes stale node transforms.
pub fn traverse(
    datasets: &mut [Dataset],
    camera: &Camera,
    viewport: Viewport,
    config: &StreamingConfig,
    throttle: &mut StreamingThrottle,
    backend: &mut dyn RenderBackend,
) -> TraversalResult {
    let mut result = TraversalResult::default();
    let mut queue = TraversalQueue::new();
    let mut frames: Vec<Option<DatasetFrame>> = Vec::with_capacity(datasets.len());

    for (index, dataset) in datasets.iter_mut().enumerate() {
        if !dataset.is_initialized() {
            frames.push(None);
            continue;
        }

        // Hidden datasets still drop last frame's results
        if dataset.begin_visibility_frame() {
            result.transform_changed.push(dataset.id());
        }
        if !dataset.config().visible {
            frames.push(None);
            continue;
        }

        frames.push(Some(DatasetFrame::new(dataset, camera, config.frustum_near_clamp)));
        if let Some(root) = dataset.octree().root() {
            queue.push(index, root, f64::INFINITY);
        }
    }

    let dataset_budgets = datasets.iter().map(|d| d.config().point_budget).collect();
    let mut budget = PointBudget::new(config.point_budget, dataset_budgets);

    while let Some(entry) = queue.pop() {
        let Some(frame) = frames.get(entry.dataset).and_then(Option::as_ref) else {
            continue;
        };
        let dataset = &mut datasets[entry.dataset];
        let Some(node) = dataset.node(entry.node) else {
            continue;
        };
        let num_points = node.num_points();

        if budget.exceeds_global(num_points) {
            break;
        }

        let visible = frame.frustum.intersects_aabb(node.bounding_box())
            && budget.fits(entry.dataset, num_points)
            && node.level() < frame.max_level
            && frame.clip.passes(node.bounding_box());
        if !visible {
            log::trace!("Pruned {} ({})", node.name(), entry.node.0);
            continue;
        }

        let spacing = node.spacing();
        let is_rendered = node.is_rendered();
        let is_loaded = node.is_loaded();
        let children: Vec<NodeId> = node.children().collect();

        budget.admit(entry.dataset, num_points);
        result.lowest_spacing = result.lowest_spacing.min(spacing);
        dataset.visibility.num_visible_points += num_points;

        let node_ref = NodeRef::new(dataset.id(), entry.node);
        if !is_rendered && dataset.octree().is_parent_rendered(entry.node) {
            if is_loaded && throttle.try_promote() {
                promote(dataset, entry.node, backend);
            } else {
                result.unloaded.push(node_ref);
                dataset.visibility.visible_geometry.push(entry.node);
            }
        }

        if show_rendered(dataset, entry.node, backend) {
            result.visible_nodes.push(node_ref);
        }

        for child_id in children {
            let Some(child) = dataset.node(child_id) else {
                continue;
            };
            if let Some(weight) = frame.child_weight(child, &camera.projection, viewport) {
                queue.push(entry.dataset, child_id, weight);
            }
        }
    }

    result.num_visible_points = budget.global_used();
    result
}

/// Upload a loaded node and turn it into a rendered node
fn promote(dataset: &mut Dataset, id: NodeId, backend: &mut dyn RenderBackend) {
    let node_ref = NodeRef::new(dataset.id(), id);
    let Some(geometry) = dataset.node(id).and_then(NodeRecord::geometry) else {
        return;
    };
    let handle = backend.upload(node_ref, geometry);
    if dataset.octree_mut().promote(id, handle) {
        log::trace!("Promoted {} to GPU", node_ref);
    } else {
        backend.release(handle);
    }
}

/// Mark a rendered node visible and re-apply its world matrix if stale
///
/// Returns false for nodes that are not rendered.
fn show_rendered(dataset: &mut Dataset, id: NodeId, backend: &mut dyn RenderBackend) -> bool {
    let Some(node) = dataset.node(id) else {
        return false;
    };
    let Some(applied) = node.render_state().map(|r| r.transform_version) else {
        return false;
    };
    let stale = dataset.transform_tracker().is_stale(applied);
    let world = *dataset.world_matrix() * node.local_transform();
    let version = dataset.transform_version();

    let Some(render) = dataset.octree_mut().get_mut(id).and_then(NodeRecord::render_state_mut) else {
        return false;
    };
    render.visible = true;
    if stale {
        backend.set_transform(render.handle, world);
        render.transform_version = Some(version);
    }

    dataset.visibility.num_visible_nodes += 1;
    dataset.record_visible(id);
    true
}
