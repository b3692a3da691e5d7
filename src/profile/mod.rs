//! Profile (cross-section) extraction requests
//!
//! A profile is a polyline with a width. A request walks its dataset's octree
//! along the polyline, larger nodes first, loading what it needs and handing
//! every loaded node that touches the profile to a [`ProfileSink`]. Requests
//! advance a little each frame, within the engine's time slice.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::core::types::{Mat4, Quat, Vec3};
use crate::dataset::{Dataset, DatasetId};
use crate::math::{Aabb, Frustum};
use crate::octree::{NodeGeometry, NodeId, NodeRecord, NodeRef};
use crate::streaming::{LoadRequest, NodeLoader, ResidencyCache};

/// Id of a profile request, unique within its dataset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileRequestId(pub u32);

/// Polyline in world space with a lateral width
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Profile {
    points: Vec<Vec3>,
    width: f32,
}

impl Profile {
    pub fn new(points: Vec<Vec3>, width: f32) -> Self {
        Self { points, width }
    }

    pub fn add_point(&mut self, point: Vec3) {
        self.points.push(point);
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn set_width(&mut self, width: f32) {
        self.width = width;
    }

    /// Consecutive point pairs
    pub fn segments(&self) -> impl Iterator<Item = (Vec3, Vec3)> + '_ {
        self.points.windows(2).map(|w| (w[0], w[1]))
    }
}

/// Receives the results of a profile request.
pub trait ProfileSink: Send {
    /// A loaded node intersecting the profile
    fn on_node(&mut self, node: NodeRef, record: &NodeRecord, geometry: &NodeGeometry);

    /// Every reachable node has been served
    fn on_finish(&mut self) {}

    /// The request was aborted; no further calls follow
    fn on_cancel(&mut self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    /// Not attached to a dataset yet
    Detached,
    Active,
    Finished,
    Cancelled,
}

#[derive(Clone, Copy, Debug)]
struct ProfileEntry {
    node: NodeId,
    weight: f32,
    seq: u64,
}

// Larger spheres first; equal weights pop in insertion order
impl Eq for ProfileEntry {}

impl PartialEq for ProfileEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for ProfileEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ProfileEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Incremental extraction of one profile from one dataset
pub struct ProfileRequest {
    id: ProfileRequestId,
    dataset: Option<DatasetId>,
    profile: Profile,
    max_depth: u32,
    max_nodes_per_update: usize,
    sink: Box<dyn ProfileSink>,
    queue: BinaryHeap<ProfileEntry>,
    next_seq: u64,
    /// Object-space box of every profile segment
    segments: Vec<Frustum>,
    highest_level_served: u32,
    nodes_served: usize,
    cancel_requested: bool,
    state: RequestState,
}

impl ProfileRequest {
    pub fn new(profile: Profile, max_depth: u32, sink: Box<dyn ProfileSink>) -> Self {
        Self {
            id: ProfileRequestId(0),
            dataset: None,
            profile,
            max_depth,
            max_nodes_per_update: usize::MAX,
            sink,
            queue: BinaryHeap::new(),
            next_seq: 0,
            segments: Vec::new(),
            highest_level_served: 0,
            nodes_served: 0,
            cancel_requested: false,
            state: RequestState::Detached,
        }
    }

    /// Limit how many nodes one `update` call may serve
    pub fn with_max_nodes_per_update(mut self, max: usize) -> Self {
        self.max_nodes_per_update = max.max(1);
        self
    }

    pub fn id(&self) -> ProfileRequestId {
        self.id
    }

    pub fn dataset(&self) -> Option<DatasetId> {
        self.dataset
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn highest_level_served(&self) -> u32 {
        self.highest_level_served
    }

    pub fn nodes_served(&self) -> usize {
        self.nodes_served
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == RequestState::Active
    }

    /// Finished or cancelled
    pub fn is_finished(&self) -> bool {
        matches!(self.state, RequestState::Finished | RequestState::Cancelled)
    }

    /// Bind to a dataset and seed the queue with its root
    pub(crate) fn attach(&mut self, id: ProfileRequestId, dataset: &Dataset) {
        self.id = id;
        self.dataset = Some(dataset.id());
        self.state = RequestState::Active;

        let Some(root) = dataset.octree().root() else {
            return;
        };
        if let Some(record) = dataset.node(root) {
            self.segments = segment_volumes(&self.profile, dataset.world_matrix(), record.bounding_box());
        }
        self.push(root, f32::INFINITY);
    }

    fn push(&mut self, node: NodeId, weight: f32) {
        self.queue.push(ProfileEntry {
            node,
            weight,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    /// Whether a node box touches any profile segment
    fn intersects(&self, bounds: &Aabb) -> bool {
        self.segments.iter().any(|s| s.intersects_aabb(bounds))
    }

    /// Advance the request until `deadline` or the per-update node limit
    ///
    /// Unloaded nodes are requested from `loader` (while fewer than
    /// `max_nodes_loading` loads are in flight) and revisited on a later
    /// update.
    ///
    /// # Returns
    /// True while the request is still active
    pub fn update(
        &mut self,
        dataset: &mut Dataset,
        cache: &mut ResidencyCache,
        loader: &mut dyn NodeLoader,
        max_nodes_loading: usize,
        deadline: Instant,
    ) -> bool {
        if !self.is_active() {
            return false;
        }

        let dataset_id = dataset.id();
        let mut waiting = Vec::new();
        let mut served = 0;

        while let Some(entry) = self.queue.pop() {
            let Some(node) = dataset.node(entry.node) else {
                continue;
            };
            if node.level() > self.max_depth {
                continue;
            }
            let node_ref = NodeRef::new(dataset_id, entry.node);

            let Some(geometry) = node.geometry() else {
                if !node.is_loading() && loader.pending_count() < max_nodes_loading {
                    let request = LoadRequest {
                        node: node_ref,
                        priority: entry.weight,
                    };
                    if loader.request(request) {
                        dataset.octree_mut().begin_loading(entry.node);
                    }
                }
                waiting.push(entry);
                continue;
            };

            cache.touch(node_ref, node);
            self.sink.on_node(node_ref, node, geometry);
            self.highest_level_served = self.highest_level_served.max(node.level());
            self.nodes_served += 1;
            served += 1;

            let children: Vec<(NodeId, f32)> = node
                .children()
                .filter_map(|c| dataset.node(c))
                .filter(|c| self.intersects(c.bounding_box()))
                .map(|c| (c.id(), c.bounding_sphere().radius))
                .collect();
            for (child, radius) in children {
                self.push(child, radius);
            }

            if served >= self.max_nodes_per_update || Instant::now() >= deadline {
                break;
            }
        }

        self.queue.extend(waiting);

        if self.queue.is_empty() {
            self.state = RequestState::Finished;
            log::info!(
                "Profile request {:?} on {:?} finished ({} nodes)",
                self.id, dataset_id, self.nodes_served
            );
            self.sink.on_finish();
            return false;
        }

        true
    }

    /// Abort now; no further results are delivered
    pub fn cancel(&mut self) {
        if self.is_finished() {
            return;
        }
        self.queue.clear();
        self.state = RequestState::Cancelled;
        log::info!("Profile request {:?} cancelled", self.id);
        self.sink.on_cancel();
    }

    /// Serve the deepest level reached so far, then stop
    pub fn finish_level_then_cancel(&mut self) {
        if self.cancel_requested || self.is_finished() {
            return;
        }
        self.max_depth = self.highest_level_served;
        self.cancel_requested = true;
    }
}

/// Object-space boxes around each profile segment
///
/// Boxes span the segment length, the profile width, and twice the height of
/// `root_bounds`, centered on the root's vertical middle.
fn segment_volumes(profile: &Profile, world: &Mat4, root_bounds: &Aabb) -> Vec<Frustum> {
    let world_inverse = world.inverse();
    let height = root_bounds.size().z * 2.0;
    let center_z = root_bounds.center().z;

    profile
        .segments()
        .map(|(a, b)| {
            let a = world_inverse.transform_point3(a);
            let b = world_inverse.transform_point3(b);
            let delta = b - a;
            let center = ((a + b) * 0.5).truncate().extend(center_z);
            let angle = delta.y.atan2(delta.x);
            let length = delta.truncate().length();
            let transform = Mat4::from_scale_rotation_translation(
                Vec3::new(length, profile.width(), height),
                Quat::from_rotation_z(angle),
                center,
            );
            Frustum::from_unit_cube(&transform)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octree::{build_uniform, NodeGeometry};
    use crate::streaming::throttle::tests::ManualLoader;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Log {
        nodes: Vec<String>,
        finished: bool,
        cancelled: bool,
    }

    struct RecordingSink(Arc<Mutex<Log>>);

    impl ProfileSink for RecordingSink {
        fn on_node(&mut self, _node: NodeRef, record: &NodeRecord, _geometry: &NodeGeometry) {
            self.0.lock().unwrap().nodes.push(record.name().to_string());
        }

        fn on_finish(&mut self) {
            self.0.lock().unwrap().finished = true;
        }

        fn on_cancel(&mut self) {
            self.0.lock().unwrap().cancelled = true;
        }
    }

    fn make_dataset(loaded: bool) -> Dataset {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::splat(8.0));
        let mut dataset = Dataset::new(DatasetId(0), "p", build_uniform(bounds, 2, 10, 1.0));
        if loaded {
            let ids: Vec<NodeId> = dataset.octree().iter().map(|n| n.id()).collect();
            for id in ids {
                dataset.octree_mut().begin_loading(id);
                dataset.octree_mut().finish_loading(id, NodeGeometry::empty(10));
            }
        }
        dataset
    }

    /// Line along x at y = 1, inside the low-y half of the root
    fn line_profile() -> Profile {
        Profile::new(vec![Vec3::new(0.5, 1.0, 4.0), Vec3::new(7.5, 1.0, 4.0)], 0.5)
    }

    fn request(max_depth: u32) -> (ProfileRequest, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let sink = Box::new(RecordingSink(Arc::clone(&log)));
        (ProfileRequest::new(line_profile(), max_depth, sink), log)
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_profile_segments() {
        let mut profile = Profile::new(vec![Vec3::ZERO], 1.0);
        assert_eq!(profile.segments().count(), 0);
        profile.add_point(Vec3::X);
        profile.add_point(Vec3::Y);
        assert_eq!(profile.segments().count(), 2);
    }

    #[test]
    fn test_serves_intersecting_nodes() {
        let mut dataset = make_dataset(true);
        let (req, log) = request(1);
        let id = dataset.add_profile_request(req);
        let mut cache = ResidencyCache::new();
        let mut loader = ManualLoader::default();

        let mut req = dataset.profile_requests.remove(0);
        assert_eq!(req.id(), id);
        let active = req.update(&mut dataset, &mut cache, &mut loader, 4, far_deadline());
        assert!(!active);

        let log = log.lock().unwrap();
        assert!(log.finished);
        // Root plus the four low-y children
        assert_eq!(log.nodes.len(), 5);
        assert_eq!(log.nodes[0], "r");
        for name in ["r0", "r1", "r4", "r5"] {
            assert!(log.nodes.iter().any(|n| n == name), "missing {}", name);
        }
        assert_eq!(cache.len(), 5);
        assert_eq!(req.highest_level_served(), 1);
    }

    #[test]
    fn test_requests_loads_for_unloaded_nodes() {
        let mut dataset = make_dataset(false);
        let (req, log) = request(0);
        dataset.add_profile_request(req);
        let mut cache = ResidencyCache::new();
        let mut loader = ManualLoader::default();
        let mut req = dataset.profile_requests.remove(0);

        assert!(req.update(&mut dataset, &mut cache, &mut loader, 4, far_deadline()));
        assert_eq!(loader.pending_count(), 1);
        let root = dataset.octree().root().unwrap();
        assert!(dataset.node(root).unwrap().is_loading());

        for result in loader.complete_all(10) {
            if let Ok(geometry) = result.result {
                dataset.octree_mut().finish_loading(result.node.node, geometry);
            }
        }

        assert!(!req.update(&mut dataset, &mut cache, &mut loader, 4, far_deadline()));
        assert_eq!(log.lock().unwrap().nodes, vec!["r".to_string()]);
    }

    #[test]
    fn test_cancel_stops_delivery() {
        let mut dataset = make_dataset(true);
        let (req, log) = request(2);
        dataset.add_profile_request(req);
        let mut cache = ResidencyCache::new();
        let mut loader = ManualLoader::default();
        let mut req = dataset.profile_requests.remove(0);

        req.cancel();
        assert_eq!(req.state(), RequestState::Cancelled);
        assert!(!req.update(&mut dataset, &mut cache, &mut loader, 4, far_deadline()));

        let log = log.lock().unwrap();
        assert!(log.cancelled);
        assert!(!log.finished);
        assert!(log.nodes.is_empty());
    }

    #[test]
    fn test_finish_level_then_cancel() {
        let mut dataset = make_dataset(true);
        let (req, log) = request(2);
        dataset.add_profile_request(req.with_max_nodes_per_update(1));
        let mut cache = ResidencyCache::new();
        let mut loader = ManualLoader::default();
        let mut req = dataset.profile_requests.remove(0);

        assert!(req.update(&mut dataset, &mut cache, &mut loader, 4, far_deadline()));
        assert_eq!(req.highest_level_served(), 0);

        req.finish_level_then_cancel();
        assert_eq!(req.max_depth(), 0);
        assert!(!req.update(&mut dataset, &mut cache, &mut loader, 4, far_deadline()));

        let log = log.lock().unwrap();
        assert_eq!(log.nodes, vec!["r".to_string()]);
        assert!(log.finished);
    }

    #[test]
    fn test_dataset_cancel_profile_requests() {
        let mut dataset = make_dataset(true);
        let (req, log) = request(2);
        dataset.add_profile_request(req);
        assert_eq!(dataset.profile_requests().len(), 1);

        dataset.cancel_profile_requests();
        assert!(dataset.profile_requests().is_empty());
        assert!(log.lock().unwrap().cancelled);
    }
}
