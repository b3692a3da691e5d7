use criterion::{criterion_group, criterion_main, Criterion, black_box};

use pcstream::core::camera::{Camera, Viewport};
use pcstream::math::Aabb;
use pcstream::octree::{build_uniform, DatasetId, NodeGeometry, NodeRef};
use pcstream::streaming::{
    traverse, LoadRequest, LoadResult, NodeLoader, ResidencyCache, StreamingConfig, StreamingThrottle,
    TraversalQueue,
};
use pcstream::{Dataset, DatasetConfig, NullBackend, VisibilityEngine};

use glam::Vec3;

/// Loader whose requests complete on the next poll
#[derive(Default)]
struct InstantLoader {
    in_flight: Vec<NodeRef>,
}

impl NodeLoader for InstantLoader {
    fn request(&mut self, request: LoadRequest) -> bool {
        self.in_flight.push(request.node);
        true
    }

    fn poll_results(&mut self) -> Vec<LoadResult> {
        self.in_flight
            .drain(..)
            .map(|node| LoadResult { node, result: Ok(NodeGeometry::empty(0)) })
            .collect()
    }

    fn pending_count(&self) -> usize {
        self.in_flight.len()
    }

    fn is_pending(&self, node: NodeRef) -> bool {
        self.in_flight.contains(&node)
    }

    fn cancel(&mut self, node: NodeRef) {
        self.in_flight.retain(|n| *n != node);
    }
}

fn make_dataset(id: u32, depth: u32) -> Dataset {
    let bounds = Aabb::new(Vec3::ZERO, Vec3::splat(64.0));
    let mut dataset = Dataset::new(DatasetId(id), "bench", build_uniform(bounds, depth, 5_000, 1.0)).with_config(DatasetConfig {
        minimum_node_pixel_size: 20.0,
        ..Default::default()
    });

    let ids: Vec<_> = dataset.octree().iter().map(|n| (n.id(), n.num_points())).collect();
    for (id, points) in ids {
        dataset.octree_mut().begin_loading(id);
        dataset.octree_mut().finish_loading(id, NodeGeometry::empty(points));
    }
    dataset
}

fn camera() -> Camera {
    Camera::look_at(Vec3::new(32.0, 40.0, 120.0), Vec3::splat(32.0), Vec3::Y)
}

fn bench_traverse_depth_4(c: &mut Criterion) {
    let mut datasets = vec![make_dataset(0, 4)];
    let config = StreamingConfig::default();
    let mut throttle = StreamingThrottle::new(usize::MAX, 4);
    let mut backend = NullBackend::new();
    let camera = camera();

    c.bench_function("traverse_depth_4", |b| {
        b.iter(|| {
            throttle.begin_frame();
            let result = traverse(
                black_box(&mut datasets),
                black_box(&camera),
                Viewport::default(),
                &config,
                &mut throttle,
                &mut backend,
            );
            black_box(result.num_visible_points)
        });
    });
}

fn bench_engine_frame(c: &mut Criterion) {
    let mut datasets = vec![make_dataset(0, 4), make_dataset(1, 3)];
    let mut engine = VisibilityEngine::new(StreamingConfig {
        point_budget: 500_000,
        ..Default::default()
    });
    let mut loader = InstantLoader::default();
    let mut backend = NullBackend::new();

    c.bench_function("engine_frame_two_datasets", |b| {
        let mut frame = 0u32;
        b.iter(|| {
            frame += 1;
            let angle = frame as f32 * 0.05;
            let position = Vec3::new(32.0 + angle.cos() * 100.0, 40.0, 32.0 + angle.sin() * 100.0);
            let camera = Camera::look_at(position, Vec3::splat(32.0), Vec3::Y);
            let stats = engine.update(&mut datasets, &camera, Viewport::default(), &mut loader, &mut backend);
            black_box(stats.num_visible_points)
        });
    });
}

fn bench_cache_touch(c: &mut Criterion) {
    let dataset = make_dataset(0, 3);
    let nodes: Vec<_> = dataset.octree().iter().map(|n| NodeRef::new(dataset.id(), n.id())).collect();

    c.bench_function("cache_touch_585_nodes", |b| {
        let mut cache = ResidencyCache::new();
        b.iter(|| {
            for node in &nodes {
                if let Some(record) = dataset.node(node.node) {
                    cache.touch(*node, record);
                }
            }
            black_box(cache.num_points())
        });
    });
}

fn bench_queue_push_pop(c: &mut Criterion) {
    c.bench_function("traversal_queue_10k", |b| {
        b.iter(|| {
            let mut queue = TraversalQueue::new();
            for i in 0..10_000u32 {
                let weight = ((i.wrapping_mul(2_654_435_761)) % 10_000) as f64;
                queue.push(0, pcstream::octree::NodeId(i), weight);
            }
            let mut count = 0;
            while let Some(entry) = queue.pop() {
                count += entry.node.0 as u64;
            }
            black_box(count)
        });
    });
}

criterion_group!(
    benches,
    bench_traverse_depth_4,
    bench_engine_frame,
    bench_cache_touch,
    bench_queue_push_pop,
);
criterion_main!(benches);
