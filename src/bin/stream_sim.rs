//! Stream Sim - headless streaming simulation over a synthetic octree
//!
//! Usage:
//!   cargo run --release --bin stream_sim -- --depth 5 --frames 300
//!   cargo run --release --bin stream_sim -- --config streaming.json --latency 20

use std::time::Duration;

use glam::Vec3;

use pcstream::core::camera::{Camera, Viewport};
use pcstream::core::logging;
use pcstream::core::types::Result;
use pcstream::math::Aabb;
use pcstream::octree::{build_uniform, NodeGeometry};
use pcstream::streaming::{AsyncNodeLoader, LoadError, LoadRequest, StreamingConfig};
use pcstream::{DatasetConfig, NullBackend, VisibilityEngine};

fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let depth = parse_u32_arg(&args, "--depth").unwrap_or(4);
    let frames = parse_u32_arg(&args, "--frames").unwrap_or(240);
    let points = parse_u64_arg(&args, "--points").unwrap_or(20_000);
    let latency_ms = parse_u64_arg(&args, "--latency").unwrap_or(10);
    let size = parse_f32_arg(&args, "--size").unwrap_or(256.0);

    let config = match parse_str_arg(&args, "--config") {
        Some(path) => StreamingConfig::load(path)?,
        None => StreamingConfig::default(),
    };

    println!("=== pcstream simulation ===");
    println!("Depth:   {}", depth);
    println!("Frames:  {}", frames);
    println!("Points:  {} per node", points);
    println!("Budget:  {} points", config.point_budget);
    println!("Latency: {}ms", latency_ms);
    println!();

    let bounds = Aabb::new(Vec3::ZERO, Vec3::splat(size));
    let octree = build_uniform(bounds, depth, points, size / 64.0);

    let fetch = AsyncNodeLoader::fetch_fn(move |request: LoadRequest| async move {
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        let num_points = request.node.node.0 as u64 % 7 + points;
        Ok::<_, LoadError>(NodeGeometry::new(num_points, Vec::new()))
    });
    let mut loader = AsyncNodeLoader::new(fetch, config.max_nodes_loading)?;
    let mut backend = NullBackend::new();
    let mut engine = VisibilityEngine::new(config);
    let dataset = engine.create_dataset("synthetic", octree).with_config(DatasetConfig {
        minimum_node_pixel_size: 100.0,
        ..Default::default()
    });
    let mut datasets = vec![dataset];
    let viewport = Viewport::default();
    let center = bounds.center();

    for frame in 0..frames {
        // Orbit and slowly approach the dataset
        let angle = frame as f32 * 0.02;
        let radius = size * (2.0 - frame as f32 / frames.max(1) as f32 * 1.5);
        let position = center + Vec3::new(angle.cos() * radius, size * 0.3, angle.sin() * radius);
        let camera = Camera::look_at(position, center, Vec3::Y);

        let stats = engine.update(&mut datasets, &camera, viewport, &mut loader, &mut backend);

        if frame % 30 == 0 {
            log::info!(
                "frame {:>4}: {:>4} visible nodes, {:>9} points, {:>9} resident, {} evicted",
                stats.frame,
                stats.visible_nodes.len(),
                stats.num_visible_points,
                engine.cache().num_points(),
                stats.evicted,
            );
        }

        std::thread::sleep(Duration::from_millis(16));
    }

    println!();
    println!("Uploads:  {}", backend.uploads);
    println!("Releases: {}", backend.releases);
    println!("Resident: {} nodes, {} points", engine.cache().len(), engine.cache().num_points());

    Ok(())
}

fn parse_f32_arg(args: &[String], flag: &str) -> Option<f32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u64_arg(args: &[String], flag: &str) -> Option<u64> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
