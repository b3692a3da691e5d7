//! pcstream - visibility-driven streaming for out-of-core point cloud octrees

pub mod core;
pub mod math;
pub mod octree;
pub mod dataset;
pub mod streaming;
pub mod profile;
pub mod backend;
pub mod engine;

pub use backend::{NullBackend, RenderBackend};
pub use dataset::{Dataset, DatasetConfig};
pub use engine::{FrameStats, VisibilityEngine};
pub use streaming::StreamingConfig;
