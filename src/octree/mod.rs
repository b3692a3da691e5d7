//! Octree node model
//!
//! Nodes live in a per-dataset arena and refer to each other by [`NodeId`].
//! Parent links are non-owning and only answer "is my parent rendered?".

pub mod node;
pub mod arena;
pub mod builder;

pub use node::{
    NodeId, DatasetId, NodeRef, RenderHandle,
    NodeGeometry, LoadState, RenderState, NodeKind, NodeDesc, NodeRecord,
};
pub use arena::Octree;
pub use builder::build_uniform;
