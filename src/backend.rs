//! GPU collaborator seam
//!
//! Buffer upload and release are owned by the host renderer. The engine only
//! decides *when* a node becomes GPU-resident, is re-transformed, or is freed.

use crate::core::types::Mat4;
use crate::octree::{NodeGeometry, NodeRef, RenderHandle};

/// Receives GPU residency decisions from the engine.
pub trait RenderBackend {
    /// Upload decoded geometry; the returned handle identifies the GPU copy
    fn upload(&mut self, node: NodeRef, geometry: &NodeGeometry) -> RenderHandle;

    /// Free GPU resources of an evicted node
    fn release(&mut self, handle: RenderHandle);

    /// Apply a new world matrix to a rendered node
    fn set_transform(&mut self, handle: RenderHandle, world: Mat4);
}

/// Backend that allocates sequential handles and counts calls.
///
/// Useful headless and in tests.
#[derive(Debug, Default)]
pub struct NullBackend {
    next_handle: u64,
    pub uploads: usize,
    pub releases: usize,
    pub transform_updates: usize,
    pub last_transform: Option<(RenderHandle, Mat4)>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles currently alive
    pub fn live_handles(&self) -> usize {
        self.uploads - self.releases
    }
}

impl RenderBackend for NullBackend {
    fn upload(&mut self, _node: NodeRef, _geometry: &NodeGeometry) -> RenderHandle {
        let handle = RenderHandle(self.next_handle);
        self.next_handle += 1;
        self.uploads += 1;
        handle
    }

    fn release(&mut self, _handle: RenderHandle) {
        self.releases += 1;
    }

    fn set_transform(&mut self, handle: RenderHandle, world: Mat4) {
        self.transform_updates += 1;
        self.last_transform = Some((handle, world));
    }
}
