//! Octree node records
//!
//! A node is either plain geometry that moves through the load states, or a
//! rendered node that owns GPU resources through a [`RenderHandle`].

use std::fmt;
use std::sync::Arc;

use crate::core::types::{Mat4, Vec3};
use crate::math::{Aabb, BoundingSphere};

/// Handle of a node inside its dataset's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Stable identifier of a dataset (one loaded point cloud).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(pub u32);

/// Globally unique reference to a node: dataset plus arena handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub dataset: DatasetId,
    pub node: NodeId,
}

impl NodeRef {
    pub fn new(dataset: DatasetId, node: NodeId) -> Self {
        Self { dataset, node }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dataset.0, self.node.0)
    }
}

/// Opaque handle to GPU resources owned by the render backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderHandle(pub u64);

/// Decoded point data of a node, ready for upload.
#[derive(Clone, Debug)]
pub struct NodeGeometry {
    /// Number of decoded points
    pub num_points: u64,
    /// Decoded attribute buffer; layout is owned by the loader and backend
    pub data: Arc<[u8]>,
}

impl NodeGeometry {
    pub fn new(num_points: u64, data: Vec<u8>) -> Self {
        Self {
            num_points,
            data: data.into(),
        }
    }

    /// Geometry without an attached buffer
    pub fn empty(num_points: u64) -> Self {
        Self::new(num_points, Vec::new())
    }
}

/// Load state of a node that is not GPU-resident.
#[derive(Clone, Debug, Default)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Loaded(NodeGeometry),
}

/// Per-node render bookkeeping.
#[derive(Clone, Debug)]
pub struct RenderState {
    pub handle: RenderHandle,
    /// Dataset transform version last applied; `None` until the first apply
    pub transform_version: Option<u64>,
    pub visible: bool,
}

/// What a node currently is.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Geometry(LoadState),
    Rendered {
        geometry: NodeGeometry,
        render: RenderState,
    },
}

/// Description used when inserting a node into an octree.
#[derive(Clone, Copy, Debug)]
pub struct NodeDesc {
    pub bounds: Aabb,
    pub num_points: u64,
    /// Estimated point spacing at this level
    pub spacing: f32,
}

impl NodeDesc {
    pub fn new(bounds: Aabb, num_points: u64, spacing: f32) -> Self {
        Self { bounds, num_points, spacing }
    }
}

/// A single octree node.
#[derive(Clone, Debug)]
pub struct NodeRecord {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) bounds: Aabb,
    pub(crate) sphere: BoundingSphere,
    pub(crate) level: u32,
    pub(crate) num_points: u64,
    pub(crate) spacing: f32,
    pub(crate) children: [Option<NodeId>; 8],
    /// Non-owning back reference, only used for the "parent rendered" check
    pub(crate) parent: Option<NodeId>,
    pub(crate) kind: NodeKind,
}

impl NodeRecord {
    pub(crate) fn new(id: NodeId, name: String, level: u32, parent: Option<NodeId>, desc: NodeDesc) -> Self {
        Self {
            id,
            name,
            bounds: desc.bounds,
            sphere: desc.bounds.bounding_sphere(),
            level,
            num_points: desc.num_points,
            spacing: desc.spacing,
            children: [None; 8],
            parent,
            kind: NodeKind::Geometry(LoadState::Unloaded),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Conventional octree name: `r` followed by the child slot of each level
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounding_box(&self) -> &Aabb {
        &self.bounds
    }

    pub fn bounding_sphere(&self) -> &BoundingSphere {
        &self.sphere
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn num_points(&self) -> u64 {
        self.num_points
    }

    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn child(&self, slot: u8) -> Option<NodeId> {
        self.children.get(slot as usize).copied().flatten()
    }

    /// Children in slot order
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().filter_map(|c| *c)
    }

    pub fn has_children(&self) -> bool {
        self.children.iter().any(Option::is_some)
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Decoded data is present (loaded or rendered)
    pub fn is_loaded(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Geometry(LoadState::Loaded(_)) | NodeKind::Rendered { .. }
        )
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.kind, NodeKind::Geometry(LoadState::Loading))
    }

    pub fn is_rendered(&self) -> bool {
        matches!(self.kind, NodeKind::Rendered { .. })
    }

    pub fn geometry(&self) -> Option<&NodeGeometry> {
        match &self.kind {
            NodeKind::Geometry(LoadState::Loaded(geometry)) => Some(geometry),
            NodeKind::Rendered { geometry, .. } => Some(geometry),
            _ => None,
        }
    }

    pub fn render_state(&self) -> Option<&RenderState> {
        match &self.kind {
            NodeKind::Rendered { render, .. } => Some(render),
            NodeKind::Geometry(_) => None,
        }
    }

    pub(crate) fn render_state_mut(&mut self) -> Option<&mut RenderState> {
        match &mut self.kind {
            NodeKind::Rendered { render, .. } => Some(render),
            NodeKind::Geometry(_) => None,
        }
    }

    /// Node-local matrix; point positions are stored relative to the box minimum
    pub fn local_transform(&self) -> Mat4 {
        Mat4::from_translation(self.bounds.min)
    }

    /// Bounding sphere center, or the box center when the sphere is unusable
    pub fn center(&self) -> Vec3 {
        if self.sphere.center.is_finite() {
            self.sphere.center
        } else {
            self.bounds.center()
        }
    }

    // --- State transitions ---

    /// UNLOADED -> LOADING
    pub(crate) fn begin_loading(&mut self) -> bool {
        match self.kind {
            NodeKind::Geometry(LoadState::Unloaded) => {
                self.kind = NodeKind::Geometry(LoadState::Loading);
                true
            }
            _ => false,
        }
    }

    /// LOADING -> LOADED
    pub(crate) fn finish_loading(&mut self, geometry: NodeGeometry) -> bool {
        match self.kind {
            NodeKind::Geometry(LoadState::Loading) => {
                self.kind = NodeKind::Geometry(LoadState::Loaded(geometry));
                true
            }
            _ => false,
        }
    }

    /// LOADING -> UNLOADED after a failed fetch
    pub(crate) fn fail_loading(&mut self) -> bool {
        match self.kind {
            NodeKind::Geometry(LoadState::Loading) => {
                self.kind = NodeKind::Geometry(LoadState::Unloaded);
                true
            }
            _ => false,
        }
    }

    /// LOADED -> RENDERED
    pub(crate) fn promote(&mut self, handle: RenderHandle) -> bool {
        let kind = std::mem::replace(&mut self.kind, NodeKind::Geometry(LoadState::Unloaded));
        match kind {
            NodeKind::Geometry(LoadState::Loaded(geometry)) => {
                self.kind = NodeKind::Rendered {
                    geometry,
                    render: RenderState {
                        handle,
                        transform_version: None,
                        visible: false,
                    },
                };
                true
            }
            other => {
                self.kind = other;
                false
            }
        }
    }

    /// LOADED or RENDERED -> UNLOADED; returns GPU resources to release
    pub(crate) fn dispose(&mut self) -> Option<RenderHandle> {
        let kind = std::mem::replace(&mut self.kind, NodeKind::Geometry(LoadState::Unloaded));
        match kind {
            NodeKind::Rendered { render, .. } => Some(render.handle),
            NodeKind::Geometry(LoadState::Loading) => {
                self.kind = NodeKind::Geometry(LoadState::Loading);
                None
            }
            NodeKind::Geometry(_) => None,
        }
    }
}
