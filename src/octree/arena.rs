//! Arena of octree nodes addressed by [`NodeId`].

use crate::core::error::Error;
use crate::core::types::Result;

use super::node::{NodeDesc, NodeGeometry, NodeId, NodeRecord, RenderHandle};

/// Octree hierarchy of one dataset.
///
/// Nodes are never removed; eviction only changes their load state. The root,
/// when present, is always `NodeId(0)`.
#[derive(Clone, Debug, Default)]
pub struct Octree {
    nodes: Vec<NodeRecord>,
}

impl Octree {
    /// Create an empty octree (no root yet)
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Create an octree holding only a root node
    pub fn with_root(desc: NodeDesc) -> Self {
        let root = NodeRecord::new(NodeId(0), "r".to_string(), 0, None, desc);
        Self { nodes: vec![root] }
    }

    /// Install the root node of an empty octree
    pub fn set_root(&mut self, desc: NodeDesc) -> Result<NodeId> {
        if !self.nodes.is_empty() {
            return Err(Error::Hierarchy("root already set".to_string()));
        }
        *self = Self::with_root(desc);
        Ok(NodeId(0))
    }

    pub fn root(&self) -> Option<NodeId> {
        if self.nodes.is_empty() { None } else { Some(NodeId(0)) }
    }

    /// Add a child under `parent` at octant `slot` (0-7)
    pub fn add_child(&mut self, parent: NodeId, slot: u8, desc: NodeDesc) -> Result<NodeId> {
        if slot > 7 {
            return Err(Error::Hierarchy(format!("child slot {} out of range", slot)));
        }
        let id = NodeId(self.nodes.len() as u32);

        let parent_node = self
            .nodes
            .get_mut(parent.index())
            .ok_or_else(|| Error::Hierarchy(format!("unknown parent {:?}", parent)))?;
        if parent_node.children[slot as usize].is_some() {
            return Err(Error::Hierarchy(format!(
                "slot {} of {} already occupied",
                slot, parent_node.name
            )));
        }
        parent_node.children[slot as usize] = Some(id);

        let name = format!("{}{}", parent_node.name, slot);
        let level = parent_node.level + 1;
        self.nodes.push(NodeRecord::new(id, name, level, Some(parent), desc));

        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(id.index())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(id.index())
    }

    /// Look up a node by its conventional name
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter()
    }

    /// True when the node has no parent or its parent is rendered
    pub fn is_parent_rendered(&self, id: NodeId) -> bool {
        match self.get(id).and_then(NodeRecord::parent) {
            None => true,
            Some(parent) => self.get(parent).is_some_and(NodeRecord::is_rendered),
        }
    }

    /// Children of `id` that currently hold decoded data
    pub fn loaded_children(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.get(id) else {
            return Vec::new();
        };
        node.children()
            .filter(|c| self.get(*c).is_some_and(NodeRecord::is_loaded))
            .collect()
    }

    // --- State transitions ---

    pub fn begin_loading(&mut self, id: NodeId) -> bool {
        self.get_mut(id).is_some_and(|n| n.begin_loading())
    }

    pub fn finish_loading(&mut self, id: NodeId, geometry: NodeGeometry) -> bool {
        self.get_mut(id).is_some_and(|n| n.finish_loading(geometry))
    }

    pub fn fail_loading(&mut self, id: NodeId) -> bool {
        self.get_mut(id).is_some_and(|n| n.fail_loading())
    }

    pub fn promote(&mut self, id: NodeId, handle: RenderHandle) -> bool {
        self.get_mut(id).is_some_and(|n| n.promote(handle))
    }

    pub fn dispose(&mut self, id: NodeId) -> Option<RenderHandle> {
        self.get_mut(id).and_then(|n| n.dispose())
    }
}
