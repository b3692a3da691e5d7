//! Synthetic hierarchy construction

use crate::math::Aabb;

use super::arena::Octree;
use super::node::{NodeDesc, NodeId};

/// Build a complete octree of the given depth.
///
/// Every node holds `points_per_node` points and spacing halves per level,
/// starting from `root_spacing`. Depth 0 yields a root-only tree.
pub fn build_uniform(bounds: Aabb, depth: u32, points_per_node: u64, root_spacing: f32) -> Octree {
    let mut tree = Octree::with_root(NodeDesc::new(bounds, points_per_node, root_spacing));
    let mut frontier: Vec<(NodeId, Aabb, u32)> = vec![(NodeId(0), bounds, 0)];

    while let Some((parent, parent_bounds, level)) = frontier.pop() {
        if level >= depth {
            continue;
        }
        let spacing = root_spacing / (1u64 << (level + 1)) as f32;
        for slot in 0..8u8 {
            let child_bounds = parent_bounds.child_octant(slot);
            let desc = NodeDesc::new(child_bounds, points_per_node, spacing);
            // Slots of a freshly created parent are always free
            if let Ok(child) = tree.add_child(parent, slot, desc) {
                frontier.push((child, child_bounds, level + 1));
            }
        }
    }

    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;

    #[test]
    fn test_build_uniform_counts() {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::splat(8.0));
        assert_eq!(build_uniform(bounds, 0, 10, 1.0).len(), 1);
        assert_eq!(build_uniform(bounds, 1, 10, 1.0).len(), 9);
        assert_eq!(build_uniform(bounds, 2, 10, 1.0).len(), 73);
    }

    #[test]
    fn test_build_uniform_spacing_and_bounds() {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::splat(8.0));
        let tree = build_uniform(bounds, 2, 10, 1.0);

        for node in tree.iter() {
            let expected = 1.0 / (1u32 << node.level()) as f32;
            assert!((node.spacing() - expected).abs() < 1e-6);
            assert!(bounds.intersects(node.bounding_box()));
        }

        let r0 = tree.find("r0").unwrap();
        let r0 = tree.get(r0).unwrap();
        assert_eq!(r0.bounding_box().max, Vec3::splat(4.0));
    }
}
