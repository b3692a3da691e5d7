//! Clip volumes and node-level clip policy

use serde::{Deserialize, Serialize};

use crate::core::types::{Mat4, Quat, Vec2, Vec3};
use crate::math::{Aabb, Frustum};

/// What clipping does to visibility
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipTask {
    #[default]
    None,
    Highlight,
    ShowInside,
    ShowOutside,
}

/// How multiple clip volumes combine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipMethod {
    #[default]
    InsideAny,
    InsideAll,
}

/// A clip region in world space.
///
/// Every variant carries a transform mapping the unit cube [-0.5, 0.5]^3 onto
/// a box enclosing the region; node tests are made against that box.
#[derive(Clone, Debug, PartialEq)]
pub enum ClipVolume {
    Box { transform: Mat4 },
    Sphere { transform: Mat4 },
    Polygon { transform: Mat4, vertices: Vec<Vec2> },
}

impl ClipVolume {
    pub fn from_box(transform: Mat4) -> Self {
        Self::Box { transform }
    }

    pub fn sphere(center: Vec3, radius: f32) -> Self {
        Self::Sphere {
            transform: Mat4::from_scale_rotation_translation(
                Vec3::splat(radius * 2.0),
                Quat::IDENTITY,
                center,
            ),
        }
    }

    /// Vertical prism over a polygon in the XY plane, spanning `min_z..max_z`
    pub fn polygon(vertices: Vec<Vec2>, min_z: f32, max_z: f32) -> Self {
        let (min, max) = vertices.iter().fold(
            (Vec2::splat(f32::INFINITY), Vec2::splat(f32::NEG_INFINITY)),
            |(lo, hi), v| (lo.min(*v), hi.max(*v)),
        );
        let transform = if vertices.is_empty() {
            Mat4::from_scale(Vec3::ZERO)
        } else {
            let center = ((min + max) * 0.5).extend((min_z + max_z) * 0.5);
            let size = (max - min).extend(max_z - min_z);
            Mat4::from_scale_rotation_translation(size, Quat::IDENTITY, center)
        };
        Self::Polygon { transform, vertices }
    }

    pub fn transform(&self) -> &Mat4 {
        match self {
            Self::Box { transform } => transform,
            Self::Sphere { transform } => transform,
            Self::Polygon { transform, .. } => transform,
        }
    }
}

/// Aggregated intersection result of one node against all volumes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClipTest {
    pub inside_any: bool,
    pub inside_all: bool,
}

/// Clip volumes of one dataset, prepared in its object space.
pub struct ClipEvaluator {
    volumes: Vec<Frustum>,
    task: ClipTask,
    method: ClipMethod,
}

impl ClipEvaluator {
    /// Prepare `volumes` for a dataset with world matrix `world`
    pub fn new(volumes: &[ClipVolume], world: &Mat4, task: ClipTask, method: ClipMethod) -> Self {
        let world_inverse = world.inverse();
        let volumes = volumes
            .iter()
            .map(|v| Frustum::from_unit_cube(&(world_inverse * *v.transform())))
            .collect();
        Self { volumes, task, method }
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Count how many volumes an object-space box touches
    pub fn test(&self, bounds: &Aabb) -> ClipTest {
        let intersecting = self
            .volumes
            .iter()
            .filter(|v| v.intersects_aabb(bounds))
            .count();
        ClipTest {
            inside_any: intersecting > 0,
            inside_all: intersecting == self.volumes.len(),
        }
    }

    /// Whether clipping leaves a node with these bounds visible
    pub fn passes(&self, bounds: &Aabb) -> bool {
        if self.volumes.is_empty() {
            return true;
        }
        match self.task {
            ClipTask::ShowInside => {
                let test = self.test(bounds);
                match self.method {
                    ClipMethod::InsideAny => test.inside_any,
                    ClipMethod::InsideAll => test.inside_all,
                }
            }
            // No node-level test for outside clipping; every node passes
            ClipTask::ShowOutside => true,
            ClipTask::None | ClipTask::Highlight => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box_at(center: Vec3) -> ClipVolume {
        ClipVolume::from_box(Mat4::from_translation(center))
    }

    fn node_box() -> Aabb {
        Aabb::new(Vec3::splat(-0.25), Vec3::splat(0.25))
    }

    #[test]
    fn test_inside_any_with_one_of_two() {
        let volumes = vec![unit_box_at(Vec3::ZERO), unit_box_at(Vec3::new(10.0, 0.0, 0.0))];
        let eval = ClipEvaluator::new(&volumes, &Mat4::IDENTITY, ClipTask::ShowInside, ClipMethod::InsideAny);

        let test = eval.test(&node_box());
        assert!(test.inside_any);
        assert!(!test.inside_all);
        assert!(eval.passes(&node_box()));
    }

    #[test]
    fn test_inside_all_with_one_of_two() {
        let volumes = vec![unit_box_at(Vec3::ZERO), unit_box_at(Vec3::new(10.0, 0.0, 0.0))];
        let eval = ClipEvaluator::new(&volumes, &Mat4::IDENTITY, ClipTask::ShowInside, ClipMethod::InsideAll);
        assert!(!eval.passes(&node_box()));
    }

    #[test]
    fn test_show_inside_rejects_outside_node() {
        let volumes = vec![unit_box_at(Vec3::new(10.0, 0.0, 0.0))];
        let eval = ClipEvaluator::new(&volumes, &Mat4::IDENTITY, ClipTask::ShowInside, ClipMethod::InsideAny);
        assert!(!eval.passes(&node_box()));
    }

    #[test]
    fn test_show_outside_and_none_do_not_cull() {
        let volumes = vec![unit_box_at(Vec3::new(10.0, 0.0, 0.0))];
        for task in [ClipTask::ShowOutside, ClipTask::None, ClipTask::Highlight] {
            for method in [ClipMethod::InsideAny, ClipMethod::InsideAll] {
                let eval = ClipEvaluator::new(&volumes, &Mat4::IDENTITY, task, method);
                assert!(eval.passes(&node_box()));
            }
        }
    }

    #[test]
    fn test_no_volumes_passes() {
        let eval = ClipEvaluator::new(&[], &Mat4::IDENTITY, ClipTask::ShowInside, ClipMethod::InsideAll);
        assert!(eval.is_empty());
        assert!(eval.passes(&node_box()));
    }

    #[test]
    fn test_volume_moved_into_object_space() {
        // Dataset shifted by +10 on x: a world box at x=10 covers object origin
        let world = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));
        let volumes = vec![unit_box_at(Vec3::new(10.0, 0.0, 0.0))];
        let eval = ClipEvaluator::new(&volumes, &world, ClipTask::ShowInside, ClipMethod::InsideAny);
        assert!(eval.passes(&node_box()));
    }

    #[test]
    fn test_sphere_and_polygon_bounds() {
        let sphere = ClipVolume::sphere(Vec3::ZERO, 1.0);
        let eval = ClipEvaluator::new(&[sphere], &Mat4::IDENTITY, ClipTask::ShowInside, ClipMethod::InsideAny);
        assert!(eval.passes(&Aabb::new(Vec3::splat(0.9), Vec3::splat(1.1))));
        assert!(!eval.passes(&Aabb::new(Vec3::splat(1.5), Vec3::splat(2.0))));

        let polygon = ClipVolume::polygon(
            vec![Vec2::new(0.0, 0.0), Vec2::new(4.0, 0.0), Vec2::new(4.0, 4.0)],
            -1.0,
            1.0,
        );
        let eval = ClipEvaluator::new(&[polygon], &Mat4::IDENTITY, ClipTask::ShowInside, ClipMethod::InsideAny);
        assert!(eval.passes(&Aabb::new(Vec3::new(3.0, 3.0, 0.0), Vec3::new(3.5, 3.5, 0.5))));
        assert!(!eval.passes(&Aabb::new(Vec3::new(3.0, 3.0, 2.0), Vec3::new(3.5, 3.5, 3.0))));
    }
}
