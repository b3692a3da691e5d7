//! Convex six-plane volumes for culling

use crate::core::types::{Vec3, Vec4, Mat4};
use super::aabb::Aabb;

/// A plane defined by normal and distance from origin
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Plane through `point` facing along `normal` (normal is normalized)
    pub fn from_normal_and_point(normal: Vec3, point: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            distance: -normal.dot(point),
        }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// Convex volume bounded by 6 inward-facing planes
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Build from six inward-facing planes
    pub fn from_planes(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extract frustum planes from view-projection matrix
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let m = vp.to_cols_array_2d();

        // Left: row3 + row0
        let left = Self::normalize_plane(Vec4::new(
            m[0][3] + m[0][0],
            m[1][3] + m[1][0],
            m[2][3] + m[2][0],
            m[3][3] + m[3][0],
        ));

        // Right: row3 - row0
        let right = Self::normalize_plane(Vec4::new(
            m[0][3] - m[0][0],
            m[1][3] - m[1][0],
            m[2][3] - m[2][0],
            m[3][3] - m[3][0],
        ));

        // Bottom: row3 + row1
        let bottom = Self::normalize_plane(Vec4::new(
            m[0][3] + m[0][1],
            m[1][3] + m[1][1],
            m[2][3] + m[2][1],
            m[3][3] + m[3][1],
        ));

        // Top: row3 - row1
        let top = Self::normalize_plane(Vec4::new(
            m[0][3] - m[0][1],
            m[1][3] - m[1][1],
            m[2][3] - m[2][1],
            m[3][3] - m[3][1],
        ));

        // Near: z >= 0 in clip space (glam uses a [0, 1] depth range)
        let near = Self::normalize_plane(Vec4::new(
            m[0][2],
            m[1][2],
            m[2][2],
            m[3][2],
        ));

        // Far: row3 - row2
        let far = Self::normalize_plane(Vec4::new(
            m[0][3] - m[0][2],
            m[1][3] - m[1][2],
            m[2][3] - m[2][2],
            m[3][3] - m[3][2],
        ));

        Self {
            planes: [near, far, left, right, top, bottom],
        }
    }

    /// Volume covered by the unit cube [-0.5, 0.5]^3 under `m`
    ///
    /// Each face plane passes through the transformed face center and points
    /// toward the opposite face.
    pub fn from_unit_cube(m: &Mat4) -> Self {
        let px = m.transform_point3(Vec3::new(0.5, 0.0, 0.0));
        let nx = m.transform_point3(Vec3::new(-0.5, 0.0, 0.0));
        let py = m.transform_point3(Vec3::new(0.0, 0.5, 0.0));
        let ny = m.transform_point3(Vec3::new(0.0, -0.5, 0.0));
        let pz = m.transform_point3(Vec3::new(0.0, 0.0, 0.5));
        let nz = m.transform_point3(Vec3::new(0.0, 0.0, -0.5));

        Self::from_planes([
            Plane::from_normal_and_point(nx - px, px),
            Plane::from_normal_and_point(px - nx, nx),
            Plane::from_normal_and_point(ny - py, py),
            Plane::from_normal_and_point(py - ny, ny),
            Plane::from_normal_and_point(nz - pz, pz),
            Plane::from_normal_and_point(pz - nz, nz),
        ])
    }

    fn normalize_plane(plane: Vec4) -> Plane {
        let normal = Vec3::new(plane.x, plane.y, plane.z);
        let len = normal.length();
        if len > 0.0 {
            Plane {
                normal: normal / len,
                distance: plane.w / len,
            }
        } else {
            Plane::new(Vec3::ZERO, 0.0)
        }
    }

    /// Check if point is inside frustum
    pub fn contains_point(&self, point: Vec3) -> bool {
        for plane in &self.planes {
            if plane.distance_to_point(point) < 0.0 {
                return false;
            }
        }
        true
    }

    /// Check if AABB intersects frustum (conservative test)
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            // Find the corner most aligned with plane normal (p-vertex)
            let p = Vec3::new(
                if plane.normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );

            // If p-vertex is outside, AABB is completely outside
            if plane.distance_to_point(p) < 0.0 {
                return false;
            }
        }
        true
    }
}
