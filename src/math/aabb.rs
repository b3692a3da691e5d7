//! Axis-aligned bounding box

use crate::core::types::{Mat4, Vec3};
use super::sphere::BoundingSphere;

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create AABB from center and half-extents
    pub fn from_center_half_extent(center: Vec3, half_extent: Vec3) -> Self {
        Self {
            min: center - half_extent,
            max: center + half_extent,
        }
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Length of the box diagonal
    pub fn diagonal(&self) -> f32 {
        self.size().length()
    }

    /// Smallest sphere around the box corners
    pub fn bounding_sphere(&self) -> BoundingSphere {
        BoundingSphere::new(self.center(), self.diagonal() * 0.5)
    }

    /// True when min <= max on every axis and all coordinates are finite
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min.cmple(self.max).all()
    }

    /// Check if point is inside AABB
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y &&
        p.z >= self.min.z && p.z <= self.max.z
    }

    /// Check if two AABBs intersect
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Return merged AABB containing both
    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Axis-aligned box around the eight transformed corners
    pub fn transformed(&self, m: &Mat4) -> Aabb {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for i in 0..8u8 {
            let corner = Vec3::new(
                if i & 1 != 0 { self.max.x } else { self.min.x },
                if i & 2 != 0 { self.max.y } else { self.min.y },
                if i & 4 != 0 { self.max.z } else { self.min.z },
            );
            let p = m.transform_point3(corner);
            min = min.min(p);
            max = max.max(p);
        }
        Aabb { min, max }
    }

    /// Get child octant AABB for octree subdivision
    /// index: 0-7 representing xyz octant (bit 0=x, bit 1=y, bit 2=z)
    pub fn child_octant(&self, index: u8) -> Aabb {
        let center = self.center();
        let half = self.size() * 0.25;

        let offset = Vec3::new(
            if index & 1 != 0 { half.x } else { -half.x },
            if index & 2 != 0 { half.y } else { -half.y },
            if index & 4 != 0 { half.z } else { -half.z },
        );

        Aabb::from_center_half_extent(center + offset, half)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_accessors() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(aabb.center(), Vec3::splat(0.5));
        assert_eq!(aabb.size(), Vec3::ONE);
        assert!((aabb.diagonal() - 3.0_f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_intersects() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(0.5), Vec3::splat(1.5));
        let c = Aabb::new(Vec3::splat(2.0), Vec3::splat(3.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_child_octant() {
        let parent = Aabb::new(Vec3::ZERO, Vec3::splat(2.0));
        let child0 = parent.child_octant(0);
        assert_eq!(child0.min, Vec3::ZERO);
        assert_eq!(child0.max, Vec3::ONE);

        let child7 = parent.child_octant(7);
        assert_eq!(child7.min, Vec3::ONE);
        assert_eq!(child7.max, Vec3::splat(2.0));
    }

    #[test]
    fn test_transformed_translation() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let moved = aabb.transformed(&Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0)));
        assert_eq!(moved.min, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(moved.max, Vec3::new(6.0, 1.0, 1.0));
    }

    #[test]
    fn test_is_valid() {
        assert!(Aabb::new(Vec3::ZERO, Vec3::ONE).is_valid());
        assert!(!Aabb::new(Vec3::ONE, Vec3::ZERO).is_valid());
        assert!(!Aabb::new(Vec3::splat(f32::NAN), Vec3::ONE).is_valid());
    }
}
