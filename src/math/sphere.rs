//! Bounding sphere

use crate::core::types::Vec3;

/// Sphere used for screen-space size estimates
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// A sphere with a finite center and a finite, positive radius
    pub fn is_degenerate(&self) -> bool {
        !self.center.is_finite() || !self.radius.is_finite() || self.radius <= 0.0
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        self.center.distance(p) <= self.radius
    }
}
