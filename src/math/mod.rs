//! Mathematical utilities and data structures

pub mod aabb;
pub mod sphere;
pub mod frustum;

pub use aabb::Aabb;
pub use sphere::BoundingSphere;
pub use frustum::{Plane, Frustum};
