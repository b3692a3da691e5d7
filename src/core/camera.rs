//! Camera and viewport descriptions consumed by the visibility traversal

use crate::core::types::{Vec3, Mat4, Quat};

/// Projection model of a camera
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    /// Perspective projection
    Perspective {
        /// Vertical field of view in radians
        fov_y: f32,
        /// Aspect ratio (width / height)
        aspect: f32,
    },
    /// Orthographic projection
    Orthographic {
        /// Half of the visible height in world units
        half_height: f32,
        /// Aspect ratio (width / height)
        aspect: f32,
    },
}

/// Camera with position, rotation, and projection parameters
#[derive(Clone, Debug)]
pub struct Camera {
    /// World position
    pub position: Vec3,
    /// Rotation as quaternion
    pub rotation: Quat,
    /// Projection model
    pub projection: Projection,
    /// Near clip plane
    pub near: f32,
    /// Far clip plane
    pub far: f32,
}

impl Camera {
    /// Create a new perspective camera
    pub fn new(position: Vec3, fov_y_degrees: f32, aspect: f32) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            projection: Projection::Perspective {
                fov_y: fov_y_degrees.to_radians(),
                aspect,
            },
            near: 0.1,
            far: 10_000.0,
        }
    }

    /// Create a new orthographic camera
    pub fn orthographic(position: Vec3, half_height: f32, aspect: f32) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            projection: Projection::Orthographic { half_height, aspect },
            near: 0.1,
            far: 10_000.0,
        }
    }

    /// Create a perspective camera looking at a target
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let mut camera = Self::new(position, 60.0, 16.0 / 9.0);
        camera.point_at(target, up);
        camera
    }

    /// Rotate the camera so it faces `target`
    pub fn point_at(&mut self, target: Vec3, up: Vec3) {
        let forward = (target - self.position).normalize();
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);

        self.rotation = Quat::from_mat3(&glam::Mat3::from_cols(right, up, -forward));
    }

    /// Whether this is a perspective camera
    pub fn is_perspective(&self) -> bool {
        matches!(self.projection, Projection::Perspective { .. })
    }

    /// Vertical field of view in radians (perspective cameras only)
    pub fn fov_y(&self) -> Option<f32> {
        match self.projection {
            Projection::Perspective { fov_y, .. } => Some(fov_y),
            Projection::Orthographic { .. } => None,
        }
    }

    /// Get view matrix (world to camera space)
    pub fn view_matrix(&self) -> Mat4 {
        let rotation_matrix = Mat4::from_quat(self.rotation.conjugate());
        let translation_matrix = Mat4::from_translation(-self.position);
        rotation_matrix * translation_matrix
    }

    /// Get projection matrix (camera to clip space)
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection_matrix_with_near(self.near)
    }

    /// Projection matrix with an overridden near plane
    ///
    /// Culling uses a close near plane so nodes right in front of the
    /// camera are not rejected.
    pub fn projection_matrix_with_near(&self, near: f32) -> Mat4 {
        match self.projection {
            Projection::Perspective { fov_y, aspect } => {
                Mat4::perspective_rh(fov_y, aspect, near, self.far)
            }
            Projection::Orthographic { half_height, aspect } => {
                let half_width = half_height * aspect;
                Mat4::orthographic_rh(
                    -half_width, half_width,
                    -half_height, half_height,
                    near, self.far,
                )
            }
        }
    }

    /// Get combined view-projection matrix
    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Get forward direction (negative Z in camera space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    /// Update aspect ratio (call on window resize)
    pub fn set_aspect(&mut self, width: f32, height: f32) {
        let new_aspect = width / height;
        match &mut self.projection {
            Projection::Perspective { aspect, .. } => *aspect = new_aspect,
            Projection::Orthographic { aspect, .. } => *aspect = new_aspect,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 5.0), 60.0, 16.0 / 9.0)
    }
}

/// Render target size in device pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}
