//! Pinhole camera and the ray basis handed to the tracers.

use glam::{Mat4, Vec3};
use radiant_core::Ray;
use serde::{Deserialize, Serialize};

/// Camera for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub aspect: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
        }
    }
}

impl Camera {
    /// Create a camera looking from `position` towards `target`.
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3, fov: f32, aspect: f32) -> Self {
        Self {
            position,
            direction: (target - position).normalize_or(Vec3::NEG_Z),
            up,
            fov,
            aspect,
        }
    }

    /// Set the aspect ratio from an image size.
    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
        self
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction, self.up)
    }

    pub fn projection_matrix(&self, near: f32, far: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, near, far)
    }

    /// Get camera uniforms for the tracers.
    pub fn uniforms(&self) -> CameraUniforms {
        CameraUniforms::from(self)
    }
}

/// Ray basis shared with the tracing shaders.
///
/// A primary ray through normalized image coordinates `(u, v)`, with `v = 0`
/// at the top row, has direction `upper_left + u * horizontal + v * vertical`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub origin: [f32; 4],
    pub upper_left: [f32; 4],
    pub horizontal: [f32; 4],
    pub vertical: [f32; 4],
}

impl CameraUniforms {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Primary ray through normalized image coordinates.
    pub fn ray(&self, u: f32, v: f32) -> Ray {
        let origin = Vec3::from_slice(&self.origin[..3]);
        let direction = Vec3::from_slice(&self.upper_left[..3])
            + u * Vec3::from_slice(&self.horizontal[..3])
            + v * Vec3::from_slice(&self.vertical[..3]);
        Ray::new(origin, direction)
    }
}

impl From<&Camera> for CameraUniforms {
    fn from(camera: &Camera) -> Self {
        let forward = camera.direction.normalize_or(Vec3::NEG_Z);
        let right = forward.cross(camera.up).normalize_or(Vec3::X);
        let up = right.cross(forward);

        let half_height = (camera.fov * 0.5).tan();
        let half_width = half_height * camera.aspect;

        let upper_left = forward - right * half_width + up * half_height;
        let horizontal = right * (2.0 * half_width);
        let vertical = -up * (2.0 * half_height);

        Self {
            origin: camera.position.extend(1.0).to_array(),
            upper_left: upper_left.extend(0.0).to_array(),
            horizontal: horizontal.extend(0.0).to_array(),
            vertical: vertical.extend(0.0).to_array(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn uniforms_size() {
        assert_eq!(CameraUniforms::SIZE, 64);
    }

    #[test]
    fn center_ray_follows_direction() {
        let camera = Camera::look_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -3.0), Vec3::Y, 1.0, 2.0);
        let ray = camera.uniforms().ray(0.5, 0.5);
        assert_relative_eq!(ray.direction.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(ray.direction.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(ray.direction.z, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn top_left_ray_points_up_and_left() {
        let camera = Camera::default();
        let ray = camera.uniforms().ray(0.0, 0.0);
        assert!(ray.direction.x < 0.0);
        assert!(ray.direction.y > 0.0);

        let ray = camera.uniforms().ray(1.0, 1.0);
        assert!(ray.direction.x > 0.0);
        assert!(ray.direction.y < 0.0);
    }

    #[test]
    fn moving_the_camera_changes_uniforms() {
        let camera = Camera::default();
        let mut moved = camera;
        moved.position.x += 0.1;
        assert_ne!(camera.uniforms(), moved.uniforms());
        assert_eq!(camera.uniforms(), camera.uniforms());
    }

    #[test]
    fn image_size_sets_aspect() {
        let camera = Camera::default().with_image_size(64, 32);
        assert_relative_eq!(camera.aspect, 2.0);
    }
}
