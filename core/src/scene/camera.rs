use std::f32::consts::FRAC_PI_4;

use crate::math::{self, Mat4, Vec3};

/// Perspective camera described by a position and euler rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub rotation: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        math::view_matrix(self.position, self.rotation)
    }

    /// Projection for a viewport of `width` x `height` pixels.
    pub fn projection_matrix(&self, width: f32, height: f32) -> Mat4 {
        math::perspective_fov(self.fov_y, width, height, self.near, self.far)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Vec3::zeros(),
            fov_y: FRAC_PI_4,
            near: 0.1,
            far: 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec4;

    #[test]
    fn test_origin_is_in_front_of_camera() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, -5.0));
        let clip = camera.projection_matrix(1920.0, 1080.0)
            * camera.view_matrix()
            * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let depth = clip.z / clip.w;
        assert!(clip.w > 0.0);
        assert!((0.0..=1.0).contains(&depth));
    }
}
