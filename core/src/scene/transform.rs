use crate::math::{self, Mat4, Vec3};

/// Position, euler rotation (radians) and scale of a scene object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Transform {
    /// Identity transform: no translation, no rotation, unit scale.
    pub fn identity() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Vec3::zeros(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }

    /// Returns this transform with a different position.
    #[must_use]
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Returns this transform with a different rotation.
    #[must_use]
    pub fn with_rotation(mut self, rotation: Vec3) -> Self {
        self.rotation = rotation;
        self
    }

    /// Returns this transform with a uniform scale.
    #[must_use]
    pub fn with_uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::new(scale, scale, scale);
        self
    }

    /// Object-to-world matrix (scale, then rotate, then translate).
    pub fn world_matrix(&self) -> Mat4 {
        math::mat4_from_scale_rotation_translation(
            self.scale,
            math::quat_from_euler(self.rotation),
            self.position,
        )
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_world_matrix() {
        assert_eq!(Transform::identity().world_matrix(), Mat4::identity());
    }

    #[test]
    fn test_world_matrix_scales_then_translates() {
        let t = Transform::identity()
            .with_position(Vec3::new(1.0, 0.0, 0.0))
            .with_uniform_scale(2.0);
        let p = t.world_matrix() * crate::math::Vec4::new(1.0, 1.0, 1.0, 1.0);
        assert_eq!(p.x, 3.0);
        assert_eq!(p.y, 2.0);
        assert_eq!(p.z, 2.0);
    }
}
