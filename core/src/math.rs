//! Math type aliases and helper functions.
//!
//! All matrices follow the column-vector convention (`m * v`) and the
//! left-handed, depth `[0, 1]` clip space used by the renderer: the camera
//! looks down `+Z`.

pub use nalgebra;

/// 2D vector (f32).
pub type Vec2 = nalgebra::Vector2<f32>;

/// 3D vector (f32).
pub type Vec3 = nalgebra::Vector3<f32>;

/// 4D vector (f32).
pub type Vec4 = nalgebra::Vector4<f32>;

/// 4x4 matrix (f32).
pub type Mat4 = nalgebra::Matrix4<f32>;

/// Quaternion (f32). Stored as `[x, y, z, w]` in memory.
pub type Quat = nalgebra::Quaternion<f32>;

/// Unit quaternion (f32), usable as a rotation operator.
pub type UnitQuat = nalgebra::UnitQuaternion<f32>;

/// Build a rotation from euler angles in radians (x = pitch, y = yaw, z = roll).
pub fn quat_from_euler(rotation: Vec3) -> Quat {
    nalgebra::UnitQuaternion::from_euler_angles(rotation.x, rotation.y, rotation.z).into_inner()
}

/// Build a 4x4 TRS matrix from scale, rotation (quaternion), and translation.
pub fn mat4_from_scale_rotation_translation(
    scale: Vec3,
    rotation: Quat,
    translation: Vec3,
) -> Mat4 {
    let r = nalgebra::UnitQuaternion::new_unchecked(rotation);
    let m = r.to_rotation_matrix();
    let rm = m.matrix();
    #[rustfmt::skip]
    let result = Mat4::new(
        rm[(0, 0)] * scale.x, rm[(0, 1)] * scale.y, rm[(0, 2)] * scale.z, translation.x,
        rm[(1, 0)] * scale.x, rm[(1, 1)] * scale.y, rm[(1, 2)] * scale.z, translation.y,
        rm[(2, 0)] * scale.x, rm[(2, 1)] * scale.y, rm[(2, 2)] * scale.z, translation.z,
        0.0,                  0.0,                  0.0,                  1.0,
    );
    result
}

/// View matrix for a camera at `position` with euler `rotation`.
///
/// This is the inverse of the camera's rigid transform.
pub fn view_matrix(position: Vec3, rotation: Vec3) -> Mat4 {
    let r = nalgebra::UnitQuaternion::new_unchecked(quat_from_euler(rotation));
    let inverse_rotation = r.inverse().to_homogeneous();
    inverse_rotation * Mat4::new_translation(&-position)
}

/// Left-handed perspective projection from a vertical field of view and the
/// viewport size in pixels.
pub fn perspective_fov(yfov: f32, width: f32, height: f32, znear: f32, zfar: f32) -> Mat4 {
    let aspect = if height > 0.0 { width / height } else { 1.0 };
    let f = 1.0 / (yfov / 2.0).tan();
    let range = zfar / (zfar - znear);
    #[rustfmt::skip]
    let result = Mat4::new(
        f / aspect, 0.0, 0.0,   0.0,
        0.0,        f,   0.0,   0.0,
        0.0,        0.0, range, -znear * range,
        0.0,        0.0, 1.0,   0.0,
    );
    result
}

/// Left-handed orthographic projection centred on the view axis.
pub fn orthographic(width: f32, height: f32, znear: f32, zfar: f32) -> Mat4 {
    let range = 1.0 / (zfar - znear);
    #[rustfmt::skip]
    let result = Mat4::new(
        2.0 / width, 0.0,          0.0,   0.0,
        0.0,         2.0 / height, 0.0,   0.0,
        0.0,         0.0,          range, -znear * range,
        0.0,         0.0,          0.0,   1.0,
    );
    result
}

/// Convert a 4x4 matrix to a column-major `[[f32; 4]; 4]` array.
pub fn mat4_to_cols_array_2d(m: &Mat4) -> [[f32; 4]; 4] {
    let s = m.as_slice();
    [
        [s[0], s[1], s[2], s[3]],
        [s[4], s[5], s[6], s[7]],
        [s[8], s[9], s[10], s[11]],
        [s[12], s[13], s[14], s[15]],
    ]
}

/// First three rows of an affine matrix, row-major.
///
/// This is the transform layout of a ray tracing instance record.
pub fn mat4_to_rows_3x4(m: &Mat4) -> [[f32; 4]; 3] {
    let mut rows = [[0.0; 4]; 3];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = m[(r, c)];
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn identity_trs_matrix() {
        let m = mat4_from_scale_rotation_translation(
            Vec3::new(1.0, 1.0, 1.0),
            Quat::identity(),
            Vec3::zeros(),
        );
        assert!((m - Mat4::identity()).norm() < 1e-6);
    }

    #[test]
    fn view_matrix_moves_world_opposite_to_camera() {
        let view = view_matrix(Vec3::new(0.0, 0.0, -5.0), Vec3::zeros());
        let origin = view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((origin.z - 5.0).abs() < 1e-6);
    }

    #[test]
    fn view_matrix_applies_inverse_yaw() {
        let view = view_matrix(Vec3::zeros(), Vec3::new(0.0, FRAC_PI_2, 0.0));
        let p = view * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!(p.x.abs() < 1e-5);
        assert!((p.z.abs() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn perspective_maps_near_and_far_to_unit_depth() {
        let proj = perspective_fov(FRAC_PI_2, 1920.0, 1080.0, 0.1, 100.0);
        let near = proj * Vec4::new(0.0, 0.0, 0.1, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, 100.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn orthographic_maps_extents_to_clip_edges() {
        let proj = orthographic(10.0, 4.0, 0.0, 10.0);
        let corner = proj * Vec4::new(5.0, 2.0, 10.0, 1.0);
        assert!((corner.x - 1.0).abs() < 1e-6);
        assert!((corner.y - 1.0).abs() < 1e-6);
        assert!((corner.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rows_3x4_carry_translation_in_last_column() {
        let m = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let rows = mat4_to_rows_3x4(&m);
        assert_eq!(rows[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(rows[1], [0.0, 1.0, 0.0, 2.0]);
        assert_eq!(rows[2], [0.0, 0.0, 1.0, 3.0]);
    }

    #[test]
    fn cols_array_2d_identity() {
        let m = Mat4::identity();
        let cols = mat4_to_cols_array_2d(&m);
        assert_eq!(cols[0], [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(cols[3], [0.0, 0.0, 0.0, 1.0]);
    }
}
