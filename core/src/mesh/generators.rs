//! Mesh generators for the demo shapes.
//!
//! Both generators produce [`CpuMesh`] values in the renderer's [`Vertex`]
//! format, ready for the staging pipeline.

use std::f32::consts::PI;

use super::data::{CpuMesh, Vertex};

/// Index list of [`generate_cube`], two triangles per face.
#[rustfmt::skip]
pub const CUBE_INDICES: [u32; 36] = [
    0, 1, 2, 0, 2, 3,
    10, 8, 4, 10, 4, 5,
    22, 20, 6, 22, 6, 7,
    19, 16, 14, 19, 14, 12,
    15, 17, 21, 15, 21, 9,
    11, 23, 13, 23, 18, 13,
];

/// Generate an axis-aligned cube centred on the origin.
///
/// Every corner is emitted once per adjacent face so each face carries its
/// own normal, giving 24 vertices and 36 indices.
pub fn generate_cube(width: f32) -> CpuMesh {
    let h = width / 2.0;

    #[rustfmt::skip]
    let vertices = vec![
        Vertex::new([-h, -h, -h], [0.0, 1.0], [0.0, 0.0, -1.0]),
        Vertex::new([-h,  h, -h], [1.0, 1.0], [0.0, 0.0, -1.0]),
        Vertex::new([ h,  h, -h], [1.0, 0.0], [0.0, 0.0, -1.0]),
        Vertex::new([ h, -h, -h], [0.0, 0.0], [0.0, 0.0, -1.0]),
        Vertex::new([ h,  h,  h], [1.0, 0.0], [1.0, 0.0, 0.0]),
        Vertex::new([ h, -h,  h], [0.0, 0.0], [1.0, 0.0, 0.0]),
        Vertex::new([-h,  h,  h], [1.0, 0.0], [0.0, 0.0, 1.0]),
        Vertex::new([-h, -h,  h], [0.0, 0.0], [0.0, 0.0, 1.0]),
        Vertex::new([ h,  h, -h], [1.0, 1.0], [1.0, 0.0, 0.0]),
        Vertex::new([ h,  h, -h], [0.0, 0.0], [0.0, 1.0, 0.0]),
        Vertex::new([ h, -h, -h], [0.0, 1.0], [1.0, 0.0, 0.0]),
        Vertex::new([ h, -h, -h], [0.0, 0.0], [0.0, -1.0, 0.0]),
        Vertex::new([-h, -h, -h], [0.0, 0.0], [-1.0, 0.0, 0.0]),
        Vertex::new([-h, -h, -h], [0.0, 1.0], [0.0, -1.0, 0.0]),
        Vertex::new([-h,  h, -h], [1.0, 0.0], [-1.0, 0.0, 0.0]),
        Vertex::new([-h,  h, -h], [0.0, 1.0], [0.0, 1.0, 0.0]),
        Vertex::new([-h,  h,  h], [1.0, 1.0], [-1.0, 0.0, 0.0]),
        Vertex::new([-h,  h,  h], [1.0, 1.0], [0.0, 1.0, 0.0]),
        Vertex::new([-h, -h,  h], [1.0, 1.0], [0.0, -1.0, 0.0]),
        Vertex::new([-h, -h,  h], [0.0, 1.0], [-1.0, 0.0, 0.0]),
        Vertex::new([ h,  h,  h], [1.0, 1.0], [0.0, 0.0, 1.0]),
        Vertex::new([ h,  h,  h], [1.0, 0.0], [0.0, 1.0, 0.0]),
        Vertex::new([ h, -h,  h], [0.0, 1.0], [0.0, 0.0, 1.0]),
        Vertex::new([ h, -h,  h], [1.0, 0.0], [0.0, -1.0, 0.0]),
    ];

    CpuMesh::new(vertices, CUBE_INDICES.to_vec()).with_label("cube")
}

/// Generate a UV sphere mesh.
///
/// Creates a sphere with the given radius, number of longitudinal segments,
/// and number of latitudinal rings.
///
/// # Arguments
///
/// * `radius` - Sphere radius
/// * `segments` - Number of longitudinal segments (around the equator)
/// * `rings` - Number of latitudinal rings (from pole to pole)
pub fn generate_sphere(radius: f32, segments: u32, rings: u32) -> CpuMesh {
    let mut vertices = Vec::with_capacity(((rings + 1) * (segments + 1)) as usize);
    let mut indices = Vec::with_capacity((rings * segments * 6) as usize);

    for ring in 0..=rings {
        let theta = ring as f32 * PI / rings as f32;
        let (sin_theta, cos_theta) = theta.sin_cos();

        for segment in 0..=segments {
            let phi = segment as f32 * 2.0 * PI / segments as f32;
            let (sin_phi, cos_phi) = phi.sin_cos();

            let x = sin_theta * cos_phi;
            let y = cos_theta;
            let z = sin_theta * sin_phi;

            vertices.push(Vertex::new(
                [x * radius, y * radius, z * radius],
                [segment as f32 / segments as f32, ring as f32 / rings as f32],
                [x, y, z],
            ));
        }
    }

    for ring in 0..rings {
        for segment in 0..segments {
            let current = ring * (segments + 1) + segment;
            let next = current + segments + 1;

            indices.extend_from_slice(&[current, next, current + 1]);
            indices.extend_from_slice(&[current + 1, next, next + 1]);
        }
    }

    CpuMesh::new(vertices, indices).with_label("sphere")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_cube_counts() {
        let mesh = generate_cube(1.0);
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.index_count(), 36);
        assert!(mesh.indices_in_range());
    }

    #[test]
    fn test_cube_vertices_lie_on_half_width() {
        let mesh = generate_cube(2.0);
        for v in mesh.vertices() {
            for c in v.position {
                assert_eq!(c.abs(), 1.0);
            }
        }
    }

    #[test]
    fn test_cube_normals_are_unit_axes() {
        let mesh = generate_cube(1.0);
        for v in mesh.vertices() {
            let len: f32 = v.normal.iter().map(|c| c * c).sum();
            assert_eq!(len, 1.0);
        }
    }

    #[test]
    fn test_generate_sphere() {
        let mesh = generate_sphere(1.0, 8, 4);
        // (rings+1) * (segments+1) = 5 * 9 = 45 vertices
        assert_eq!(mesh.vertex_count(), 45);
        assert_eq!(mesh.index_count(), 8 * 4 * 6);
        assert!(mesh.indices_in_range());
    }

    #[test]
    fn test_sphere_vertices_on_radius() {
        let mesh = generate_sphere(2.0, 6, 3);
        for v in mesh.vertices() {
            let r = v.position.iter().map(|c| c * c).sum::<f32>().sqrt();
            assert!((r - 2.0).abs() < 1e-4);
        }
    }
}
