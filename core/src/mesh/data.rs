//! CPU-side mesh data structures.

use static_assertions::const_assert_eq;

/// Primitive topology describing how vertices are assembled into primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Each vertex is a separate point.
    PointList,
    /// Every two vertices form a line.
    LineList,
    /// Every three vertices form a triangle.
    #[default]
    TriangleList,
    /// Vertices form a connected strip of triangles.
    TriangleStrip,
}

impl PrimitiveTopology {
    /// Get the number of vertices per primitive (for non-strip topologies).
    pub fn vertices_per_primitive(&self) -> Option<u32> {
        match self {
            Self::PointList => Some(1),
            Self::LineList => Some(2),
            Self::TriangleList => Some(3),
            Self::TriangleStrip => None,
        }
    }
}

/// Interleaved vertex: local-space position, texture coordinate, normal.
///
/// Attribute offsets are 0, 12 and 20; the stride is 32 bytes.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
}

const_assert_eq!(std::mem::size_of::<Vertex>(), 32);

impl Vertex {
    /// Size of one vertex in bytes.
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    pub const fn new(position: [f32; 3], uv: [f32; 2], normal: [f32; 3]) -> Self {
        Self {
            position,
            uv,
            normal,
        }
    }
}

/// CPU-side mesh: vertices and 32-bit indices.
///
/// Meshes are handed to the renderer's staging pipeline, which copies them
/// into GPU-local buffers. The CPU copy can be dropped afterwards.
#[derive(Debug, Clone, Default)]
pub struct CpuMesh {
    label: Option<String>,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl CpuMesh {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            label: None,
            vertices,
            indices,
        }
    }

    /// Set a debug label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Raw vertex bytes, as laid out in the vertex buffer.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Raw index bytes, as laid out in the index buffer.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Whether every index refers to an existing vertex.
    pub fn indices_in_range(&self) -> bool {
        let count = self.vertex_count();
        self.indices.iter().all(|&i| i < count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_bytes_match_stride() {
        let mesh = CpuMesh::new(vec![Vertex::default(); 3], vec![0, 1, 2]);
        assert_eq!(mesh.vertex_bytes().len(), 3 * Vertex::STRIDE as usize);
        assert_eq!(mesh.index_bytes().len(), 12);
    }

    #[test]
    fn test_indices_in_range() {
        let mesh = CpuMesh::new(vec![Vertex::default(); 2], vec![0, 1, 2]);
        assert!(!mesh.indices_in_range());
    }
}
