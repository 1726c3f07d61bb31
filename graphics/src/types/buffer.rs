//! Buffer types and descriptors.

use bitflags::bitflags;

use super::ResourceState;
use crate::backend::BufferId;

/// Memory heap a buffer lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeapType {
    /// GPU-local memory, not CPU accessible.
    #[default]
    Default,
    /// CPU-writable staging memory that the GPU reads.
    Upload,
    /// CPU-readable memory that the GPU writes.
    Readback,
}

impl HeapType {
    /// The only state a buffer in this heap may ever be in, if the heap pins it.
    pub fn fixed_state(&self) -> Option<ResourceState> {
        match self {
            Self::Default => None,
            Self::Upload => Some(ResourceState::GenericRead),
            Self::Readback => Some(ResourceState::CopyDest),
        }
    }

    pub fn is_cpu_visible(&self) -> bool {
        !matches!(self, Self::Default)
    }
}

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const CONSTANT = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
        /// Backing storage of an acceleration structure.
        const ACCELERATION_STRUCTURE = 1 << 6;
        /// Read as geometry or instance input by an acceleration structure build.
        const ACCELERATION_STRUCTURE_INPUT = 1 << 7;
        /// Holds shader records for a ray dispatch.
        const SHADER_TABLE = 1 << 8;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    pub heap: HeapType,
    pub usage: BufferUsage,
    /// State the buffer starts in. Ignored for heaps with a fixed state.
    pub initial_state: ResourceState,
}

impl BufferDescriptor {
    /// A GPU-local buffer starting in `initial_state`.
    pub fn gpu(size: u64, usage: BufferUsage, initial_state: ResourceState) -> Self {
        Self {
            label: None,
            size,
            heap: HeapType::Default,
            usage,
            initial_state,
        }
    }

    /// A CPU-writable upload buffer.
    pub fn upload(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            heap: HeapType::Upload,
            usage: usage | BufferUsage::COPY_SRC,
            initial_state: ResourceState::GenericRead,
        }
    }

    /// A CPU-readable readback buffer.
    pub fn readback(size: u64) -> Self {
        Self {
            label: None,
            size,
            heap: HeapType::Readback,
            usage: BufferUsage::COPY_DST,
            initial_state: ResourceState::CopyDest,
        }
    }

    /// Set the debug label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The state the buffer is actually created in.
    pub fn effective_initial_state(&self) -> ResourceState {
        self.heap.fixed_state().unwrap_or(self.initial_state)
    }
}

/// Vertex buffer binding: a range of a buffer read with a fixed stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBufferView {
    pub buffer: BufferId,
    pub size: u64,
    pub stride: u32,
}

/// Index buffer binding. Indices are always 32-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexBufferView {
    pub buffer: BufferId,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_heap_state_is_pinned() {
        let desc = BufferDescriptor {
            initial_state: ResourceState::CopyDest,
            ..BufferDescriptor::upload(64, BufferUsage::empty())
        };
        assert_eq!(desc.effective_initial_state(), ResourceState::GenericRead);
        assert!(desc.usage.contains(BufferUsage::COPY_SRC));
    }

    #[test]
    fn test_default_heap_keeps_requested_state() {
        let desc = BufferDescriptor::gpu(64, BufferUsage::VERTEX, ResourceState::CopyDest);
        assert_eq!(desc.effective_initial_state(), ResourceState::CopyDest);
        assert!(!desc.heap.is_cpu_visible());
    }
}
