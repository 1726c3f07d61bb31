//! GPU buffer resource.

use std::sync::Arc;

use crate::backend::{BufferId, GpuBackend};
use crate::error::GraphicsError;
use crate::types::BufferDescriptor;

/// A GPU buffer, exclusively owned.
///
/// Buffers are created by [`GpuDevice::create_buffer`] and destroyed on drop.
/// The caller must keep a buffer alive until the GPU work that references it
/// has completed (see [`Fence`]).
///
/// [`GpuDevice::create_buffer`]: crate::GpuDevice::create_buffer
/// [`Fence`]: crate::Fence
pub struct Buffer {
    backend: Arc<dyn GpuBackend>,
    id: BufferId,
    descriptor: BufferDescriptor,
}

impl Buffer {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        id: BufferId,
        descriptor: BufferDescriptor,
    ) -> Self {
        Self {
            backend,
            id,
            descriptor,
        }
    }

    /// Non-owning handle used when recording commands.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Write bytes into a CPU-visible buffer.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        self.check_range(offset, data.len() as u64)?;
        self.backend.write_buffer(self.id, offset, data)
    }

    /// Read bytes from a CPU-visible buffer.
    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), GraphicsError> {
        self.check_range(offset, out.len() as u64)?;
        self.backend.read_buffer(self.id, offset, out)
    }

    /// GPU virtual address of the first byte.
    pub fn device_address(&self) -> Result<u64, GraphicsError> {
        self.backend.buffer_device_address(self.id)
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<(), GraphicsError> {
        if !self.descriptor.heap.is_cpu_visible() {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer {:?} lives in the {:?} heap and cannot be mapped",
                self.label(),
                self.descriptor.heap
            )));
        }
        if offset.checked_add(len).is_none_or(|end| end > self.size()) {
            return Err(GraphicsError::InvalidParameter(format!(
                "range {offset}+{len} exceeds buffer size {}",
                self.size()
            )));
        }
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.backend.destroy_buffer(self.id);
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("size", &self.descriptor.size)
            .field("heap", &self.descriptor.heap)
            .field("label", &self.descriptor.label)
            .finish()
    }
}
