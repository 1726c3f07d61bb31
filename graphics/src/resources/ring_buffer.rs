//! Frame-partitioned ring buffer for streaming constants to the GPU.
//!
//! The buffer lives in the upload heap and stays mapped. It is split into one
//! region per back buffer; each frame sub-allocates only from its own region,
//! so the CPU never overwrites data a frame still in flight is reading.
//!
//! # Example
//!
//! ```ignore
//! let mut ring = RingBuffer::new(&device, 64 * 1024, 3, "per_object")?;
//!
//! // After the frame's fence wait:
//! ring.begin_frame(slot);
//! let alloc = ring.write(bytemuck::bytes_of(&constants))?;
//! list.set_root_constant_buffer(1, ring.buffer_id(), alloc.offset);
//! ```

use crate::backend::BufferId;
use crate::device::GpuDevice;
use crate::error::GraphicsError;
use crate::resources::Buffer;
use crate::types::{BufferDescriptor, BufferUsage};

/// A sub-allocation from a ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RingAllocation {
    /// Byte offset into the ring buffer.
    pub offset: u64,
    /// Size of the allocation in bytes.
    pub size: u64,
}

impl RingAllocation {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Get the end offset (offset + size).
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Upload buffer split into per-frame regions.
///
/// Not thread-safe; the renderer writes it from one thread between the
/// start and end of a frame.
pub struct RingBuffer {
    buffer: Buffer,
    region_size: u64,
    region_count: u32,
    alignment: u64,
    region: u32,
    write_offset: u64,
}

impl RingBuffer {
    /// Default alignment for allocations (256 bytes), the constant buffer
    /// placement alignment.
    pub const DEFAULT_ALIGNMENT: u64 = 256;

    /// Create a ring with `region_count` regions of `region_size` bytes.
    pub fn new(
        device: &GpuDevice,
        region_size: u64,
        region_count: u32,
        label: &str,
    ) -> Result<Self, GraphicsError> {
        Self::with_alignment(device, region_size, region_count, label, Self::DEFAULT_ALIGNMENT)
    }

    /// Create a ring with a custom allocation alignment (power of two).
    pub fn with_alignment(
        device: &GpuDevice,
        region_size: u64,
        region_count: u32,
        label: &str,
        alignment: u64,
    ) -> Result<Self, GraphicsError> {
        if !alignment.is_power_of_two() {
            return Err(GraphicsError::InvalidParameter(format!(
                "alignment must be a power of 2, got {alignment}"
            )));
        }
        if region_size == 0 || region_count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "ring buffer capacity cannot be zero".to_string(),
            ));
        }

        let region_size = align_up(region_size, alignment);
        let descriptor =
            BufferDescriptor::upload(region_size * region_count as u64, BufferUsage::CONSTANT)
                .with_label(format!("{label}_ring"));
        let buffer = device.create_buffer(&descriptor)?;

        Ok(Self {
            buffer,
            region_size,
            region_count,
            alignment,
            region: 0,
            write_offset: 0,
        })
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn buffer_id(&self) -> BufferId {
        self.buffer.id()
    }

    pub fn region_size(&self) -> u64 {
        self.region_size
    }

    pub fn region_count(&self) -> u32 {
        self.region_count
    }

    /// Bytes allocated in the current region.
    pub fn used(&self) -> u64 {
        self.write_offset - self.region_start()
    }

    /// Switch to the region of back buffer `slot` and reclaim it.
    ///
    /// The caller must have waited for the last frame that used this slot.
    pub fn begin_frame(&mut self, slot: u32) {
        self.region = slot % self.region_count;
        self.write_offset = self.region_start();
    }

    /// Allocate `size` bytes from the current region.
    ///
    /// Returns `None` if the region is exhausted.
    pub fn allocate(&mut self, size: u64) -> Option<RingAllocation> {
        let offset = align_up(self.write_offset, self.alignment);
        let end = offset.checked_add(size)?;
        if end > self.region_start() + self.region_size {
            return None;
        }
        self.write_offset = end;
        Some(RingAllocation::new(offset, size))
    }

    /// Allocate and fill `data`.
    pub fn write(&mut self, data: &[u8]) -> Result<RingAllocation, GraphicsError> {
        let alloc = self.allocate(data.len() as u64).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "ring buffer {:?} region exhausted ({} of {} bytes used)",
                self.buffer.label(),
                self.used(),
                self.region_size
            ))
        })?;
        self.buffer.write(alloc.offset, data)?;
        Ok(alloc)
    }

    fn region_start(&self) -> u64 {
        self.region as u64 * self.region_size
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("region_size", &self.region_size)
            .field("region_count", &self.region_count)
            .field("region", &self.region)
            .field("write_offset", &self.write_offset)
            .field("buffer", &self.buffer.label())
            .finish()
    }
}

/// Align a value up to the given power-of-two alignment.
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_device;

    #[test]
    fn test_ring_buffer_creation() {
        let device = test_device();
        let ring = RingBuffer::new(&device, 4096, 3, "test").unwrap();
        assert_eq!(ring.region_size(), 4096);
        assert_eq!(ring.buffer().size(), 3 * 4096);
        assert_eq!(ring.used(), 0);
    }

    #[test]
    fn test_ring_buffer_alignment() {
        let device = test_device();
        let mut ring = RingBuffer::new(&device, 1024, 1, "test").unwrap();

        let alloc1 = ring.allocate(100).unwrap();
        assert_eq!(alloc1.offset, 0);

        // Next allocation should be aligned to 256
        let alloc2 = ring.allocate(50).unwrap();
        assert_eq!(alloc2.offset, 256);
        assert_eq!(alloc2.end(), 306);
    }

    #[test]
    fn test_regions_do_not_overlap() {
        let device = test_device();
        let mut ring = RingBuffer::new(&device, 512, 3, "test").unwrap();

        ring.begin_frame(1);
        let a = ring.allocate(256).unwrap();
        assert_eq!(a.offset, 512);

        ring.begin_frame(2);
        let b = ring.allocate(256).unwrap();
        assert_eq!(b.offset, 1024);
    }

    #[test]
    fn test_region_overflow() {
        let device = test_device();
        let mut ring = RingBuffer::new(&device, 512, 2, "test").unwrap();
        ring.begin_frame(0);
        ring.allocate(256).unwrap();
        ring.allocate(256).unwrap();
        assert!(ring.allocate(1).is_none());
        assert!(ring.write(&[0u8; 4]).is_err());

        // Reclaimed when the slot comes round again.
        ring.begin_frame(0);
        assert_eq!(ring.allocate(256).unwrap().offset, 0);
    }

    #[test]
    fn test_write_lands_in_buffer() {
        let device = test_device();
        let mut ring = RingBuffer::new(&device, 512, 2, "test").unwrap();
        ring.begin_frame(1);
        let alloc = ring.write(&[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        ring.buffer().read(alloc.offset, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_ring_buffer_invalid_alignment() {
        let device = test_device();
        assert!(RingBuffer::with_alignment(&device, 512, 1, "test", 100).is_err());
        assert!(RingBuffer::new(&device, 0, 1, "test").is_err());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(255, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(100, 64), 128);
    }
}
