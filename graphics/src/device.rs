//! Adapter selection and the logical device.
//!
//! The [`GpuDevice`] is created once by [`GraphicsInstance::create_device`]
//! and owns every other GPU object through its backend.
//!
//! [`GraphicsInstance::create_device`]: crate::GraphicsInstance::create_device

use std::sync::Arc;

use crate::backend::GpuBackend;
use crate::error::GraphicsError;
use crate::resources::{Buffer, Texture};
use crate::types::{BufferDescriptor, TextureDescriptor};

/// Information about a graphics adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Position in the backend's enumeration order.
    pub index: usize,
    pub name: String,
    pub vendor: String,
    pub device_type: AdapterType,
    /// Dedicated video memory in bytes.
    pub dedicated_memory: u64,
    /// Whether a device can be created at the minimum supported feature level.
    pub meets_minimum_feature_level: bool,
}

impl AdapterInfo {
    /// A hardware adapter that meets the minimum feature level.
    pub fn new(
        index: usize,
        name: impl Into<String>,
        device_type: AdapterType,
        dedicated_memory: u64,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            vendor: String::new(),
            device_type,
            dedicated_memory,
            meets_minimum_feature_level: true,
        }
    }

    #[must_use]
    pub fn with_minimum_feature_level(mut self, supported: bool) -> Self {
        self.meets_minimum_feature_level = supported;
        self
    }
}

/// Type of graphics adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterType {
    /// Discrete GPU (dedicated graphics card).
    Discrete,
    /// Integrated GPU (shared with CPU).
    Integrated,
    /// Software renderer.
    Software,
    /// Unknown adapter type.
    Unknown,
}

/// Adapters worth trying a device on, most dedicated memory first.
///
/// Software adapters and adapters below the minimum feature level are
/// skipped. Ties keep enumeration order.
pub fn rank_adapters(adapters: &[AdapterInfo]) -> Result<Vec<&AdapterInfo>, GraphicsError> {
    let mut ranked: Vec<&AdapterInfo> = adapters
        .iter()
        .filter(|a| a.device_type != AdapterType::Software && a.meets_minimum_feature_level)
        .collect();
    if ranked.is_empty() {
        return Err(GraphicsError::InitializationFailed(format!(
            "no hardware adapter meets the minimum feature level ({} enumerated)",
            adapters.len()
        )));
    }
    ranked.sort_by(|a, b| b.dedicated_memory.cmp(&a.dedicated_memory));
    Ok(ranked)
}

/// Capabilities of an opened device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceCapabilities {
    /// Maximum texture dimension.
    pub max_texture_dimension: u32,
    /// Maximum buffer size.
    pub max_buffer_size: u64,
    /// Immediate presentation with tearing is available.
    pub tearing_supported: bool,
    /// Ray tracing pipelines and acceleration structures are available.
    pub ray_tracing: bool,
    /// Size of a shader identifier in a shader record.
    pub shader_identifier_size: u32,
    /// Required alignment of every shader record and of the record stride.
    pub shader_record_alignment: u32,
    /// Required alignment of the start of each shader table region.
    pub shader_table_alignment: u32,
    /// Distance between consecutive render-target view descriptors.
    pub render_target_descriptor_size: u32,
    /// Maximum slots in a shader-visible descriptor heap.
    pub max_descriptor_heap_size: u32,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_texture_dimension: 16384,
            max_buffer_size: 1 << 30, // 1 GB
            tearing_supported: false,
            ray_tracing: false,
            shader_identifier_size: 32,
            shader_record_alignment: 32,
            shader_table_alignment: 64,
            render_target_descriptor_size: 32,
            max_descriptor_heap_size: 1_000_000,
        }
    }
}

/// The logical GPU device.
///
/// Cloning is cheap: clones share the backend.
#[derive(Clone)]
pub struct GpuDevice {
    adapter: AdapterInfo,
    backend: Arc<dyn GpuBackend>,
}

impl GpuDevice {
    pub fn new(adapter: AdapterInfo, backend: Arc<dyn GpuBackend>) -> Self {
        log::info!(
            "Device created on {} (backend: {}, ray tracing: {}, tearing: {}, RTV increment: {})",
            adapter.name,
            backend.name(),
            backend.capabilities().ray_tracing,
            backend.capabilities().tearing_supported,
            backend.capabilities().render_target_descriptor_size
        );
        Self { adapter, backend }
    }

    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        self.backend.capabilities()
    }

    /// Create a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or exceeds device limits.
    pub fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Buffer, GraphicsError> {
        if desc.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size must be greater than 0".to_string(),
            ));
        }
        let max = self.capabilities().max_buffer_size;
        if desc.size > max {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer size {} exceeds maximum {}",
                desc.size, max
            )));
        }
        let id = self.backend.create_buffer(desc)?;
        Ok(Buffer::new(self.backend.clone(), id, desc.clone()))
    }

    /// Create a 2D texture.
    ///
    /// # Errors
    ///
    /// Returns an error if a dimension is zero or exceeds device limits.
    pub fn create_texture(&self, desc: &TextureDescriptor) -> Result<Texture, GraphicsError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GraphicsError::InvalidParameter(
                "texture dimensions must be greater than 0".to_string(),
            ));
        }
        let max = self.capabilities().max_texture_dimension;
        if desc.width > max || desc.height > max {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture size {}x{} exceeds maximum {max}",
                desc.width, desc.height
            )));
        }
        let id = self.backend.create_texture(desc)?;
        Ok(Texture::new(self.backend.clone(), id, desc.clone()))
    }
}

impl std::fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDevice")
            .field("adapter", &self.adapter.name)
            .field("backend", &self.backend.name())
            .finish()
    }
}

static_assertions::assert_impl_all!(GpuDevice: Send, Sync);

/// Device on a fresh dummy backend, for unit tests.
#[cfg(test)]
pub(crate) fn test_device() -> GpuDevice {
    GpuDevice::new(
        AdapterInfo::new(0, "Test Adapter", AdapterType::Discrete, 1 << 30),
        Arc::new(crate::backend::DummyBackend::new()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::types::{BufferUsage, ResourceState};

    fn adapter(index: usize, ty: AdapterType, mem: u64) -> AdapterInfo {
        AdapterInfo::new(index, format!("adapter{index}"), ty, mem)
    }

    #[test]
    fn test_rank_adapters_skips_software() {
        let adapters = [
            adapter(0, AdapterType::Software, 32 << 30),
            adapter(1, AdapterType::Integrated, 1 << 30),
        ];
        assert_eq!(rank_adapters(&adapters).unwrap()[0].index, 1);
    }

    #[test]
    fn test_rank_adapters_skips_below_feature_level() {
        let adapters = [
            adapter(0, AdapterType::Discrete, 16 << 30).with_minimum_feature_level(false),
            adapter(1, AdapterType::Discrete, 4 << 30),
        ];
        assert_eq!(rank_adapters(&adapters).unwrap()[0].index, 1);
    }

    #[test]
    fn test_rank_adapters_prefers_dedicated_memory() {
        let adapters = [
            adapter(0, AdapterType::Discrete, 4 << 30),
            adapter(1, AdapterType::Discrete, 12 << 30),
            adapter(2, AdapterType::Integrated, 2 << 30),
        ];
        assert_eq!(rank_adapters(&adapters).unwrap()[0].index, 1);

        let order: Vec<usize> = rank_adapters(&adapters)
            .unwrap()
            .iter()
            .map(|a| a.index)
            .collect();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn test_rank_adapters_fails_when_empty() {
        assert!(matches!(
            rank_adapters(&[]),
            Err(GraphicsError::InitializationFailed(_))
        ));
    }

    #[test]
    fn test_create_buffer_validation() {
        let device = GpuDevice::new(
            adapter(0, AdapterType::Discrete, 1 << 30),
            Arc::new(DummyBackend::new()),
        );
        let zero = BufferDescriptor::gpu(0, BufferUsage::VERTEX, ResourceState::CopyDest);
        assert!(device.create_buffer(&zero).is_err());

        let huge = BufferDescriptor::gpu(u64::MAX, BufferUsage::VERTEX, ResourceState::CopyDest);
        assert!(device.create_buffer(&huge).is_err());

        let ok = BufferDescriptor::gpu(256, BufferUsage::VERTEX, ResourceState::CopyDest);
        assert_eq!(device.create_buffer(&ok).unwrap().size(), 256);
    }
}
