//! GPU backend abstraction layer.
//!
//! The renderer talks to the GPU only through the [`GpuBackend`] trait. All
//! device objects live inside the backend; the renderer holds small typed ids
//! that act as non-owning views into that storage, and the owning wrappers in
//! the rest of the crate release them on drop.
//!
//! # Available Backends
//!
//! - `dummy` (default): deterministic simulated GPU for tests and headless runs
//! - `vulkan-backend`: native Vulkan backend using ash
//!
//! # Architecture
//!
//! A [`GpuInstance`] enumerates adapters and opens a device on one of them,
//! producing the [`GpuBackend`] that provides:
//! - Queues, command allocators and submission of recorded [`CommandList`]s
//! - Timeline fences
//! - Buffers, textures, swap chains and descriptor heaps
//! - Graphics and ray tracing pipelines, acceleration structures

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub mod dummy;

use std::sync::Arc;
use std::time::Duration;

use crate::accel::{AccelBuildInputs, AccelKind, AccelPrebuildInfo};
use crate::command::{CommandList, QueueKind};
use crate::descriptor::{DescriptorBinding, DescriptorHeapLayout, DescriptorIndex};
use crate::device::{AdapterInfo, DeviceCapabilities};
use crate::error::GraphicsError;
use crate::instance::{BackendType, InstanceParameters};
use crate::pipeline::{GraphicsPipelineDesc, RayTracingPipelineDesc};
use crate::swapchain::{PresentRequest, SurfaceTarget, SwapChainDescriptor};
use crate::types::{BufferDescriptor, TextureDescriptor};

pub use dummy::{DummyBackend, DummyInstance};

macro_rules! define_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub(crate) u64);

            impl $name {
                /// Raw id value, unique per backend.
                pub fn raw(&self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

define_id!(
    /// Handle to a command queue.
    QueueId,
    /// Handle to the memory backing command lists.
    AllocatorId,
    /// Handle to a timeline fence.
    FenceId,
    /// Handle to a buffer.
    BufferId,
    /// Handle to a texture (including swap chain back buffers).
    TextureId,
    /// Handle to a swap chain.
    SwapChainId,
    /// Handle to a shader-visible descriptor heap.
    DescriptorHeapId,
    /// Handle to a graphics or ray tracing pipeline.
    PipelineId,
    /// Handle to an acceleration structure.
    AccelId,
);

/// Entry point of a backend: adapter enumeration and device creation.
pub trait GpuInstance: Send + Sync {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Enumerate the adapters visible to this backend.
    fn enumerate_adapters(&self) -> Vec<AdapterInfo>;

    /// Open a device on one of the adapters returned by [`enumerate_adapters`].
    ///
    /// [`enumerate_adapters`]: GpuInstance::enumerate_adapters
    fn create_device(&self, adapter: &AdapterInfo) -> Result<Arc<dyn GpuBackend>, GraphicsError>;
}

/// A logical GPU device.
///
/// Methods take `&self`; implementations synchronise internally. The renderer
/// drives them from a single thread.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Limits and feature support of the opened device.
    fn capabilities(&self) -> &DeviceCapabilities;

    // --- Queues and command recording ---

    fn create_queue(&self, kind: QueueKind, label: &str) -> Result<QueueId, GraphicsError>;

    fn create_command_allocator(&self, kind: QueueKind) -> Result<AllocatorId, GraphicsError>;

    /// Recycle the memory of every list recorded from `allocator`.
    ///
    /// Fails if the GPU may still be executing one of those lists.
    fn reset_command_allocator(&self, allocator: AllocatorId) -> Result<(), GraphicsError>;

    fn destroy_command_allocator(&self, allocator: AllocatorId);

    /// Submit closed command lists to `queue`, in order.
    ///
    /// `present_sync` names a swap chain whose acquired back buffer these
    /// lists render to; the backend orders the work after the acquire and
    /// before the next present.
    fn submit(
        &self,
        queue: QueueId,
        lists: &[&CommandList],
        present_sync: Option<SwapChainId>,
    ) -> Result<(), GraphicsError>;

    // --- Fences ---

    fn create_fence(&self, initial_value: u64) -> Result<FenceId, GraphicsError>;

    fn destroy_fence(&self, fence: FenceId);

    /// Last value the GPU has signaled on `fence`.
    fn fence_completed_value(&self, fence: FenceId) -> Result<u64, GraphicsError>;

    /// Queue a GPU-side signal of `fence` to `value` after all prior work on `queue`.
    fn signal_fence(&self, queue: QueueId, fence: FenceId, value: u64)
    -> Result<(), GraphicsError>;

    /// Block until `fence` reaches `value`.
    ///
    /// Returns `Ok(false)` if `timeout` elapsed first.
    fn wait_fence(
        &self,
        fence: FenceId,
        value: u64,
        timeout: Duration,
    ) -> Result<bool, GraphicsError>;

    // --- Resources ---

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<BufferId, GraphicsError>;

    fn destroy_buffer(&self, buffer: BufferId);

    /// Copy `data` into a CPU-visible buffer at `offset` (map, copy, unmap).
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8])
    -> Result<(), GraphicsError>;

    /// Copy bytes out of a readback or upload buffer.
    fn read_buffer(&self, buffer: BufferId, offset: u64, out: &mut [u8])
    -> Result<(), GraphicsError>;

    /// GPU virtual address of the start of `buffer`.
    fn buffer_device_address(&self, buffer: BufferId) -> Result<u64, GraphicsError>;

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<TextureId, GraphicsError>;

    fn destroy_texture(&self, texture: TextureId);

    // --- Swap chains ---

    fn create_swap_chain(
        &self,
        target: &SurfaceTarget,
        desc: &SwapChainDescriptor,
    ) -> Result<SwapChainId, GraphicsError>;

    fn destroy_swap_chain(&self, swap_chain: SwapChainId);

    /// Back buffer textures, indexed by back buffer index.
    fn swap_chain_back_buffers(&self, swap_chain: SwapChainId)
    -> Result<Vec<TextureId>, GraphicsError>;

    /// Index of the back buffer the next frame renders to.
    fn acquire_back_buffer(&self, swap_chain: SwapChainId) -> Result<u32, GraphicsError>;

    /// Present the current back buffer from `queue`.
    fn present(
        &self,
        queue: QueueId,
        swap_chain: SwapChainId,
        request: PresentRequest,
    ) -> Result<(), GraphicsError>;

    /// Resize all back buffers. Previously returned back buffer ids become invalid.
    fn resize_swap_chain(
        &self,
        swap_chain: SwapChainId,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsError>;

    // --- Descriptor heaps ---

    fn create_descriptor_heap(
        &self,
        layout: &DescriptorHeapLayout,
    ) -> Result<DescriptorHeapId, GraphicsError>;

    fn write_descriptor(
        &self,
        heap: DescriptorHeapId,
        index: DescriptorIndex,
        binding: &DescriptorBinding,
    ) -> Result<(), GraphicsError>;

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapId);

    // --- Pipelines ---

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
    ) -> Result<PipelineId, GraphicsError>;

    fn create_ray_tracing_pipeline(
        &self,
        desc: &RayTracingPipelineDesc,
    ) -> Result<PipelineId, GraphicsError>;

    /// Opaque identifier of a ray tracing shader group, looked up by export name.
    fn shader_identifier(&self, pipeline: PipelineId, export: &str)
    -> Result<Vec<u8>, GraphicsError>;

    fn destroy_pipeline(&self, pipeline: PipelineId);

    // --- Acceleration structures ---

    /// Buffer sizes needed to build an acceleration structure from `inputs`.
    fn acceleration_structure_sizes(
        &self,
        inputs: &AccelBuildInputs,
    ) -> Result<AccelPrebuildInfo, GraphicsError>;

    /// Place an acceleration structure of `size` bytes at the start of `buffer`.
    fn create_acceleration_structure(
        &self,
        kind: AccelKind,
        buffer: BufferId,
        size: u64,
    ) -> Result<AccelId, GraphicsError>;

    /// Address instance records use to reference the structure.
    fn acceleration_structure_address(&self, accel: AccelId) -> Result<u64, GraphicsError>;

    fn destroy_acceleration_structure(&self, accel: AccelId);

    /// Block until every queue is idle.
    fn wait_idle(&self) -> Result<(), GraphicsError>;
}

/// Create the instance for the backend requested in `params`.
///
/// [`BackendType::Auto`] tries Vulkan first and falls back to the dummy
/// backend when Vulkan is unavailable.
pub fn create_instance(params: &InstanceParameters) -> Result<Box<dyn GpuInstance>, GraphicsError> {
    match params.backend {
        BackendType::Dummy => {
            log::info!("Using dummy backend");
            Ok(Box::new(DummyInstance::new()))
        }
        BackendType::Vulkan => create_vulkan_instance(params),
        BackendType::Auto => match create_vulkan_instance(params) {
            Ok(instance) => Ok(instance),
            Err(e) => {
                log::warn!("Vulkan backend unavailable ({e}), falling back to dummy backend");
                Ok(Box::new(DummyInstance::new()))
            }
        },
    }
}

#[cfg(feature = "vulkan-backend")]
fn create_vulkan_instance(
    params: &InstanceParameters,
) -> Result<Box<dyn GpuInstance>, GraphicsError> {
    let instance = vulkan::VulkanInstance::new(params)?;
    log::info!("Using Vulkan backend");
    Ok(Box::new(instance))
}

#[cfg(not(feature = "vulkan-backend"))]
fn create_vulkan_instance(
    _params: &InstanceParameters,
) -> Result<Box<dyn GpuInstance>, GraphicsError> {
    Err(GraphicsError::FeatureNotSupported(
        "built without the vulkan-backend feature".to_string(),
    ))
}
