//! # Lumen Graphics
//!
//! Real-time renderer core built directly on a low-level, explicitly
//! synchronized GPU API.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`RendererContext`] - device, queues, swap chain and per-frame state in one owner
//! - [`FrameSequencer`] - the fixed per-frame command order, with a gated ray dispatch
//! - [`FenceRing`] - one fence and command allocator per back buffer
//! - [`UploadQueue`] - batched staging of meshes into GPU-local memory
//! - [`Blas`] / [`Tlas`] - acceleration structures for the ray tracing pass
//! - [`DescriptorHeap`] and [`ShaderTable`] - shared binding state of the dispatch
//! - Backends: Dummy (simulated GPU, default) and Vulkan (`vulkan-backend`)
//!
//! ## Example
//!
//! ```ignore
//! use lumen_graphics::{FrameSequencer, InstanceParameters, RendererConfig, RendererContext};
//!
//! let mut ctx = RendererContext::init(&InstanceParameters::new(), &target, 1920, 1080, RendererConfig::default())?;
//! let mut sequencer = FrameSequencer::new(ctx.config().gather_interval);
//! sequencer.run_frame(&mut ctx, &camera, pipeline.as_ref(), dt, None, |ctx| {
//!     ctx.submit_mesh(&mesh, &world)
//! })?;
//! ctx.shutdown()?;
//! ```

pub mod accel;
pub mod backend;
pub mod command;
pub mod constants;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod resources;
pub mod shader_table;
pub mod staging;
pub mod swapchain;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use accel::{Blas, BuildMode, Tlas, TlasInstance};
pub use backend::{DummyBackend, DummyInstance, GpuBackend, GpuInstance};
pub use command::{CommandAllocator, CommandList, CommandQueue, QueueKind};
pub use constants::{FrameConstants, PerFrameConstants, PerObjectConstants};
pub use context::{RendererConfig, RendererContext};
pub use descriptor::{DescriptorBinding, DescriptorHeap, DescriptorHeapLayout, DescriptorKind};
pub use device::{AdapterInfo, AdapterType, DeviceCapabilities, GpuDevice};
pub use error::GraphicsError;
pub use frame::{FrameReport, FrameSequencer, GatherSchedule, Overlay, RayTracingPass};
pub use instance::{BackendType, GraphicsInstance, InstanceParameters};
pub use pipeline::{Pipeline, PipelineKind, ShaderLoader};
pub use resources::{Buffer, RingBuffer, Texture};
pub use shader_table::{ShaderGroupKind, ShaderTable, ShaderTableBuilder};
pub use staging::{Mesh, UploadQueue};
pub use swapchain::{PresentRequest, SurfaceTarget, SwapChain, SwapChainDescriptor};
pub use sync::{Fence, FenceRing, wait_for_fence_value};
pub use types::{
    BufferDescriptor, BufferUsage, ResourceBarrier, ResourceState, TextureDescriptor,
    TextureFormat, TextureUsage,
};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the graphics crate version.
pub fn init() {
    log::info!("Lumen Graphics v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_instance() {
        let params = InstanceParameters::new().with_backend(BackendType::Dummy);
        let instance = GraphicsInstance::new(&params).unwrap();
        assert_eq!(instance.backend_name(), "Dummy");
        assert!(instance.create_device().is_ok());
    }
}
