//! The renderer context.
//!
//! [`RendererContext`] is constructed once at startup and owns the device and
//! every object the frame loop touches: the direct queue, the fence ring, the
//! swap chain, the upload queue, the constant rings and the shared descriptor
//! heap. Subsystems borrow it; nothing is global.
//!
//! # Frame lifecycle
//!
//! ```text
//! start_frame ─► set_render_targets ─► clear_render_targets ─► set_graphics_pipeline
//!      ─► set_viewport ─► [bind_descriptor_heap] ─► update_per_frame_constants
//!      ─► submit_mesh* ─► ... ─► end_frame ─► present
//! ```
//!
//! `start_frame` blocks until the GPU has finished the last frame that used
//! the same back buffer. `flush` drains every slot and must precede
//! [`RendererContext::resize_swap_chain`].
//!
//! # Example
//!
//! ```ignore
//! let mut ctx = RendererContext::init(&params, &target, 1920, 1080, RendererConfig::default())?;
//! let meshes = ctx.upload_meshes(&[&generate_cube(1.0)])?;
//!
//! ctx.start_frame()?;
//! ctx.set_render_targets()?;
//! ctx.clear_render_targets()?;
//! ctx.set_primitive_topology()?;
//! ctx.set_graphics_pipeline(pipeline.as_ref())?;
//! ctx.set_viewport()?;
//! ctx.update_per_frame_constants(&camera)?;
//! ctx.submit_mesh(&meshes[0], &Mat4::identity())?;
//! ctx.end_frame()?;
//! ctx.present()?;
//!
//! ctx.shutdown()?;
//! ```

use std::time::Duration;

use lumen_core::math::Mat4;
use lumen_core::mesh::{CpuMesh, PrimitiveTopology};
use lumen_core::scene::Camera;

use crate::accel::{Blas, Tlas};
use crate::backend::{BufferId, TextureId};
use crate::command::{CommandList, CommandQueue, QueueKind};
use crate::constants::{FrameConstants, PerFrameConstants, PerObjectConstants};
use crate::descriptor::{DescriptorHeap, DescriptorHeapLayout, DescriptorKind, slots};
use crate::device::GpuDevice;
use crate::error::GraphicsError;
use crate::instance::{GraphicsInstance, InstanceParameters};
use crate::pipeline::{ForwardPipeline, Pipeline};
use crate::resources::Buffer;
use crate::staging::{Mesh, UploadQueue};
use crate::swapchain::{SurfaceTarget, SwapChain, SwapChainDescriptor};
use crate::sync::{FenceRing, INFINITE};
use crate::types::ResourceState;

/// Color the back buffer is cleared to at the start of every frame.
pub const CLEAR_COLOR: [f32; 4] = [1.0, 0.0, 1.0, 1.0];

/// Depth the depth buffer is cleared to at the start of every frame.
pub const CLEAR_DEPTH: f32 = 1.0;

/// Root parameters the frame commands bind constants to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstantBindings {
    pub per_frame: u32,
    pub per_object: u32,
}

impl Default for ConstantBindings {
    fn default() -> Self {
        Self {
            per_frame: ForwardPipeline::PER_FRAME_PARAMETER,
            per_object: ForwardPipeline::PER_OBJECT_PARAMETER,
        }
    }
}

/// Renderer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Back buffers, and therefore frame slots, in the ring.
    pub back_buffer_count: u32,
    pub vsync: bool,
    /// Create the swap chain able to tear when the adapter supports it.
    pub allow_tearing: bool,
    /// Seconds between two ray tracing dispatches.
    pub gather_interval: f32,
    /// Longest a frame slot or upload may block on its fence.
    pub fence_timeout: Duration,
    pub descriptor_heap_capacity: u32,
    pub constant_bindings: ConstantBindings,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            back_buffer_count: SwapChainDescriptor::DEFAULT_BACK_BUFFER_COUNT,
            vsync: true,
            allow_tearing: true,
            gather_interval: 0.1,
            fence_timeout: INFINITE,
            descriptor_heap_capacity: 64,
            constant_bindings: ConstantBindings::default(),
        }
    }
}

impl RendererConfig {
    #[must_use]
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    #[must_use]
    pub fn with_back_buffer_count(mut self, count: u32) -> Self {
        self.back_buffer_count = count;
        self
    }

    #[must_use]
    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_gather_interval(mut self, seconds: f32) -> Self {
        self.gather_interval = seconds;
        self
    }
}

/// The frame between `start_frame` and `end_frame`.
#[derive(Debug, Clone, Copy)]
struct ActiveFrame {
    index: u32,
    back_buffer: TextureId,
    per_frame_offset: Option<u64>,
}

/// Owner of the device and all per-frame rendering state.
pub struct RendererContext {
    config: RendererConfig,
    constants: FrameConstants,
    descriptor_heap: DescriptorHeap,
    upload: UploadQueue,
    ring: FenceRing,
    swap_chain: SwapChain,
    queue: CommandQueue,
    device: GpuDevice,
    // Dropped after the device.
    instance: Option<GraphicsInstance>,
    frame: Option<ActiveFrame>,
    frame_count: u64,
    shut_down: bool,
}

impl RendererContext {
    /// Create the instance, pick an adapter, create the device and build the
    /// context on it.
    pub fn init(
        params: &InstanceParameters,
        target: &SurfaceTarget,
        width: u32,
        height: u32,
        config: RendererConfig,
    ) -> Result<Self, GraphicsError> {
        let instance = GraphicsInstance::new(params)?;
        let device = instance.create_device()?;
        let mut context = Self::with_device(device, target, width, height, config)?;
        context.instance = Some(instance);
        Ok(context)
    }

    /// Build the context on an existing device.
    pub fn with_device(
        device: GpuDevice,
        target: &SurfaceTarget,
        width: u32,
        height: u32,
        config: RendererConfig,
    ) -> Result<Self, GraphicsError> {
        let caps = device.capabilities();
        log::info!(
            "Renderer on '{}': tearing {}, ray tracing {}, RTV descriptor size {}",
            device.adapter().name,
            if caps.tearing_supported { "supported" } else { "unsupported" },
            if caps.ray_tracing { "supported" } else { "unsupported" },
            caps.render_target_descriptor_size
        );

        let queue = CommandQueue::new(&device, QueueKind::Direct, "direct")?;
        let swap_chain = SwapChain::new(
            &device,
            target,
            &SwapChainDescriptor::new(width, height)
                .with_back_buffer_count(config.back_buffer_count)
                .with_tearing(config.allow_tearing),
        )?;
        let slot_count = swap_chain.back_buffer_count();
        let ring = FenceRing::new(&device, slot_count, config.fence_timeout)?;
        let upload = UploadQueue::new(&device, config.fence_timeout)?;
        let constants = FrameConstants::new(&device, slot_count)?;
        let descriptor_heap =
            DescriptorHeap::new(&device, default_heap_layout(config.descriptor_heap_capacity)?)?;

        Ok(Self {
            config,
            constants,
            descriptor_heap,
            upload,
            ring,
            swap_chain,
            queue,
            device,
            instance: None,
            frame: None,
            frame_count: 0,
            shut_down: false,
        })
    }

    pub fn device(&self) -> &GpuDevice {
        &self.device
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn swap_chain(&self) -> &SwapChain {
        &self.swap_chain
    }

    pub fn ring(&self) -> &FenceRing {
        &self.ring
    }

    pub fn upload_queue(&mut self) -> &mut UploadQueue {
        &mut self.upload
    }

    pub fn constants(&self) -> &FrameConstants {
        &self.constants
    }

    pub fn descriptor_heap(&self) -> &DescriptorHeap {
        &self.descriptor_heap
    }

    /// Frames submitted so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Back buffer index of the frame being recorded.
    pub fn current_frame(&self) -> Option<u32> {
        self.frame.map(|f| f.index)
    }

    /// Buffer and offset of this frame's camera constants, once written.
    pub fn per_frame_constants(&self) -> Option<(BufferId, u64)> {
        let offset = self.frame?.per_frame_offset?;
        Some((self.constants.per_frame_buffer(), offset))
    }

    /// The list of the frame being recorded.
    pub fn list_mut(&mut self) -> Result<&mut CommandList, GraphicsError> {
        self.ring.list_mut()
    }

    fn active(&self) -> Result<ActiveFrame, GraphicsError> {
        self.frame.ok_or_else(|| {
            GraphicsError::InvalidParameter("frame command outside of a frame".to_string())
        })
    }

    // Frame lifecycle

    /// Begin recording the frame for the swap chain's current back buffer.
    ///
    /// Blocks until the slot's previous frame has completed, then transitions
    /// the back buffer to a render target. Returns the back buffer index.
    pub fn start_frame(&mut self) -> Result<u32, GraphicsError> {
        if let Some(frame) = self.frame {
            return Err(GraphicsError::InvalidParameter(format!(
                "start_frame while frame {} is still recording",
                frame.index
            )));
        }
        let index = self.swap_chain.current_back_buffer_index()?;
        let back_buffer = self.swap_chain.back_buffer(index).ok_or_else(|| {
            GraphicsError::Internal(format!("swap chain returned back buffer {index} out of range"))
        })?;

        let list = self.ring.begin(index)?;
        list.transition(back_buffer, ResourceState::Present, ResourceState::RenderTarget);
        self.constants.begin_frame(index);
        self.frame = Some(ActiveFrame {
            index,
            back_buffer,
            per_frame_offset: None,
        });
        log::trace!("Frame {} started on back buffer {index}", self.frame_count);
        Ok(index)
    }

    /// Transition the back buffer to present, close and submit the frame.
    pub fn end_frame(&mut self) -> Result<u32, GraphicsError> {
        let frame = self.frame.take().ok_or_else(|| {
            GraphicsError::InvalidParameter("end_frame without a matching start_frame".to_string())
        })?;
        self.ring.list_mut()?.transition(
            frame.back_buffer,
            ResourceState::RenderTarget,
            ResourceState::Present,
        );
        let index = self.ring.submit(&self.queue, Some(self.swap_chain.id()))?;
        self.frame_count += 1;
        Ok(index)
    }

    /// Present the last submitted frame with the configured vsync.
    pub fn present(&mut self) -> Result<(), GraphicsError> {
        if self.frame.is_some() {
            return Err(GraphicsError::InvalidParameter(
                "present while a frame is still recording".to_string(),
            ));
        }
        self.swap_chain.present(&self.queue, self.config.vsync)
    }

    // Frame commands

    pub fn set_render_targets(&mut self) -> Result<(), GraphicsError> {
        let frame = self.active()?;
        let depth = self.swap_chain.depth_buffer().id();
        self.ring
            .list_mut()?
            .set_render_targets(Some(frame.back_buffer), Some(depth));
        Ok(())
    }

    pub fn clear_render_targets(&mut self) -> Result<(), GraphicsError> {
        let frame = self.active()?;
        let depth = self.swap_chain.depth_buffer().id();
        let list = self.ring.list_mut()?;
        list.clear_render_target(frame.back_buffer, CLEAR_COLOR);
        list.clear_depth(depth, CLEAR_DEPTH);
        Ok(())
    }

    pub fn set_primitive_topology(&mut self) -> Result<(), GraphicsError> {
        self.active()?;
        self.ring
            .list_mut()?
            .set_primitive_topology(PrimitiveTopology::TriangleList);
        Ok(())
    }

    /// Full-window viewport and scissor.
    pub fn set_viewport(&mut self) -> Result<(), GraphicsError> {
        self.active()?;
        let (viewport, scissor) = (self.swap_chain.viewport(), self.swap_chain.scissor_rect());
        let list = self.ring.list_mut()?;
        list.set_viewport(viewport);
        list.set_scissor(scissor);
        Ok(())
    }

    pub fn set_graphics_pipeline(&mut self, pipeline: &dyn Pipeline) -> Result<(), GraphicsError> {
        self.active()?;
        pipeline.bind(self.ring.list_mut()?)
    }

    pub fn bind_descriptor_heap(&mut self) -> Result<(), GraphicsError> {
        self.active()?;
        let heap = self.descriptor_heap.id();
        self.ring.list_mut()?.set_descriptor_heap(heap);
        Ok(())
    }

    /// Write the camera constants for this frame and bind them.
    pub fn update_per_frame_constants(&mut self, camera: &Camera) -> Result<(), GraphicsError> {
        self.active()?;
        let constants = PerFrameConstants::new(
            camera,
            self.swap_chain.width(),
            self.swap_chain.height(),
        );
        let alloc = self.constants.update_per_frame(&constants)?;
        let buffer = self.constants.per_frame_buffer();
        if let Some(frame) = self.frame.as_mut() {
            frame.per_frame_offset = Some(alloc.offset);
        }
        self.ring.list_mut()?.set_root_constant_buffer(
            self.config.constant_bindings.per_frame,
            buffer,
            alloc.offset,
        );
        Ok(())
    }

    /// Bind `mesh` with its object constants and draw it.
    pub fn submit_mesh(&mut self, mesh: &Mesh, world: &Mat4) -> Result<(), GraphicsError> {
        self.active()?;
        let alloc = self.constants.push_object(&PerObjectConstants::new(world))?;
        let buffer = self.constants.per_object_buffer();
        let list = self.ring.list_mut()?;
        let slot = self.config.constant_bindings.per_object;
        list.set_root_constant_buffer(slot, buffer, alloc.offset);
        list.set_vertex_buffer(mesh.vertex_buffer_view());
        list.set_index_buffer(mesh.index_buffer_view());
        list.draw_indexed(mesh.index_count(), 1);
        Ok(())
    }

    // Synchronization

    /// Wait for all submitted frames. A frame still being recorded is dropped.
    pub fn flush(&mut self) -> Result<(), GraphicsError> {
        self.ring.flush(&self.queue)?;
        self.frame = None;
        Ok(())
    }

    /// Recreate the swap chain at a new size.
    ///
    /// Rejected while any frame slot still has work in flight; call
    /// [`Self::flush`] first.
    pub fn resize_swap_chain(&mut self, width: u32, height: u32) -> Result<(), GraphicsError> {
        if self.ring.in_flight()? {
            return Err(GraphicsError::InvalidParameter(
                "swap chain resized with frames in flight; flush first".to_string(),
            ));
        }
        self.swap_chain.resize(&self.device, width, height)
    }

    /// Flush the GPU and release the device.
    pub fn shutdown(mut self) -> Result<(), GraphicsError> {
        self.flush()?;
        self.device.backend().wait_idle()?;
        self.shut_down = true;
        log::info!("Renderer shut down after {} frames", self.frame_count);
        Ok(())
    }

    // Resources

    /// Upload `meshes` in one batch on the upload queue.
    pub fn upload_meshes(&mut self, meshes: &[&CpuMesh]) -> Result<Vec<Mesh>, GraphicsError> {
        self.upload.upload_meshes(&self.device, meshes)
    }

    /// Copy the contents of `buffer`, currently in `state`, back to the CPU.
    pub fn read_back_buffer(
        &mut self,
        buffer: &Buffer,
        state: ResourceState,
    ) -> Result<Vec<u8>, GraphicsError> {
        self.upload.read_back_buffer(&self.device, buffer, state)
    }

    /// Build the bottom-level structure of `mesh` and wait for it.
    pub fn build_blas(&mut self, mesh: &Mesh) -> Result<Blas, GraphicsError> {
        Blas::new(&self.device, &mut self.upload, mesh)
    }

    /// A TLAS with one instance upload region per back buffer.
    pub fn create_tlas(
        &self,
        instance_count: u32,
        allow_update: bool,
    ) -> Result<Tlas, GraphicsError> {
        Tlas::new(
            &self.device,
            instance_count,
            self.swap_chain.back_buffer_count(),
            allow_update,
        )
    }
}

impl Drop for RendererContext {
    fn drop(&mut self) {
        if !self.shut_down && matches!(self.ring.in_flight(), Ok(true)) {
            log::warn!("Renderer dropped with frames in flight; call shutdown() first");
        }
    }
}

impl std::fmt::Debug for RendererContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererContext")
            .field("device", &self.device)
            .field("swap_chain", &self.swap_chain)
            .field("ring", &self.ring)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

/// The shared heap: the TLAS and ray tracing output are adjacent so one
/// table covers both.
fn default_heap_layout(capacity: u32) -> Result<DescriptorHeapLayout, GraphicsError> {
    let mut layout = DescriptorHeapLayout::new(capacity);
    layout.reserve(slots::SCENE_TLAS, DescriptorKind::AccelerationStructure)?;
    layout.reserve(slots::RAYTRACE_OUTPUT, DescriptorKind::UnorderedAccess)?;
    layout.reserve(slots::UI, DescriptorKind::ShaderResource)?;
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::device::{AdapterInfo, AdapterType};
    use lumen_core::mesh::generators::generate_cube;
    use std::sync::Arc;

    fn context() -> (Arc<DummyBackend>, RendererContext) {
        let backend = Arc::new(DummyBackend::new());
        let device = GpuDevice::new(
            AdapterInfo::new(0, "Test Adapter", AdapterType::Discrete, 1 << 30),
            backend.clone(),
        );
        let ctx = RendererContext::with_device(
            device,
            &SurfaceTarget::Headless,
            320,
            240,
            RendererConfig::default(),
        )
        .unwrap();
        (backend, ctx)
    }

    #[test]
    fn test_heap_layout_is_adjacent() {
        let layout = default_heap_layout(8).unwrap();
        let tlas = layout.index_of(slots::SCENE_TLAS).unwrap();
        let output = layout.index_of(slots::RAYTRACE_OUTPUT).unwrap();
        assert_eq!(output.get(), tlas.get() + 1);
    }

    #[test]
    fn test_frame_commands_need_a_frame() {
        let (_backend, mut ctx) = context();
        assert!(ctx.set_render_targets().is_err());
        assert!(ctx.end_frame().is_err());
        assert!(ctx.current_frame().is_none());
    }

    #[test]
    fn test_double_start_rejected() {
        let (_backend, mut ctx) = context();
        ctx.start_frame().unwrap();
        assert!(ctx.start_frame().is_err());
        ctx.end_frame().unwrap();
        ctx.present().unwrap();
        ctx.shutdown().unwrap();
    }

    #[test]
    fn test_clear_writes_back_buffer() {
        let (backend, mut ctx) = context();
        let index = ctx.start_frame().unwrap();
        ctx.set_render_targets().unwrap();
        ctx.clear_render_targets().unwrap();
        ctx.end_frame().unwrap();
        ctx.present().unwrap();
        ctx.flush().unwrap();

        let back_buffer = ctx.swap_chain().back_buffer(index).unwrap();
        assert_eq!(backend.texture_clear_color(back_buffer), Some(CLEAR_COLOR));
        assert_eq!(backend.texture_state(back_buffer), Some(ResourceState::Present));
    }

    #[test]
    fn test_resize_requires_flush() {
        let (_backend, mut ctx) = context();
        ctx.start_frame().unwrap();
        ctx.end_frame().unwrap();
        ctx.present().unwrap();

        assert!(matches!(
            ctx.resize_swap_chain(640, 480),
            Err(GraphicsError::InvalidParameter(_))
        ));
        ctx.flush().unwrap();
        ctx.resize_swap_chain(640, 480).unwrap();
        assert_eq!(ctx.swap_chain().viewport().width, 640.0);
    }

    #[test]
    fn test_upload_and_read_back() {
        let (_backend, mut ctx) = context();
        let cube = generate_cube(1.0);
        let meshes = ctx.upload_meshes(&[&cube]).unwrap();
        let bytes = ctx
            .read_back_buffer(meshes[0].index_buffer(), ResourceState::IndexBuffer)
            .unwrap();
        assert_eq!(bytes, cube.index_bytes());
    }
}
