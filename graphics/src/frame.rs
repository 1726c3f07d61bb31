//! Frame command sequencer.
//!
//! [`FrameSequencer`] drives one iteration of the render loop against a
//! [`RendererContext`] in a fixed order:
//!
//! ```text
//! StartFrame ─► SetTargets ─► Clear ─► SetPipelineState ─► SetViewport
//!      ─► BindDescriptorHeaps ─► UpdateConstants ─► SubmitDraws
//!      ─► [RaytraceDispatch] ─► [Overlay] ─► EndFrame ─► Present
//! ```
//!
//! The ray tracing dispatch is not issued every frame. A [`GatherSchedule`]
//! accumulates frame time and fires once per gather interval; when it fires
//! the TLAS is rebuilt and the rays are traced into the output texture.
//!
//! # Example
//!
//! ```ignore
//! let mut sequencer = FrameSequencer::new(ctx.config().gather_interval);
//!
//! loop {
//!     sequencer.begin(&mut ctx, &camera, pipeline.as_ref())?;
//!     ctx.submit_mesh(&cube, &transform.world_matrix())?;
//!     sequencer.finish(&mut ctx, delta_seconds, Some(&mut ray_tracing))?;
//! }
//! ```

use lumen_core::scene::Camera;

use crate::accel::{BuildMode, Tlas};
use crate::context::RendererContext;
use crate::descriptor::{DescriptorBinding, slots};
use crate::error::GraphicsError;
use crate::pipeline::{Pipeline, PipelineKind, RayTracingPipeline, ShaderLoader};
use crate::resources::Texture;
use crate::shader_table::{ShaderTable, ShaderTableBuilder};
use crate::types::{ResourceBarrier, ResourceState, TextureDescriptor, TextureFormat, TextureUsage};

/// Elapsed-time gate for the ray tracing dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatherSchedule {
    interval: f32,
    accumulator: f32,
}

impl GatherSchedule {
    pub fn new(interval: f32) -> Self {
        Self {
            interval: interval.max(0.0),
            accumulator: 0.0,
        }
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }

    /// Add `delta_seconds`; returns whether a dispatch is due.
    ///
    /// The accumulator resets when it fires, so a long stall yields one
    /// dispatch rather than a burst.
    pub fn tick(&mut self, delta_seconds: f32) -> bool {
        self.accumulator += delta_seconds.max(0.0);
        if self.accumulator >= self.interval {
            self.accumulator = 0.0;
            true
        } else {
            false
        }
    }
}

/// Hooks of an immediate-mode overlay drawn on top of the frame.
pub trait Overlay {
    /// Start the overlay's frame. Called right after `start_frame`.
    fn begin_overlay(&mut self);

    /// Record the overlay's draws. Called after the scene and any ray
    /// dispatch, before `end_frame`.
    fn end_overlay(&mut self, ctx: &mut RendererContext) -> Result<(), GraphicsError>;
}

/// Everything the ray tracing dispatch needs: pipeline, shader table, TLAS
/// and the storage texture it writes.
pub struct RayTracingPass {
    pipeline: Box<dyn Pipeline>,
    shader_table: ShaderTable,
    tlas: Tlas,
    output: Texture,
}

impl RayTracingPass {
    /// Create the pipeline and shader table and write the TLAS and output
    /// views into the context's descriptor heap.
    pub fn new(
        ctx: &RendererContext,
        shaders: &ShaderLoader,
        tlas: Tlas,
        width: u32,
        height: u32,
    ) -> Result<Self, GraphicsError> {
        let device = ctx.device();
        let pipeline = PipelineKind::RayTracing.build(device, shaders)?;
        let pipeline_id = pipeline.id().ok_or_else(|| {
            GraphicsError::Internal("ray tracing pipeline has no backend object".to_string())
        })?;
        let shader_table = ShaderTableBuilder::new()
            .ray_generation(RayTracingPipeline::RAY_GENERATION, &[])
            .miss(RayTracingPipeline::MISS, &[])
            .hit_group(RayTracingPipeline::HIT_GROUP, &[])
            .build(device, pipeline_id)?;

        let output = device.create_texture(
            &TextureDescriptor::new_2d(
                width,
                height,
                TextureFormat::Rgba16Float,
                TextureUsage::UNORDERED_ACCESS | TextureUsage::SHADER_RESOURCE,
            )
            .with_initial_state(ResourceState::UnorderedAccess)
            .with_label("raytrace_output"),
        )?;

        let heap = ctx.descriptor_heap();
        heap.write_named(slots::SCENE_TLAS, &DescriptorBinding::AccelerationStructure(tlas.id()))?;
        heap.write_named(slots::RAYTRACE_OUTPUT, &DescriptorBinding::StorageTexture(output.id()))?;

        log::info!("Ray tracing pass ready, output {width}x{height}");
        Ok(Self {
            pipeline,
            shader_table,
            tlas,
            output,
        })
    }

    pub fn tlas(&self) -> &Tlas {
        &self.tlas
    }

    /// Instances are edited here and picked up by the next dispatch.
    pub fn tlas_mut(&mut self) -> &mut Tlas {
        &mut self.tlas
    }

    pub fn shader_table(&self) -> &ShaderTable {
        &self.shader_table
    }

    pub fn output(&self) -> &Texture {
        &self.output
    }

    /// Release the pass and keep its TLAS, e.g. to rebuild at a new size.
    pub fn into_tlas(self) -> Tlas {
        self.tlas
    }

    /// Rebuild the TLAS and trace one ray per output texel.
    pub fn record(&mut self, ctx: &mut RendererContext) -> Result<(), GraphicsError> {
        let slot = ctx.current_frame().ok_or_else(|| {
            GraphicsError::InvalidParameter("ray dispatch outside of a frame".to_string())
        })?;
        let heap = ctx.descriptor_heap().id();
        let table = ctx.descriptor_heap().index_of(slots::SCENE_TLAS).ok_or_else(|| {
            GraphicsError::Internal("descriptor heap has no TLAS slot".to_string())
        })?;
        let per_frame = ctx.per_frame_constants();
        let dispatch = self.shader_table.dispatch(self.output.width(), self.output.height());
        let output = self.output.id();

        let list = ctx.list_mut()?;
        list.begin_event("ray_dispatch");
        self.tlas.record_build(list, slot, BuildMode::Build)?;
        self.pipeline.bind(list)?;
        list.set_descriptor_heap(heap);
        list.set_root_descriptor_table(RayTracingPipeline::SCENE_TABLE_PARAMETER, table);
        if let Some((buffer, offset)) = per_frame {
            list.set_root_constant_buffer(RayTracingPipeline::PER_FRAME_PARAMETER, buffer, offset);
        }
        list.dispatch_rays(dispatch);
        list.resource_barrier(&[ResourceBarrier::uav(output)]);
        list.end_event();
        Ok(())
    }
}

impl std::fmt::Debug for RayTracingPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RayTracingPass")
            .field("tlas", &self.tlas)
            .field("output", &self.output)
            .finish()
    }
}

/// What one call to [`FrameSequencer::finish`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Back buffer the frame rendered to.
    pub back_buffer: u32,
    pub draws: u32,
    pub ray_dispatch: bool,
}

/// Runs the frame command sequence in order.
pub struct FrameSequencer {
    gather: GatherSchedule,
    overlay: Option<Box<dyn Overlay>>,
}

impl FrameSequencer {
    pub fn new(gather_interval: f32) -> Self {
        Self {
            gather: GatherSchedule::new(gather_interval),
            overlay: None,
        }
    }

    #[must_use]
    pub fn with_overlay(mut self, overlay: Box<dyn Overlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn gather(&self) -> &GatherSchedule {
        &self.gather
    }

    /// Start the frame and record everything up to the draw submissions.
    ///
    /// Returns the back buffer index.
    pub fn begin(
        &mut self,
        ctx: &mut RendererContext,
        camera: &Camera,
        pipeline: &dyn Pipeline,
    ) -> Result<u32, GraphicsError> {
        let index = ctx.start_frame()?;
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.begin_overlay();
        }
        ctx.set_render_targets()?;
        ctx.clear_render_targets()?;
        ctx.set_primitive_topology()?;
        ctx.set_graphics_pipeline(pipeline)?;
        ctx.set_viewport()?;
        ctx.bind_descriptor_heap()?;
        ctx.update_per_frame_constants(camera)?;
        Ok(index)
    }

    /// Record the optional ray dispatch and overlay, submit and present.
    pub fn finish(
        &mut self,
        ctx: &mut RendererContext,
        delta_seconds: f32,
        ray_tracing: Option<&mut RayTracingPass>,
    ) -> Result<FrameReport, GraphicsError> {
        let mut ray_dispatch = false;
        if self.gather.tick(delta_seconds)
            && let Some(pass) = ray_tracing
        {
            pass.record(ctx)?;
            ray_dispatch = true;
        }
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.end_overlay(ctx)?;
        }

        let draws = ctx.constants().draw_count();
        let back_buffer = ctx.end_frame()?;
        ctx.present()?;
        Ok(FrameReport {
            back_buffer,
            draws,
            ray_dispatch,
        })
    }

    /// Run a whole frame; `submit_draws` records the scene's draws.
    pub fn run_frame<F>(
        &mut self,
        ctx: &mut RendererContext,
        camera: &Camera,
        pipeline: &dyn Pipeline,
        delta_seconds: f32,
        ray_tracing: Option<&mut RayTracingPass>,
        submit_draws: F,
    ) -> Result<FrameReport, GraphicsError>
    where
        F: FnOnce(&mut RendererContext) -> Result<(), GraphicsError>,
    {
        self.begin(ctx, camera, pipeline)?;
        submit_draws(ctx)?;
        self.finish(ctx, delta_seconds, ray_tracing)
    }
}

impl std::fmt::Debug for FrameSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSequencer")
            .field("gather", &self.gather)
            .field("overlay", &self.overlay.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::command::Command;
    use crate::context::RendererConfig;
    use crate::device::{AdapterInfo, AdapterType, GpuDevice};
    use crate::pipeline::test_support::placeholder_shaders;
    use crate::swapchain::SurfaceTarget;
    use lumen_core::math::Mat4;
    use lumen_core::mesh::generators::generate_cube;
    use std::sync::{Arc, Mutex};

    fn context() -> (Arc<DummyBackend>, RendererContext) {
        let backend = Arc::new(DummyBackend::new());
        let device = GpuDevice::new(
            AdapterInfo::new(0, "Test Adapter", AdapterType::Discrete, 1 << 30),
            backend.clone(),
        );
        let ctx = RendererContext::with_device(
            device,
            &SurfaceTarget::Headless,
            256,
            256,
            RendererConfig::default(),
        )
        .unwrap();
        (backend, ctx)
    }

    struct RecordingOverlay(Arc<Mutex<Vec<&'static str>>>);

    impl Overlay for RecordingOverlay {
        fn begin_overlay(&mut self) {
            self.0.lock().unwrap().push("begin");
        }

        fn end_overlay(&mut self, ctx: &mut RendererContext) -> Result<(), GraphicsError> {
            assert!(ctx.current_frame().is_some());
            self.0.lock().unwrap().push("end");
            Ok(())
        }
    }

    #[test]
    fn test_gather_schedule() {
        let mut schedule = GatherSchedule::new(0.1);
        assert!(!schedule.tick(0.05));
        assert!(schedule.tick(0.06));
        assert!(!schedule.tick(0.0));
        // A long stall fires once.
        assert!(schedule.tick(1.0));
        assert!(!schedule.tick(0.01));
    }

    #[test]
    fn test_zero_interval_fires_every_frame() {
        let mut schedule = GatherSchedule::new(0.0);
        assert!(schedule.tick(0.0));
        assert!(schedule.tick(0.016));
    }

    #[test]
    fn test_frame_with_overlay() {
        let (backend, mut ctx) = context();
        let shaders = placeholder_shaders("frame_overlay");
        let pipeline = PipelineKind::Forward.build(ctx.device(), &shaders).unwrap();
        let cube = ctx.upload_meshes(&[&generate_cube(1.0)]).unwrap().remove(0);

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut sequencer =
            FrameSequencer::new(0.1).with_overlay(Box::new(RecordingOverlay(events.clone())));
        let report = sequencer
            .run_frame(&mut ctx, &Camera::default(), pipeline.as_ref(), 0.016, None, |ctx| {
                ctx.submit_mesh(&cube, &Mat4::identity())
            })
            .unwrap();

        assert_eq!(report.back_buffer, 0);
        assert_eq!(report.draws, 1);
        assert!(!report.ray_dispatch);
        assert_eq!(*events.lock().unwrap(), vec!["begin", "end"]);

        ctx.flush().unwrap();
        let back_buffer = ctx.swap_chain().back_buffer(0).unwrap();
        assert_eq!(backend.texture_draw_count(back_buffer), 1);
        assert_eq!(backend.present_count(ctx.swap_chain().id()), 1);
        ctx.shutdown().unwrap();
    }

    #[test]
    fn test_ray_dispatch_is_gated() {
        let (backend, mut ctx) = context();
        let shaders = placeholder_shaders("frame_dispatch");
        let pipeline = PipelineKind::Forward.build(ctx.device(), &shaders).unwrap();
        let cube = ctx.upload_meshes(&[&generate_cube(1.0)]).unwrap().remove(0);
        let blas = ctx.build_blas(&cube).unwrap();
        let mut tlas = ctx.create_tlas(1, true).unwrap();
        tlas.set_instance_blas_and_transform(0, &blas, &Mat4::identity())
            .unwrap();
        let mut pass = RayTracingPass::new(&ctx, &shaders, tlas, 16, 16).unwrap();

        let mut sequencer = FrameSequencer::new(0.1);
        let mut dispatched = Vec::new();
        for _ in 0..4 {
            let report = sequencer
                .run_frame(
                    &mut ctx,
                    &Camera::default(),
                    pipeline.as_ref(),
                    0.06,
                    Some(&mut pass),
                    |ctx| ctx.submit_mesh(&cube, &Mat4::identity()),
                )
                .unwrap();
            dispatched.push(report.ray_dispatch);
        }
        assert_eq!(dispatched, vec![false, true, false, true]);

        ctx.flush().unwrap();
        assert_eq!(backend.dispatch_count(), 2);
        assert!(pass.tlas().is_built());
        assert_eq!(backend.acceleration_structure_instances(pass.tlas().id()).len(), 1);
        assert!(backend.validation_messages().is_empty());
        ctx.shutdown().unwrap();
    }

    #[test]
    fn test_gather_rebuilds_tlas_every_dispatch() {
        let (backend, mut ctx) = context();
        let shaders = placeholder_shaders("frame_rebuild");
        let cube = ctx.upload_meshes(&[&generate_cube(1.0)]).unwrap().remove(0);
        let blas = ctx.build_blas(&cube).unwrap();
        let mut tlas = ctx.create_tlas(1, true).unwrap();
        tlas.set_instance_blas_and_transform(0, &blas, &Mat4::identity())
            .unwrap();
        tlas.build_now(ctx.upload_queue()).unwrap();
        let mut pass = RayTracingPass::new(&ctx, &shaders, tlas, 16, 16).unwrap();

        let mut modes = Vec::new();
        for _ in 0..2 {
            ctx.start_frame().unwrap();
            pass.record(&mut ctx).unwrap();
            modes.extend(ctx.list_mut().unwrap().commands().iter().filter_map(|command| {
                match command {
                    Command::BuildAccelerationStructure(build) => Some(build.mode),
                    _ => None,
                }
            }));
            ctx.end_frame().unwrap();
            ctx.present().unwrap();
        }
        assert_eq!(modes, vec![BuildMode::Build, BuildMode::Build]);

        ctx.flush().unwrap();
        assert!(backend.validation_messages().is_empty());
        ctx.shutdown().unwrap();
    }
}
