//! The demo scene: a spinning cube inside a grid of light probes.
//!
//! The cube and one debug sphere per probe are drawn with the forward
//! pipeline. When the device supports ray tracing, the same objects are
//! placed in a TLAS that the gather pass traces against.

use lumen_app::{AppEvent, Scene, UiText};
use lumen_core::math::Vec3;
use lumen_core::mesh::generators::{generate_cube, generate_sphere};
use lumen_core::scene::{Camera, ProbeVolume, Transform};
use lumen_graphics::{
    Blas, GraphicsError, Mesh, Pipeline, PipelineKind, RayTracingPass, RendererContext,
    ShaderLoader,
};

use crate::camera::FlyCamera;

/// Radians per second the cube turns about its vertical axis.
const CUBE_SPIN: f32 = 0.5;
/// Weight of the newest sample in the smoothed frame time.
const FRAME_TIME_SMOOTHING: f32 = 0.1;

/// Probe grid placement and density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSettings {
    pub position: Vec3,
    pub extents: Vec3,
    pub spacing: f32,
    pub debug_probe_size: f32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            extents: Vec3::new(6.0, 3.0, 6.0),
            spacing: 1.5,
            debug_probe_size: 0.1,
        }
    }
}

/// GPU resources of the ray traced scene. The BLASes must outlive the TLAS
/// instances that point at them.
struct RayTracedScene {
    cube_blas: Blas,
    probe_blas: Blas,
    pass: RayTracingPass,
}

pub struct DemoScene {
    shaders: ShaderLoader,
    fly: FlyCamera,
    cube_transform: Transform,
    probes: ProbeVolume,
    pipeline: Option<Box<dyn Pipeline>>,
    cube: Option<Mesh>,
    probe_sphere: Option<Mesh>,
    ray_traced: Option<RayTracedScene>,
    /// Probe transforms changed since the TLAS last saw them.
    probes_moved: bool,
    smoothed_frame_time: f32,
}

impl DemoScene {
    pub fn new(shaders: ShaderLoader) -> Self {
        Self::with_probes(shaders, ProbeSettings::default())
    }

    pub fn with_probes(shaders: ShaderLoader, settings: ProbeSettings) -> Self {
        Self {
            shaders,
            fly: FlyCamera::new(Camera::new(Vec3::new(0.0, 0.0, -5.0))),
            cube_transform: Transform::identity(),
            probes: ProbeVolume::new(
                settings.position,
                settings.extents,
                settings.spacing,
                settings.debug_probe_size,
            ),
            pipeline: None,
            cube: None,
            probe_sphere: None,
            ray_traced: None,
            probes_moved: false,
            smoothed_frame_time: 0.0,
        }
    }

    pub fn cube_transform(&self) -> &Transform {
        &self.cube_transform
    }

    pub fn probes(&self) -> &ProbeVolume {
        &self.probes
    }

    pub fn probes_mut(&mut self) -> &mut ProbeVolume {
        &mut self.probes
    }

    pub fn is_ray_traced(&self) -> bool {
        self.ray_traced.is_some()
    }

    /// Build BLASes for the two meshes and a TLAS holding the cube and
    /// every probe.
    fn build_ray_tracing(&mut self, ctx: &mut RendererContext) -> Result<(), GraphicsError> {
        let (Some(cube), Some(sphere)) = (&self.cube, &self.probe_sphere) else {
            return Ok(());
        };
        let cube_blas = ctx.build_blas(cube)?;
        let probe_blas = ctx.build_blas(sphere)?;

        let instance_count = 1 + self.probes.probe_count() as u32;
        let mut tlas = ctx.create_tlas(instance_count, true)?;
        let cube_world = self.cube_transform.world_matrix();
        tlas.set_instance_blas_and_transform(0, &cube_blas, &cube_world)?;
        for (index, probe) in self.probes.transforms().iter().enumerate() {
            let index = index as u32 + 1;
            tlas.set_instance_blas_and_transform(index, &probe_blas, &probe.world_matrix())?;
        }
        tlas.build_now(ctx.upload_queue())?;

        let (width, height) = (ctx.swap_chain().width(), ctx.swap_chain().height());
        let pass = RayTracingPass::new(ctx, &self.shaders, tlas, width, height)?;
        log::info!("Ray traced scene: {} instances", instance_count);
        self.ray_traced = Some(RayTracedScene {
            cube_blas,
            probe_blas,
            pass,
        });
        Ok(())
    }

    /// Copy the current transforms into the TLAS; the next dispatch rebuilds it.
    fn refresh_instances(&mut self, probes_moved: bool) -> Result<(), GraphicsError> {
        let Some(rt) = self.ray_traced.as_mut() else {
            return Ok(());
        };
        let cube_world = self.cube_transform.world_matrix();
        let tlas = rt.pass.tlas_mut();
        tlas.set_instance_blas_and_transform(0, &rt.cube_blas, &cube_world)?;
        if probes_moved {
            for (index, probe) in self.probes.transforms().iter().enumerate() {
                tlas.set_instance_blas_and_transform(
                    index as u32 + 1,
                    &rt.probe_blas,
                    &probe.world_matrix(),
                )?;
            }
        }
        Ok(())
    }
}

impl Scene for DemoScene {
    fn begin(&mut self, ctx: &mut RendererContext) -> Result<(), GraphicsError> {
        self.pipeline = Some(PipelineKind::Forward.build(ctx.device(), &self.shaders)?);

        let cube = generate_cube(1.0).with_label("cube");
        let sphere = generate_sphere(0.5, 16, 8).with_label("probe_sphere");
        let mut meshes = ctx.upload_meshes(&[&cube, &sphere])?.into_iter();
        self.cube = meshes.next();
        self.probe_sphere = meshes.next();
        log::info!(
            "Demo scene: cube and {} probes ({:?})",
            self.probes.probe_count(),
            self.probes.counts()
        );

        if ctx.device().capabilities().ray_tracing {
            self.build_ray_tracing(ctx)?;
        } else {
            log::warn!("Device has no ray tracing support; gather pass disabled");
        }
        Ok(())
    }

    fn tick(&mut self, delta_seconds: f32, events: &[AppEvent]) {
        for event in events {
            if let AppEvent::Input(input) = event {
                self.fly.handle(input);
            }
        }
        self.fly.update(delta_seconds);

        self.smoothed_frame_time +=
            (delta_seconds - self.smoothed_frame_time) * FRAME_TIME_SMOOTHING;
        self.cube_transform.rotation.y =
            (self.cube_transform.rotation.y + CUBE_SPIN * delta_seconds) % std::f32::consts::TAU;

        self.probes_moved |= self.probes.update();
    }

    fn draw(&mut self, ctx: &mut RendererContext) -> Result<(), GraphicsError> {
        let probes_moved = std::mem::take(&mut self.probes_moved);
        self.refresh_instances(probes_moved)?;
        if let Some(cube) = &self.cube {
            ctx.submit_mesh(cube, &self.cube_transform.world_matrix())?;
        }
        if let Some(sphere) = &self.probe_sphere {
            for probe in self.probes.transforms() {
                ctx.submit_mesh(sphere, &probe.world_matrix())?;
            }
        }
        Ok(())
    }

    fn draw_ui(&mut self, ui: &mut UiText) {
        let fps = if self.smoothed_frame_time > 0.0 {
            1.0 / self.smoothed_frame_time
        } else {
            0.0
        };
        let position = self.fly.camera.position;
        ui.line(format!(
            "{:.1} fps ({:.2} ms)",
            fps,
            self.smoothed_frame_time * 1000.0
        ));
        ui.line(format!(
            "camera ({:.2}, {:.2}, {:.2})",
            position.x, position.y, position.z
        ));
        ui.line(format!(
            "probes {:?}, gather pass {}",
            self.probes.counts(),
            if self.ray_traced.is_some() { "on" } else { "off" }
        ));
    }

    fn camera(&self) -> &Camera {
        &self.fly.camera
    }

    fn pipeline(&self) -> Option<&dyn Pipeline> {
        self.pipeline.as_deref()
    }

    fn ray_tracing(&mut self) -> Option<&mut RayTracingPass> {
        self.ray_traced.as_mut().map(|rt| &mut rt.pass)
    }

    /// The gather output follows the swap chain size.
    fn on_resize(
        &mut self,
        ctx: &mut RendererContext,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsError> {
        let Some(rt) = self.ray_traced.take() else {
            return Ok(());
        };
        let tlas = rt.pass.into_tlas();
        let pass = RayTracingPass::new(ctx, &self.shaders, tlas, width, height)?;
        self.ray_traced = Some(RayTracedScene {
            cube_blas: rt.cube_blas,
            probe_blas: rt.probe_blas,
            pass,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_app::SceneRunner;
    use lumen_graphics::{
        AdapterInfo, AdapterType, DummyBackend, GpuDevice, RendererConfig, SurfaceTarget,
    };
    use std::sync::Arc;

    fn placeholder_shaders(test: &str) -> ShaderLoader {
        let dir = std::env::temp_dir().join(format!("lumen_demo_{test}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["ForwardVertexShader", "ForwardPixelShader", "RayTracingLibrary"] {
            std::fs::write(dir.join(format!("{name}.spv")), [0x03, 0x02, 0x23, 0x07]).unwrap();
        }
        ShaderLoader::new(dir)
    }

    fn renderer(width: u32, height: u32) -> (Arc<DummyBackend>, RendererContext) {
        let backend = Arc::new(DummyBackend::new());
        let device = GpuDevice::new(
            AdapterInfo::new(0, "Test Adapter", AdapterType::Discrete, 1 << 30),
            backend.clone(),
        );
        let ctx = RendererContext::with_device(
            device,
            &SurfaceTarget::Headless,
            width,
            height,
            RendererConfig::default().with_gather_interval(0.1),
        )
        .unwrap();
        (backend, ctx)
    }

    #[test]
    fn test_probe_grid_counts() {
        let scene = DemoScene::new(placeholder_shaders("counts"));
        assert_eq!(scene.probes().counts(), [4, 2, 4]);
        assert_eq!(scene.probes().probe_count(), 32);
    }

    #[test]
    fn test_frames_draw_cube_and_probes() {
        let (backend, ctx) = renderer(1920, 1080);
        let scene = DemoScene::new(placeholder_shaders("frames"));
        let mut runner = SceneRunner::new(scene, ctx).unwrap();
        assert!(runner.scene().is_ray_traced());

        let mut dispatches = 0;
        for _ in 0..6 {
            let report = runner.frame(0.05, &[]).unwrap();
            assert_eq!(report.draws, 33);
            dispatches += report.ray_dispatch as u32;
        }
        // 0.05 s frames against a 0.1 s interval: every second frame.
        assert_eq!(dispatches, 3);
        runner.flush().unwrap();
        assert_eq!(backend.dispatch_count(), 3);
        assert!(backend.validation_messages().is_empty());

        runner.shutdown().unwrap();
    }

    #[test]
    fn test_tlas_follows_cube_rotation() {
        let (backend, ctx) = renderer(640, 360);
        let scene = DemoScene::new(placeholder_shaders("spin"));
        let mut runner = SceneRunner::new(scene, ctx).unwrap();
        runner.frame(0.1, &[]).unwrap();
        runner.frame(0.1, &[]).unwrap();

        let rotation = runner.scene().cube_transform().rotation.y;
        assert!(rotation > 0.0);

        let scene = runner.scene_mut();
        let instances = scene.ray_tracing().unwrap().tlas().instances().to_vec();
        let expected = lumen_core::math::mat4_to_rows_3x4(&scene.cube_transform().world_matrix());
        assert_eq!(instances[0].transform, expected);
        assert!(backend.validation_messages().is_empty());
        runner.shutdown().unwrap();
    }

    #[test]
    fn test_moved_probes_reach_tlas_at_draw() {
        let (backend, ctx) = renderer(640, 360);
        let scene = DemoScene::new(placeholder_shaders("probes_move"));
        let mut runner = SceneRunner::new(scene, ctx).unwrap();
        runner.frame(0.016, &[]).unwrap();

        runner
            .scene_mut()
            .probes_mut()
            .set_position(Vec3::new(0.0, 2.0, 0.0));
        runner.frame(0.016, &[]).unwrap();

        let scene = runner.scene_mut();
        let first_probe = scene.probes().transforms()[0].world_matrix();
        let expected = lumen_core::math::mat4_to_rows_3x4(&first_probe);
        let instances = scene.ray_tracing().unwrap().tlas().instances().to_vec();
        assert_eq!(instances[1].transform, expected);
        assert!(backend.validation_messages().is_empty());
        runner.shutdown().unwrap();
    }

    #[test]
    fn test_resize_rebuilds_gather_output() {
        let (_backend, ctx) = renderer(640, 360);
        let scene = DemoScene::new(placeholder_shaders("resize"));
        let mut runner = SceneRunner::new(scene, ctx).unwrap();
        runner.frame(0.016, &[]).unwrap();
        runner.resize(800, 600).unwrap();

        let output = runner.scene_mut().ray_tracing().unwrap().output().width();
        assert_eq!(output, 800);
        runner.frame(0.2, &[]).unwrap();
        runner.shutdown().unwrap();
    }
}
