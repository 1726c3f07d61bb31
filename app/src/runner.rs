//! Per-frame driver of a [`Scene`], independent of the window system.

use std::sync::Arc;

use parking_lot::Mutex;

use lumen_graphics::{FrameReport, FrameSequencer, GraphicsError, RendererContext};

use crate::events::AppEvent;
use crate::overlay::{LoggingOverlay, UiText};
use crate::scene::Scene;

/// Owns a scene and the renderer it draws with.
pub struct SceneRunner<S: Scene> {
    scene: S,
    sequencer: FrameSequencer,
    ui: Arc<Mutex<UiText>>,
    renderer: RendererContext,
}

impl<S: Scene> SceneRunner<S> {
    /// Begin `scene` on `renderer` with a [`LoggingOverlay`].
    pub fn new(scene: S, renderer: RendererContext) -> Result<Self, GraphicsError> {
        Self::with_overlay(scene, renderer, LoggingOverlay::default())
    }

    pub fn with_overlay(
        mut scene: S,
        mut renderer: RendererContext,
        overlay: LoggingOverlay,
    ) -> Result<Self, GraphicsError> {
        scene.begin(&mut renderer)?;
        let ui = overlay.text();
        let sequencer =
            FrameSequencer::new(renderer.config().gather_interval).with_overlay(Box::new(overlay));
        Ok(Self {
            scene,
            sequencer,
            ui,
            renderer,
        })
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn renderer(&self) -> &RendererContext {
        &self.renderer
    }

    /// Tick the scene and render one frame.
    pub fn frame(
        &mut self,
        delta_seconds: f32,
        events: &[AppEvent],
    ) -> Result<FrameReport, GraphicsError> {
        self.scene.tick(delta_seconds, events);

        let pipeline = self.scene.pipeline().ok_or_else(|| {
            GraphicsError::InvalidParameter("scene has no pipeline to draw with".to_string())
        })?;
        self.sequencer
            .begin(&mut self.renderer, self.scene.camera(), pipeline)?;
        self.scene.draw(&mut self.renderer)?;
        self.scene.draw_ui(&mut self.ui.lock());
        self.sequencer
            .finish(&mut self.renderer, delta_seconds, self.scene.ray_tracing())
    }

    /// Flush, then resize the swap chain. Zero-sized requests are ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), GraphicsError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let swap_chain = self.renderer.swap_chain();
        if width == swap_chain.width() && height == swap_chain.height() {
            return Ok(());
        }
        self.renderer.flush()?;
        self.renderer.resize_swap_chain(width, height)?;
        self.scene.on_resize(&mut self.renderer, width, height)?;
        log::debug!("Swap chain resized to {}x{}", width, height);
        Ok(())
    }

    /// Block until every submitted frame has retired.
    pub fn flush(&mut self) -> Result<(), GraphicsError> {
        self.renderer.flush()
    }

    /// End the scene and shut the renderer down, handing the scene back.
    pub fn shutdown(mut self) -> Result<S, GraphicsError> {
        self.renderer.flush()?;
        self.scene.end(&mut self.renderer);
        self.renderer.shutdown()?;
        Ok(self.scene)
    }
}

impl<S: Scene> std::fmt::Debug for SceneRunner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneRunner")
            .field("sequencer", &self.sequencer)
            .field("frame_count", &self.renderer.frame_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::input::{InputEvent, KeyCode};
    use lumen_core::math::{Mat4, Vec3};
    use lumen_core::mesh::generators::generate_cube;
    use lumen_core::scene::Camera;
    use lumen_graphics::{
        AdapterInfo, AdapterType, DummyBackend, GpuDevice, Mesh, Pipeline, PipelineKind,
        RendererConfig, ShaderLoader, SurfaceTarget,
    };

    struct CubeScene {
        shaders: ShaderLoader,
        camera: Camera,
        pipeline: Option<Box<dyn Pipeline>>,
        cube: Option<Mesh>,
        ticks: u32,
        events_seen: usize,
        resized_to: Option<(u32, u32)>,
    }

    impl CubeScene {
        fn new(test: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("lumen_app_{test}_{}", std::process::id()));
            std::fs::create_dir_all(&dir).unwrap();
            for name in ["ForwardVertexShader", "ForwardPixelShader"] {
                std::fs::write(dir.join(format!("{name}.spv")), [0x03, 0x02, 0x23, 0x07]).unwrap();
            }
            Self {
                shaders: ShaderLoader::new(dir),
                camera: Camera::new(Vec3::new(0.0, 0.0, -5.0)),
                pipeline: None,
                cube: None,
                ticks: 0,
                events_seen: 0,
                resized_to: None,
            }
        }
    }

    impl Scene for CubeScene {
        fn begin(&mut self, ctx: &mut RendererContext) -> Result<(), GraphicsError> {
            self.pipeline = Some(PipelineKind::Forward.build(ctx.device(), &self.shaders)?);
            self.cube = ctx.upload_meshes(&[&generate_cube(1.0)])?.pop();
            Ok(())
        }

        fn tick(&mut self, _delta_seconds: f32, events: &[AppEvent]) {
            self.ticks += 1;
            self.events_seen += events.len();
        }

        fn draw(&mut self, ctx: &mut RendererContext) -> Result<(), GraphicsError> {
            if let Some(cube) = &self.cube {
                ctx.submit_mesh(cube, &Mat4::identity())?;
            }
            Ok(())
        }

        fn draw_ui(&mut self, ui: &mut UiText) {
            ui.line(format!("ticks: {}", self.ticks));
        }

        fn camera(&self) -> &Camera {
            &self.camera
        }

        fn pipeline(&self) -> Option<&dyn Pipeline> {
            self.pipeline.as_deref()
        }

        fn on_resize(
            &mut self,
            _ctx: &mut RendererContext,
            width: u32,
            height: u32,
        ) -> Result<(), GraphicsError> {
            self.resized_to = Some((width, height));
            Ok(())
        }
    }

    fn renderer() -> (Arc<DummyBackend>, RendererContext) {
        let backend = Arc::new(DummyBackend::new());
        let device = GpuDevice::new(
            AdapterInfo::new(0, "Test Adapter", AdapterType::Discrete, 1 << 30),
            backend.clone(),
        );
        let ctx = RendererContext::with_device(
            device,
            &SurfaceTarget::Headless,
            640,
            480,
            RendererConfig::default(),
        )
        .unwrap();
        (backend, ctx)
    }

    #[test]
    fn test_frames_draw_and_present() {
        let (backend, ctx) = renderer();
        let mut runner = SceneRunner::new(CubeScene::new("frames"), ctx).unwrap();
        let events = [AppEvent::Input(InputEvent::key(KeyCode::W, true, false))];

        for _ in 0..4 {
            let report = runner.frame(1.0 / 60.0, &events).unwrap();
            assert_eq!(report.draws, 1);
        }
        assert_eq!(runner.scene().ticks, 4);
        assert_eq!(runner.scene().events_seen, 4);
        assert_eq!(runner.renderer().frame_count(), 4);

        assert_eq!(backend.present_count(runner.renderer().swap_chain().id()), 4);

        runner.flush().unwrap();
        let swap_chain = runner.renderer().swap_chain();
        let draws: u64 = (0..swap_chain.back_buffer_count())
            .filter_map(|i| swap_chain.back_buffer(i))
            .map(|texture| backend.texture_draw_count(texture))
            .sum();
        assert_eq!(draws, 4);

        assert_eq!(runner.ui.lock().lines(), ["ticks: 4".to_string()]);
        let scene = runner.shutdown().unwrap();
        assert_eq!(scene.ticks, 4);
    }

    #[test]
    fn test_resize_ignores_zero_and_notifies_scene() {
        let (_backend, ctx) = renderer();
        let mut runner = SceneRunner::new(CubeScene::new("resize"), ctx).unwrap();
        runner.frame(0.016, &[]).unwrap();

        runner.resize(0, 720).unwrap();
        assert_eq!(runner.scene().resized_to, None);
        assert_eq!(runner.renderer().swap_chain().width(), 640);

        runner.resize(1280, 720).unwrap();
        assert_eq!(runner.scene().resized_to, Some((1280, 720)));
        assert_eq!(runner.renderer().swap_chain().width(), 1280);
        assert_eq!(runner.renderer().swap_chain().height(), 720);

        runner.frame(0.016, &[]).unwrap();
        runner.shutdown().unwrap();
    }
}
