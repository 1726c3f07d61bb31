//! Main application struct and event loop.

use std::time::Instant;

use winit::application::ApplicationHandler;
use winit::event::WindowEvent as WinitWindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::window::{Fullscreen, Window, WindowId};

use lumen_core::input::KeyCode;
use lumen_graphics::{GraphicsError, RendererContext, SurfaceTarget};

use crate::args::{AppArgs, WindowMode};
use crate::error::AppError;
use crate::events::{AppEvent, EventQueue, WindowEvent, WindowStateTracker};
use crate::input::{self, CursorTracker};
use crate::runner::SceneRunner;
use crate::scene::Scene;

/// Delta time the headless loop advances per frame.
const HEADLESS_DELTA: f32 = 1.0 / 60.0;

/// Main application struct that manages the window and the renderer.
///
/// # Example
///
/// ```ignore
/// use lumen_app::{App, AppArgs, DefaultAppArgs};
///
/// fn main() -> Result<(), lumen_app::AppError> {
///     App::run(MyScene::new(), DefaultAppArgs::parse())
/// }
/// ```
pub struct App<S, A>
where
    S: Scene,
    A: AppArgs,
{
    args: A,
    /// Scene waiting for the window; moves into `runner` on resume.
    pending_scene: Option<S>,
    // Declared before `window` so the swap chain goes first.
    runner: Option<SceneRunner<S>>,
    window: Option<Window>,
    events: EventQueue,
    cursor: CursorTracker,
    window_state: WindowStateTracker,
    last_frame_time: Instant,
    frame_number: u64,
    running: bool,
    error: Option<AppError>,
}

impl<S, A> App<S, A>
where
    S: Scene + 'static,
    A: AppArgs + 'static,
{
    pub fn new(scene: S, args: A) -> Self {
        Self {
            args,
            pending_scene: Some(scene),
            runner: None,
            window: None,
            events: EventQueue::new(),
            cursor: CursorTracker::default(),
            window_state: WindowStateTracker::default(),
            last_frame_time: Instant::now(),
            frame_number: 0,
            running: true,
            error: None,
        }
    }

    /// Run `scene` in a window until it closes or a frame fails.
    pub fn run(scene: S, args: A) -> Result<(), AppError> {
        init_logging();

        let event_loop = EventLoop::new()?;
        let mut app = Self::new(scene, args);
        event_loop.run_app(&mut app)?;

        match app.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Render `frames` frames without a window and hand the scene back.
    pub fn run_headless(scene: S, args: &A, frames: u64) -> Result<S, AppError> {
        let renderer = RendererContext::init(
            &args.instance_parameters(),
            &SurfaceTarget::Headless,
            args.window_width(),
            args.window_height(),
            args.renderer_config(),
        )?;
        let mut runner = SceneRunner::new(scene, renderer)?;
        for _ in 0..frames {
            runner.frame(HEADLESS_DELTA, &[])?;
        }
        Ok(runner.shutdown()?)
    }

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<Window, AppError> {
        let mut attributes = Window::default_attributes()
            .with_title(self.args.window_title())
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.args.window_width(),
                self.args.window_height(),
            ));
        if self.args.window_mode() == WindowMode::Borderless {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        event_loop.create_window(attributes).map_err(AppError::Window)
    }

    /// Create the renderer for the window and begin the scene.
    fn init_renderer(&mut self, window: &Window) -> Result<(), AppError> {
        let Some(scene) = self.pending_scene.take() else {
            return Ok(());
        };

        let size = window.inner_size();
        let (width, height) = if size.width == 0 || size.height == 0 {
            (self.args.window_width(), self.args.window_height())
        } else {
            (size.width, size.height)
        };

        let target = SurfaceTarget::from_window(window)?;
        let renderer = RendererContext::init(
            &self.args.instance_parameters(),
            &target,
            width,
            height,
            self.args.renderer_config(),
        )?;
        self.runner = Some(SceneRunner::new(scene, renderer)?);
        log::info!("Renderer ready at {}x{}", width, height);
        Ok(())
    }

    fn render_frame(&mut self) -> Result<(), GraphicsError> {
        let now = Instant::now();
        let delta_seconds = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        let Some(runner) = self.runner.as_mut() else {
            return Ok(());
        };
        let events = self.events.drain();
        runner.frame(delta_seconds, &events)?;
        self.frame_number += 1;

        if let Some(max_frames) = self.args.max_frames()
            && self.frame_number >= max_frames
        {
            log::info!("Reached max frames limit ({}), exiting", max_frames);
            self.running = false;
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), GraphicsError> {
        match self.runner.as_mut() {
            Some(runner) => runner.resize(width, height),
            None => Ok(()),
        }
    }

    /// Record `error` and leave the loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: AppError) {
        match &error {
            AppError::Graphics(e) if e.is_device_lost() => log::error!("GPU device lost: {}", e),
            e => log::error!("{}", e),
        }
        self.error.get_or_insert(error);
        self.running = false;
        self.shutdown();
        event_loop.exit();
    }

    /// Flush and release the renderer before the window goes away.
    fn shutdown(&mut self) {
        if let Some(runner) = self.runner.take() {
            match runner.shutdown() {
                Ok(_) => log::info!("Shut down after {} frames", self.frame_number),
                Err(e) => {
                    log::error!("Shutdown failed: {}", e);
                    self.error.get_or_insert(e.into());
                }
            }
        }
    }

    fn close(&mut self, event_loop: &ActiveEventLoop) {
        log::info!("Close requested");
        self.events.push(WindowEvent::Closed);
        self.running = false;
        self.shutdown();
        event_loop.exit();
    }

    fn push_state_changes(&mut self) {
        let Some(window) = &self.window else {
            return;
        };
        let changes = self.window_state.observe(
            window.is_maximized(),
            window.is_minimized().unwrap_or(false),
            window.fullscreen().is_some(),
        );
        for change in changes {
            self.events.push(change);
        }
    }
}

impl<S, A> ApplicationHandler for App<S, A>
where
    S: Scene + 'static,
    A: AppArgs + 'static,
{
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window = match self.create_window(event_loop) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, e),
        };
        log::info!("Window created");

        if let Err(e) = self.init_renderer(&window) {
            self.window = Some(window);
            return self.fail(event_loop, e);
        }
        self.window = Some(window);
        self.push_state_changes();
        self.last_frame_time = Instant::now();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: WindowId,
        event: WinitWindowEvent,
    ) {
        match event {
            WinitWindowEvent::CloseRequested => self.close(event_loop),

            WinitWindowEvent::Destroyed => self.events.push(WindowEvent::Destroyed),

            WinitWindowEvent::Moved(position) => self.events.push(WindowEvent::Moved {
                x: position.x,
                y: position.y,
            }),

            WinitWindowEvent::Focused(focused) => {
                self.events.push(if focused {
                    WindowEvent::FocusReceived
                } else {
                    WindowEvent::FocusLost
                });
            }

            WinitWindowEvent::Resized(size) => {
                self.events.push(WindowEvent::Resized {
                    width: size.width,
                    height: size.height,
                });
                self.push_state_changes();
                if let Err(e) = self.resize(size.width, size.height) {
                    self.fail(event_loop, e.into());
                }
            }

            WinitWindowEvent::KeyboardInput { event, .. } => {
                let Some(input) = input::key_event(event.physical_key, event.state, event.repeat)
                else {
                    return;
                };
                if input.is_first_press_of(KeyCode::Escape) {
                    self.close(event_loop);
                    return;
                }
                self.events.push(input);
            }

            WinitWindowEvent::CursorMoved { position, .. } => {
                for motion in self.cursor.moved(position.x, position.y) {
                    self.events.push(motion);
                }
            }

            WinitWindowEvent::CursorLeft { .. } => self.cursor.reset(),

            WinitWindowEvent::MouseInput { state, button, .. } => {
                if let Some(input) = input::button_event(button, state) {
                    self.events.push(input);
                }
            }

            WinitWindowEvent::MouseWheel { delta, .. } => {
                self.events.push(AppEvent::Input(input::wheel_event(delta)));
            }

            WinitWindowEvent::RedrawRequested => {
                if self.running
                    && let Err(e) = self.render_frame()
                {
                    return self.fail(event_loop, e.into());
                }
                if !self.running {
                    self.shutdown();
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.running
            && let Some(window) = &self.window
        {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

/// Initialize `env_logger` with an `info` default filter.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
    lumen_core::init();
    lumen_graphics::init();
    crate::init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::DefaultAppArgs;
    use crate::overlay::UiText;
    use lumen_core::math::Vec3;
    use lumen_core::scene::Camera;
    use lumen_graphics::{BackendType, Pipeline, PipelineKind, ShaderLoader};

    struct ClearScene {
        camera: Camera,
        pipeline: Option<Box<dyn Pipeline>>,
        shaders: ShaderLoader,
        frames: u32,
    }

    impl Scene for ClearScene {
        fn begin(&mut self, ctx: &mut RendererContext) -> Result<(), GraphicsError> {
            self.pipeline = Some(PipelineKind::Forward.build(ctx.device(), &self.shaders)?);
            Ok(())
        }

        fn tick(&mut self, _delta_seconds: f32, _events: &[AppEvent]) {}

        fn draw(&mut self, _ctx: &mut RendererContext) -> Result<(), GraphicsError> {
            self.frames += 1;
            Ok(())
        }

        fn draw_ui(&mut self, ui: &mut UiText) {
            ui.line("clear only");
        }

        fn camera(&self) -> &Camera {
            &self.camera
        }

        fn pipeline(&self) -> Option<&dyn Pipeline> {
            self.pipeline.as_deref()
        }
    }

    #[test]
    fn test_run_headless_on_dummy() {
        let dir = std::env::temp_dir().join(format!("lumen_app_headless_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["ForwardVertexShader", "ForwardPixelShader"] {
            std::fs::write(dir.join(format!("{name}.spv")), [0x03, 0x02, 0x23, 0x07]).unwrap();
        }
        let scene = ClearScene {
            camera: Camera::new(Vec3::new(0.0, 0.0, -3.0)),
            pipeline: None,
            shaders: ShaderLoader::new(dir),
            frames: 0,
        };
        let args = DefaultAppArgs::default()
            .with_backend(BackendType::Dummy)
            .with_size(320, 200);

        let scene = App::<ClearScene, DefaultAppArgs>::run_headless(scene, &args, 5).unwrap();
        assert_eq!(scene.frames, 5);
    }

    #[test]
    fn test_run_headless_reports_pipeline_failure() {
        let scene = ClearScene {
            camera: Camera::default(),
            pipeline: None,
            shaders: ShaderLoader::new(std::env::temp_dir().join("lumen_app_no_such_shaders")),
            frames: 0,
        };
        let args = DefaultAppArgs::default().with_backend(BackendType::Dummy);
        let result = App::<ClearScene, DefaultAppArgs>::run_headless(scene, &args, 1);
        assert!(matches!(result, Err(AppError::Graphics(_))));
    }
}
