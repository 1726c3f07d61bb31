//! Scene trait driven by the application loop.

use lumen_core::scene::Camera;
use lumen_graphics::{GraphicsError, Pipeline, RayTracingPass, RendererContext};

use crate::events::AppEvent;
use crate::overlay::UiText;

/// A renderable scene.
///
/// # Lifecycle
///
/// 1. `begin` - once, after the renderer exists; create GPU resources here
/// 2. `tick` - every frame, with the events gathered since the last one
/// 3. `draw` - every frame, between the frame's setup and its ray dispatch
/// 4. `draw_ui` - every frame, after `draw`
/// 5. `end` - once, before the renderer shuts down
pub trait Scene {
    fn begin(&mut self, ctx: &mut RendererContext) -> Result<(), GraphicsError>;

    fn tick(&mut self, delta_seconds: f32, events: &[AppEvent]);

    /// Record the scene's draws; the render targets, pipeline and per-frame
    /// constants are already bound.
    fn draw(&mut self, ctx: &mut RendererContext) -> Result<(), GraphicsError>;

    fn draw_ui(&mut self, _ui: &mut UiText) {}

    fn camera(&self) -> &Camera;

    /// Pipeline the frame binds before `draw`; `None` until `begin` has
    /// created it.
    fn pipeline(&self) -> Option<&dyn Pipeline>;

    /// Pass dispatched whenever the gather interval elapses.
    fn ray_tracing(&mut self) -> Option<&mut RayTracingPass> {
        None
    }

    /// Called after the swap chain has been resized.
    fn on_resize(
        &mut self,
        _ctx: &mut RendererContext,
        _width: u32,
        _height: u32,
    ) -> Result<(), GraphicsError> {
        Ok(())
    }

    fn end(&mut self, _ctx: &mut RendererContext) {}
}
