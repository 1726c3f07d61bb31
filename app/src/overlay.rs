//! Text overlay that reports through the log instead of drawing widgets.

use std::sync::Arc;

use parking_lot::Mutex;

use lumen_graphics::{GraphicsError, Overlay, RendererContext};

/// Lines a scene contributes to the overlay during one frame.
#[derive(Debug, Default, Clone)]
pub struct UiText {
    lines: Vec<String>,
}

impl UiText {
    pub fn line(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Overlay that logs the frame's UI text every `log_every` frames.
pub struct LoggingOverlay {
    text: Arc<Mutex<UiText>>,
    log_every: u64,
    frames: u64,
}

impl LoggingOverlay {
    pub const DEFAULT_LOG_EVERY: u64 = 300;

    pub fn new(log_every: u64) -> Self {
        Self {
            text: Arc::new(Mutex::new(UiText::default())),
            log_every: log_every.max(1),
            frames: 0,
        }
    }

    /// Handle the app writes scene UI into between the overlay hooks.
    pub fn text(&self) -> Arc<Mutex<UiText>> {
        Arc::clone(&self.text)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Default for LoggingOverlay {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LOG_EVERY)
    }
}

impl Overlay for LoggingOverlay {
    fn begin_overlay(&mut self) {
        self.text.lock().clear();
    }

    fn end_overlay(&mut self, ctx: &mut RendererContext) -> Result<(), GraphicsError> {
        self.frames += 1;
        if self.frames % self.log_every != 0 {
            return Ok(());
        }
        log::info!(
            "frame {}: {} draws, {}x{}",
            ctx.frame_count(),
            ctx.constants().draw_count(),
            ctx.swap_chain().width(),
            ctx.swap_chain().height()
        );
        for line in self.text.lock().lines() {
            log::info!("  {line}");
        }
        Ok(())
    }
}

impl std::fmt::Debug for LoggingOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingOverlay")
            .field("log_every", &self.log_every)
            .field("frames", &self.frames)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_graphics::{BackendType, InstanceParameters, RendererConfig, SurfaceTarget};

    #[test]
    fn test_text_cleared_each_frame() {
        let mut ctx = RendererContext::init(
            &InstanceParameters::new().with_backend(BackendType::Dummy),
            &SurfaceTarget::Headless,
            320,
            240,
            RendererConfig::default(),
        )
        .unwrap();

        let overlay = LoggingOverlay::new(1);
        let text = overlay.text();
        text.lock().line("stale");

        let mut overlay: Box<dyn Overlay> = Box::new(overlay);
        ctx.start_frame().unwrap();
        overlay.begin_overlay();
        assert!(text.lock().lines().is_empty());
        text.lock().line("fps: 60");
        overlay.end_overlay(&mut ctx).unwrap();
        ctx.end_frame().unwrap();
        ctx.present().unwrap();
        assert_eq!(text.lock().lines(), ["fps: 60".to_string()]);

        ctx.shutdown().unwrap();
    }
}
