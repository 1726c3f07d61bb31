//! Application error types.

use std::fmt;

use lumen_graphics::GraphicsError;

/// Why the application stopped abnormally.
#[derive(Debug)]
pub enum AppError {
    /// The platform event loop could not be created or failed.
    EventLoop(winit::error::EventLoopError),
    /// The window could not be created.
    Window(winit::error::OsError),
    /// The renderer failed; every renderer error ends the run.
    Graphics(GraphicsError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventLoop(e) => write!(f, "Event loop error: {e}"),
            Self::Window(e) => write!(f, "Window creation failed: {e}"),
            Self::Graphics(e) => write!(f, "Graphics error: {e}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::EventLoop(e) => Some(e),
            Self::Window(e) => Some(e),
            Self::Graphics(e) => Some(e),
        }
    }
}

impl From<winit::error::EventLoopError> for AppError {
    fn from(e: winit::error::EventLoopError) -> Self {
        Self::EventLoop(e)
    }
}

impl From<GraphicsError> for AppError {
    fn from(e: GraphicsError) -> Self {
        Self::Graphics(e)
    }
}
