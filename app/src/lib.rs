//! # Lumen App
//!
//! Window shell for Lumen scenes.
//!
//! ## Overview
//!
//! - [`Scene`] - Trait a renderable scene implements
//! - [`AppArgs`] - Trait for parsing command line arguments
//! - [`App`] - Owns the window, translates events and drives the frame loop
//! - [`SceneRunner`] - The frame loop itself, usable without a window
//!
//! ## Example
//!
//! ```ignore
//! use lumen_app::{App, AppArgs, DefaultAppArgs};
//!
//! fn main() -> Result<(), lumen_app::AppError> {
//!     App::run(MyScene::new(), DefaultAppArgs::parse())
//! }
//! ```

mod app;
mod args;
mod error;
mod events;
pub mod input;
mod overlay;
mod runner;
mod scene;

pub use app::{App, init_logging};
pub use args::{AppArgs, CliBackend, DefaultAppArgs, WindowMode};
pub use error::AppError;
pub use events::{AppEvent, EventQueue, WindowEvent, WindowStateTracker};
pub use overlay::{LoggingOverlay, UiText};
pub use runner::SceneRunner;
pub use scene::Scene;

/// App library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the app crate version.
pub fn init() {
    log::info!("Lumen App v{} initialized", VERSION);
}
