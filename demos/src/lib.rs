//! # Lumen Demos
//!
//! The demo scene for the Lumen renderer.
//!
//! ## Available Demos
//!
//! - `lumen-demo` - A spinning cube inside a probe volume, with the ray
//!   traced gather pass when the device supports it

pub mod camera;
pub mod scene;

pub use camera::FlyCamera;
pub use scene::{DemoScene, ProbeSettings};

/// Demos library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
