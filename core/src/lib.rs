//! # Lumen Core
//!
//! Math, CPU mesh data and scene types shared by the Lumen renderer and its
//! demos. Nothing in this crate talks to the GPU.

pub mod input;
pub mod math;
pub mod mesh;
pub mod scene;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the core crate version.
pub fn init() {
    log::info!("Lumen Core v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
