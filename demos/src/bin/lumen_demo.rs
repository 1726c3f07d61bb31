//! # Lumen Demo
//!
//! Demonstrates:
//! - Forward rendering of a cube and a grid of probe spheres
//! - Triple-buffered frame submission guarded by a fence per back buffer
//! - A ray tracing dispatch against the scene TLAS every gather interval
//! - Fly camera: WASD/QE to move, arrows or right mouse drag to look
//!
//! Press Escape to quit.

use std::process::ExitCode;

use lumen_app::{App, AppArgs, DefaultAppArgs};
use lumen_graphics::ShaderLoader;
use lumen_demos::DemoScene;

fn main() -> ExitCode {
    let args = DefaultAppArgs::parse();
    let scene = DemoScene::new(ShaderLoader::new(args.shader_dir()));

    match App::run(scene, args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("lumen-demo failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
