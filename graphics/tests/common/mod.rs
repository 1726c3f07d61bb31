//! Common utilities for renderer integration tests.
//!
//! Every test runs once per backend through `rstest` cases; a backend that
//! is not compiled in or cannot open a device makes [`TestContext::new`]
//! return `None` and the test is skipped.

use std::path::PathBuf;

use lumen_graphics::{
    BackendType, GraphicsError, InstanceParameters, Pipeline, PipelineKind, RendererConfig,
    RendererContext, ShaderLoader, SurfaceTarget,
};

/// Width of the end-to-end test swap chain.
pub const WIDTH: u32 = 1920;
/// Height of the end-to-end test swap chain.
pub const HEIGHT: u32 = 1080;

/// Environment variable naming a directory of compiled shaders.
pub const SHADER_DIR_VAR: &str = "LUMEN_SHADER_DIR";

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available GPU backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Simulated GPU.
    Dummy,
    /// Vulkan backend (native via ash).
    Vulkan,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Dummy => true,
            #[cfg(feature = "vulkan-backend")]
            Backend::Vulkan => true,
            #[cfg(not(feature = "vulkan-backend"))]
            Backend::Vulkan => false,
        }
    }

    pub fn to_instance_parameters(self) -> InstanceParameters {
        let backend = match self {
            Backend::Dummy => BackendType::Dummy,
            Backend::Vulkan => BackendType::Vulkan,
        };
        InstanceParameters::new()
            .with_backend(backend)
            .with_app_name("lumen-tests")
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// A headless renderer on one backend.
pub struct TestContext {
    #[allow(dead_code)]
    pub backend: Backend,
    pub renderer: RendererContext,
}

impl TestContext {
    /// Create a 1920x1080 headless renderer for the given backend.
    ///
    /// Returns `None` if the backend is not available.
    pub fn new(backend: Backend) -> Option<Self> {
        Self::with_size(backend, WIDTH, HEIGHT)
    }

    pub fn with_size(backend: Backend, width: u32, height: u32) -> Option<Self> {
        if !backend.is_available() {
            return None;
        }
        let _ = env_logger::builder().is_test(true).try_init();

        let renderer = match RendererContext::init(
            &backend.to_instance_parameters(),
            &SurfaceTarget::Headless,
            width,
            height,
            RendererConfig::default(),
        ) {
            Ok(renderer) => renderer,
            Err(e) => {
                eprintln!("Backend {backend:?} failed to initialize: {e}");
                return None;
            }
        };
        Some(Self { backend, renderer })
    }

    /// Shader directory for this backend.
    ///
    /// The dummy backend accepts any non-empty blob, so it gets generated
    /// placeholders. Real backends need compiled shaders from
    /// [`SHADER_DIR_VAR`]; without it this returns `None`.
    #[allow(dead_code)]
    pub fn shaders(&self, test: &str) -> Option<ShaderLoader> {
        match self.backend {
            Backend::Dummy => Some(placeholder_shaders(test)),
            Backend::Vulkan => std::env::var_os(SHADER_DIR_VAR).map(ShaderLoader::new),
        }
    }

    /// The forward pipeline, or `None` when no shaders are available.
    #[allow(dead_code)]
    pub fn forward_pipeline(&self, test: &str) -> Option<Box<dyn Pipeline>> {
        let shaders = self.shaders(test)?;
        match PipelineKind::Forward.build(self.renderer.device(), &shaders) {
            Ok(pipeline) => Some(pipeline),
            Err(e) => {
                eprintln!("Forward pipeline unavailable on {:?}: {e}", self.backend);
                None
            }
        }
    }

    /// Record and present a frame that only clears its targets.
    #[allow(dead_code)]
    pub fn clear_frame(&mut self) -> Result<u32, GraphicsError> {
        let index = self.renderer.start_frame()?;
        self.renderer.set_render_targets()?;
        self.renderer.clear_render_targets()?;
        self.renderer.end_frame()?;
        self.renderer.present()?;
        Ok(index)
    }
}

/// Write a placeholder blob for every built-in shader into a fresh directory.
pub fn placeholder_shaders(test: &str) -> ShaderLoader {
    let dir: PathBuf =
        std::env::temp_dir().join(format!("lumen_it_{test}_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    for name in [
        "ForwardVertexShader",
        "ForwardPixelShader",
        "ScreenVertexShader",
        "ScreenPixelShader",
        "RayTracingLibrary",
    ] {
        std::fs::write(dir.join(format!("{name}.spv")), [0x03, 0x02, 0x23, 0x07]).unwrap();
    }
    ShaderLoader::new(dir)
}
