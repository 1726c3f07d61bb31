//! Command line arguments trait and default implementation.
//!
//! Uses clap for CLI parsing with help text (`--help`), validation and
//! clear error messages.

use std::path::{Path, PathBuf};

use lumen_graphics::{BackendType, InstanceParameters, RendererConfig};

/// Window mode enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowMode {
    /// Windowed mode with decorations.
    #[default]
    Windowed,
    /// Borderless fullscreen.
    Borderless,
}

/// Trait for parsing command line arguments.
///
/// Every method but `parse` has a default, so an implementation only
/// overrides the options it cares about.
///
/// # Example
///
/// ```ignore
/// use lumen_app::AppArgs;
///
/// struct BenchArgs;
///
/// impl AppArgs for BenchArgs {
///     fn parse() -> Self {
///         Self
///     }
///
///     fn vsync(&self) -> bool {
///         false
///     }
/// }
/// ```
pub trait AppArgs: Sized {
    /// Parse command line arguments.
    fn parse() -> Self;

    /// Default: `BackendType::Auto`
    fn backend(&self) -> BackendType {
        BackendType::Auto
    }

    fn window_mode(&self) -> WindowMode {
        WindowMode::Windowed
    }

    /// Default: 1920
    fn window_width(&self) -> u32 {
        1920
    }

    /// Default: 1080
    fn window_height(&self) -> u32 {
        1080
    }

    fn window_title(&self) -> &str {
        "Lumen"
    }

    fn vsync(&self) -> bool {
        true
    }

    /// Default: 3
    fn back_buffer_count(&self) -> u32 {
        3
    }

    /// Seconds between two ray tracing dispatches. Default: 0.1
    fn gather_interval(&self) -> f32 {
        0.1
    }

    /// Directory holding the compiled shader blobs.
    fn shader_dir(&self) -> &Path {
        Path::new("shaders")
    }

    /// Exit after this many frames; `None` runs until the window closes.
    fn max_frames(&self) -> Option<u64> {
        None
    }

    /// Default: `cfg!(debug_assertions)` (enabled in debug builds)
    fn validation(&self) -> bool {
        cfg!(debug_assertions)
    }

    fn instance_parameters(&self) -> InstanceParameters {
        InstanceParameters::new()
            .with_backend(self.backend())
            .with_validation(self.validation())
            .with_app_name(self.window_title())
    }

    fn renderer_config(&self) -> RendererConfig {
        RendererConfig::default()
            .with_vsync(self.vsync())
            .with_back_buffer_count(self.back_buffer_count())
            .with_gather_interval(self.gather_interval())
    }
}

/// Graphics backend selection for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliBackend {
    /// Vulkan when compiled in and a device opens, else the simulated GPU.
    #[default]
    Auto,
    /// Native Vulkan backend via ash.
    Vulkan,
    /// Simulated GPU for testing and CI environments.
    Dummy,
}

impl From<CliBackend> for BackendType {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Auto => BackendType::Auto,
            CliBackend::Vulkan => BackendType::Vulkan,
            CliBackend::Dummy => BackendType::Dummy,
        }
    }
}

/// Default command line arguments implementation.
///
/// # Examples
///
/// ```bash
/// # Show help
/// ./lumen-demo --help
///
/// # Uncapped frame rate on the native Vulkan backend
/// ./lumen-demo --backend vulkan --no-vsync
///
/// # Render 100 frames on the simulated GPU then exit
/// ./lumen-demo --backend dummy --max-frames 100
/// ```
#[derive(Debug, Clone)]
pub struct DefaultAppArgs {
    backend: BackendType,
    window_mode: WindowMode,
    width: u32,
    height: u32,
    title: String,
    vsync: bool,
    back_buffers: u32,
    gather_interval: f32,
    shader_dir: PathBuf,
    max_frames: Option<u64>,
    validation: bool,
}

impl Default for DefaultAppArgs {
    fn default() -> Self {
        Self {
            backend: BackendType::Auto,
            window_mode: WindowMode::Windowed,
            width: 1920,
            height: 1080,
            title: "Lumen".to_string(),
            vsync: true,
            back_buffers: 3,
            gather_interval: 0.1,
            shader_dir: PathBuf::from("shaders"),
            max_frames: None,
            validation: cfg!(debug_assertions),
        }
    }
}

impl DefaultAppArgs {
    /// Create new default args with a custom title.
    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_frames(mut self, max_frames: u64) -> Self {
        self.max_frames = Some(max_frames);
        self
    }

    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    /// Parse from an explicit argument list instead of the process args.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        use clap::Parser;
        cli::ClapArgs::try_parse_from(args).map(Into::into)
    }
}

mod cli {
    use super::*;
    use clap::Parser;

    /// Lumen application arguments.
    #[derive(Parser, Debug)]
    #[command(
        name = "lumen",
        about = "Lumen real-time renderer",
        long_about = "A real-time renderer with a ray traced gather pass.\n\n\
            BACKEND SELECTION:\n\
            \n\
            • vulkan: Native Vulkan via ash. Needs hardware ray tracing for the gather pass.\n\
            \n\
            • dummy: Simulated GPU for testing without a device.\n\
            \n\
            • auto (default): vulkan when available, otherwise dummy.\n\
            \n\
            EXAMPLES:\n\
              # Run headless smoke test\n\
              ./lumen-demo --backend dummy --max-frames 10",
        version
    )]
    pub(super) struct ClapArgs {
        /// Graphics backend to use.
        #[arg(long, default_value = "auto", value_enum)]
        pub backend: CliBackend,

        /// Run in borderless fullscreen mode.
        #[arg(long)]
        pub fullscreen: bool,

        /// Initial window width in pixels.
        #[arg(long, default_value = "1920")]
        pub width: u32,

        /// Initial window height in pixels.
        #[arg(long, default_value = "1080")]
        pub height: u32,

        /// Disable vertical sync (may cause tearing).
        #[arg(long)]
        pub no_vsync: bool,

        /// Number of swap chain back buffers.
        #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(2..=16))]
        pub back_buffers: u32,

        /// Seconds between two ray traced gather dispatches.
        #[arg(long, default_value = "0.1")]
        pub gather_interval: f32,

        /// Directory holding the compiled shader blobs.
        #[arg(long, default_value = "shaders")]
        pub shader_dir: PathBuf,

        /// Exit after rendering N frames (useful for testing).
        #[arg(long)]
        pub max_frames: Option<u64>,

        /// Enable GPU validation layers (slower but helps catch bugs).
        #[arg(long, conflicts_with = "no_validation")]
        pub validation: bool,

        /// Disable GPU validation layers.
        #[arg(long, conflicts_with = "validation")]
        pub no_validation: bool,
    }

    impl From<ClapArgs> for DefaultAppArgs {
        fn from(args: ClapArgs) -> Self {
            // --validation forces on, --no-validation forces off, otherwise debug default
            let validation = args.validation || (!args.no_validation && cfg!(debug_assertions));

            Self {
                backend: args.backend.into(),
                window_mode: if args.fullscreen {
                    WindowMode::Borderless
                } else {
                    WindowMode::Windowed
                },
                width: args.width,
                height: args.height,
                title: "Lumen".to_string(),
                vsync: !args.no_vsync,
                back_buffers: args.back_buffers,
                gather_interval: args.gather_interval.max(0.0),
                shader_dir: args.shader_dir,
                max_frames: args.max_frames,
                validation,
            }
        }
    }
}

impl AppArgs for DefaultAppArgs {
    fn parse() -> Self {
        use clap::Parser;
        cli::ClapArgs::parse().into()
    }

    fn backend(&self) -> BackendType {
        self.backend
    }

    fn window_mode(&self) -> WindowMode {
        self.window_mode
    }

    fn window_width(&self) -> u32 {
        self.width
    }

    fn window_height(&self) -> u32 {
        self.height
    }

    fn window_title(&self) -> &str {
        &self.title
    }

    fn vsync(&self) -> bool {
        self.vsync
    }

    fn back_buffer_count(&self) -> u32 {
        self.back_buffers
    }

    fn gather_interval(&self) -> f32 {
        self.gather_interval
    }

    fn shader_dir(&self) -> &Path {
        &self.shader_dir
    }

    fn max_frames(&self) -> Option<u64> {
        self.max_frames
    }

    fn validation(&self) -> bool {
        self.validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = DefaultAppArgs::try_parse_from(["lumen"]).unwrap();
        assert_eq!(args.window_width(), 1920);
        assert_eq!(args.window_height(), 1080);
        assert!(args.vsync());
        assert_eq!(args.backend(), BackendType::Auto);
        assert_eq!(args.window_mode(), WindowMode::Windowed);

        let config = args.renderer_config();
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn test_flags() {
        let args = DefaultAppArgs::try_parse_from([
            "lumen",
            "--no-vsync",
            "--backend",
            "dummy",
            "--back-buffers",
            "2",
            "--max-frames",
            "10",
            "--fullscreen",
        ])
        .unwrap();
        assert!(!args.vsync());
        assert_eq!(args.backend(), BackendType::Dummy);
        assert_eq!(args.max_frames(), Some(10));
        assert_eq!(args.window_mode(), WindowMode::Borderless);
        assert_eq!(args.renderer_config().back_buffer_count, 2);
        assert!(!args.renderer_config().vsync);
    }

    #[test]
    fn test_validation_flags_conflict() {
        let conflicting = ["lumen", "--validation", "--no-validation"];
        assert!(DefaultAppArgs::try_parse_from(conflicting).is_err());
        let args = DefaultAppArgs::try_parse_from(["lumen", "--no-validation"]).unwrap();
        assert!(!args.validation());
    }

    #[test]
    fn test_back_buffer_range() {
        assert!(DefaultAppArgs::try_parse_from(["lumen", "--back-buffers", "1"]).is_err());
    }
}
