//! Pipeline state objects.
//!
//! A [`Pipeline`] owns a compiled pipeline plus everything needed to create
//! it; [`PipelineKind`] is the factory the renderer and scenes pick
//! pipelines from:
//!
//! | kind | shaders | root signature |
//! |------|---------|----------------|
//! | [`Forward`](PipelineKind::Forward) | `ForwardVertexShader`, `ForwardPixelShader` | per-frame CBV `b0`, per-object CBV `b1` |
//! | [`ScreenPass`](PipelineKind::ScreenPass) | `ScreenVertexShader`, `ScreenPixelShader` | SRV table `t0`, static linear-wrap sampler `s0` |
//! | [`RayTracing`](PipelineKind::RayTracing) | `RayTracingLibrary` | table of TLAS `t0` + output `u0`, per-frame CBV `b0` |

mod graphics;
mod ray_tracing;
pub mod root_signature;
pub mod shader;

use std::sync::Arc;

use lumen_core::mesh::{PrimitiveTopology, Vertex};

use crate::backend::{GpuBackend, PipelineId};
use crate::command::CommandList;
use crate::device::GpuDevice;
use crate::error::GraphicsError;
use crate::types::TextureFormat;

pub use graphics::{ForwardPipeline, ScreenPassPipeline};
pub use ray_tracing::RayTracingPipeline;
pub use root_signature::{
    DescriptorRange, DescriptorRangeType, RootParameter, RootSignatureBuilder, RootSignatureDesc,
    RootSignatureFlags, ShaderVisibility, StaticSampler,
};
pub use shader::{ShaderBinary, ShaderLoader, ShaderStage};

/// Format of one vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn size(&self) -> u32 {
        match self {
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
        }
    }
}

/// One per-vertex attribute of the input layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputElement {
    pub semantic: &'static str,
    pub format: VertexFormat,
    pub offset: u32,
}

/// Input layout matching [`Vertex`]: position, uv, normal.
pub fn mesh_input_layout() -> Vec<InputElement> {
    vec![
        InputElement {
            semantic: "POSITION",
            format: VertexFormat::Float32x3,
            offset: 0,
        },
        InputElement {
            semantic: "UV",
            format: VertexFormat::Float32x2,
            offset: 12,
        },
        InputElement {
            semantic: "NORMAL",
            format: VertexFormat::Float32x3,
            offset: 20,
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Rasterizer and depth state. The default is solid fill, back-face
/// culling, clockwise front faces, depth test `Less` with writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_test: bool,
    pub depth_write: bool,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            front_counter_clockwise: false,
            depth_test: true,
            depth_write: true,
        }
    }
}

/// Everything needed to create a graphics pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineDesc {
    pub label: String,
    pub root_signature: RootSignatureDesc,
    pub vertex: ShaderBinary,
    pub pixel: ShaderBinary,
    pub input_layout: Vec<InputElement>,
    pub vertex_stride: u32,
    pub topology: PrimitiveTopology,
    pub color_format: TextureFormat,
    pub depth_format: Option<TextureFormat>,
    pub raster: RasterState,
    pub sample_mask: u32,
}

impl GraphicsPipelineDesc {
    /// Triangle-list pipeline over [`Vertex`] data rendering to RGBA8 with a D32 depth buffer.
    pub fn mesh(
        label: &str,
        root_signature: RootSignatureDesc,
        vertex: ShaderBinary,
        pixel: ShaderBinary,
    ) -> Self {
        Self {
            label: label.to_string(),
            root_signature,
            vertex,
            pixel,
            input_layout: mesh_input_layout(),
            vertex_stride: Vertex::STRIDE,
            topology: PrimitiveTopology::TriangleList,
            color_format: TextureFormat::Rgba8Unorm,
            depth_format: Some(TextureFormat::Depth32Float),
            raster: RasterState::default(),
            sample_mask: 0xFFFF_FFFF,
        }
    }

    /// Check the layout fits the stride and the stages match.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        if self.vertex.stage != ShaderStage::Vertex || self.pixel.stage != ShaderStage::Pixel {
            return Err(GraphicsError::InvalidParameter(format!(
                "pipeline '{}' has mismatched shader stages",
                self.label
            )));
        }
        if let Some(element) = self
            .input_layout
            .iter()
            .find(|e| e.offset + e.format.size() > self.vertex_stride)
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "input element {} at offset {} exceeds vertex stride {}",
                element.semantic, element.offset, self.vertex_stride
            )));
        }
        Ok(())
    }
}

/// A triangle hit group and the library exports it combines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HitGroupDesc {
    pub name: String,
    pub closest_hit: Option<String>,
    pub any_hit: Option<String>,
}

/// Everything needed to create a ray tracing pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RayTracingPipelineDesc {
    pub label: String,
    pub library: ShaderBinary,
    pub ray_generation: String,
    pub miss: Vec<String>,
    pub hit_groups: Vec<HitGroupDesc>,
    pub global_root_signature: RootSignatureDesc,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
}

impl RayTracingPipelineDesc {
    /// Names shader identifiers can be looked up by, in group order.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.ray_generation.as_str())
            .chain(self.miss.iter().map(String::as_str))
            .chain(self.hit_groups.iter().map(|g| g.name.as_str()))
    }
}

/// A pipeline the frame sequencer can bind.
pub trait Pipeline: Send + Sync {
    fn name(&self) -> &str;

    /// Load shaders and create the pipeline object.
    fn init(&mut self, device: &GpuDevice, shaders: &ShaderLoader) -> Result<(), GraphicsError>;

    /// Record the commands that make this pipeline current.
    fn bind(&self, list: &mut CommandList) -> Result<(), GraphicsError>;

    /// Backend pipeline, once initialized.
    fn id(&self) -> Option<PipelineId>;
}

/// Pipelines the renderer knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Forward,
    ScreenPass,
    RayTracing,
}

impl PipelineKind {
    /// Construct an uninitialized pipeline of this kind.
    pub fn create(self) -> Box<dyn Pipeline> {
        match self {
            Self::Forward => Box::new(ForwardPipeline::new()),
            Self::ScreenPass => Box::new(ScreenPassPipeline::new()),
            Self::RayTracing => Box::new(RayTracingPipeline::new()),
        }
    }

    /// Construct and initialize in one step.
    pub fn build(
        self,
        device: &GpuDevice,
        shaders: &ShaderLoader,
    ) -> Result<Box<dyn Pipeline>, GraphicsError> {
        let mut pipeline = self.create();
        pipeline.init(device, shaders)?;
        log::info!("Created {} pipeline", pipeline.name());
        Ok(pipeline)
    }
}

/// Owned backend pipeline object.
pub(crate) struct PipelineHandle {
    backend: Arc<dyn GpuBackend>,
    id: PipelineId,
}

impl PipelineHandle {
    pub(crate) fn id(&self) -> PipelineId {
        self.id
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.backend.destroy_pipeline(self.id);
    }
}

fn not_initialized(name: &str) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("{name} pipeline bound before init"))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::path::PathBuf;

    /// Directory holding placeholder blobs for every built-in shader.
    pub(crate) fn placeholder_shaders(test: &str) -> ShaderLoader {
        let dir: PathBuf =
            std::env::temp_dir().join(format!("lumen_pipelines_{test}_{}", std::process::id()));
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_device;

    #[test]
    fn test_mesh_input_layout_matches_vertex() {
        let layout = mesh_input_layout();
        assert_eq!(layout[0].offset, 0);
        assert_eq!(layout[1].offset, 12);
        assert_eq!(layout[2].offset, 20);
        let end = layout.last().map(|e| e.offset + e.format.size()).unwrap();
        assert_eq!(end, Vertex::STRIDE);
    }

    #[test]
    fn test_factory_builds_every_kind() {
        let device = test_device();
        let shaders = test_support::placeholder_shaders("factory");
        for kind in [PipelineKind::Forward, PipelineKind::ScreenPass, PipelineKind::RayTracing] {
            let pipeline = kind.build(&device, &shaders).unwrap();
            assert!(pipeline.id().is_some());
        }
    }

    #[test]
    fn test_bind_before_init_fails() {
        let pipeline = PipelineKind::ScreenPass.create();
        let mut list = CommandList::new(crate::command::QueueKind::Direct, "test");
        assert!(pipeline.bind(&mut list).is_err());
    }

    #[test]
    fn test_missing_shaders_fail_init() {
        let device = test_device();
        let shaders = ShaderLoader::new("definitely/not/a/shader/dir");
        assert!(matches!(
            PipelineKind::Forward.build(&device, &shaders),
            Err(GraphicsError::ResourceCreationFailed(_))
        ));
    }
}
