//! Rasterization pipelines.

use super::{
    GraphicsPipelineDesc, Pipeline, PipelineHandle, not_initialized,
    root_signature::{
        DescriptorRange, DescriptorRangeType, RootSignatureBuilder, RootSignatureDesc,
        RootSignatureFlags, ShaderVisibility,
    },
    shader::{ShaderLoader, ShaderStage},
};
use crate::backend::PipelineId;
use crate::command::CommandList;
use crate::device::GpuDevice;
use crate::error::GraphicsError;
use crate::types::SamplerType;

fn create(
    device: &GpuDevice,
    shaders: &ShaderLoader,
    label: &str,
    prefix: &str,
    root_signature: RootSignatureDesc,
) -> Result<PipelineHandle, GraphicsError> {
    let vertex = shaders.load(&format!("{prefix}VertexShader"), ShaderStage::Vertex, "main")?;
    let pixel = shaders.load(&format!("{prefix}PixelShader"), ShaderStage::Pixel, "main")?;
    let desc = GraphicsPipelineDesc::mesh(label, root_signature, vertex, pixel);
    desc.validate()?;
    let id = device.backend().create_graphics_pipeline(&desc)?;
    Ok(PipelineHandle {
        backend: device.backend().clone(),
        id,
    })
}

/// Mesh pipeline reading per-frame and per-object constants.
#[derive(Default)]
pub struct ForwardPipeline {
    handle: Option<PipelineHandle>,
}

impl ForwardPipeline {
    /// Root parameter of the per-frame constant buffer (`b0`).
    pub const PER_FRAME_PARAMETER: u32 = 0;
    /// Root parameter of the per-object constant buffer (`b1`).
    pub const PER_OBJECT_PARAMETER: u32 = 1;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_signature() -> RootSignatureDesc {
        let cbv = DescriptorRangeType::ConstantBuffer;
        RootSignatureBuilder::new()
            .add_root_descriptor(cbv, 0, 0, ShaderVisibility::Vertex)
            .add_root_descriptor(cbv, 1, 0, ShaderVisibility::Vertex)
            .flags(
                RootSignatureFlags::ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT
                    | RootSignatureFlags::DENY_HULL_SHADER_ROOT_ACCESS
                    | RootSignatureFlags::DENY_DOMAIN_SHADER_ROOT_ACCESS
                    | RootSignatureFlags::DENY_GEOMETRY_SHADER_ROOT_ACCESS,
            )
            .build()
    }
}

impl Pipeline for ForwardPipeline {
    fn name(&self) -> &str {
        "forward"
    }

    fn init(&mut self, device: &GpuDevice, shaders: &ShaderLoader) -> Result<(), GraphicsError> {
        self.handle = Some(create(device, shaders, "forward", "Forward", Self::root_signature())?);
        Ok(())
    }

    fn bind(&self, list: &mut CommandList) -> Result<(), GraphicsError> {
        let handle = self.handle.as_ref().ok_or_else(|| not_initialized(self.name()))?;
        list.set_pipeline(handle.id());
        Ok(())
    }

    fn id(&self) -> Option<PipelineId> {
        self.handle.as_ref().map(PipelineHandle::id)
    }
}

/// Full-screen pass sampling one texture.
#[derive(Default)]
pub struct ScreenPassPipeline {
    handle: Option<PipelineHandle>,
}

impl ScreenPassPipeline {
    /// Root parameter of the texture table (`t0`).
    pub const TEXTURE_PARAMETER: u32 = 0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_signature() -> RootSignatureDesc {
        RootSignatureBuilder::new()
            .add_descriptor_table(
                &[DescriptorRange::new(DescriptorRangeType::ShaderResource, 1, 0)],
                ShaderVisibility::Pixel,
            )
            .add_static_sampler(SamplerType::LinearWrap, 0, 0, ShaderVisibility::Pixel)
            .flags(
                RootSignatureFlags::ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT
                    | RootSignatureFlags::DENY_HULL_SHADER_ROOT_ACCESS
                    | RootSignatureFlags::DENY_DOMAIN_SHADER_ROOT_ACCESS
                    | RootSignatureFlags::DENY_GEOMETRY_SHADER_ROOT_ACCESS
                    | RootSignatureFlags::DENY_VERTEX_SHADER_ROOT_ACCESS,
            )
            .build()
    }
}

impl Pipeline for ScreenPassPipeline {
    fn name(&self) -> &str {
        "screen_pass"
    }

    fn init(&mut self, device: &GpuDevice, shaders: &ShaderLoader) -> Result<(), GraphicsError> {
        self.handle = Some(create(device, shaders, "screen_pass", "Screen", Self::root_signature())?);
        Ok(())
    }

    fn bind(&self, list: &mut CommandList) -> Result<(), GraphicsError> {
        let handle = self.handle.as_ref().ok_or_else(|| not_initialized(self.name()))?;
        list.set_pipeline(handle.id());
        Ok(())
    }

    fn id(&self) -> Option<PipelineId> {
        self.handle.as_ref().map(PipelineHandle::id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RootParameter;

    #[test]
    fn test_screen_pass_signature() {
        let desc = ScreenPassPipeline::root_signature();
        assert_eq!(desc.parameters.len(), 1);
        assert!(matches!(
            desc.parameters[0],
            RootParameter::DescriptorTable {
                visibility: ShaderVisibility::Pixel,
                ..
            }
        ));
        assert_eq!(desc.static_samplers.len(), 1);
        assert_eq!(desc.static_samplers[0].register, 0);
    }

    #[test]
    fn test_forward_signature_has_two_constant_buffers() {
        let desc = ForwardPipeline::root_signature();
        assert_eq!(desc.parameters.len(), 2);
        assert!(desc.static_samplers.is_empty());
    }
}
