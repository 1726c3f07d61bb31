//! Ray tracing pipeline used by the probe gather dispatch.

use super::{
    HitGroupDesc, Pipeline, PipelineHandle, RayTracingPipelineDesc, not_initialized,
    root_signature::{
        DescriptorRange, DescriptorRangeType, RootSignatureBuilder, RootSignatureDesc,
        ShaderVisibility,
    },
    shader::{ShaderLoader, ShaderStage},
};
use crate::backend::PipelineId;
use crate::command::CommandList;
use crate::device::GpuDevice;
use crate::error::GraphicsError;

/// Ray generation, miss and one triangle hit group from a single library.
#[derive(Default)]
pub struct RayTracingPipeline {
    handle: Option<PipelineHandle>,
}

impl RayTracingPipeline {
    pub const RAY_GENERATION: &'static str = "RayGen";
    pub const MISS: &'static str = "Miss";
    pub const HIT_GROUP: &'static str = "HitGroup";

    /// Root parameter of the TLAS + output table.
    pub const SCENE_TABLE_PARAMETER: u32 = 0;
    /// Root parameter of the per-frame constant buffer (`b0`).
    pub const PER_FRAME_PARAMETER: u32 = 1;

    pub fn new() -> Self {
        Self::default()
    }

    /// The table starts at the TLAS slot; the output slot follows it.
    pub fn root_signature() -> RootSignatureDesc {
        RootSignatureBuilder::new()
            .add_descriptor_table(
                &[
                    DescriptorRange::new(DescriptorRangeType::ShaderResource, 1, 0),
                    DescriptorRange::new(DescriptorRangeType::UnorderedAccess, 1, 0),
                ],
                ShaderVisibility::All,
            )
            .add_root_descriptor(DescriptorRangeType::ConstantBuffer, 0, 0, ShaderVisibility::All)
            .build()
    }

    pub fn describe(shaders: &ShaderLoader) -> Result<RayTracingPipelineDesc, GraphicsError> {
        let library = shaders.load("RayTracingLibrary", ShaderStage::Library, "")?;
        Ok(RayTracingPipelineDesc {
            label: "ray_tracing".to_string(),
            library,
            ray_generation: Self::RAY_GENERATION.to_string(),
            miss: vec![Self::MISS.to_string()],
            hit_groups: vec![HitGroupDesc {
                name: Self::HIT_GROUP.to_string(),
                closest_hit: Some("ClosestHit".to_string()),
                any_hit: None,
            }],
            global_root_signature: Self::root_signature(),
            max_payload_size: 16,
            max_attribute_size: 8,
            max_recursion_depth: 1,
        })
    }
}

impl Pipeline for RayTracingPipeline {
    fn name(&self) -> &str {
        "ray_tracing"
    }

    fn init(&mut self, device: &GpuDevice, shaders: &ShaderLoader) -> Result<(), GraphicsError> {
        if !device.capabilities().ray_tracing {
            return Err(GraphicsError::FeatureNotSupported(
                "ray tracing pipelines".to_string(),
            ));
        }
        let desc = Self::describe(shaders)?;
        let id = device.backend().create_ray_tracing_pipeline(&desc)?;
        self.handle = Some(PipelineHandle {
            backend: device.backend().clone(),
            id,
        });
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
    use crate::pipeline::test_support::placeholder_shaders;

    #[test]
    fn test_group_names_in_order() {
        let desc = RayTracingPipeline::describe(&placeholder_shaders("rt_groups")).unwrap();
        let names: Vec<&str> = desc.group_names().collect();
        assert_eq!(names, vec!["RayGen", "Miss", "HitGroup"]);
    }
}
