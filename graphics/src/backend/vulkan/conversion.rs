//! Type conversions between Lumen types and Vulkan types.

use ash::vk;
use gpu_allocator::MemoryLocation;
use lumen_core::mesh::PrimitiveTopology;

use crate::accel::AccelBuildFlags;
use crate::pipeline::{CullMode, ShaderVisibility, VertexFormat};
use crate::types::{
    AddressMode, BorderColor, BufferUsage, CompareFunction, FilterMode, HeapType, ResourceState,
    StaticSamplerDesc, TextureFormat, TextureUsage,
};

/// Synchronization scope and image layout of a resource state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateScope {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl StateScope {
    const fn new(
        stage: vk::PipelineStageFlags2,
        access: vk::AccessFlags2,
        layout: vk::ImageLayout,
    ) -> Self {
        Self {
            stage,
            access,
            layout,
        }
    }
}

/// Map a resource state to the stages, accesses and layout it implies.
///
/// Buffers ignore the layout.
pub fn convert_state(state: ResourceState) -> StateScope {
    use vk::{AccessFlags2 as A, ImageLayout as L, PipelineStageFlags2 as S};

    match state {
        ResourceState::Common => {
            StateScope::new(S::ALL_COMMANDS, A::MEMORY_READ | A::MEMORY_WRITE, L::GENERAL)
        }
        ResourceState::Present => StateScope::new(S::ALL_COMMANDS, A::NONE, L::PRESENT_SRC_KHR),
        ResourceState::RenderTarget => StateScope::new(
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
            L::COLOR_ATTACHMENT_OPTIMAL,
        ),
        ResourceState::DepthWrite => StateScope::new(
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            L::DEPTH_ATTACHMENT_OPTIMAL,
        ),
        ResourceState::CopySource => {
            StateScope::new(S::COPY, A::TRANSFER_READ, L::TRANSFER_SRC_OPTIMAL)
        }
        ResourceState::CopyDest => {
            StateScope::new(S::COPY, A::TRANSFER_WRITE, L::TRANSFER_DST_OPTIMAL)
        }
        ResourceState::VertexAndConstantBuffer => StateScope::new(
            S::VERTEX_ATTRIBUTE_INPUT | S::ALL_COMMANDS,
            A::VERTEX_ATTRIBUTE_READ | A::UNIFORM_READ,
            L::GENERAL,
        ),
        ResourceState::IndexBuffer => StateScope::new(S::INDEX_INPUT, A::INDEX_READ, L::GENERAL),
        ResourceState::GenericRead => StateScope::new(S::ALL_COMMANDS, A::MEMORY_READ, L::GENERAL),
        ResourceState::UnorderedAccess => StateScope::new(
            S::ALL_COMMANDS,
            A::SHADER_STORAGE_READ | A::SHADER_STORAGE_WRITE,
            L::GENERAL,
        ),
        ResourceState::PixelShaderResource => StateScope::new(
            S::FRAGMENT_SHADER,
            A::SHADER_SAMPLED_READ,
            L::SHADER_READ_ONLY_OPTIMAL,
        ),
        ResourceState::NonPixelShaderResource => StateScope::new(
            S::ALL_COMMANDS,
            A::SHADER_SAMPLED_READ,
            L::SHADER_READ_ONLY_OPTIMAL,
        ),
        ResourceState::AccelerationStructure => StateScope::new(
            S::ALL_COMMANDS,
            A::ACCELERATION_STRUCTURE_READ_KHR | A::ACCELERATION_STRUCTURE_WRITE_KHR,
            L::GENERAL,
        ),
    }
}

/// Convert BufferUsage flags to Vulkan buffer usage flags.
///
/// Every buffer gets a device address; root descriptors, ray dispatches and
/// acceleration structure builds all consume addresses.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;

    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::CONSTANT) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::UNORDERED_ACCESS) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::ACCELERATION_STRUCTURE) {
        result |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR;
    }
    if usage.contains(BufferUsage::ACCELERATION_STRUCTURE_INPUT) {
        result |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
    }
    if usage.contains(BufferUsage::SHADER_TABLE) {
        result |= vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR;
    }

    result
}

/// Memory location a heap type allocates from.
pub fn convert_heap_type(heap: HeapType) -> MemoryLocation {
    match heap {
        HeapType::Default => MemoryLocation::GpuOnly,
        HeapType::Upload => MemoryLocation::CpuToGpu,
        HeapType::Readback => MemoryLocation::GpuToCpu,
    }
}

/// Convert TextureFormat to Vulkan format.
pub fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
    }
}

/// Aspect of the single view created for a texture.
pub fn texture_aspect(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Convert TextureUsage flags to Vulkan image usage flags.
pub fn convert_texture_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(TextureUsage::COPY_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::SHADER_RESOURCE) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::UNORDERED_ACCESS) {
        result |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.intersects(TextureUsage::RENDER_TARGET | TextureUsage::PRESENT) {
        result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(TextureUsage::DEPTH_STENCIL) {
        result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }

    result
}

pub fn convert_vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

pub fn convert_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub fn convert_cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub fn convert_visibility(visibility: ShaderVisibility) -> vk::ShaderStageFlags {
    match visibility {
        ShaderVisibility::All => vk::ShaderStageFlags::ALL,
        ShaderVisibility::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderVisibility::Pixel => vk::ShaderStageFlags::FRAGMENT,
    }
}

pub fn convert_accel_flags(flags: AccelBuildFlags) -> vk::BuildAccelerationStructureFlagsKHR {
    let mut result = vk::BuildAccelerationStructureFlagsKHR::empty();

    if flags.contains(AccelBuildFlags::ALLOW_UPDATE) {
        result |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE;
    }
    if flags.contains(AccelBuildFlags::PREFER_FAST_TRACE) {
        result |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
    }
    if flags.contains(AccelBuildFlags::PREFER_FAST_BUILD) {
        result |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD;
    }

    result
}

/// Build the create info of an immutable sampler.
pub fn convert_sampler(
    desc: &StaticSamplerDesc,
    anisotropy_supported: bool,
) -> vk::SamplerCreateInfo<'static> {
    let (filter, mipmap_mode) = match desc.filter {
        FilterMode::Point => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
        FilterMode::Linear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
    };
    let address_mode = match desc.address_mode {
        AddressMode::Wrap => vk::SamplerAddressMode::REPEAT,
        AddressMode::Clamp => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Border => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    };
    let border_color = match desc.border_color {
        BorderColor::TransparentBlack => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        BorderColor::OpaqueWhite => vk::BorderColor::FLOAT_OPAQUE_WHITE,
    };
    let compare = match desc.compare {
        CompareFunction::Never => None,
        CompareFunction::Less => Some(vk::CompareOp::LESS),
        CompareFunction::LessEqual => Some(vk::CompareOp::LESS_OR_EQUAL),
        CompareFunction::Always => Some(vk::CompareOp::ALWAYS),
    };
    let anisotropy =
        anisotropy_supported && desc.filter == FilterMode::Linear && desc.max_anisotropy > 1;

    vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(mipmap_mode)
        .address_mode_u(address_mode)
        .address_mode_v(address_mode)
        .address_mode_w(address_mode)
        .border_color(border_color)
        .compare_enable(compare.is_some())
        .compare_op(compare.unwrap_or(vk::CompareOp::NEVER))
        .anisotropy_enable(anisotropy)
        .max_anisotropy(desc.max_anisotropy as f32)
        .min_lod(desc.min_lod)
        .max_lod(desc.max_lod.min(vk::LOD_CLAMP_NONE))
}

/// Human-readable vendor name of a PCI vendor id.
pub fn vendor_name(vendor_id: u32) -> &'static str {
    match vendor_id {
        0x10DE => "NVIDIA",
        0x1002 => "AMD",
        0x8086 => "Intel",
        0x13B5 => "ARM",
        0x5143 => "Qualcomm",
        0x106B => "Apple",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SamplerType;

    #[test]
    fn test_render_target_and_present_layouts() {
        assert_eq!(
            convert_state(ResourceState::RenderTarget).layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            convert_state(ResourceState::Present).layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(
            convert_state(ResourceState::DepthWrite).layout,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn test_every_buffer_has_device_address() {
        let usage = convert_buffer_usage(BufferUsage::COPY_SRC);
        assert!(usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
        assert!(usage.contains(vk::BufferUsageFlags::TRANSFER_SRC));
        assert!(!usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
    }

    #[test]
    fn test_depth_usage_and_aspect() {
        let usage = convert_texture_usage(TextureUsage::DEPTH_STENCIL);
        assert_eq!(usage, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        assert_eq!(
            texture_aspect(TextureFormat::Depth32Float),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            texture_aspect(TextureFormat::Bgra8Unorm),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn test_point_sampler_skips_anisotropy() {
        let info = convert_sampler(&SamplerType::PointClamp.into(), true);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_EDGE);

        let info = convert_sampler(&SamplerType::LinearWrap.into(), true);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
    }

    #[test]
    fn test_heap_locations() {
        assert_eq!(convert_heap_type(HeapType::Upload), MemoryLocation::CpuToGpu);
        assert_eq!(convert_heap_type(HeapType::Readback), MemoryLocation::GpuToCpu);
    }
}
