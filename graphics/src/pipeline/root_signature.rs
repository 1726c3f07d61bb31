//! Root signature description.
//!
//! The root signature lists what a pipeline binds: descriptor tables into
//! the shader-visible heap, root descriptors pointing straight at buffer
//! memory, and static samplers baked into the signature.

use bitflags::bitflags;

use crate::types::{SamplerType, StaticSamplerDesc};

/// Stages a root parameter is visible to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShaderVisibility {
    #[default]
    All,
    Vertex,
    Pixel,
}

/// Register class of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorRangeType {
    /// `t` registers.
    ShaderResource,
    /// `u` registers.
    UnorderedAccess,
    /// `b` registers.
    ConstantBuffer,
}

/// Consecutive registers bound from consecutive heap slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRange {
    pub range_type: DescriptorRangeType,
    pub count: u32,
    pub base_register: u32,
    pub space: u32,
    /// Slot offset from the start of the table.
    pub offset_in_table: u32,
}

impl DescriptorRange {
    pub fn new(range_type: DescriptorRangeType, count: u32, base_register: u32) -> Self {
        Self {
            range_type,
            count,
            base_register,
            space: 0,
            offset_in_table: 0,
        }
    }

    #[must_use]
    pub fn with_space(mut self, space: u32) -> Self {
        self.space = space;
        self
    }
}

/// One entry of the root signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RootParameter {
    DescriptorTable {
        ranges: Vec<DescriptorRange>,
        visibility: ShaderVisibility,
    },
    /// Buffer bound directly by address.
    Descriptor {
        kind: DescriptorRangeType,
        register: u32,
        space: u32,
        visibility: ShaderVisibility,
    },
}

/// A static sampler bound to a register.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticSampler {
    pub desc: StaticSamplerDesc,
    pub register: u32,
    pub space: u32,
    pub visibility: ShaderVisibility,
}

bitflags! {
    /// Root signature flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RootSignatureFlags: u32 {
        const ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT = 1 << 0;
        const DENY_VERTEX_SHADER_ROOT_ACCESS = 1 << 1;
        const DENY_HULL_SHADER_ROOT_ACCESS = 1 << 2;
        const DENY_DOMAIN_SHADER_ROOT_ACCESS = 1 << 3;
        const DENY_GEOMETRY_SHADER_ROOT_ACCESS = 1 << 4;
        const DENY_PIXEL_SHADER_ROOT_ACCESS = 1 << 5;
        /// Local signature of ray tracing shader records.
        const LOCAL_ROOT_SIGNATURE = 1 << 6;
    }
}

/// Finished root signature description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RootSignatureDesc {
    pub parameters: Vec<RootParameter>,
    pub static_samplers: Vec<StaticSampler>,
    pub flags: RootSignatureFlags,
}

/// Builder for [`RootSignatureDesc`]; parameters keep their insertion order.
///
/// # Example
///
/// ```ignore
/// let signature = RootSignatureBuilder::new()
///     .add_descriptor_table(
///         &[DescriptorRange::new(DescriptorRangeType::ShaderResource, 1, 0)],
///         ShaderVisibility::Pixel,
///     )
///     .add_static_sampler(SamplerType::LinearWrap, 0, 0, ShaderVisibility::Pixel)
///     .flags(RootSignatureFlags::ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT)
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct RootSignatureBuilder {
    desc: RootSignatureDesc,
}

impl RootSignatureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor table; each range's table offset follows the previous range.
    #[must_use]
    pub fn add_descriptor_table(
        mut self,
        ranges: &[DescriptorRange],
        visibility: ShaderVisibility,
    ) -> Self {
        let mut offset = 0;
        let ranges = ranges
            .iter()
            .map(|range| {
                let placed = DescriptorRange {
                    offset_in_table: offset,
                    ..*range
                };
                offset += range.count;
                placed
            })
            .collect();
        self.desc.parameters.push(RootParameter::DescriptorTable { ranges, visibility });
        self
    }

    #[must_use]
    pub fn add_root_descriptor(
        mut self,
        kind: DescriptorRangeType,
        register: u32,
        space: u32,
        visibility: ShaderVisibility,
    ) -> Self {
        self.desc.parameters.push(RootParameter::Descriptor {
            kind,
            register,
            space,
            visibility,
        });
        self
    }

    #[must_use]
    pub fn add_static_sampler(
        mut self,
        sampler: SamplerType,
        register: u32,
        space: u32,
        visibility: ShaderVisibility,
    ) -> Self {
        self.desc.static_samplers.push(StaticSampler {
            desc: sampler.into(),
            register,
            space,
            visibility,
        });
        self
    }

    #[must_use]
    pub fn flags(mut self, flags: RootSignatureFlags) -> Self {
        self.desc.flags = flags;
        self
    }

    pub fn build(self) -> RootSignatureDesc {
        self.desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AddressMode, FilterMode};

    #[test]
    fn test_parameters_keep_order() {
        let cbv = DescriptorRangeType::ConstantBuffer;
        let desc = RootSignatureBuilder::new()
            .add_root_descriptor(cbv, 0, 0, ShaderVisibility::Vertex)
            .add_root_descriptor(cbv, 1, 0, ShaderVisibility::Vertex)
            .add_descriptor_table(
                &[DescriptorRange::new(DescriptorRangeType::ShaderResource, 1, 0)],
                ShaderVisibility::Pixel,
            )
            .build();
        assert_eq!(desc.parameters.len(), 3);
        assert!(matches!(
            desc.parameters[1],
            RootParameter::Descriptor { register: 1, .. }
        ));
    }

    #[test]
    fn test_table_ranges_are_appended() {
        let desc = RootSignatureBuilder::new()
            .add_descriptor_table(
                &[
                    DescriptorRange::new(DescriptorRangeType::UnorderedAccess, 1, 0),
                    DescriptorRange::new(DescriptorRangeType::ShaderResource, 2, 0),
                    DescriptorRange::new(DescriptorRangeType::ConstantBuffer, 1, 0),
                ],
                ShaderVisibility::All,
            )
            .build();
        let RootParameter::DescriptorTable { ranges, .. } = &desc.parameters[0] else {
            panic!("expected a descriptor table");
        };
        let offsets: Vec<u32> = ranges.iter().map(|r| r.offset_in_table).collect();
        assert_eq!(offsets, vec![0, 1, 3]);
    }

    #[test]
    fn test_static_sampler_preset() {
        let desc = RootSignatureBuilder::new()
            .add_static_sampler(SamplerType::LinearWrap, 0, 0, ShaderVisibility::Pixel)
            .flags(RootSignatureFlags::ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT)
            .build();
        let sampler = desc.static_samplers[0];
        assert_eq!(sampler.desc.filter, FilterMode::Linear);
        assert_eq!(sampler.desc.address_mode, AddressMode::Wrap);
        assert_eq!(sampler.desc.max_anisotropy, 16);
        assert_eq!(sampler.visibility, ShaderVisibility::Pixel);
        assert!(desc.flags.contains(RootSignatureFlags::ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT));
    }
}
