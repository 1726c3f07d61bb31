//! Static sampler types.

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Point,
    Linear,
}

/// Texture coordinate addressing outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Wrap,
    Clamp,
    Border,
}

/// Border color for [`AddressMode::Border`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BorderColor {
    #[default]
    TransparentBlack,
    OpaqueWhite,
}

/// Comparison function for comparison samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    #[default]
    Never,
    Less,
    LessEqual,
    Always,
}

/// Preset static samplers available to root signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplerType {
    PointWrap,
    PointClamp,
    PointBorder,
    LinearWrap,
    LinearClamp,
}

/// Fully specified static sampler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticSamplerDesc {
    pub filter: FilterMode,
    pub address_mode: AddressMode,
    pub border_color: BorderColor,
    pub max_anisotropy: u32,
    pub compare: CompareFunction,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl StaticSamplerDesc {
    /// Maximum anisotropy applied to every preset.
    pub const MAX_ANISOTROPY: u32 = 16;
}

impl From<SamplerType> for StaticSamplerDesc {
    fn from(ty: SamplerType) -> Self {
        let (filter, address_mode) = match ty {
            SamplerType::PointWrap => (FilterMode::Point, AddressMode::Wrap),
            SamplerType::PointClamp => (FilterMode::Point, AddressMode::Clamp),
            SamplerType::PointBorder => (FilterMode::Point, AddressMode::Border),
            SamplerType::LinearWrap => (FilterMode::Linear, AddressMode::Wrap),
            SamplerType::LinearClamp => (FilterMode::Linear, AddressMode::Clamp),
        };
        let border_color = match ty {
            SamplerType::PointBorder => BorderColor::OpaqueWhite,
            _ => BorderColor::TransparentBlack,
        };
        Self {
            filter,
            address_mode,
            border_color,
            max_anisotropy: Self::MAX_ANISOTROPY,
            compare: CompareFunction::Never,
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_point_border_uses_white_border() {
        let border = StaticSamplerDesc::from(SamplerType::PointBorder);
        assert_eq!(border.address_mode, AddressMode::Border);
        assert_eq!(border.border_color, BorderColor::OpaqueWhite);

        let wrap = StaticSamplerDesc::from(SamplerType::LinearWrap);
        assert_eq!(wrap.filter, FilterMode::Linear);
        assert_eq!(wrap.border_color, BorderColor::TransparentBlack);
        assert_eq!(wrap.max_lod, f32::MAX);
    }
}
