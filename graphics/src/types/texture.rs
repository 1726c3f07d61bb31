//! Texture types and descriptors.

use bitflags::bitflags;

use super::{ClearValue, ResourceState};

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RGBA channels, float.
    Rgba32Float,
    /// 32-bit depth, float.
    Depth32Float,
}

impl TextureFormat {
    /// Returns true if this is a depth format.
    pub fn is_depth(&self) -> bool {
        matches!(self, Self::Depth32Float)
    }

    /// Returns the size in bytes per pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        /// Sampled through a shader resource view.
        const SHADER_RESOURCE = 1 << 2;
        /// Written through an unordered access view.
        const UNORDERED_ACCESS = 1 << 3;
        const RENDER_TARGET = 1 << 4;
        const DEPTH_STENCIL = 1 << 5;
        /// Owned by a swap chain and presentable.
        const PRESENT = 1 << 6;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a 2D texture.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub initial_state: ResourceState,
    pub clear_value: Option<ClearValue>,
}

impl TextureDescriptor {
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            width,
            height,
            format,
            usage,
            initial_state: ResourceState::Common,
            clear_value: None,
        }
    }

    /// Depth buffer in the depth-write state with a depth clear value of 1.0.
    pub fn depth_buffer(width: u32, height: u32) -> Self {
        Self {
            initial_state: ResourceState::DepthWrite,
            clear_value: Some(ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            }),
            ..Self::new_2d(
                width,
                height,
                TextureFormat::Depth32Float,
                TextureUsage::DEPTH_STENCIL,
            )
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_initial_state(mut self, state: ResourceState) -> Self {
        self.initial_state = state;
        self
    }

    /// Size in bytes of the texture's single mip level.
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.block_size() as u64
    }
}
