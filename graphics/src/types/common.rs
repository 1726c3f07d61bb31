//! Small value types shared by command lists and swap chains.

/// Rasterizer viewport in pixels, origin top-left, depth range `[0, 1]`
/// unless stated otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Viewport covering a whole `width` x `height` target.
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }
}

/// Scissor rectangle; pixels outside it are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Scissor covering a whole `width` x `height` target.
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Optimized clear value baked into a render target or depth buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_target_viewport() {
        let viewport = Viewport::from_dimensions(1280, 720);
        assert_eq!(viewport.width, 1280.0);
        assert_eq!(viewport.max_depth, 1.0);
        assert!((viewport.aspect_ratio() - 16.0 / 9.0).abs() < 1e-6);
        assert_eq!(Viewport::default().aspect_ratio(), 1.0);
    }
}
