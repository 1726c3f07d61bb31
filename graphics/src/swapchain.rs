//! Swap chain and presentation.
//!
//! The [`SwapChain`] owns the back buffers of a window surface, a D32 depth
//! buffer shared by all of them, and the full-window viewport and scissor.
//! Resizing recreates all of these; the caller must flush the GPU first.
//!
//! # Example
//!
//! ```ignore
//! let target = SurfaceTarget::from_window(&window)?;
//! let mut swap_chain = SwapChain::new(&device, &target, &SwapChainDescriptor::new(1920, 1080))?;
//!
//! // In render loop:
//! let index = swap_chain.current_back_buffer_index()?;
//! // ... render to swap_chain.back_buffer(index) ...
//! swap_chain.present(&queue, vsync)?;
//! ```

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::backend::{GpuBackend, SwapChainId, TextureId};
use crate::command::CommandQueue;
use crate::device::GpuDevice;
use crate::error::GraphicsError;
use crate::resources::Texture;
use crate::types::{ScissorRect, TextureDescriptor, TextureFormat, Viewport};

/// Where a swap chain presents to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceTarget {
    /// A native window.
    Window {
        display: RawDisplayHandle,
        window: RawWindowHandle,
    },
    /// No window; presents are counted but go nowhere.
    Headless,
}

impl SurfaceTarget {
    /// Capture the raw handles of `window`.
    ///
    /// The window must outlive the swap chain created from the target.
    pub fn from_window(
        window: &(impl HasWindowHandle + HasDisplayHandle),
    ) -> Result<Self, GraphicsError> {
        let display = window
            .display_handle()
            .map_err(|e| GraphicsError::InitializationFailed(format!("display handle: {e}")))?
            .as_raw();
        let window = window
            .window_handle()
            .map_err(|e| GraphicsError::InitializationFailed(format!("window handle: {e}")))?
            .as_raw();
        Ok(Self::Window { display, window })
    }
}

/// Creation parameters of a swap chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapChainDescriptor {
    pub width: u32,
    pub height: u32,
    pub back_buffer_count: u32,
    pub format: TextureFormat,
    /// Create the swap chain able to present with tearing, if supported.
    pub allow_tearing: bool,
}

impl SwapChainDescriptor {
    pub const DEFAULT_BACK_BUFFER_COUNT: u32 = 3;

    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            back_buffer_count: Self::DEFAULT_BACK_BUFFER_COUNT,
            format: TextureFormat::Rgba8Unorm,
            allow_tearing: false,
        }
    }

    #[must_use]
    pub fn with_back_buffer_count(mut self, count: u32) -> Self {
        self.back_buffer_count = count;
        self
    }

    #[must_use]
    pub fn with_tearing(mut self, allow_tearing: bool) -> Self {
        self.allow_tearing = allow_tearing;
        self
    }
}

/// How one frame is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PresentRequest {
    /// Vertical blanks to wait; 0 presents immediately.
    pub sync_interval: u32,
    /// Present immediately even mid-scanout.
    pub allow_tearing: bool,
}

impl PresentRequest {
    /// Tearing is used only when supported and vsync is off.
    pub fn new(vsync: bool, tearing_supported: bool) -> Self {
        if tearing_supported && !vsync {
            Self {
                sync_interval: 0,
                allow_tearing: true,
            }
        } else {
            Self {
                sync_interval: u32::from(vsync),
                allow_tearing: false,
            }
        }
    }
}

/// A window swap chain with its depth buffer.
pub struct SwapChain {
    backend: Arc<dyn GpuBackend>,
    id: SwapChainId,
    descriptor: SwapChainDescriptor,
    back_buffers: Vec<TextureId>,
    depth: Texture,
    viewport: Viewport,
    scissor: ScissorRect,
    tearing_supported: bool,
}

impl SwapChain {
    /// Create a swap chain on `device`.
    pub fn new(
        device: &GpuDevice,
        target: &SurfaceTarget,
        descriptor: &SwapChainDescriptor,
    ) -> Result<Self, GraphicsError> {
        check_size(descriptor.width, descriptor.height)?;
        if descriptor.back_buffer_count < 2 {
            return Err(GraphicsError::InvalidParameter(format!(
                "swap chain needs at least 2 back buffers, got {}",
                descriptor.back_buffer_count
            )));
        }

        let tearing_supported = descriptor.allow_tearing && device.capabilities().tearing_supported;
        let descriptor = SwapChainDescriptor {
            allow_tearing: tearing_supported,
            ..*descriptor
        };
        let backend = device.backend().clone();
        let id = backend.create_swap_chain(target, &descriptor)?;
        let back_buffers = backend.swap_chain_back_buffers(id)?;
        let depth = create_depth(device, descriptor.width, descriptor.height)?;

        log::info!(
            "Created swap chain {}x{} with {} back buffers (tearing: {tearing_supported})",
            descriptor.width,
            descriptor.height,
            back_buffers.len()
        );
        Ok(Self {
            backend,
            id,
            descriptor,
            back_buffers,
            depth,
            viewport: Viewport::from_dimensions(descriptor.width, descriptor.height),
            scissor: ScissorRect::from_dimensions(descriptor.width, descriptor.height),
            tearing_supported,
        })
    }

    pub fn id(&self) -> SwapChainId {
        self.id
    }

    pub fn descriptor(&self) -> &SwapChainDescriptor {
        &self.descriptor
    }

    pub fn width(&self) -> u32 {
        self.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.height
    }

    pub fn back_buffer_count(&self) -> u32 {
        self.back_buffers.len() as u32
    }

    pub fn back_buffers(&self) -> &[TextureId] {
        &self.back_buffers
    }

    pub fn back_buffer(&self, index: u32) -> Option<TextureId> {
        self.back_buffers.get(index as usize).copied()
    }

    pub fn depth_buffer(&self) -> &Texture {
        &self.depth
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn scissor_rect(&self) -> ScissorRect {
        self.scissor
    }

    pub fn tearing_supported(&self) -> bool {
        self.tearing_supported
    }

    /// Index of the back buffer the next frame renders to.
    pub fn current_back_buffer_index(&self) -> Result<u32, GraphicsError> {
        self.backend.acquire_back_buffer(self.id)
    }

    /// Present the current back buffer.
    pub fn present(&self, queue: &CommandQueue, vsync: bool) -> Result<(), GraphicsError> {
        let request = PresentRequest::new(vsync, self.tearing_supported);
        self.backend.present(queue.id(), self.id, request).map_err(|e| {
            log::error!("Present failed: {e}");
            e
        })
    }

    /// Recreate the back buffers and depth buffer at the new size.
    ///
    /// No GPU work referencing the old back buffers may be in flight.
    pub fn resize(
        &mut self,
        device: &GpuDevice,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsError> {
        check_size(width, height)?;
        self.backend.resize_swap_chain(self.id, width, height)?;
        self.back_buffers = self.backend.swap_chain_back_buffers(self.id)?;
        self.depth = create_depth(device, width, height)?;
        self.descriptor.width = width;
        self.descriptor.height = height;
        self.viewport = Viewport::from_dimensions(width, height);
        self.scissor = ScissorRect::from_dimensions(width, height);
        log::info!("Swap chain resized to {width}x{height}");
        Ok(())
    }
}

fn check_size(width: u32, height: u32) -> Result<(), GraphicsError> {
    if width == 0 || height == 0 {
        return Err(GraphicsError::InvalidParameter(format!(
            "swap chain size {width}x{height} has a zero dimension"
        )));
    }
    Ok(())
}

fn create_depth(device: &GpuDevice, width: u32, height: u32) -> Result<Texture, GraphicsError> {
    device.create_texture(&TextureDescriptor::depth_buffer(width, height).with_label("depth_buffer"))
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        self.backend.destroy_swap_chain(self.id);
    }
}

impl std::fmt::Debug for SwapChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapChain")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_device;

    #[test]
    fn test_present_request() {
        assert_eq!(
            PresentRequest::new(true, true),
            PresentRequest {
                sync_interval: 1,
                allow_tearing: false
            }
        );
        assert_eq!(
            PresentRequest::new(false, true),
            PresentRequest {
                sync_interval: 0,
                allow_tearing: true
            }
        );
        assert_eq!(
            PresentRequest::new(false, false),
            PresentRequest {
                sync_interval: 0,
                allow_tearing: false
            }
        );
    }

    #[test]
    fn test_headless_swap_chain() {
        let device = test_device();
        let swap_chain =
            SwapChain::new(&device, &SurfaceTarget::Headless, &SwapChainDescriptor::new(640, 480))
                .unwrap();
        assert_eq!(swap_chain.back_buffer_count(), 3);
        assert_eq!(swap_chain.current_back_buffer_index().unwrap(), 0);
        assert_eq!(swap_chain.viewport().width, 640.0);
        assert_eq!(swap_chain.scissor_rect().height, 480);
        assert_eq!(swap_chain.depth_buffer().width(), 640);
    }

    #[test]
    fn test_zero_size_rejected() {
        let device = test_device();
        assert!(
            SwapChain::new(&device, &SurfaceTarget::Headless, &SwapChainDescriptor::new(0, 480))
                .is_err()
        );
        let mut swap_chain =
            SwapChain::new(&device, &SurfaceTarget::Headless, &SwapChainDescriptor::new(64, 64))
                .unwrap();
        assert!(swap_chain.resize(&device, 64, 0).is_err());
        assert_eq!(swap_chain.width(), 64);
    }

    #[test]
    fn test_resize_recreates_depth() {
        let device = test_device();
        let mut swap_chain =
            SwapChain::new(&device, &SurfaceTarget::Headless, &SwapChainDescriptor::new(64, 64))
                .unwrap();
        swap_chain.resize(&device, 128, 32).unwrap();
        assert_eq!(swap_chain.depth_buffer().width(), 128);
        assert_eq!(swap_chain.depth_buffer().height(), 32);
        assert_eq!(swap_chain.viewport().height, 32.0);
    }
}
