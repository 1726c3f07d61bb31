//! GPU texture resource.

use std::sync::Arc;

use crate::backend::{GpuBackend, TextureId};
use crate::types::TextureDescriptor;

/// A GPU texture, exclusively owned and destroyed on drop.
pub struct Texture {
    backend: Arc<dyn GpuBackend>,
    id: TextureId,
    descriptor: TextureDescriptor,
}

impl Texture {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        id: TextureId,
        descriptor: TextureDescriptor,
    ) -> Self {
        Self {
            backend,
            id,
            descriptor,
        }
    }

    /// Non-owning handle used when recording commands.
    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn width(&self) -> u32 {
        self.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.height
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.backend.destroy_texture(self.id);
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.id)
            .field("width", &self.descriptor.width)
            .field("height", &self.descriptor.height)
            .field("format", &self.descriptor.format)
            .finish()
    }
}
