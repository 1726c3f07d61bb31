//! Resource states and barriers.

use crate::backend::{BufferId, TextureId};

/// Usage state of a GPU resource.
///
/// A resource must be transitioned into the state matching its next use
/// before the GPU touches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    #[default]
    Common,
    Present,
    RenderTarget,
    DepthWrite,
    CopySource,
    CopyDest,
    VertexAndConstantBuffer,
    IndexBuffer,
    /// Read by any stage. The permanent state of upload-heap buffers.
    GenericRead,
    UnorderedAccess,
    PixelShaderResource,
    NonPixelShaderResource,
    /// Storage of a built acceleration structure.
    AccelerationStructure,
}

impl ResourceState {
    /// Whether the GPU may read a buffer in this state as a copy source.
    pub fn allows_copy_source(&self) -> bool {
        matches!(self, Self::CopySource | Self::GenericRead)
    }

    /// Whether a buffer in this state may be read as acceleration structure
    /// build input (vertices, indices or instance records).
    pub fn allows_build_input(&self) -> bool {
        matches!(
            self,
            Self::GenericRead
                | Self::NonPixelShaderResource
                | Self::VertexAndConstantBuffer
                | Self::IndexBuffer
        )
    }
}

/// A buffer or texture referenced by a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Buffer(BufferId),
    Texture(TextureId),
}

impl From<BufferId> for Resource {
    fn from(id: BufferId) -> Self {
        Self::Buffer(id)
    }
}

impl From<TextureId> for Resource {
    fn from(id: TextureId) -> Self {
        Self::Texture(id)
    }
}

/// A single entry of a resource barrier batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceBarrier {
    /// State transition of one resource.
    Transition {
        resource: Resource,
        before: ResourceState,
        after: ResourceState,
    },
    /// Makes prior unordered-access writes visible, e.g. an acceleration
    /// structure build before it is traced against. `None` covers all
    /// resources.
    Uav { resource: Option<Resource> },
}

impl ResourceBarrier {
    pub fn transition(
        resource: impl Into<Resource>,
        before: ResourceState,
        after: ResourceState,
    ) -> Self {
        Self::Transition {
            resource: resource.into(),
            before,
            after,
        }
    }

    pub fn uav(resource: impl Into<Resource>) -> Self {
        Self::Uav {
            resource: Some(resource.into()),
        }
    }
}
