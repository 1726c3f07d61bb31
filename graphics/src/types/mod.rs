//! Plain data types shared by the renderer and its backends.

mod buffer;
mod common;
mod sampler;
mod state;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage, HeapType, IndexBufferView, VertexBufferView};
pub use common::{ClearValue, ScissorRect, Viewport};
pub use sampler::{
    AddressMode, BorderColor, CompareFunction, FilterMode, SamplerType, StaticSamplerDesc,
};
pub use state::{Resource, ResourceBarrier, ResourceState};
pub use texture::{TextureDescriptor, TextureFormat, TextureUsage};
