//! Owning wrappers around backend resources.
//!
//! - [`Buffer`] and [`Texture`] release their backend object when dropped
//! - [`RingBuffer`] sub-allocates per-frame regions of a persistently mapped
//!   upload buffer

mod buffer;
mod ring_buffer;
mod texture;

pub use buffer::Buffer;
pub use ring_buffer::{RingAllocation, RingBuffer, align_up};
pub use texture::Texture;
