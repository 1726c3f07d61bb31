//! CPU-side mesh types and generators.
//!
//! - [`Vertex`] - the renderer's single vertex format (position, uv, normal)
//! - [`CpuMesh`] - CPU-side vertex and index arrays waiting to be staged
//! - Generators for the demo shapes (cube, sphere)

mod data;
pub mod generators;

pub use data::{CpuMesh, PrimitiveTopology, Vertex};
