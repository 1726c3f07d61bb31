//! Scene-level CPU types: transforms, cameras and probe volumes.

mod camera;
mod probe;
mod transform;

pub use camera::Camera;
pub use probe::ProbeVolume;
pub use transform::Transform;
