//! Per-frame and per-object shader constants.
//!
//! Both live in persistently mapped upload rings with one region per back
//! buffer. The per-frame block is written once per frame, the per-object
//! block once per draw; every write lands on a 256-byte boundary.

use bytemuck::{Pod, Zeroable};
use lumen_core::math::{self, Mat4};
use lumen_core::scene::Camera;
use static_assertions::const_assert_eq;

use crate::backend::BufferId;
use crate::device::GpuDevice;
use crate::error::GraphicsError;
use crate::resources::{RingAllocation, RingBuffer};

/// Draws one frame may submit before its per-object region runs out.
pub const MAX_DRAWS_PER_FRAME: u32 = 256;

/// Size of each per-frame region of the constant rings.
pub const CONSTANT_REGION_SIZE: u64 = 64 * 1024;

/// Camera data shared by every draw of a frame (`b0`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PerFrameConstants {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    pub inverse_view_projection: [[f32; 4]; 4],
    /// World-space camera position, w = 1.
    pub camera_position: [f32; 4],
    /// `[width, height, 1 / width, 1 / height]`.
    pub viewport: [f32; 4],
}

const_assert_eq!(std::mem::size_of::<PerFrameConstants>(), 288);

impl PerFrameConstants {
    pub fn new(camera: &Camera, width: u32, height: u32) -> Self {
        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        let view = camera.view_matrix();
        let projection = camera.projection_matrix(w, h);
        let view_projection = projection * view;
        let inverse = view_projection.try_inverse().unwrap_or_else(Mat4::identity);
        let p = camera.position;
        Self {
            view: math::mat4_to_cols_array_2d(&view),
            projection: math::mat4_to_cols_array_2d(&projection),
            view_projection: math::mat4_to_cols_array_2d(&view_projection),
            inverse_view_projection: math::mat4_to_cols_array_2d(&inverse),
            camera_position: [p.x, p.y, p.z, 1.0],
            viewport: [w, h, 1.0 / w, 1.0 / h],
        }
    }
}

/// Object transform for one draw (`b1`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PerObjectConstants {
    pub world: [[f32; 4]; 4],
}

const_assert_eq!(std::mem::size_of::<PerObjectConstants>(), 64);

impl PerObjectConstants {
    pub fn new(world: &Mat4) -> Self {
        Self {
            world: math::mat4_to_cols_array_2d(world),
        }
    }
}

/// The two constant rings of the renderer.
pub struct FrameConstants {
    per_frame: RingBuffer,
    per_object: RingBuffer,
    draws: u32,
}

impl FrameConstants {
    /// Create both rings with `region_count` regions, one per back buffer.
    pub fn new(device: &GpuDevice, region_count: u32) -> Result<Self, GraphicsError> {
        Ok(Self {
            per_frame: RingBuffer::new(device, CONSTANT_REGION_SIZE, region_count, "per_frame")?,
            per_object: RingBuffer::new(device, CONSTANT_REGION_SIZE, region_count, "per_object")?,
            draws: 0,
        })
    }

    /// Reclaim the regions of back buffer `slot`.
    ///
    /// The slot's previous frame must have completed on the GPU.
    pub fn begin_frame(&mut self, slot: u32) {
        self.per_frame.begin_frame(slot);
        self.per_object.begin_frame(slot);
        self.draws = 0;
    }

    pub fn update_per_frame(
        &mut self,
        constants: &PerFrameConstants,
    ) -> Result<RingAllocation, GraphicsError> {
        self.per_frame.write(bytemuck::bytes_of(constants))
    }

    /// Write the constants of the next draw.
    pub fn push_object(
        &mut self,
        constants: &PerObjectConstants,
    ) -> Result<RingAllocation, GraphicsError> {
        if self.draws >= MAX_DRAWS_PER_FRAME {
            return Err(GraphicsError::InvalidParameter(format!(
                "more than {MAX_DRAWS_PER_FRAME} draws in one frame"
            )));
        }
        let alloc = self.per_object.write(bytemuck::bytes_of(constants))?;
        self.draws += 1;
        Ok(alloc)
    }

    pub fn per_frame_buffer(&self) -> BufferId {
        self.per_frame.buffer_id()
    }

    pub fn per_object_buffer(&self) -> BufferId {
        self.per_object.buffer_id()
    }

    /// Draws pushed since the last `begin_frame`.
    pub fn draw_count(&self) -> u32 {
        self.draws
    }
}

impl std::fmt::Debug for FrameConstants {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameConstants")
            .field("per_frame", &self.per_frame)
            .field("per_object", &self.per_object)
            .field("draws", &self.draws)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_device;
    use lumen_core::math::Vec3;

    #[test]
    fn test_per_frame_viewport() {
        let camera = Camera::new(Vec3::new(0.0, 2.0, -5.0));
        let constants = PerFrameConstants::new(&camera, 1920, 1080);
        assert_eq!(constants.viewport[0], 1920.0);
        assert_eq!(constants.viewport[3], 1.0 / 1080.0);
        assert_eq!(constants.camera_position, [0.0, 2.0, -5.0, 1.0]);
    }

    #[test]
    fn test_inverse_view_projection() {
        let camera = Camera::new(Vec3::new(1.0, 0.0, -3.0));
        let c = PerFrameConstants::new(&camera, 800, 600);
        let vp = Mat4::from_column_slice(c.view_projection.as_flattened());
        let inv = Mat4::from_column_slice(c.inverse_view_projection.as_flattened());
        let product = vp * inv;
        for r in 0..4 {
            for col in 0..4 {
                let expected = if r == col { 1.0 } else { 0.0 };
                assert!((product[(r, col)] - expected).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_offsets_are_aligned() {
        let device = test_device();
        let mut constants = FrameConstants::new(&device, 3).unwrap();
        constants.begin_frame(1);
        let frame = constants
            .update_per_frame(&PerFrameConstants::new(&Camera::default(), 64, 64))
            .unwrap();
        assert_eq!(frame.offset, CONSTANT_REGION_SIZE);
        let a = constants.push_object(&PerObjectConstants::new(&Mat4::identity())).unwrap();
        let b = constants.push_object(&PerObjectConstants::new(&Mat4::identity())).unwrap();
        assert_eq!(a.offset % 256, 0);
        assert_eq!(b.offset - a.offset, 256);
        assert_eq!(constants.draw_count(), 2);
    }

    #[test]
    fn test_draw_limit() {
        let device = test_device();
        let mut constants = FrameConstants::new(&device, 2).unwrap();
        constants.begin_frame(0);
        let object = PerObjectConstants::new(&Mat4::identity());
        for _ in 0..MAX_DRAWS_PER_FRAME {
            constants.push_object(&object).unwrap();
        }
        assert!(constants.push_object(&object).is_err());

        constants.begin_frame(1);
        assert_eq!(constants.draw_count(), 0);
        assert!(constants.push_object(&object).is_ok());
    }
}
