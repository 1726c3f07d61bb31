use crate::math::Vec3;

use super::Transform;

/// Regular 3D grid of light probes centred on a position.
///
/// Each probe is represented by a debug transform (a small sphere in the demo)
/// so the grid can be drawn and inserted into the ray tracing scene.
#[derive(Debug, Clone)]
pub struct ProbeVolume {
    position: Vec3,
    extents: Vec3,
    spacing: f32,
    debug_probe_size: f32,
    counts: [usize; 3],
    transforms: Vec<Transform>,
    built_position: Option<Vec3>,
}

impl ProbeVolume {
    /// Create a probe volume. `spacing` must be positive.
    pub fn new(position: Vec3, extents: Vec3, spacing: f32, debug_probe_size: f32) -> Self {
        let mut volume = Self {
            position,
            extents,
            spacing,
            debug_probe_size,
            counts: [0; 3],
            transforms: Vec::new(),
            built_position: None,
        };
        volume.update();
        volume
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Move the volume. Probe transforms follow on the next [`update`](Self::update).
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Probe count along x, y and z.
    pub fn counts(&self) -> [usize; 3] {
        self.counts
    }

    pub fn probe_count(&self) -> usize {
        self.transforms.len()
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    /// Rebuild the probe transforms if the volume moved since the last build.
    ///
    /// Returns `true` when the transforms were rebuilt.
    pub fn update(&mut self) -> bool {
        if self.built_position == Some(self.position) {
            return false;
        }
        self.rebuild();
        self.built_position = Some(self.position);
        true
    }

    fn rebuild(&mut self) {
        let per_axis = |extent: f32| {
            if self.spacing > 0.0 {
                (extent / self.spacing) as usize
            } else {
                0
            }
        };
        self.counts = [
            per_axis(self.extents.x),
            per_axis(self.extents.y),
            per_axis(self.extents.z),
        ];

        let half = self.extents / 2.0;
        self.transforms.clear();
        self.transforms
            .reserve(self.counts[0] * self.counts[1] * self.counts[2]);
        for x in 0..self.counts[0] {
            for y in 0..self.counts[1] {
                for z in 0..self.counts[2] {
                    let offset = Vec3::new(
                        x as f32 * self.spacing - half.x,
                        y as f32 * self.spacing - half.y,
                        z as f32 * self.spacing - half.z,
                    );
                    self.transforms.push(
                        Transform::identity()
                            .with_position(self.position + offset)
                            .with_uniform_scale(self.debug_probe_size),
                    );
                }
            }
        }
        log::debug!(
            "Probe volume rebuilt: {}x{}x{} probes",
            self.counts[0],
            self.counts[1],
            self.counts[2]
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_counts_follow_extent_over_spacing() {
        let volume = ProbeVolume::new(Vec3::zeros(), Vec3::new(4.0, 2.0, 3.0), 1.0, 0.1);
        assert_eq!(volume.counts(), [4, 2, 3]);
        assert_eq!(volume.probe_count(), 24);
    }

    #[test]
    fn test_first_probe_sits_at_min_corner() {
        let volume =
            ProbeVolume::new(Vec3::new(1.0, 1.0, 1.0), Vec3::new(2.0, 2.0, 2.0), 0.5, 0.25);
        let first = volume.transforms()[0];
        assert_eq!(first.position, Vec3::zeros());
        assert_eq!(first.scale, Vec3::new(0.25, 0.25, 0.25));
    }

    #[test]
    fn test_z_varies_fastest() {
        let volume = ProbeVolume::new(Vec3::zeros(), Vec3::new(2.0, 2.0, 2.0), 1.0, 0.1);
        let t = volume.transforms();
        assert_eq!(t[1].position - t[0].position, Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_update_only_rebuilds_after_move() {
        let mut volume = ProbeVolume::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0), 1.0, 0.1);
        assert!(!volume.update());
        volume.set_position(Vec3::new(0.0, 3.0, 0.0));
        assert!(volume.update());
        assert_eq!(volume.transforms()[0].position.y, 2.5);
    }
}
