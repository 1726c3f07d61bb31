//! Ray tracing acceleration structures.
//!
//! A [`Blas`] is built once per mesh on the upload queue and is immutable
//! afterwards. A [`Tlas`] holds one instance record per object, each pairing
//! a transform with a BLAS address; it is rebuilt inside the frame on the
//! direct queue, followed by a UAV barrier so a dispatch on the same list
//! never traces a structure that is still being written.

use std::sync::Arc;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use lumen_core::math::{Mat4, mat4_to_rows_3x4};

use crate::backend::{AccelId, BufferId, GpuBackend};
use crate::command::CommandList;
use crate::device::GpuDevice;
use crate::error::GraphicsError;
use crate::resources::{Buffer, align_up};
use crate::staging::{Mesh, UploadQueue};
use crate::types::{BufferDescriptor, BufferUsage, ResourceBarrier, ResourceState};

/// Alignment of acceleration structure storage and scratch memory.
pub const ACCEL_ALIGNMENT: u64 = 256;

/// Level of an acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelKind {
    /// Built over triangle geometry.
    BottomLevel,
    /// Built over instances of bottom-level structures.
    TopLevel,
}

bitflags! {
    /// Build preferences.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccelBuildFlags: u32 {
        /// Allow later builds to refit this structure in place.
        const ALLOW_UPDATE = 1 << 0;
        const PREFER_FAST_TRACE = 1 << 1;
        const PREFER_FAST_BUILD = 1 << 2;
    }
}

bitflags! {
    /// Per-instance flags, shared by D3D12 and Vulkan.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstanceFlags: u8 {
        const TRIANGLE_CULL_DISABLE = 1 << 0;
        const TRIANGLE_FRONT_COUNTERCLOCKWISE = 1 << 1;
        const FORCE_OPAQUE = 1 << 2;
        const FORCE_NON_OPAQUE = 1 << 3;
    }
}

/// Indexed triangle geometry read by a bottom-level build.
///
/// Positions are three floats at the start of each vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriangleGeometry {
    pub vertex_buffer: BufferId,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub index_buffer: BufferId,
    pub index_count: u32,
    pub opaque: bool,
}

impl TriangleGeometry {
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

/// What a build reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccelGeometry {
    Triangles(Vec<TriangleGeometry>),
    /// `count` [`TlasInstance`] records at `offset` in `buffer`.
    Instances {
        buffer: BufferId,
        offset: u64,
        count: u32,
    },
}

/// Inputs of a build, also used for the size query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccelBuildInputs {
    pub geometry: AccelGeometry,
    pub flags: AccelBuildFlags,
}

impl AccelBuildInputs {
    pub fn kind(&self) -> AccelKind {
        match self.geometry {
            AccelGeometry::Triangles(_) => AccelKind::BottomLevel,
            AccelGeometry::Instances { .. } => AccelKind::TopLevel,
        }
    }
}

/// Buffer sizes a build needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccelPrebuildInfo {
    pub result_size: u64,
    pub scratch_size: u64,
    pub update_scratch_size: u64,
}

/// Whether a build starts from scratch or refits the previous result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BuildMode {
    #[default]
    Build,
    /// Refit in place. Requires [`AccelBuildFlags::ALLOW_UPDATE`] and a prior build.
    Update,
}

/// A recorded acceleration structure build.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccelBuildCommand {
    pub dst: AccelId,
    pub inputs: AccelBuildInputs,
    pub scratch: BufferId,
    pub mode: BuildMode,
}

/// One TLAS instance record, laid out as both D3D12 and Vulkan expect it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TlasInstance {
    /// Row-major 3x4 object-to-world transform.
    pub transform: [[f32; 4]; 3],
    /// Instance id in the low 24 bits, visibility mask in the high 8.
    pub id_and_mask: u32,
    /// Hit group offset in the low 24 bits, [`InstanceFlags`] in the high 8.
    pub hit_group_and_flags: u32,
    /// Address of the referenced bottom-level structure.
    pub blas_address: u64,
}

static_assertions::const_assert_eq!(std::mem::size_of::<TlasInstance>(), 64);

impl TlasInstance {
    pub fn new(blas_address: u64, transform: &Mat4, instance_id: u32) -> Self {
        Self {
            transform: mat4_to_rows_3x4(transform),
            id_and_mask: (instance_id & 0x00FF_FFFF) | (0xFF << 24),
            hit_group_and_flags: (InstanceFlags::TRIANGLE_CULL_DISABLE.bits() as u32) << 24,
            blas_address,
        }
    }

    pub fn instance_id(&self) -> u32 {
        self.id_and_mask & 0x00FF_FFFF
    }

    pub fn mask(&self) -> u8 {
        (self.id_and_mask >> 24) as u8
    }

    pub fn hit_group_offset(&self) -> u32 {
        self.hit_group_and_flags & 0x00FF_FFFF
    }

    pub fn flags(&self) -> InstanceFlags {
        InstanceFlags::from_bits_truncate((self.hit_group_and_flags >> 24) as u8)
    }

    #[must_use]
    pub fn with_mask(mut self, mask: u8) -> Self {
        self.id_and_mask = (self.id_and_mask & 0x00FF_FFFF) | ((mask as u32) << 24);
        self
    }

    #[must_use]
    pub fn with_hit_group_offset(mut self, offset: u32) -> Self {
        self.hit_group_and_flags =
            (self.hit_group_and_flags & 0xFF00_0000) | (offset & 0x00FF_FFFF);
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: InstanceFlags) -> Self {
        self.hit_group_and_flags =
            (self.hit_group_and_flags & 0x00FF_FFFF) | ((flags.bits() as u32) << 24);
        self
    }
}

/// Backend acceleration structure object placed in a result buffer.
struct AccelHandle {
    backend: Arc<dyn GpuBackend>,
    id: AccelId,
}

impl Drop for AccelHandle {
    fn drop(&mut self) {
        self.backend.destroy_acceleration_structure(self.id);
    }
}

fn create_storage(
    device: &GpuDevice,
    kind: AccelKind,
    sizes: &AccelPrebuildInfo,
    label: &str,
) -> Result<(Buffer, Buffer, AccelHandle), GraphicsError> {
    let result = device.create_buffer(
        &BufferDescriptor::gpu(
            align_up(sizes.result_size, ACCEL_ALIGNMENT),
            BufferUsage::ACCELERATION_STRUCTURE,
            ResourceState::AccelerationStructure,
        )
        .with_label(format!("{label}_result")),
    )?;
    let scratch_size = sizes.scratch_size.max(sizes.update_scratch_size);
    let scratch = device.create_buffer(
        &BufferDescriptor::gpu(
            align_up(scratch_size.max(1), ACCEL_ALIGNMENT),
            BufferUsage::UNORDERED_ACCESS,
            ResourceState::UnorderedAccess,
        )
        .with_label(format!("{label}_scratch")),
    )?;
    let id = device
        .backend()
        .create_acceleration_structure(kind, result.id(), result.size())?;
    let handle = AccelHandle {
        backend: device.backend().clone(),
        id,
    };
    Ok((result, scratch, handle))
}

/// Bottom-level structure over one mesh.
pub struct Blas {
    // Field order matters: the handle is released before its storage.
    handle: AccelHandle,
    result: Buffer,
    _scratch: Buffer,
    address: u64,
    sizes: AccelPrebuildInfo,
}

impl Blas {
    /// Build the structure for `mesh` on the upload queue and wait for it.
    pub fn new(
        device: &GpuDevice,
        upload: &mut UploadQueue,
        mesh: &Mesh,
    ) -> Result<Self, GraphicsError> {
        let inputs = AccelBuildInputs {
            geometry: AccelGeometry::Triangles(vec![mesh.triangle_geometry()]),
            flags: AccelBuildFlags::PREFER_FAST_TRACE,
        };
        let sizes = device.backend().acceleration_structure_sizes(&inputs)?;
        let label = mesh.label().unwrap_or("mesh");
        let (result, scratch, handle) =
            create_storage(device, AccelKind::BottomLevel, &sizes, &format!("{label}_blas"))?;

        let command = AccelBuildCommand {
            dst: handle.id,
            inputs,
            scratch: scratch.id(),
            mode: BuildMode::Build,
        };
        let result_id = result.id();
        upload.execute(|list| {
            list.build_acceleration_structure(command);
            list.resource_barrier(&[ResourceBarrier::uav(result_id)]);
            Ok(())
        })?;

        let address = device.backend().acceleration_structure_address(handle.id)?;
        log::debug!(
            "Built BLAS '{label}' ({} triangles, {} bytes)",
            mesh.index_count() / 3,
            sizes.result_size
        );
        Ok(Self {
            handle,
            result,
            _scratch: scratch,
            address,
            sizes,
        })
    }

    pub fn id(&self) -> AccelId {
        self.handle.id
    }

    /// Address instance records reference this structure by.
    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn result_buffer(&self) -> &Buffer {
        &self.result
    }

    pub fn sizes(&self) -> &AccelPrebuildInfo {
        &self.sizes
    }
}

impl std::fmt::Debug for Blas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blas")
            .field("id", &self.handle.id)
            .field("address", &self.address)
            .finish()
    }
}

/// Top-level structure over a fixed number of instances.
///
/// Instance records are staged through an upload buffer with one region per
/// back buffer, so rewriting them for frame N never races the build of a
/// frame still in flight.
pub struct Tlas {
    handle: AccelHandle,
    result: Buffer,
    scratch: Buffer,
    instance_upload: Buffer,
    region_size: u64,
    region_count: u32,
    instances: Vec<TlasInstance>,
    flags: AccelBuildFlags,
    built: bool,
}

impl Tlas {
    /// Create a TLAS with `instance_count` identity instances and no BLAS bound.
    pub fn new(
        device: &GpuDevice,
        instance_count: u32,
        region_count: u32,
        allow_update: bool,
    ) -> Result<Self, GraphicsError> {
        if instance_count == 0 || region_count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "TLAS needs at least one instance and one upload region".to_string(),
            ));
        }
        let mut flags = AccelBuildFlags::PREFER_FAST_TRACE;
        if allow_update {
            flags |= AccelBuildFlags::ALLOW_UPDATE;
        }

        let region_size = align_up(
            instance_count as u64 * std::mem::size_of::<TlasInstance>() as u64,
            ACCEL_ALIGNMENT,
        );
        let instance_upload = device.create_buffer(
            &BufferDescriptor::upload(
                region_size * region_count as u64,
                BufferUsage::ACCELERATION_STRUCTURE_INPUT,
            )
            .with_label("tlas_instances"),
        )?;

        let sizes = device
            .backend()
            .acceleration_structure_sizes(&AccelBuildInputs {
                geometry: AccelGeometry::Instances {
                    buffer: instance_upload.id(),
                    offset: 0,
                    count: instance_count,
                },
                flags,
            })?;
        let (result, scratch, handle) = create_storage(device, AccelKind::TopLevel, &sizes, "tlas")?;

        let identity = TlasInstance::new(0, &Mat4::identity(), 0);
        let instances = (0..instance_count)
            .map(|i| TlasInstance { id_and_mask: i | (0xFF << 24), ..identity })
            .collect();

        log::debug!("Created TLAS with {instance_count} instances (allow update: {allow_update})");
        Ok(Self {
            handle,
            result,
            scratch,
            instance_upload,
            region_size,
            region_count,
            instances,
            flags,
            built: false,
        })
    }

    pub fn id(&self) -> AccelId {
        self.handle.id
    }

    pub fn result_buffer(&self) -> &Buffer {
        &self.result
    }

    pub fn instance_count(&self) -> u32 {
        self.instances.len() as u32
    }

    pub fn instances(&self) -> &[TlasInstance] {
        &self.instances
    }

    pub fn allows_update(&self) -> bool {
        self.flags.contains(AccelBuildFlags::ALLOW_UPDATE)
    }

    /// Whether a build has been recorded since creation.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Point instance `index` at `blas` with the given object-to-world transform.
    pub fn set_instance_blas_and_transform(
        &mut self,
        index: u32,
        blas: &Blas,
        transform: &Mat4,
    ) -> Result<(), GraphicsError> {
        let instance = self.instance_mut(index)?;
        instance.blas_address = blas.address();
        instance.transform = mat4_to_rows_3x4(transform);
        Ok(())
    }

    /// Replace instance `index` entirely.
    pub fn set_instance(
        &mut self,
        index: u32,
        instance: TlasInstance,
    ) -> Result<(), GraphicsError> {
        *self.instance_mut(index)? = instance;
        Ok(())
    }

    fn instance_mut(&mut self, index: u32) -> Result<&mut TlasInstance, GraphicsError> {
        let count = self.instances.len();
        self.instances.get_mut(index as usize).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "TLAS instance {index} out of range ({count} instances)"
            ))
        })
    }

    /// Byte offset of the instance upload region for back buffer `slot`.
    pub fn instance_region_offset(&self, slot: u32) -> u64 {
        (slot % self.region_count) as u64 * self.region_size
    }

    /// Read the instance records last staged for `slot`.
    pub fn read_staged_instances(&self, slot: u32) -> Result<Vec<TlasInstance>, GraphicsError> {
        let mut bytes = vec![0u8; self.instances.len() * std::mem::size_of::<TlasInstance>()];
        self.instance_upload
            .read(self.instance_region_offset(slot), &mut bytes)?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<TlasInstance>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Stage the instances into `slot`'s region and record a build followed
    /// by a UAV barrier.
    ///
    /// With `mode == Update` the structure is refit in place; this requires
    /// `allow_update` at creation and a previous build, otherwise a full
    /// build is recorded.
    pub fn record_build(
        &mut self,
        list: &mut CommandList,
        slot: u32,
        mode: BuildMode,
    ) -> Result<(), GraphicsError> {
        let offset = self.instance_region_offset(slot);
        self.instance_upload
            .write(offset, bytemuck::cast_slice(&self.instances))?;

        let mode = match mode {
            BuildMode::Update if self.built && self.allows_update() => BuildMode::Update,
            BuildMode::Update => {
                log::debug!("TLAS update requested without a refittable build, rebuilding");
                BuildMode::Build
            }
            BuildMode::Build => BuildMode::Build,
        };

        list.build_acceleration_structure(AccelBuildCommand {
            dst: self.handle.id,
            inputs: AccelBuildInputs {
                geometry: AccelGeometry::Instances {
                    buffer: self.instance_upload.id(),
                    offset,
                    count: self.instances.len() as u32,
                },
                flags: self.flags,
            },
            scratch: self.scratch.id(),
            mode,
        });
        list.resource_barrier(&[ResourceBarrier::uav(self.result.id())]);
        self.built = true;
        Ok(())
    }

    /// Build on the upload queue and wait, for use outside a frame.
    pub fn build_now(&mut self, upload: &mut UploadQueue) -> Result<(), GraphicsError> {
        upload.execute(|list| self.record_build(list, 0, BuildMode::Build))
    }
}

impl std::fmt::Debug for Tlas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tlas")
            .field("id", &self.handle.id)
            .field("instances", &self.instances.len())
            .field("flags", &self.flags)
            .field("built", &self.built)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::command::Command;
    use crate::device::{AdapterInfo, AdapterType};
    use lumen_core::math::{Quat, Vec3, mat4_from_scale_rotation_translation};
    use std::time::Duration;

    fn dummy_device() -> GpuDevice {
        GpuDevice::new(
            AdapterInfo::new(0, "Test Adapter", AdapterType::Discrete, 1 << 30),
            Arc::new(DummyBackend::new()),
        )
    }

    fn recorded_mode(list: &CommandList) -> Option<BuildMode> {
        list.commands().iter().find_map(|command| match command {
            Command::BuildAccelerationStructure(build) => Some(build.mode),
            _ => None,
        })
    }

    #[test]
    fn test_instance_record_packing() {
        let transform = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let instance = TlasInstance::new(0xABCD_0000, &transform, 5);
        assert_eq!(instance.instance_id(), 5);
        assert_eq!(instance.mask(), 0xFF);
        assert_eq!(instance.hit_group_offset(), 0);
        assert_eq!(instance.flags(), InstanceFlags::TRIANGLE_CULL_DISABLE);
        assert_eq!(instance.transform[0][3], 1.0);
        assert_eq!(instance.transform[1][3], 2.0);
        assert_eq!(instance.transform[2][3], 3.0);

        let instance = instance
            .with_mask(0x0F)
            .with_hit_group_offset(3)
            .with_flags(InstanceFlags::FORCE_OPAQUE);
        assert_eq!(instance.instance_id(), 5);
        assert_eq!(instance.mask(), 0x0F);
        assert_eq!(instance.hit_group_offset(), 3);
        assert_eq!(instance.flags(), InstanceFlags::FORCE_OPAQUE);
    }

    #[test]
    fn test_instance_layout_offsets() {
        assert_eq!(std::mem::offset_of!(TlasInstance, id_and_mask), 48);
        assert_eq!(std::mem::offset_of!(TlasInstance, hit_group_and_flags), 52);
        assert_eq!(std::mem::offset_of!(TlasInstance, blas_address), 56);
    }

    #[test]
    fn test_build_inputs_kind() {
        let tlas = AccelBuildInputs {
            geometry: AccelGeometry::Instances {
                buffer: BufferId(1),
                offset: 0,
                count: 4,
            },
            flags: AccelBuildFlags::empty(),
        };
        assert_eq!(tlas.kind(), AccelKind::TopLevel);
    }

    #[test]
    fn test_scaled_transform_rows() {
        let m = mat4_from_scale_rotation_translation(
            Vec3::new(2.0, 2.0, 2.0),
            Quat::identity(),
            Vec3::zeros(),
        );
        let instance = TlasInstance::new(0, &m, 0);
        assert_eq!(instance.transform[0], [2.0, 0.0, 0.0, 0.0]);
        assert_eq!(instance.transform[2], [0.0, 0.0, 2.0, 0.0]);
    }

    #[test]
    fn test_explicit_update_and_staged_read_back() {
        let device = dummy_device();
        let mut upload = UploadQueue::new(&device, Duration::from_secs(5)).unwrap();
        let mut tlas = Tlas::new(&device, 2, 3, true).unwrap();
        let moved = Mat4::new_translation(&Vec3::new(0.0, 4.0, 0.0));
        tlas.set_instance(1, TlasInstance::new(0, &moved, 7)).unwrap();

        let mut modes = Vec::new();
        for _ in 0..2 {
            upload
                .execute(|list| {
                    tlas.record_build(list, 2, BuildMode::Update)?;
                    modes.push(recorded_mode(list));
                    Ok(())
                })
                .unwrap();
        }
        // The first refit request has nothing to refit yet.
        assert_eq!(modes, vec![Some(BuildMode::Build), Some(BuildMode::Update)]);

        let staged = tlas.read_staged_instances(2).unwrap();
        assert_eq!(staged.len(), 2);
        assert_eq!(staged[1].instance_id(), 7);
        assert_eq!(staged[1].transform[1][3], 4.0);
    }
}
