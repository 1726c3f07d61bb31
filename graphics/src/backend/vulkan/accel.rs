//! Acceleration structure geometry, size queries and builds.

use ash::vk;

use crate::accel::{AccelBuildCommand, AccelBuildInputs, AccelGeometry, AccelKind, BuildMode};
use crate::error::GraphicsError;

use super::conversion::convert_accel_flags;
use super::{DeviceContext, Objects};

pub struct AccelObject {
    pub handle: vk::AccelerationStructureKHR,
    pub address: u64,
    pub kind: AccelKind,
}

/// Geometry of one build plus its per-geometry primitive counts.
struct Geometry {
    geometries: Vec<vk::AccelerationStructureGeometryKHR<'static>>,
    primitive_counts: Vec<u32>,
}

pub fn accel_type(kind: AccelKind) -> vk::AccelerationStructureTypeKHR {
    match kind {
        AccelKind::BottomLevel => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        AccelKind::TopLevel => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
    }
}

fn describe(objects: &Objects, inputs: &AccelBuildInputs) -> Result<Geometry, GraphicsError> {
    match &inputs.geometry {
        AccelGeometry::Triangles(triangles) => {
            let mut geometry = Geometry {
                geometries: Vec::with_capacity(triangles.len()),
                primitive_counts: Vec::with_capacity(triangles.len()),
            };
            for mesh in triangles {
                let data = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                    .vertex_format(vk::Format::R32G32B32_SFLOAT)
                    .vertex_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: objects.buffer(mesh.vertex_buffer)?.address,
                    })
                    .vertex_stride(mesh.vertex_stride)
                    .max_vertex(mesh.vertex_count.saturating_sub(1))
                    .index_type(vk::IndexType::UINT32)
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: objects.buffer(mesh.index_buffer)?.address,
                    });
                let flags = if mesh.opaque {
                    vk::GeometryFlagsKHR::OPAQUE
                } else {
                    vk::GeometryFlagsKHR::empty()
                };
                geometry.geometries.push(
                    vk::AccelerationStructureGeometryKHR::default()
                        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles: data })
                        .flags(flags),
                );
                geometry.primitive_counts.push(mesh.triangle_count());
            }
            Ok(geometry)
        }
        AccelGeometry::Instances {
            buffer,
            offset,
            count,
        } => {
            let data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
                .array_of_pointers(false)
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: objects.buffer(*buffer)?.address + offset,
                });
            Ok(Geometry {
                geometries: vec![
                    vk::AccelerationStructureGeometryKHR::default()
                        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                        .geometry(vk::AccelerationStructureGeometryDataKHR { instances: data }),
                ],
                primitive_counts: vec![*count],
            })
        }
    }
}

/// Sizes of the result and scratch buffers a build of `inputs` needs.
pub fn build_sizes(
    ctx: &DeviceContext,
    objects: &Objects,
    inputs: &AccelBuildInputs,
) -> Result<vk::AccelerationStructureBuildSizesInfoKHR<'static>, GraphicsError> {
    let loader = ctx.accel_loader()?;
    let geometry = describe(objects, inputs)?;
    let info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(accel_type(inputs.kind()))
        .flags(convert_accel_flags(inputs.flags))
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(&geometry.geometries);

    let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
    unsafe {
        loader.get_acceleration_structure_build_sizes(
            vk::AccelerationStructureBuildTypeKHR::DEVICE,
            &info,
            &geometry.primitive_counts,
            &mut sizes,
        );
    }
    Ok(sizes)
}

/// Record a build (or refit) into `cmd`.
pub fn record_build(
    ctx: &DeviceContext,
    objects: &Objects,
    cmd: vk::CommandBuffer,
    build: &AccelBuildCommand,
) -> Result<(), GraphicsError> {
    let loader = ctx.accel_loader()?;
    let dst = objects.accel(build.dst)?;
    if dst.kind != build.inputs.kind() {
        return Err(GraphicsError::InvalidParameter(format!(
            "{:?} inputs built into a {:?} structure",
            build.inputs.kind(),
            dst.kind
        )));
    }
    let scratch = objects.buffer(build.scratch)?.address;
    if scratch % ctx.profile.scratch_alignment != 0 {
        return Err(GraphicsError::InvalidParameter(format!(
            "scratch address {scratch:#x} is not {}-byte aligned",
            ctx.profile.scratch_alignment
        )));
    }

    let geometry = describe(objects, &build.inputs)?;
    let (mode, src) = match build.mode {
        BuildMode::Build => (
            vk::BuildAccelerationStructureModeKHR::BUILD,
            vk::AccelerationStructureKHR::null(),
        ),
        BuildMode::Update => (vk::BuildAccelerationStructureModeKHR::UPDATE, dst.handle),
    };
    let info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(accel_type(dst.kind))
        .flags(convert_accel_flags(build.inputs.flags))
        .mode(mode)
        .src_acceleration_structure(src)
        .dst_acceleration_structure(dst.handle)
        .geometries(&geometry.geometries)
        .scratch_data(vk::DeviceOrHostAddressKHR {
            device_address: scratch,
        });
    let ranges: Vec<vk::AccelerationStructureBuildRangeInfoKHR> = geometry
        .primitive_counts
        .iter()
        .map(|&count| vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(count))
        .collect();

    unsafe { loader.cmd_build_acceleration_structures(cmd, &[info], &[&ranges]) };
    Ok(())
}
