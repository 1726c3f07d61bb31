//! Shader-visible descriptor heaps.
//!
//! A heap is one update-after-bind descriptor set with a runtime array per
//! view kind. Slot `i` of the heap is array element `i` of the binding its
//! kind maps to, so shaders index every array with the same slot numbers:
//!
//! | binding | kind | descriptor type |
//! |---------|------|-----------------|
//! | 0 | shader resource | sampled image |
//! | 1 | unordered access | storage image |
//! | 2 | constant buffer | uniform buffer |
//! | 3 | acceleration structure | acceleration structure |

use ash::vk;

use crate::descriptor::{DescriptorIndex, DescriptorKind};
use crate::error::GraphicsError;

use super::device::HeapLimits;

/// Set index of the heap in every pipeline layout.
pub const HEAP_SET: u32 = 0;

fn binding_of(kind: DescriptorKind) -> u32 {
    match kind {
        DescriptorKind::ShaderResource => 0,
        DescriptorKind::UnorderedAccess => 1,
        DescriptorKind::ConstantBuffer => 2,
        DescriptorKind::AccelerationStructure => 3,
    }
}

fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::ShaderResource => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorKind::UnorderedAccess => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorKind::ConstantBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
    }
}

fn limit_of(limits: &HeapLimits, kind: DescriptorKind) -> u32 {
    match kind {
        DescriptorKind::ShaderResource => limits.sampled_images,
        DescriptorKind::UnorderedAccess => limits.storage_images,
        DescriptorKind::ConstantBuffer => limits.uniform_buffers,
        DescriptorKind::AccelerationStructure => limits.acceleration_structures,
    }
}

/// Kinds with at least one slot on this device, in binding order.
fn kinds(limits: &HeapLimits) -> impl Iterator<Item = DescriptorKind> + '_ {
    [
        DescriptorKind::ShaderResource,
        DescriptorKind::UnorderedAccess,
        DescriptorKind::ConstantBuffer,
        DescriptorKind::AccelerationStructure,
    ]
    .into_iter()
    .filter(|&kind| limit_of(limits, kind) > 0)
}

/// Create the set layout shared by every heap and every pipeline layout.
pub fn create_heap_set_layout(
    device: &ash::Device,
    limits: &HeapLimits,
) -> Result<vk::DescriptorSetLayout, GraphicsError> {
    let bindings: Vec<vk::DescriptorSetLayoutBinding> = kinds(limits)
        .map(|kind| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding_of(kind))
                .descriptor_type(descriptor_type(kind))
                .descriptor_count(limit_of(limits, kind))
                .stage_flags(vk::ShaderStageFlags::ALL)
        })
        .collect();
    let flags = vec![
        vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING;
        bindings.len()
    ];
    let mut binding_flags =
        vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&flags);
    let create_info = vk::DescriptorSetLayoutCreateInfo::default()
        .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
        .bindings(&bindings)
        .push_next(&mut binding_flags);

    unsafe { device.create_descriptor_set_layout(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create heap set layout: {e:?}"))
    })
}

pub struct DescriptorHeapObject {
    pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
    capacity: u32,
}

impl DescriptorHeapObject {
    pub fn new(
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
        limits: &HeapLimits,
        capacity: u32,
    ) -> Result<Self, GraphicsError> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = kinds(limits)
            .map(|kind| vk::DescriptorPoolSize {
                ty: descriptor_type(kind),
                descriptor_count: limit_of(limits, kind),
            })
            .collect();
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!(
                "Failed to create descriptor pool: {e:?}"
            ))
        })?;

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let set = match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe { device.destroy_descriptor_pool(pool, None) };
                return Err(GraphicsError::ResourceCreationFailed(format!(
                    "Failed to allocate heap descriptor set: {e:?}"
                )));
            }
        };

        Ok(Self {
            pool,
            set,
            capacity,
        })
    }

    /// Write one view into `index`.
    pub fn write(
        &self,
        device: &ash::Device,
        limits: &HeapLimits,
        index: DescriptorIndex,
        view: ResolvedView,
    ) -> Result<(), GraphicsError> {
        let kind = view.kind();
        if index.get() >= self.capacity || index.get() >= limit_of(limits, kind) {
            return Err(GraphicsError::InvalidParameter(format!(
                "descriptor slot {} out of range for {kind:?} views",
                index.get()
            )));
        }

        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding_of(kind))
            .dst_array_element(index.get())
            .descriptor_type(descriptor_type(kind));

        match view {
            ResolvedView::SampledImage(view) | ResolvedView::StorageImage(view) => {
                let layout = if kind == DescriptorKind::ShaderResource {
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                } else {
                    vk::ImageLayout::GENERAL
                };
                let images = [vk::DescriptorImageInfo::default()
                    .image_view(view)
                    .image_layout(layout)];
                unsafe { device.update_descriptor_sets(&[write.image_info(&images)], &[]) };
            }
            ResolvedView::UniformBuffer {
                buffer,
                offset,
                range,
            } => {
                let buffers = [vk::DescriptorBufferInfo::default()
                    .buffer(buffer)
                    .offset(offset)
                    .range(range)];
                unsafe { device.update_descriptor_sets(&[write.buffer_info(&buffers)], &[]) };
            }
            ResolvedView::AccelerationStructure(accel) => {
                let structures = [accel];
                let mut accel_write = vk::WriteDescriptorSetAccelerationStructureKHR::default()
                    .acceleration_structures(&structures);
                let write = write.descriptor_count(1).push_next(&mut accel_write);
                unsafe { device.update_descriptor_sets(&[write], &[]) };
            }
        }
        Ok(())
    }

    pub fn destroy(self, device: &ash::Device) {
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
    }
}

/// A binding with its ids resolved to Vulkan handles.
#[derive(Debug, Clone, Copy)]
pub enum ResolvedView {
    SampledImage(vk::ImageView),
    StorageImage(vk::ImageView),
    UniformBuffer {
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
    AccelerationStructure(vk::AccelerationStructureKHR),
}

impl ResolvedView {
    fn kind(&self) -> DescriptorKind {
        match self {
            Self::SampledImage(_) => DescriptorKind::ShaderResource,
            Self::StorageImage(_) => DescriptorKind::UnorderedAccess,
            Self::UniformBuffer { .. } => DescriptorKind::ConstantBuffer,
            Self::AccelerationStructure(_) => DescriptorKind::AccelerationStructure,
        }
    }
}
