//! Vulkan physical and logical device management.

use std::ffi::{CStr, CString, c_char};

use ash::vk;

use crate::device::{AdapterInfo, AdapterType, DeviceCapabilities};
use crate::error::GraphicsError;

use super::conversion::vendor_name;
use super::instance::REQUIRED_API_VERSION;

/// Upper bound on descriptor heap slots, whatever the device reports.
const MAX_HEAP_SLOTS: u32 = 1 << 16;

const REQUIRED_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME, ash::khr::push_descriptor::NAME];

const RAY_TRACING_EXTENSIONS: &[&CStr] = &[
    ash::khr::acceleration_structure::NAME,
    ash::khr::ray_tracing_pipeline::NAME,
    ash::khr::deferred_host_operations::NAME,
];

/// Per-binding slot counts of the shader-visible heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLimits {
    pub sampled_images: u32,
    pub storage_images: u32,
    pub uniform_buffers: u32,
    pub acceleration_structures: u32,
}

/// What the backend needs to know about the opened device.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub capabilities: DeviceCapabilities,
    pub heap_limits: HeapLimits,
    pub max_uniform_range: u64,
    pub max_push_constants: u32,
    pub scratch_alignment: u64,
    pub anisotropy: bool,
}

fn device_extensions(instance: &ash::Instance, device: vk::PhysicalDevice) -> Vec<CString> {
    unsafe { instance.enumerate_device_extension_properties(device) }
        .unwrap_or_default()
        .iter()
        .filter_map(|ext| ext.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect()
}

fn has_all(available: &[CString], wanted: &[&CStr]) -> bool {
    wanted
        .iter()
        .all(|name| available.iter().any(|a| a.as_c_str() == *name))
}

/// Find a queue family that supports graphics and compute operations.
pub fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<u32> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families
        .iter()
        .position(|family| {
            family
                .queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
}

/// Whether the core features the renderer relies on are present.
fn supports_required_features(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
    {
        let mut features = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut features12)
            .push_next(&mut features13);
        unsafe { instance.get_physical_device_features2(device, &mut features) };
    }

    features12.timeline_semaphore == vk::TRUE
        && features12.buffer_device_address == vk::TRUE
        && features12.descriptor_indexing == vk::TRUE
        && features12.runtime_descriptor_array == vk::TRUE
        && features12.descriptor_binding_partially_bound == vk::TRUE
        && features12.descriptor_binding_update_unused_while_pending == vk::TRUE
        && features12.descriptor_binding_sampled_image_update_after_bind == vk::TRUE
        && features12.descriptor_binding_storage_image_update_after_bind == vk::TRUE
        && features12.descriptor_binding_uniform_buffer_update_after_bind == vk::TRUE
        && features13.dynamic_rendering == vk::TRUE
        && features13.synchronization2 == vk::TRUE
}

fn supports_ray_tracing(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    extensions: &[CString],
) -> bool {
    if !has_all(extensions, RAY_TRACING_EXTENSIONS) {
        return false;
    }
    let mut accel = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
    let mut pipeline = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
    {
        let mut features = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut accel)
            .push_next(&mut pipeline);
        unsafe { instance.get_physical_device_features2(device, &mut features) };
    }
    accel.acceleration_structure == vk::TRUE
        && accel.descriptor_binding_acceleration_structure_update_after_bind == vk::TRUE
        && pipeline.ray_tracing_pipeline == vk::TRUE
}

/// Describe a physical device as an adapter.
///
/// The minimum feature level is Vulkan 1.3 with a graphics queue, the
/// swap chain and push descriptor extensions, and the bindless and
/// timeline features the backend relies on.
pub fn describe_adapter(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    index: usize,
) -> AdapterInfo {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let memory = unsafe { instance.get_physical_device_memory_properties(physical_device) };

    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "Unknown Vulkan device".to_string());

    let device_type = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => AdapterType::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterType::Integrated,
        vk::PhysicalDeviceType::CPU => AdapterType::Software,
        _ => AdapterType::Unknown,
    };

    // Integrated adapters report shared system memory as device-local.
    let dedicated_memory = if device_type == AdapterType::Discrete {
        memory
            .memory_heaps_as_slice()
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    } else {
        0
    };

    let extensions = device_extensions(instance, physical_device);
    let meets_minimum = properties.api_version >= REQUIRED_API_VERSION
        && find_graphics_queue_family(instance, physical_device).is_some()
        && has_all(&extensions, REQUIRED_EXTENSIONS)
        && supports_required_features(instance, physical_device);

    log::info!(
        "Found GPU: {name} (type: {:?}, memory: {} MiB, usable: {meets_minimum})",
        properties.device_type,
        dedicated_memory >> 20
    );

    AdapterInfo {
        vendor: vendor_name(properties.vendor_id).to_string(),
        ..AdapterInfo::new(index, name, device_type, dedicated_memory)
    }
    .with_minimum_feature_level(meets_minimum)
}

/// Create a logical device with one universal queue.
///
/// Returns the device and whether ray tracing was enabled on it.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<(ash::Device, bool), GraphicsError> {
    let available = device_extensions(instance, physical_device);
    let ray_tracing = supports_ray_tracing(instance, physical_device, &available);
    let anisotropy = unsafe { instance.get_physical_device_features(physical_device) }
        .sampler_anisotropy
        == vk::TRUE;

    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&queue_priorities)];

    let mut extensions: Vec<*const c_char> =
        REQUIRED_EXTENSIONS.iter().map(|name| name.as_ptr()).collect();
    if ray_tracing {
        extensions.extend(RAY_TRACING_EXTENSIONS.iter().map(|name| name.as_ptr()));
    }

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(anisotropy);
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
        .timeline_semaphore(true)
        .buffer_device_address(true)
        .descriptor_indexing(true)
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_update_unused_while_pending(true)
        .descriptor_binding_sampled_image_update_after_bind(true)
        .descriptor_binding_storage_image_update_after_bind(true)
        .descriptor_binding_uniform_buffer_update_after_bind(true);
    let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);
    let mut accel_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
        .acceleration_structure(true)
        .descriptor_binding_acceleration_structure_update_after_bind(true);
    let mut pipeline_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true);

    let mut create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features)
        .push_next(&mut features12)
        .push_next(&mut features13);
    if ray_tracing {
        create_info = create_info
            .push_next(&mut accel_features)
            .push_next(&mut pipeline_features);
    }

    let device =
        unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create logical device: {e:?}"))
        })?;

    Ok((device, ray_tracing))
}

/// Query limits and feature support of the opened device.
pub fn query_profile(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    ray_tracing: bool,
) -> DeviceProfile {
    let mut props11 = vk::PhysicalDeviceVulkan11Properties::default();
    let mut props12 = vk::PhysicalDeviceVulkan12Properties::default();
    let mut rt_props = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
    let mut accel_props = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
    let limits = {
        let mut properties = vk::PhysicalDeviceProperties2::default()
            .push_next(&mut props11)
            .push_next(&mut props12);
        if ray_tracing {
            properties = properties
                .push_next(&mut rt_props)
                .push_next(&mut accel_props);
        }
        unsafe { instance.get_physical_device_properties2(physical_device, &mut properties) };
        properties.properties.limits
    };
    let anisotropy = unsafe { instance.get_physical_device_features(physical_device) }
        .sampler_anisotropy
        == vk::TRUE;

    let heap_limits = HeapLimits {
        sampled_images: props12
            .max_per_stage_descriptor_update_after_bind_sampled_images
            .min(MAX_HEAP_SLOTS),
        storage_images: props12
            .max_per_stage_descriptor_update_after_bind_storage_images
            .min(MAX_HEAP_SLOTS),
        uniform_buffers: props12
            .max_per_stage_descriptor_update_after_bind_uniform_buffers
            .min(MAX_HEAP_SLOTS),
        acceleration_structures: if ray_tracing {
            accel_props
                .max_per_stage_descriptor_update_after_bind_acceleration_structures
                .min(MAX_HEAP_SLOTS)
        } else {
            0
        },
    };

    let defaults = DeviceCapabilities::default();
    let capabilities = DeviceCapabilities {
        max_texture_dimension: limits.max_image_dimension2_d,
        max_buffer_size: props11.max_memory_allocation_size,
        // Immediate presentation is chosen per surface, falling back to FIFO.
        tearing_supported: true,
        ray_tracing,
        shader_identifier_size: if ray_tracing {
            rt_props.shader_group_handle_size
        } else {
            defaults.shader_identifier_size
        },
        shader_record_alignment: if ray_tracing {
            rt_props.shader_group_handle_alignment
        } else {
            defaults.shader_record_alignment
        },
        shader_table_alignment: if ray_tracing {
            rt_props.shader_group_base_alignment
        } else {
            defaults.shader_table_alignment
        },
        render_target_descriptor_size: defaults.render_target_descriptor_size,
        max_descriptor_heap_size: heap_limits.sampled_images.min(heap_limits.storage_images),
    };

    DeviceProfile {
        capabilities,
        heap_limits,
        max_uniform_range: limits.max_uniform_buffer_range as u64,
        max_push_constants: limits.max_push_constants_size,
        scratch_alignment: (accel_props.min_acceleration_structure_scratch_offset_alignment
            as u64)
            .max(1),
        anisotropy,
    }
}
