//! Native Vulkan backend implementation using ash.
//!
//! The backend maps the renderer's explicit model onto Vulkan 1.3:
//!
//! - every queue kind runs on one universal queue
//! - fences are timeline semaphores
//! - descriptor heaps are update-after-bind descriptor sets
//! - passes use dynamic rendering, barriers use synchronization2
//!
//! Every submission also signals an internal "progress" timeline. Command
//! allocator resets are checked against it, and destroyed objects wait in a
//! graveyard until the progress value they were last used at completes.

mod accel;
mod allocator;
mod command;
pub(crate) mod conversion;
mod debug;
mod descriptor;
mod device;
mod instance;
mod pipeline;
mod swapchain;

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;

use crate::accel::{AccelBuildInputs, AccelKind, AccelPrebuildInfo};
use crate::command::{CommandList, QueueKind};
use crate::descriptor::{DescriptorBinding, DescriptorHeapLayout, DescriptorIndex};
use crate::device::{AdapterInfo, DeviceCapabilities};
use crate::error::GraphicsError;
use crate::instance::InstanceParameters;
use crate::pipeline::{GraphicsPipelineDesc, RayTracingPipelineDesc};
use crate::swapchain::{PresentRequest, SurfaceTarget, SwapChainDescriptor};
use crate::types::{BufferDescriptor, BufferUsage, TextureDescriptor, TextureFormat};

use super::{
    AccelId, AllocatorId, BufferId, DescriptorHeapId, FenceId, GpuBackend, GpuInstance,
    PipelineId, QueueId, SwapChainId, TextureId,
};

use self::accel::AccelObject;
use self::conversion::{
    convert_buffer_usage, convert_heap_type, convert_state, convert_texture_format,
    convert_texture_usage, texture_aspect,
};
use self::descriptor::{DescriptorHeapObject, ResolvedView};
use self::device::DeviceProfile;
use self::pipeline::PipelineObject;
use self::swapchain::SwapChainObject;

/// Minimum alignment of buffers that may back acceleration structures or
/// serve as build scratch.
const ACCEL_BUFFER_ALIGNMENT: u64 = 256;

/// Map a Vulkan result to the renderer's error type.
pub(crate) fn vk_error(what: &str, e: vk::Result) -> GraphicsError {
    match e {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR => GraphicsError::SurfaceOutdated,
        other => GraphicsError::Internal(format!("{what} failed: {other:?}")),
    }
}

fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

fn create_timeline(
    device: &ash::Device,
    initial_value: u64,
) -> Result<vk::Semaphore, GraphicsError> {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(initial_value);
    let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
    unsafe { device.create_semaphore(&create_info, None) }
        .map_err(|e| vk_error("timeline semaphore creation", e))
}

// --- Instance ---

/// Instance-level state shared by the instance and every device opened from it.
pub(crate) struct InstanceShared {
    entry: ash::Entry,
    instance: ash::Instance,
    surface: ash::khr::surface::Instance,
    surface_enabled: bool,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    physical_devices: Vec<vk::PhysicalDevice>,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::trace!("Vulkan instance destroyed");
    }
}

/// Vulkan entry point: loader, instance and adapter list.
pub struct VulkanInstance {
    shared: Arc<InstanceShared>,
}

impl VulkanInstance {
    /// Load the Vulkan library and create an instance.
    pub fn new(params: &InstanceParameters) -> Result<Self, GraphicsError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan library: {e}"))
        })?;
        let created = instance::create_instance(&entry, params)?;
        let surface = ash::khr::surface::Instance::new(&entry, &created.instance);

        let physical_devices = match unsafe { created.instance.enumerate_physical_devices() } {
            Ok(devices) => devices,
            Err(e) => {
                unsafe {
                    if let Some((debug_utils, messenger)) = &created.debug_utils {
                        debug_utils.destroy_debug_utils_messenger(*messenger, None);
                    }
                    created.instance.destroy_instance(None);
                }
                return Err(GraphicsError::InitializationFailed(format!(
                    "Failed to enumerate physical devices: {e:?}"
                )));
            }
        };
        log::info!("Vulkan instance created, {} physical devices", physical_devices.len());

        Ok(Self {
            shared: Arc::new(InstanceShared {
                entry,
                instance: created.instance,
                surface,
                surface_enabled: created.surface_enabled,
                debug_utils: created.debug_utils,
                physical_devices,
            }),
        })
    }
}

impl GpuInstance for VulkanInstance {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        self.shared
            .physical_devices
            .iter()
            .enumerate()
            .map(|(index, &pd)| device::describe_adapter(&self.shared.instance, pd, index))
            .collect()
    }

    fn create_device(&self, adapter: &AdapterInfo) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
        let physical_device = *self
            .shared
            .physical_devices
            .get(adapter.index)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("no adapter at index {}", adapter.index))
            })?;
        let backend = VulkanBackend::new(Arc::clone(&self.shared), physical_device, adapter)?;
        Ok(Arc::new(backend))
    }
}

// --- Device ---

/// Device handle plus extension loaders and fixed device properties.
pub(crate) struct DeviceContext {
    pub device: ash::Device,
    pub swapchain: ash::khr::swapchain::Device,
    pub push_descriptor: ash::khr::push_descriptor::Device,
    pub accel: Option<ash::khr::acceleration_structure::Device>,
    pub ray_tracing: Option<ash::khr::ray_tracing_pipeline::Device>,
    pub debug_utils: Option<ash::ext::debug_utils::Device>,
    pub profile: DeviceProfile,
    /// Set layout of every descriptor heap.
    pub heap_layout: vk::DescriptorSetLayout,
}

impl DeviceContext {
    pub fn accel_loader(&self) -> Result<&ash::khr::acceleration_structure::Device, GraphicsError> {
        self.accel.as_ref().ok_or_else(|| {
            GraphicsError::FeatureNotSupported("acceleration structures".to_string())
        })
    }

    /// Attach a debug name to a Vulkan object when validation is on.
    fn name_object<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            log::debug!("Failed to name object: {e:?}");
        }
    }
}

struct QueueObject {
    kind: QueueKind,
    label: String,
}

struct AllocatorObject {
    pool: vk::CommandPool,
    kind: QueueKind,
    buffers: Vec<vk::CommandBuffer>,
    /// Command buffers handed out since the last reset.
    next: usize,
    /// Progress value of the last submission that used this allocator.
    last_submission: u64,
}

pub(crate) struct BufferObject {
    pub buffer: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: u64,
    pub address: u64,
}

pub(crate) struct TextureObject {
    pub image: vk::Image,
    pub view: vk::ImageView,
    /// `None` for images owned by a window swap chain.
    allocation: Option<Allocation>,
    pub format: TextureFormat,
    pub aspect: vk::ImageAspectFlags,
    pub extent: vk::Extent2D,
    /// Contents need not survive a transition out of the present state.
    pub discard_on_present_exit: bool,
}

/// An image waiting for its first layout transition.
struct PendingLayout {
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    layout: vk::ImageLayout,
}

/// Objects released by the renderer but possibly still in use by the GPU.
enum Garbage {
    Buffer(vk::Buffer, Option<Allocation>),
    Texture(TextureObject),
    CommandPool(vk::CommandPool),
    Semaphore(vk::Semaphore),
    Heap(DescriptorHeapObject),
    Pipeline(PipelineObject),
    Accel(vk::AccelerationStructureKHR),
}

impl Garbage {
    fn destroy(self, ctx: &DeviceContext, allocator: &mut Allocator) {
        let device = &ctx.device;
        unsafe {
            match self {
                Self::Buffer(buffer, allocation) => {
                    device.destroy_buffer(buffer, None);
                    if let Some(allocation) = allocation {
                        allocator::free(allocator, allocation);
                    }
                }
                Self::Texture(texture) => destroy_texture_object(device, allocator, texture),
                Self::CommandPool(pool) => device.destroy_command_pool(pool, None),
                Self::Semaphore(semaphore) => device.destroy_semaphore(semaphore, None),
                Self::Heap(heap) => heap.destroy(device),
                Self::Pipeline(pipeline) => pipeline.destroy(device),
                Self::Accel(handle) => {
                    if let Some(loader) = &ctx.accel {
                        loader.destroy_acceleration_structure(handle, None);
                    }
                }
            }
        }
    }
}

fn destroy_texture_object(device: &ash::Device, allocator: &mut Allocator, texture: TextureObject) {
    unsafe {
        device.destroy_image_view(texture.view, None);
        if let Some(allocation) = texture.allocation {
            device.destroy_image(texture.image, None);
            allocator::free(allocator, allocation);
        }
    }
}

/// Everything the backend owns, keyed by raw id.
pub(crate) struct Objects {
    next_id: u64,
    queues: HashMap<u64, QueueObject>,
    allocators: HashMap<u64, AllocatorObject>,
    fences: HashMap<u64, vk::Semaphore>,
    buffers: HashMap<u64, BufferObject>,
    textures: HashMap<u64, TextureObject>,
    swap_chains: HashMap<u64, SwapChainObject>,
    heaps: HashMap<u64, DescriptorHeapObject>,
    pipelines: HashMap<u64, PipelineObject>,
    accels: HashMap<u64, AccelObject>,
    pending_layouts: Vec<PendingLayout>,
    /// Garbage tagged with the progress value that must complete first.
    graveyard: Vec<(u64, Garbage)>,
    /// Progress value of the most recent submission.
    submitted: u64,
    allocator: Option<Allocator>,
}

fn unknown(what: &str, id: u64) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("unknown {what} {id}"))
}

impl Objects {
    fn new(allocator: Option<Allocator>) -> Self {
        Self {
            next_id: 0,
            queues: HashMap::new(),
            allocators: HashMap::new(),
            fences: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            swap_chains: HashMap::new(),
            heaps: HashMap::new(),
            pipelines: HashMap::new(),
            accels: HashMap::new(),
            pending_layouts: Vec::new(),
            graveyard: Vec::new(),
            submitted: 0,
            allocator,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn allocator(&mut self) -> Result<&mut Allocator, GraphicsError> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GraphicsError::Internal("memory allocator already released".into()))
    }

    fn bury(&mut self, garbage: Garbage) {
        let tag = self.submitted;
        self.graveyard.push((tag, garbage));
    }

    pub fn buffer(&self, id: BufferId) -> Result<&BufferObject, GraphicsError> {
        self.buffers.get(&id.0).ok_or_else(|| unknown("buffer", id.0))
    }

    pub fn texture(&self, id: TextureId) -> Result<&TextureObject, GraphicsError> {
        self.textures.get(&id.0).ok_or_else(|| unknown("texture", id.0))
    }

    pub fn accel(&self, id: AccelId) -> Result<&AccelObject, GraphicsError> {
        self.accels
            .get(&id.0)
            .ok_or_else(|| unknown("acceleration structure", id.0))
    }

    pub fn pipeline(&self, id: PipelineId) -> Result<&PipelineObject, GraphicsError> {
        self.pipelines.get(&id.0).ok_or_else(|| unknown("pipeline", id.0))
    }

    pub fn heap(&self, id: DescriptorHeapId) -> Result<&DescriptorHeapObject, GraphicsError> {
        self.heaps.get(&id.0).ok_or_else(|| unknown("descriptor heap", id.0))
    }

    fn fence(&self, id: FenceId) -> Result<vk::Semaphore, GraphicsError> {
        self.fences.get(&id.0).copied().ok_or_else(|| unknown("fence", id.0))
    }

    fn swap_chain_mut(&mut self, id: SwapChainId) -> Result<&mut SwapChainObject, GraphicsError> {
        self.swap_chains
            .get_mut(&id.0)
            .ok_or_else(|| unknown("swap chain", id.0))
    }

    /// Hand out the next command buffer of `allocator`, allocating on demand.
    fn next_command_buffer(
        &mut self,
        device: &ash::Device,
        allocator: AllocatorId,
    ) -> Result<vk::CommandBuffer, GraphicsError> {
        let alloc = self
            .allocators
            .get_mut(&allocator.0)
            .ok_or_else(|| unknown("command allocator", allocator.0))?;
        if alloc.next == alloc.buffers.len() {
            let info = vk::CommandBufferAllocateInfo::default()
                .command_pool(alloc.pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let buffers = unsafe { device.allocate_command_buffers(&info) }
                .map_err(|e| vk_error("command buffer allocation", e))?;
            alloc.buffers.extend(buffers);
        }
        let cmd = alloc.buffers[alloc.next];
        alloc.next += 1;
        Ok(cmd)
    }

    /// Insert a texture and queue its initial layout transition.
    fn insert_texture(&mut self, texture: TextureObject, layout: Option<vk::ImageLayout>) -> u64 {
        if let Some(layout) = layout {
            self.pending_layouts.push(PendingLayout {
                image: texture.image,
                aspect: texture.aspect,
                layout,
            });
        }
        let id = self.next_id();
        self.textures.insert(id, texture);
        id
    }

    fn remove_texture(&mut self, id: u64) -> Option<TextureObject> {
        let texture = self.textures.remove(&id)?;
        self.pending_layouts.retain(|p| p.image != texture.image);
        Some(texture)
    }
}

/// A logical Vulkan device and everything created on it.
pub struct VulkanBackend {
    shared: Arc<InstanceShared>,
    physical_device: vk::PhysicalDevice,
    ctx: DeviceContext,
    queue: vk::Queue,
    queue_family: u32,
    /// Signaled with a new value by every submission.
    progress: vk::Semaphore,
    objects: Mutex<Objects>,
}

impl VulkanBackend {
    fn new(
        shared: Arc<InstanceShared>,
        physical_device: vk::PhysicalDevice,
        adapter: &AdapterInfo,
    ) -> Result<Self, GraphicsError> {
        let instance = &shared.instance;
        let queue_family = device::find_graphics_queue_family(instance, physical_device)
            .ok_or_else(|| {
                GraphicsError::InitializationFailed(format!(
                    "{} has no graphics and compute queue family",
                    adapter.name
                ))
            })?;
        let (device, ray_tracing) =
            device::create_logical_device(instance, physical_device, queue_family)?;
        let profile = device::query_profile(instance, physical_device, ray_tracing);

        let (heap_layout, progress, allocator) =
            match Self::create_device_objects(instance, physical_device, &device, &profile) {
                Ok(objects) => objects,
                Err(e) => {
                    unsafe { device.destroy_device(None) };
                    return Err(e);
                }
            };
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let ctx = DeviceContext {
            swapchain: ash::khr::swapchain::Device::new(instance, &device),
            push_descriptor: ash::khr::push_descriptor::Device::new(instance, &device),
            accel: ray_tracing
                .then(|| ash::khr::acceleration_structure::Device::new(instance, &device)),
            ray_tracing: ray_tracing
                .then(|| ash::khr::ray_tracing_pipeline::Device::new(instance, &device)),
            debug_utils: shared
                .debug_utils
                .as_ref()
                .map(|_| ash::ext::debug_utils::Device::new(instance, &device)),
            profile,
            heap_layout,
            device,
        };

        log::info!(
            "Opened Vulkan device on {} (ray tracing: {ray_tracing}, heap slots: {})",
            adapter.name,
            ctx.profile.capabilities.max_descriptor_heap_size
        );

        Ok(Self {
            shared,
            physical_device,
            ctx,
            queue,
            queue_family,
            progress,
            objects: Mutex::new(Objects::new(Some(allocator))),
        })
    }

    fn create_device_objects(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
        profile: &DeviceProfile,
    ) -> Result<(vk::DescriptorSetLayout, vk::Semaphore, Allocator), GraphicsError> {
        let heap_layout = descriptor::create_heap_set_layout(device, &profile.heap_limits)?;
        let progress = match create_timeline(device, 0) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(heap_layout, None) };
                return Err(e);
            }
        };
        match allocator::create_allocator(instance, physical_device, device) {
            Ok(allocator) => Ok((heap_layout, progress, allocator)),
            Err(e) => {
                unsafe {
                    device.destroy_semaphore(progress, None);
                    device.destroy_descriptor_set_layout(heap_layout, None);
                }
                Err(e)
            }
        }
    }

    fn completed_progress(&self) -> Result<u64, GraphicsError> {
        unsafe { self.ctx.device.get_semaphore_counter_value(self.progress) }
            .map_err(|e| vk_error("progress query", e))
    }

    /// Destroy every buried object the GPU is done with.
    fn collect_garbage(&self, objects: &mut Objects) -> Result<(), GraphicsError> {
        if objects.graveyard.is_empty() {
            return Ok(());
        }
        let completed = self.completed_progress()?;
        let (ready, waiting): (Vec<_>, Vec<_>) = objects
            .graveyard
            .drain(..)
            .partition(|(tag, _)| *tag <= completed);
        objects.graveyard = waiting;
        let allocator = objects.allocator()?;
        for (_, garbage) in ready {
            garbage.destroy(&self.ctx, allocator);
        }
        Ok(())
    }

    /// Record the initial layout transitions of newly created images.
    fn record_pending_layouts(&self, objects: &mut Objects, cmd: vk::CommandBuffer) {
        if objects.pending_layouts.is_empty() {
            return;
        }
        let barriers: Vec<vk::ImageMemoryBarrier2> = objects
            .pending_layouts
            .drain(..)
            .map(|pending| {
                vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(vk::PipelineStageFlags2::NONE)
                    .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                    .dst_access_mask(
                        vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
                    )
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(pending.layout)
                    .image(pending.image)
                    .subresource_range(full_range(pending.aspect))
            })
            .collect();
        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe { self.ctx.device.cmd_pipeline_barrier2(cmd, &dependency) };
    }

    /// Submit to the universal queue, always signaling the next progress value.
    fn queue_submit(
        &self,
        objects: &mut Objects,
        command_buffers: &[vk::CommandBuffer],
        waits: &[vk::SemaphoreSubmitInfo],
        extra_signals: &[vk::SemaphoreSubmitInfo],
    ) -> Result<u64, GraphicsError> {
        let value = objects.submitted + 1;
        let buffer_infos: Vec<vk::CommandBufferSubmitInfo> = command_buffers
            .iter()
            .map(|&cmd| vk::CommandBufferSubmitInfo::default().command_buffer(cmd))
            .collect();
        let mut signals = Vec::with_capacity(extra_signals.len() + 1);
        signals.extend_from_slice(extra_signals);
        signals.push(
            vk::SemaphoreSubmitInfo::default()
                .semaphore(self.progress)
                .value(value)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
        );
        let submit = vk::SubmitInfo2::default()
            .command_buffer_infos(&buffer_infos)
            .wait_semaphore_infos(waits)
            .signal_semaphore_infos(&signals);
        unsafe {
            self.ctx
                .device
                .queue_submit2(self.queue, &[submit], vk::Fence::null())
        }
        .map_err(|e| vk_error("queue submit", e))?;
        objects.submitted = value;
        Ok(value)
    }

    fn create_image(
        &self,
        objects: &mut Objects,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: vk::ImageUsageFlags,
    ) -> Result<TextureObject, GraphicsError> {
        let device = &self.ctx.device;
        let vk_format = convert_texture_format(format);
        let aspect = texture_aspect(format);
        let extent = vk::Extent2D { width, height };

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(vk_format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&create_info, None) }
            .map_err(|e| vk_error("image creation", e))?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocation = match allocator::allocate(
            objects.allocator()?,
            label,
            requirements,
            gpu_allocator::MemoryLocation::GpuOnly,
            false,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view = unsafe {
            device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .and_then(|()| device.create_image_view(&view_info(image, vk_format, aspect), None))
        };
        let view = match view {
            Ok(view) => view,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                allocator::free(objects.allocator()?, allocation);
                return Err(vk_error("image view creation", e));
            }
        };
        self.ctx.name_object(image, label);

        Ok(TextureObject {
            image,
            view,
            allocation: Some(allocation),
            format,
            aspect,
            extent,
            discard_on_present_exit: false,
        })
    }
}

fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn view_info(
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> vk::ImageViewCreateInfo<'static> {
    vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(full_range(aspect))
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.ctx.profile.capabilities
    }

    fn create_queue(&self, kind: QueueKind, label: &str) -> Result<QueueId, GraphicsError> {
        let mut objects = self.objects.lock();
        let id = objects.next_id();
        objects.queues.insert(
            id,
            QueueObject {
                kind,
                label: label.to_string(),
            },
        );
        log::debug!("Created {kind:?} queue '{label}' on family {}", self.queue_family);
        Ok(QueueId(id))
    }

    fn create_command_allocator(&self, kind: QueueKind) -> Result<AllocatorId, GraphicsError> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(self.queue_family);
        let pool = unsafe { self.ctx.device.create_command_pool(&create_info, None) }
            .map_err(|e| vk_error("command pool creation", e))?;

        let mut objects = self.objects.lock();
        let id = objects.next_id();
        objects.allocators.insert(
            id,
            AllocatorObject {
                pool,
                kind,
                buffers: Vec::new(),
                next: 0,
                last_submission: 0,
            },
        );
        Ok(AllocatorId(id))
    }

    fn reset_command_allocator(&self, allocator: AllocatorId) -> Result<(), GraphicsError> {
        let completed = self.completed_progress()?;
        let mut objects = self.objects.lock();
        let alloc = objects
            .allocators
            .get_mut(&allocator.0)
            .ok_or_else(|| unknown("command allocator", allocator.0))?;
        if alloc.last_submission > completed {
            return Err(GraphicsError::InvalidParameter(format!(
                "command allocator {} reset while the GPU may still execute its lists",
                allocator.0
            )));
        }
        unsafe {
            self.ctx
                .device
                .reset_command_pool(alloc.pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(|e| vk_error("command pool reset", e))?;
        alloc.next = 0;
        Ok(())
    }

    fn destroy_command_allocator(&self, allocator: AllocatorId) {
        let mut objects = self.objects.lock();
        if let Some(alloc) = objects.allocators.remove(&allocator.0) {
            objects.graveyard.push((alloc.last_submission, Garbage::CommandPool(alloc.pool)));
        }
    }

    fn submit(
        &self,
        queue: QueueId,
        lists: &[&CommandList],
        present_sync: Option<SwapChainId>,
    ) -> Result<(), GraphicsError> {
        let mut objects = self.objects.lock();
        self.collect_garbage(&mut objects)?;
        let queue_kind = objects
            .queues
            .get(&queue.0)
            .map(|q| q.kind)
            .ok_or_else(|| unknown("queue", queue.0))?;

        let mut command_buffers = Vec::with_capacity(lists.len());
        let mut used_allocators = Vec::with_capacity(lists.len());
        for list in lists {
            if list.is_recording() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "command list '{}' submitted before close",
                    list.label()
                )));
            }
            let allocator = list.allocator().ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "command list '{}' was never reset",
                    list.label()
                ))
            })?;
            match objects.allocators.get(&allocator.0) {
                Some(alloc) if alloc.kind == queue_kind => {}
                Some(alloc) => {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "{:?} allocator submitted to a {queue_kind:?} queue",
                        alloc.kind
                    )));
                }
                None => return Err(unknown("command allocator", allocator.0)),
            }

            let cmd = objects.next_command_buffer(&self.ctx.device, allocator)?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.ctx.device.begin_command_buffer(cmd, &begin_info) }
                .map_err(|e| vk_error("command buffer begin", e))?;
            if command_buffers.is_empty() {
                self.record_pending_layouts(&mut objects, cmd);
            }
            command::encode(&self.ctx, &objects, cmd, list)?;
            unsafe { self.ctx.device.end_command_buffer(cmd) }
                .map_err(|e| vk_error("command buffer end", e))?;

            command_buffers.push(cmd);
            used_allocators.push(allocator);
        }

        let mut waits = Vec::new();
        if let Some(swap_chain) = present_sync {
            if let Some(acquire) = objects.swap_chain_mut(swap_chain)?.take_acquire_wait() {
                waits.push(
                    vk::SemaphoreSubmitInfo::default()
                        .semaphore(acquire)
                        .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
                );
            }
        }

        let value = self.queue_submit(&mut objects, &command_buffers, &waits, &[])?;
        for allocator in used_allocators {
            if let Some(alloc) = objects.allocators.get_mut(&allocator.0) {
                alloc.last_submission = value;
            }
        }
        log::trace!(
            "Submitted {} lists to '{}' at progress {value}",
            lists.len(),
            objects.queues.get(&queue.0).map_or("?", |q| q.label.as_str())
        );
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> Result<FenceId, GraphicsError> {
        let semaphore = create_timeline(&self.ctx.device, initial_value)?;
        let mut objects = self.objects.lock();
        let id = objects.next_id();
        objects.fences.insert(id, semaphore);
        Ok(FenceId(id))
    }

    fn destroy_fence(&self, fence: FenceId) {
        let mut objects = self.objects.lock();
        if let Some(semaphore) = objects.fences.remove(&fence.0) {
            objects.bury(Garbage::Semaphore(semaphore));
        }
    }

    fn fence_completed_value(&self, fence: FenceId) -> Result<u64, GraphicsError> {
        let semaphore = self.objects.lock().fence(fence)?;
        unsafe { self.ctx.device.get_semaphore_counter_value(semaphore) }
            .map_err(|e| vk_error("fence query", e))
    }

    fn signal_fence(
        &self,
        queue: QueueId,
        fence: FenceId,
        value: u64,
    ) -> Result<(), GraphicsError> {
        let mut objects = self.objects.lock();
        if !objects.queues.contains_key(&queue.0) {
            return Err(unknown("queue", queue.0));
        }
        let semaphore = objects.fence(fence)?;
        let signal = vk::SemaphoreSubmitInfo::default()
            .semaphore(semaphore)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        self.queue_submit(&mut objects, &[], &[], &[signal])?;
        Ok(())
    }

    fn wait_fence(
        &self,
        fence: FenceId,
        value: u64,
        timeout: Duration,
    ) -> Result<bool, GraphicsError> {
        // The lock is released before blocking so other threads keep recording.
        let semaphore = self.objects.lock().fence(fence)?;
        let semaphores = [semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        match unsafe { self.ctx.device.wait_semaphores(&wait_info, timeout_nanos(timeout)) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(vk_error("fence wait", e)),
        }
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<BufferId, GraphicsError> {
        if desc.size == 0 {
            return Err(GraphicsError::InvalidParameter("buffer size must be non-zero".into()));
        }
        let device = &self.ctx.device;
        let label = desc.label.as_deref().unwrap_or("buffer");

        let create_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(convert_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&create_info, None) }
            .map_err(|e| vk_error("buffer creation", e))?;

        let mut requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        if desc
            .usage
            .intersects(BufferUsage::ACCELERATION_STRUCTURE | BufferUsage::UNORDERED_ACCESS)
        {
            requirements.alignment = requirements
                .alignment
                .max(ACCEL_BUFFER_ALIGNMENT)
                .max(self.ctx.profile.scratch_alignment);
        }

        let mut objects = self.objects.lock();
        let allocation = match allocator::allocate(
            objects.allocator()?,
            label,
            requirements,
            convert_heap_type(desc.heap),
            true,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        if let Err(e) =
            unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        {
            unsafe { device.destroy_buffer(buffer, None) };
            allocator::free(objects.allocator()?, allocation);
            return Err(vk_error("buffer memory binding", e));
        }
        let address = unsafe {
            device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
        };
        self.ctx.name_object(buffer, label);

        let id = objects.next_id();
        objects.buffers.insert(
            id,
            BufferObject {
                buffer,
                allocation: Some(allocation),
                size: desc.size,
                address,
            },
        );
        log::trace!("Created buffer '{label}' ({} bytes, {:?})", desc.size, desc.heap);
        Ok(BufferId(id))
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        let mut objects = self.objects.lock();
        if let Some(object) = objects.buffers.remove(&buffer.0) {
            objects.bury(Garbage::Buffer(object.buffer, object.allocation));
        }
    }

    fn write_buffer(
        &self,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let mut objects = self.objects.lock();
        let object = objects
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| unknown("buffer", buffer.0))?;
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= object.size)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "write of {} bytes at {offset} exceeds buffer of {} bytes",
                    data.len(),
                    object.size
                ))
            })?;
        let mapped = object
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("buffer {} is not CPU-visible", buffer.0))
            })?;
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: BufferId,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), GraphicsError> {
        let objects = self.objects.lock();
        let object = objects.buffer(buffer)?;
        let end = offset
            .checked_add(out.len() as u64)
            .filter(|&end| end <= object.size)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "read of {} bytes at {offset} exceeds buffer of {} bytes",
                    out.len(),
                    object.size
                ))
            })?;
        let mapped = object
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("buffer {} is not CPU-visible", buffer.0))
            })?;
        out.copy_from_slice(&mapped[offset as usize..end as usize]);
        Ok(())
    }

    fn buffer_device_address(&self, buffer: BufferId) -> Result<u64, GraphicsError> {
        Ok(self.objects.lock().buffer(buffer)?.address)
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<TextureId, GraphicsError> {
        let max = self.ctx.profile.capabilities.max_texture_dimension;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture size {}x{} outside 1..={max}",
                desc.width, desc.height
            )));
        }
        let mut usage = convert_texture_usage(desc.usage);
        if usage.is_empty() {
            usage = vk::ImageUsageFlags::SAMPLED;
        }
        let label = desc.label.as_deref().unwrap_or("texture");

        let mut objects = self.objects.lock();
        let texture =
            self.create_image(&mut objects, label, desc.width, desc.height, desc.format, usage)?;
        let layout = convert_state(desc.initial_state).layout;
        let id = objects.insert_texture(texture, Some(layout));
        log::trace!(
            "Created texture '{label}' ({}x{} {:?})",
            desc.width,
            desc.height,
            desc.format
        );
        Ok(TextureId(id))
    }

    fn destroy_texture(&self, texture: TextureId) {
        let mut objects = self.objects.lock();
        if let Some(object) = objects.remove_texture(texture.0) {
            objects.bury(Garbage::Texture(object));
        }
    }

    fn create_swap_chain(
        &self,
        target: &SurfaceTarget,
        desc: &SwapChainDescriptor,
    ) -> Result<SwapChainId, GraphicsError> {
        let mut objects = self.objects.lock();
        let swap_chain = match target {
            SurfaceTarget::Window { display, window } => {
                self.create_window_swap_chain(&mut objects, *display, *window, desc)?
            }
            SurfaceTarget::Headless => self.create_headless_swap_chain(&mut objects, desc)?,
        };
        let id = objects.next_id();
        objects.swap_chains.insert(id, swap_chain);
        Ok(SwapChainId(id))
    }

    fn destroy_swap_chain(&self, swap_chain: SwapChainId) {
        let mut objects = self.objects.lock();
        if let Some(object) = objects.swap_chains.remove(&swap_chain.0) {
            if let Err(e) = unsafe { self.ctx.device.device_wait_idle() } {
                log::warn!("Wait before swap chain destruction failed: {e:?}");
            }
            self.destroy_swap_chain_object(&mut objects, object);
        }
    }

    fn swap_chain_back_buffers(
        &self,
        swap_chain: SwapChainId,
    ) -> Result<Vec<TextureId>, GraphicsError> {
        let mut objects = self.objects.lock();
        Ok(objects
            .swap_chain_mut(swap_chain)?
            .back_buffers()
            .iter()
            .map(|&id| TextureId(id))
            .collect())
    }

    fn acquire_back_buffer(&self, swap_chain: SwapChainId) -> Result<u32, GraphicsError> {
        let mut objects = self.objects.lock();
        self.acquire(&mut objects, swap_chain)
    }

    fn present(
        &self,
        queue: QueueId,
        swap_chain: SwapChainId,
        request: PresentRequest,
    ) -> Result<(), GraphicsError> {
        let mut objects = self.objects.lock();
        if !objects.queues.contains_key(&queue.0) {
            return Err(unknown("queue", queue.0));
        }
        self.present_swap_chain(&mut objects, swap_chain, request)
    }

    fn resize_swap_chain(
        &self,
        swap_chain: SwapChainId,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsError> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "swap chain size {width}x{height} must be non-zero"
            )));
        }
        let mut objects = self.objects.lock();
        self.resize(&mut objects, swap_chain, width, height)
    }

    fn create_descriptor_heap(
        &self,
        layout: &DescriptorHeapLayout,
    ) -> Result<DescriptorHeapId, GraphicsError> {
        let max = self.ctx.profile.capabilities.max_descriptor_heap_size;
        if layout.capacity() == 0 || layout.capacity() > max {
            return Err(GraphicsError::InvalidParameter(format!(
                "descriptor heap capacity {} outside 1..={max}",
                layout.capacity()
            )));
        }
        let heap = DescriptorHeapObject::new(
            &self.ctx.device,
            self.ctx.heap_layout,
            &self.ctx.profile.heap_limits,
            layout.capacity(),
        )?;
        let mut objects = self.objects.lock();
        let id = objects.next_id();
        objects.heaps.insert(id, heap);
        log::debug!(
            "Created descriptor heap with {} of {} slots reserved",
            layout.len(),
            layout.capacity()
        );
        Ok(DescriptorHeapId(id))
    }

    fn write_descriptor(
        &self,
        heap: DescriptorHeapId,
        index: DescriptorIndex,
        binding: &DescriptorBinding,
    ) -> Result<(), GraphicsError> {
        let objects = self.objects.lock();
        let view = match *binding {
            DescriptorBinding::Texture(texture) => {
                ResolvedView::SampledImage(objects.texture(texture)?.view)
            }
            DescriptorBinding::StorageTexture(texture) => {
                ResolvedView::StorageImage(objects.texture(texture)?.view)
            }
            DescriptorBinding::ConstantBuffer {
                buffer,
                offset,
                size,
            } => {
                let object = objects.buffer(buffer)?;
                if offset.saturating_add(size) > object.size {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "constant buffer view {offset}+{size} exceeds buffer of {} bytes",
                        object.size
                    )));
                }
                ResolvedView::UniformBuffer {
                    buffer: object.buffer,
                    offset,
                    range: size,
                }
            }
            DescriptorBinding::AccelerationStructure(accel) => {
                ResolvedView::AccelerationStructure(objects.accel(accel)?.handle)
            }
        };
        objects.heap(heap)?.write(
            &self.ctx.device,
            &self.ctx.profile.heap_limits,
            index,
            view,
        )
    }

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapId) {
        let mut objects = self.objects.lock();
        if let Some(object) = objects.heaps.remove(&heap.0) {
            objects.bury(Garbage::Heap(object));
        }
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
    ) -> Result<PipelineId, GraphicsError> {
        let pipeline = pipeline::create_graphics_pipeline(&self.ctx, desc)?;
        self.ctx.name_object(pipeline.pipeline, &desc.label);
        let mut objects = self.objects.lock();
        let id = objects.next_id();
        objects.pipelines.insert(id, pipeline);
        log::debug!("Created graphics pipeline '{}'", desc.label);
        Ok(PipelineId(id))
    }

    fn create_ray_tracing_pipeline(
        &self,
        desc: &RayTracingPipelineDesc,
    ) -> Result<PipelineId, GraphicsError> {
        let pipeline = pipeline::create_ray_tracing_pipeline(&self.ctx, desc)?;
        self.ctx.name_object(pipeline.pipeline, &desc.label);
        let mut objects = self.objects.lock();
        let id = objects.next_id();
        objects.pipelines.insert(id, pipeline);
        log::debug!("Created ray tracing pipeline '{}'", desc.label);
        Ok(PipelineId(id))
    }

    fn shader_identifier(
        &self,
        pipeline: PipelineId,
        export: &str,
    ) -> Result<Vec<u8>, GraphicsError> {
        let objects = self.objects.lock();
        objects
            .pipeline(pipeline)?
            .shader_identifier(export)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "no shader group '{export}' in pipeline {}",
                    pipeline.0
                ))
            })
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) {
        let mut objects = self.objects.lock();
        if let Some(object) = objects.pipelines.remove(&pipeline.0) {
            objects.bury(Garbage::Pipeline(object));
        }
    }

    fn acceleration_structure_sizes(
        &self,
        inputs: &AccelBuildInputs,
    ) -> Result<AccelPrebuildInfo, GraphicsError> {
        let objects = self.objects.lock();
        let sizes = accel::build_sizes(&self.ctx, &objects, inputs)?;
        Ok(AccelPrebuildInfo {
            result_size: sizes.acceleration_structure_size,
            scratch_size: sizes.build_scratch_size,
            update_scratch_size: sizes.update_scratch_size,
        })
    }

    fn create_acceleration_structure(
        &self,
        kind: AccelKind,
        buffer: BufferId,
        size: u64,
    ) -> Result<AccelId, GraphicsError> {
        let loader = self.ctx.accel_loader()?;
        let mut objects = self.objects.lock();
        let backing = objects.buffer(buffer)?;
        if size > backing.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "acceleration structure of {size} bytes does not fit in buffer of {} bytes",
                backing.size
            )));
        }
        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(backing.buffer)
            .offset(0)
            .size(size)
            .ty(accel::accel_type(kind));
        let handle = unsafe { loader.create_acceleration_structure(&create_info, None) }
            .map_err(|e| vk_error("acceleration structure creation", e))?;
        let address = unsafe {
            loader.get_acceleration_structure_device_address(
                &vk::AccelerationStructureDeviceAddressInfoKHR::default()
                    .acceleration_structure(handle),
            )
        };

        let id = objects.next_id();
        objects.accels.insert(
            id,
            AccelObject {
                handle,
                address,
                kind,
            },
        );
        Ok(AccelId(id))
    }

    fn acceleration_structure_address(&self, accel: AccelId) -> Result<u64, GraphicsError> {
        Ok(self.objects.lock().accel(accel)?.address)
    }

    fn destroy_acceleration_structure(&self, accel: AccelId) {
        let mut objects = self.objects.lock();
        if let Some(object) = objects.accels.remove(&accel.0) {
            objects.bury(Garbage::Accel(object.handle));
        }
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        let mut objects = self.objects.lock();
        unsafe { self.ctx.device.device_wait_idle() }.map_err(|e| vk_error("device wait", e))?;
        self.collect_garbage(&mut objects)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.ctx.device.device_wait_idle() } {
            log::warn!("Device wait before destruction failed: {e:?}");
        }

        let mut objects = std::mem::replace(self.objects.get_mut(), Objects::new(None));
        let swap_chains: Vec<SwapChainObject> =
            objects.swap_chains.drain().map(|(_, sc)| sc).collect();
        for swap_chain in swap_chains {
            self.destroy_swap_chain_object(&mut objects, swap_chain);
        }

        let mut garbage: Vec<Garbage> = objects.graveyard.drain(..).map(|(_, g)| g).collect();
        garbage.extend(objects.allocators.drain().map(|(_, a)| Garbage::CommandPool(a.pool)));
        garbage.extend(objects.fences.drain().map(|(_, s)| Garbage::Semaphore(s)));
        garbage.extend(
            objects
                .buffers
                .drain()
                .map(|(_, b)| Garbage::Buffer(b.buffer, b.allocation)),
        );
        garbage.extend(objects.textures.drain().map(|(_, t)| Garbage::Texture(t)));
        garbage.extend(objects.heaps.drain().map(|(_, h)| Garbage::Heap(h)));
        garbage.extend(objects.pipelines.drain().map(|(_, p)| Garbage::Pipeline(p)));
        garbage.extend(objects.accels.drain().map(|(_, a)| Garbage::Accel(a.handle)));

        if let Some(mut allocator) = objects.allocator.take() {
            for item in garbage {
                item.destroy(&self.ctx, &mut allocator);
            }
            // Frees the allocator's memory blocks, which must happen before the device goes.
            drop(allocator);
        }

        let device = &self.ctx.device;
        unsafe {
            device.destroy_semaphore(self.progress, None);
            device.destroy_descriptor_set_layout(self.ctx.heap_layout, None);
            device.destroy_device(None);
        }
        log::trace!("Vulkan device destroyed");
    }
}
