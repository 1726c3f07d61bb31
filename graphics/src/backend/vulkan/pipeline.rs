//! Graphics and ray tracing pipeline creation.
//!
//! Root signatures become pipeline layouts with up to three sets:
//!
//! - set 0: the descriptor heap (see [`descriptor`](super::descriptor))
//! - set 1: a push descriptor set holding one uniform buffer per root
//!   constant buffer, at `binding = register`
//! - set 2: immutable samplers, at `binding = register` (only when the
//!   signature has static samplers)
//!
//! Descriptor tables become push constants: table `n` (counting tables
//! only) is a `uint` heap slot at byte offset `4 * n`.

use std::ffi::CString;
use std::io::Cursor;

use ash::vk;

use crate::error::GraphicsError;
use crate::pipeline::{
    DescriptorRangeType, GraphicsPipelineDesc, RayTracingPipelineDesc, RootParameter,
    RootSignatureDesc, ShaderBinary,
};

use super::DeviceContext;
use super::conversion::{
    convert_cull_mode, convert_sampler, convert_texture_format, convert_topology,
    convert_vertex_format, convert_visibility,
};

/// Set index of root constant buffers.
pub const ROOT_DESCRIPTOR_SET: u32 = 1;
/// Set index of static samplers.
pub const SAMPLER_SET: u32 = 2;

/// Where a root parameter lives in the pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSlot {
    Table { push_offset: u32 },
    ConstantBuffer { binding: u32 },
}

struct SamplerSet {
    samplers: Vec<vk::Sampler>,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
}

/// Pipeline layout built from a root signature.
struct RootLayout {
    layout: vk::PipelineLayout,
    push_set_layout: vk::DescriptorSetLayout,
    samplers: Option<SamplerSet>,
    parameters: Vec<RootSlot>,
}

impl RootLayout {
    fn new(ctx: &DeviceContext, desc: &RootSignatureDesc) -> Result<Self, GraphicsError> {
        let device = &ctx.device;
        let mut parameters = Vec::with_capacity(desc.parameters.len());
        let mut push_bindings = Vec::new();
        let mut tables = 0u32;
        for parameter in &desc.parameters {
            match parameter {
                RootParameter::DescriptorTable { .. } => {
                    parameters.push(RootSlot::Table {
                        push_offset: tables * 4,
                    });
                    tables += 1;
                }
                RootParameter::Descriptor {
                    kind: DescriptorRangeType::ConstantBuffer,
                    register,
                    visibility,
                    ..
                } => {
                    parameters.push(RootSlot::ConstantBuffer { binding: *register });
                    push_bindings.push(
                        vk::DescriptorSetLayoutBinding::default()
                            .binding(*register)
                            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                            .descriptor_count(1)
                            .stage_flags(convert_visibility(*visibility)),
                    );
                }
                RootParameter::Descriptor { kind, .. } => {
                    return Err(GraphicsError::FeatureNotSupported(format!(
                        "root {kind:?} descriptors"
                    )));
                }
            }
        }
        let push_constant_size = tables * 4;
        if push_constant_size > ctx.profile.max_push_constants {
            return Err(GraphicsError::InvalidParameter(format!(
                "{tables} descriptor tables exceed the push constant limit"
            )));
        }

        let push_flags = if push_bindings.is_empty() {
            vk::DescriptorSetLayoutCreateFlags::empty()
        } else {
            vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR
        };
        let push_set_layout = unsafe {
            device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default()
                    .flags(push_flags)
                    .bindings(&push_bindings),
                None,
            )
        }
        .map_err(|e| creation_failed("root descriptor set layout", e))?;

        let samplers = if desc.static_samplers.is_empty() {
            None
        } else {
            match SamplerSet::new(ctx, desc) {
                Ok(set) => Some(set),
                Err(e) => {
                    unsafe { device.destroy_descriptor_set_layout(push_set_layout, None) };
                    return Err(e);
                }
            }
        };

        let mut set_layouts = vec![ctx.heap_layout, push_set_layout];
        if let Some(samplers) = &samplers {
            set_layouts.push(samplers.layout);
        }
        let push_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::ALL)
            .offset(0)
            .size(push_constant_size)];
        let push_ranges: &[vk::PushConstantRange] = if tables > 0 { &push_ranges } else { &[] };

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(push_ranges);
        let layout = match unsafe { device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(push_set_layout, None) };
                if let Some(samplers) = samplers {
                    samplers.destroy(device);
                }
                return Err(creation_failed("pipeline layout", e));
            }
        };

        Ok(Self {
            layout,
            push_set_layout,
            samplers,
            parameters,
        })
    }

    fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_descriptor_set_layout(self.push_set_layout, None);
        }
        if let Some(samplers) = self.samplers {
            samplers.destroy(device);
        }
    }
}

impl SamplerSet {
    fn new(ctx: &DeviceContext, desc: &RootSignatureDesc) -> Result<Self, GraphicsError> {
        let device = &ctx.device;
        let mut set = Self {
            samplers: Vec::with_capacity(desc.static_samplers.len()),
            layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            set: vk::DescriptorSet::null(),
        };
        let result = set.create(ctx, desc);
        if let Err(e) = result {
            set.destroy(device);
            return Err(e);
        }
        Ok(set)
    }

    fn create(
        &mut self,
        ctx: &DeviceContext,
        desc: &RootSignatureDesc,
    ) -> Result<(), GraphicsError> {
        let device = &ctx.device;
        for sampler in &desc.static_samplers {
            let info = convert_sampler(&sampler.desc, ctx.profile.anisotropy);
            let handle = unsafe { device.create_sampler(&info, None) }
                .map_err(|e| creation_failed("static sampler", e))?;
            self.samplers.push(handle);
        }

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
            .static_samplers
            .iter()
            .zip(&self.samplers)
            .map(|(sampler, handle)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(sampler.register)
                    .descriptor_type(vk::DescriptorType::SAMPLER)
                    .descriptor_count(1)
                    .stage_flags(convert_visibility(sampler.visibility))
                    .immutable_samplers(std::slice::from_ref(handle))
            })
            .collect();
        self.layout = unsafe {
            device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings),
                None,
            )
        }
        .map_err(|e| creation_failed("sampler set layout", e))?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: self.samplers.len() as u32,
        }];
        self.pool = unsafe {
            device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(1)
                    .pool_sizes(&pool_sizes),
                None,
            )
        }
        .map_err(|e| creation_failed("sampler pool", e))?;

        let layouts = [self.layout];
        let sets = unsafe {
            device.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(self.pool)
                    .set_layouts(&layouts),
            )
        }
        .map_err(|e| creation_failed("sampler set", e))?;
        self.set = sets[0];
        Ok(())
    }

    fn destroy(self, device: &ash::Device) {
        unsafe {
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_descriptor_set_layout(self.layout, None);
            for sampler in self.samplers {
                device.destroy_sampler(sampler, None);
            }
        }
    }
}

/// A created pipeline and the layout it binds with.
pub struct PipelineObject {
    pub pipeline: vk::Pipeline,
    pub bind_point: vk::PipelineBindPoint,
    root: RootLayout,
    /// Shader group names, in group order (ray tracing only).
    group_names: Vec<String>,
    group_handles: Vec<u8>,
    handle_size: usize,
}

impl PipelineObject {
    pub fn layout(&self) -> vk::PipelineLayout {
        self.root.layout
    }

    pub fn root_slot(&self, parameter: u32) -> Result<RootSlot, GraphicsError> {
        self.root
            .parameters
            .get(parameter as usize)
            .copied()
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "root parameter {parameter} not in the bound pipeline's signature"
                ))
            })
    }

    pub fn sampler_set(&self) -> Option<vk::DescriptorSet> {
        self.root.samplers.as_ref().map(|s| s.set)
    }

    /// Shader group handle of `export`.
    pub fn shader_identifier(&self, export: &str) -> Option<&[u8]> {
        let index = self.group_names.iter().position(|name| name == export)?;
        let start = index * self.handle_size;
        self.group_handles.get(start..start + self.handle_size)
    }

    pub fn destroy(self, device: &ash::Device) {
        unsafe { device.destroy_pipeline(self.pipeline, None) };
        self.root.destroy(device);
    }
}

fn creation_failed(what: &str, e: vk::Result) -> GraphicsError {
    match e {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        _ => GraphicsError::ResourceCreationFailed(format!("Failed to create {what}: {e:?}")),
    }
}

fn create_module(
    device: &ash::Device,
    shader: &ShaderBinary,
) -> Result<vk::ShaderModule, GraphicsError> {
    let words = ash::util::read_spv(&mut Cursor::new(&shader.bytecode[..])).map_err(|e| {
        GraphicsError::InvalidParameter(format!("shader '{}' is not SPIR-V: {e}", shader.name))
    })?;
    let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
    unsafe { device.create_shader_module(&create_info, None) }
        .map_err(|e| creation_failed(&format!("shader module '{}'", shader.name), e))
}

fn entry_name(name: &str) -> Result<CString, GraphicsError> {
    CString::new(name).map_err(|_| {
        GraphicsError::InvalidParameter(format!("entry point '{name}' contains a nul"))
    })
}

/// Create a rasterization pipeline rendering with dynamic rendering.
pub fn create_graphics_pipeline(
    ctx: &DeviceContext,
    desc: &GraphicsPipelineDesc,
) -> Result<PipelineObject, GraphicsError> {
    let device = &ctx.device;
    let root = RootLayout::new(ctx, &desc.root_signature)?;

    let modules = create_module(device, &desc.vertex).and_then(|vertex| {
        create_module(device, &desc.pixel)
            .map(|pixel| (vertex, pixel))
            .inspect_err(|_| unsafe { device.destroy_shader_module(vertex, None) })
    });
    let (vertex, pixel) = match modules {
        Ok(modules) => modules,
        Err(e) => {
            root.destroy(device);
            return Err(e);
        }
    };

    let result = (|| {
        let vertex_entry = entry_name(&desc.vertex.entry_point)?;
        let pixel_entry = entry_name(&desc.pixel.entry_point)?;
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex)
                .name(&vertex_entry),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(pixel)
                .name(&pixel_entry),
        ];

        let vertex_bindings = [vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(desc.vertex_stride)
            .input_rate(vk::VertexInputRate::VERTEX)];
        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .input_layout
            .iter()
            .enumerate()
            .map(|(location, element)| {
                vk::VertexInputAttributeDescription::default()
                    .location(location as u32)
                    .binding(0)
                    .format(convert_vertex_format(element.format))
                    .offset(element.offset)
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(convert_topology(desc.topology));
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let front_face = if desc.raster.front_counter_clockwise {
            vk::FrontFace::COUNTER_CLOCKWISE
        } else {
            vk::FrontFace::CLOCKWISE
        };
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(convert_cull_mode(desc.raster.cull_mode))
            .front_face(front_face)
            .line_width(1.0);
        let sample_mask = [desc.sample_mask];
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_mask(&sample_mask);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.raster.depth_test)
            .depth_write_enable(desc.raster.depth_write)
            .depth_compare_op(vk::CompareOp::LESS);
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::PRIMITIVE_TOPOLOGY,
        ];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [convert_texture_format(desc.color_format)];
        let mut rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(
                desc.depth_format
                    .map(convert_texture_format)
                    .unwrap_or(vk::Format::UNDEFINED),
            );

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(root.layout)
            .push_next(&mut rendering);

        unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None) }
            .map(|pipelines| pipelines[0])
            .map_err(|(_, e)| creation_failed(&format!("graphics pipeline '{}'", desc.label), e))
    })();

    unsafe {
        device.destroy_shader_module(vertex, None);
        device.destroy_shader_module(pixel, None);
    }

    match result {
        Ok(pipeline) => {
            log::trace!("Created graphics pipeline '{}'", desc.label);
            Ok(PipelineObject {
                pipeline,
                bind_point: vk::PipelineBindPoint::GRAPHICS,
                root,
                group_names: Vec::new(),
                group_handles: Vec::new(),
                handle_size: 0,
            })
        }
        Err(e) => {
            root.destroy(device);
            Err(e)
        }
    }
}

/// Create a ray tracing pipeline from a single shader library.
///
/// Groups are created in [`RayTracingPipelineDesc::group_names`] order:
/// ray generation, misses, then triangle hit groups.
pub fn create_ray_tracing_pipeline(
    ctx: &DeviceContext,
    desc: &RayTracingPipelineDesc,
) -> Result<PipelineObject, GraphicsError> {
    let device = &ctx.device;
    let loader = ctx
        .ray_tracing
        .as_ref()
        .ok_or_else(|| GraphicsError::FeatureNotSupported("ray tracing pipelines".to_string()))?;

    let root = RootLayout::new(ctx, &desc.global_root_signature)?;
    let module = match create_module(device, &desc.library) {
        Ok(module) => module,
        Err(e) => {
            root.destroy(device);
            return Err(e);
        }
    };

    let result = (|| {
        let mut entries: Vec<(vk::ShaderStageFlags, CString)> = Vec::new();
        let mut groups = Vec::new();
        let mut add_stage =
            |stage: vk::ShaderStageFlags, name: &str| -> Result<u32, GraphicsError> {
                entries.push((stage, entry_name(name)?));
                Ok(entries.len() as u32 - 1)
            };

        let general = |shader: u32| {
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(shader)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR)
        };

        groups.push(general(add_stage(vk::ShaderStageFlags::RAYGEN_KHR, &desc.ray_generation)?));
        for miss in &desc.miss {
            groups.push(general(add_stage(vk::ShaderStageFlags::MISS_KHR, miss)?));
        }
        for hit_group in &desc.hit_groups {
            let closest_hit = match &hit_group.closest_hit {
                Some(name) => add_stage(vk::ShaderStageFlags::CLOSEST_HIT_KHR, name)?,
                None => vk::SHADER_UNUSED_KHR,
            };
            let any_hit = match &hit_group.any_hit {
                Some(name) => add_stage(vk::ShaderStageFlags::ANY_HIT_KHR, name)?,
                None => vk::SHADER_UNUSED_KHR,
            };
            groups.push(
                vk::RayTracingShaderGroupCreateInfoKHR::default()
                    .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                    .general_shader(vk::SHADER_UNUSED_KHR)
                    .closest_hit_shader(closest_hit)
                    .any_hit_shader(any_hit)
                    .intersection_shader(vk::SHADER_UNUSED_KHR),
            );
        }

        let stages: Vec<vk::PipelineShaderStageCreateInfo> = entries
            .iter()
            .map(|(stage, name)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(*stage)
                    .module(module)
                    .name(name)
            })
            .collect();

        let create_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(desc.max_recursion_depth)
            .layout(root.layout);

        let pipeline = unsafe {
            loader.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                &[create_info],
                None,
            )
        }
        .map(|pipelines| pipelines[0])
        .map_err(|(_, e)| creation_failed(&format!("ray tracing pipeline '{}'", desc.label), e))?;

        let handle_size = ctx.profile.capabilities.shader_identifier_size as usize;
        let handles = unsafe {
            loader.get_ray_tracing_shader_group_handles(
                pipeline,
                0,
                groups.len() as u32,
                groups.len() * handle_size,
            )
        };
        match handles {
            Ok(handles) => Ok((pipeline, handles, handle_size)),
            Err(e) => {
                unsafe { device.destroy_pipeline(pipeline, None) };
                Err(GraphicsError::Internal(format!("shader group handles: {e:?}")))
            }
        }
    })();

    unsafe { device.destroy_shader_module(module, None) };

    match result {
        Ok((pipeline, group_handles, handle_size)) => {
            log::trace!("Created ray tracing pipeline '{}'", desc.label);
            Ok(PipelineObject {
                pipeline,
                bind_point: vk::PipelineBindPoint::RAY_TRACING_KHR,
                root,
                group_names: desc.group_names().map(str::to_string).collect(),
                group_handles,
                handle_size,
            })
        }
        Err(e) => {
            root.destroy(device);
            Err(e)
        }
    }
}
