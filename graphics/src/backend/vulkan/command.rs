//! Encoding of recorded command lists into Vulkan command buffers.
//!
//! Render passes are implicit: a dynamic rendering scope opens at the first
//! draw after [`Command::SetRenderTargets`] and closes before anything that
//! may not run inside one (barriers, copies, builds, ray dispatches, target
//! changes) and at the end of the list.

use std::ffi::CString;

use ash::vk;

use crate::command::{Command, CommandList};
use crate::error::GraphicsError;
use crate::shader_table::ShaderTableRegion;
use crate::types::{Resource, ResourceBarrier, ResourceState, ScissorRect, Viewport};

use super::conversion::{convert_state, convert_topology};
use super::descriptor::HEAP_SET;
use super::pipeline::{PipelineObject, ROOT_DESCRIPTOR_SET, RootSlot, SAMPLER_SET};
use super::{DeviceContext, Objects, TextureObject, full_range};

/// Encode every command of `list` into `cmd`, which must be recording.
pub fn encode(
    ctx: &DeviceContext,
    objects: &Objects,
    cmd: vk::CommandBuffer,
    list: &CommandList,
) -> Result<(), GraphicsError> {
    let mut encoder = Encoder {
        ctx,
        objects,
        cmd,
        pipeline: None,
        heap: None,
        color: None,
        depth: None,
        rendering: false,
        open_events: 0,
    };
    for command in list.commands() {
        encoder.encode(command)?;
    }
    encoder.end_rendering();
    for _ in 0..encoder.open_events {
        encoder.end_event();
    }
    Ok(())
}

/// Flip a viewport so clip-space y points up.
fn flipped_viewport(viewport: &Viewport) -> vk::Viewport {
    vk::Viewport {
        x: viewport.x,
        y: viewport.y + viewport.height,
        width: viewport.width,
        height: -viewport.height,
        min_depth: viewport.min_depth,
        max_depth: viewport.max_depth,
    }
}

fn scissor(rect: &ScissorRect) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: rect.x,
            y: rect.y,
        },
        extent: vk::Extent2D {
            width: rect.width,
            height: rect.height,
        },
    }
}

struct Encoder<'a> {
    ctx: &'a DeviceContext,
    objects: &'a Objects,
    cmd: vk::CommandBuffer,
    pipeline: Option<&'a PipelineObject>,
    heap: Option<vk::DescriptorSet>,
    color: Option<&'a TextureObject>,
    depth: Option<&'a TextureObject>,
    rendering: bool,
    open_events: u32,
}

impl<'a> Encoder<'a> {
    fn device(&self) -> &ash::Device {
        &self.ctx.device
    }

    fn encode(&mut self, command: &Command) -> Result<(), GraphicsError> {
        let cmd = self.cmd;
        let objects = self.objects;
        match command {
            Command::ResourceBarrier(barriers) => {
                self.end_rendering();
                self.barriers(barriers)?;
            }
            Command::CopyBuffer { src, dst } => {
                self.end_rendering();
                let src = objects.buffer(*src)?;
                let dst = objects.buffer(*dst)?;
                let region = vk::BufferCopy::default().size(src.size.min(dst.size));
                unsafe { self.device().cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]) };
            }
            Command::CopyBufferRegion {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                self.end_rendering();
                let src = objects.buffer(*src)?;
                let dst = objects.buffer(*dst)?;
                if src_offset + size > src.size || dst_offset + size > dst.size {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "copy of {size} bytes out of range ({src_offset}/{} -> {dst_offset}/{})",
                        src.size, dst.size
                    )));
                }
                let region = vk::BufferCopy::default()
                    .src_offset(*src_offset)
                    .dst_offset(*dst_offset)
                    .size(*size);
                unsafe { self.device().cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]) };
            }
            Command::ClearRenderTarget { target, color } => {
                self.end_rendering();
                let target = objects.texture(*target)?;
                if target.format.is_depth() {
                    return Err(GraphicsError::InvalidParameter(
                        "color clear of a depth texture".to_string(),
                    ));
                }
                let clear = vk::ClearValue {
                    color: vk::ClearColorValue { float32: *color },
                };
                self.clear(target, clear);
            }
            Command::ClearDepth { target, depth } => {
                self.end_rendering();
                let target = objects.texture(*target)?;
                if !target.format.is_depth() {
                    return Err(GraphicsError::InvalidParameter(
                        "depth clear of a color texture".to_string(),
                    ));
                }
                let clear = vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: *depth,
                        stencil: 0,
                    },
                };
                self.clear(target, clear);
            }
            Command::SetRenderTargets { color, depth } => {
                self.end_rendering();
                self.color = color.map(|id| objects.texture(id)).transpose()?;
                self.depth = depth.map(|id| objects.texture(id)).transpose()?;
            }
            Command::SetViewport(viewport) => unsafe {
                self.device()
                    .cmd_set_viewport(cmd, 0, &[flipped_viewport(viewport)]);
            },
            Command::SetScissor(rect) => unsafe {
                self.device().cmd_set_scissor(cmd, 0, &[scissor(rect)]);
            },
            Command::SetPrimitiveTopology(topology) => unsafe {
                self.device()
                    .cmd_set_primitive_topology(cmd, convert_topology(*topology));
            },
            Command::SetPipeline(id) => {
                let pipeline = objects.pipeline(*id)?;
                if pipeline.bind_point == vk::PipelineBindPoint::RAY_TRACING {
                    self.end_rendering();
                }
                unsafe {
                    self.device()
                        .cmd_bind_pipeline(cmd, pipeline.bind_point, pipeline.pipeline);
                }
                self.pipeline = Some(pipeline);
                self.bind_sets();
            }
            Command::SetDescriptorHeap(id) => {
                self.heap = Some(objects.heap(*id)?.set);
                self.bind_sets();
            }
            Command::SetRootDescriptorTable { parameter, base } => {
                let pipeline = self.bound_pipeline()?;
                let RootSlot::Table { push_offset } = pipeline.root_slot(*parameter)? else {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "root parameter {parameter} is not a descriptor table"
                    )));
                };
                unsafe {
                    self.device().cmd_push_constants(
                        cmd,
                        pipeline.layout(),
                        vk::ShaderStageFlags::ALL,
                        push_offset,
                        &base.get().to_ne_bytes(),
                    );
                }
            }
            Command::SetRootConstantBuffer {
                parameter,
                buffer,
                offset,
            } => {
                let pipeline = self.bound_pipeline()?;
                let RootSlot::ConstantBuffer { binding } = pipeline.root_slot(*parameter)? else {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "root parameter {parameter} is not a constant buffer"
                    )));
                };
                let buffer = objects.buffer(*buffer)?;
                if *offset >= buffer.size {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "constant buffer offset {offset} past the end of {} bytes",
                        buffer.size
                    )));
                }
                let infos = [vk::DescriptorBufferInfo::default()
                    .buffer(buffer.buffer)
                    .offset(*offset)
                    .range((buffer.size - offset).min(self.ctx.profile.max_uniform_range))];
                let write = vk::WriteDescriptorSet::default()
                    .dst_binding(binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&infos);
                unsafe {
                    self.ctx.push_descriptor.cmd_push_descriptor_set(
                        cmd,
                        pipeline.bind_point,
                        pipeline.layout(),
                        ROOT_DESCRIPTOR_SET,
                        &[write],
                    );
                }
            }
            Command::SetVertexBuffer(view) => {
                let buffer = objects.buffer(view.buffer)?;
                unsafe {
                    self.device()
                        .cmd_bind_vertex_buffers(cmd, 0, &[buffer.buffer], &[0]);
                }
            }
            Command::SetIndexBuffer(view) => {
                let buffer = objects.buffer(view.buffer)?;
                unsafe {
                    self.device()
                        .cmd_bind_index_buffer(cmd, buffer.buffer, 0, vk::IndexType::UINT32);
                }
            }
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            } => {
                self.begin_rendering()?;
                unsafe {
                    self.device().cmd_draw_indexed(
                        cmd,
                        *index_count,
                        *instance_count,
                        *first_index,
                        *base_vertex,
                        *first_instance,
                    );
                }
            }
            Command::BuildAccelerationStructure(build) => {
                self.end_rendering();
                super::accel::record_build(self.ctx, objects, cmd, build)?;
            }
            Command::DispatchRays(desc) => {
                self.end_rendering();
                let pipeline = self.bound_pipeline()?;
                if pipeline.bind_point != vk::PipelineBindPoint::RAY_TRACING {
                    return Err(GraphicsError::InvalidParameter(
                        "ray dispatch without a ray tracing pipeline bound".to_string(),
                    ));
                }
                let loader = self.ctx.ray_tracing.as_ref().ok_or_else(|| {
                    GraphicsError::FeatureNotSupported("ray tracing pipelines".to_string())
                })?;
                let mut ray_generation = self.table_region(&desc.ray_generation)?;
                // Vulkan requires the ray generation region to hold exactly one record.
                ray_generation.size = ray_generation.stride;
                let miss = self.table_region(&desc.miss)?;
                let hit_group = self.table_region(&desc.hit_group)?;
                let callable = vk::StridedDeviceAddressRegionKHR::default();
                unsafe {
                    loader.cmd_trace_rays(
                        cmd,
                        &ray_generation,
                        &miss,
                        &hit_group,
                        &callable,
                        desc.width,
                        desc.height,
                        desc.depth,
                    );
                }
            }
            Command::BeginEvent(name) => {
                self.open_events += 1;
                if let Some(debug_utils) = &self.ctx.debug_utils {
                    let name = CString::new(name.as_str()).unwrap_or_default();
                    let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
                    unsafe { debug_utils.cmd_begin_debug_utils_label(cmd, &label) };
                }
            }
            Command::EndEvent => {
                if self.open_events > 0 {
                    self.open_events -= 1;
                    self.end_event();
                }
            }
        }
        Ok(())
    }

    fn bound_pipeline(&self) -> Result<&'a PipelineObject, GraphicsError> {
        self.pipeline.ok_or_else(|| {
            GraphicsError::InvalidParameter("root argument set before any pipeline".to_string())
        })
    }

    /// Bind the heap and static samplers for the current pipeline layout.
    fn bind_sets(&self) {
        let Some(pipeline) = self.pipeline else {
            return;
        };
        unsafe {
            if let Some(heap) = self.heap {
                self.device().cmd_bind_descriptor_sets(
                    self.cmd,
                    pipeline.bind_point,
                    pipeline.layout(),
                    HEAP_SET,
                    &[heap],
                    &[],
                );
            }
            if let Some(samplers) = pipeline.sampler_set() {
                self.device().cmd_bind_descriptor_sets(
                    self.cmd,
                    pipeline.bind_point,
                    pipeline.layout(),
                    SAMPLER_SET,
                    &[samplers],
                    &[],
                );
            }
        }
    }

    fn table_region(
        &self,
        region: &ShaderTableRegion,
    ) -> Result<vk::StridedDeviceAddressRegionKHR, GraphicsError> {
        if region.size == 0 {
            return Ok(vk::StridedDeviceAddressRegionKHR::default());
        }
        let buffer = self.objects.buffer(region.buffer)?;
        if region.offset + region.size > buffer.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "shader table region {}+{} exceeds buffer of {} bytes",
                region.offset, region.size, buffer.size
            )));
        }
        Ok(vk::StridedDeviceAddressRegionKHR {
            device_address: buffer.address + region.offset,
            stride: region.stride,
            size: region.size,
        })
    }

    fn barriers(&self, barriers: &[ResourceBarrier]) -> Result<(), GraphicsError> {
        let mut memory = Vec::new();
        let mut buffers = Vec::new();
        let mut images = Vec::new();

        for barrier in barriers {
            match *barrier {
                ResourceBarrier::Transition {
                    resource: Resource::Buffer(id),
                    before,
                    after,
                } => {
                    let buffer = self.objects.buffer(id)?;
                    let (src, dst) = (convert_state(before), convert_state(after));
                    buffers.push(
                        vk::BufferMemoryBarrier2::default()
                            .src_stage_mask(src.stage)
                            .src_access_mask(src.access)
                            .dst_stage_mask(dst.stage)
                            .dst_access_mask(dst.access)
                            .buffer(buffer.buffer)
                            .offset(0)
                            .size(vk::WHOLE_SIZE),
                    );
                }
                ResourceBarrier::Transition {
                    resource: Resource::Texture(id),
                    before,
                    after,
                } => {
                    let texture = self.objects.texture(id)?;
                    let (src, dst) = (convert_state(before), convert_state(after));
                    let old_layout =
                        if before == ResourceState::Present && texture.discard_on_present_exit {
                            vk::ImageLayout::UNDEFINED
                        } else {
                            src.layout
                        };
                    images.push(
                        vk::ImageMemoryBarrier2::default()
                            .src_stage_mask(src.stage)
                            .src_access_mask(src.access)
                            .dst_stage_mask(dst.stage)
                            .dst_access_mask(dst.access)
                            .old_layout(old_layout)
                            .new_layout(dst.layout)
                            .image(texture.image)
                            .subresource_range(full_range(texture.aspect)),
                    );
                }
                ResourceBarrier::Uav { resource } => {
                    // Validate the id even though the barrier covers all memory.
                    match resource {
                        Some(Resource::Buffer(id)) => {
                            self.objects.buffer(id)?;
                        }
                        Some(Resource::Texture(id)) => {
                            self.objects.texture(id)?;
                        }
                        None => {}
                    }
                    memory.push(
                        vk::MemoryBarrier2::default()
                            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
                            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                            .dst_access_mask(
                                vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
                            ),
                    );
                }
            }
        }

        if memory.is_empty() && buffers.is_empty() && images.is_empty() {
            return Ok(());
        }
        let dependency = vk::DependencyInfo::default()
            .memory_barriers(&memory)
            .buffer_memory_barriers(&buffers)
            .image_memory_barriers(&images);
        unsafe { self.device().cmd_pipeline_barrier2(self.cmd, &dependency) };
        Ok(())
    }

    /// Clear one attachment with an empty rendering scope.
    fn clear(&self, target: &TextureObject, clear: vk::ClearValue) {
        let is_depth = target.format.is_depth();
        let attachment = [vk::RenderingAttachmentInfo::default()
            .image_view(target.view)
            .image_layout(if is_depth {
                vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            })
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(clear)];
        let area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: target.extent,
        };
        let mut info = vk::RenderingInfo::default()
            .render_area(area)
            .layer_count(1);
        info = if is_depth {
            info.depth_attachment(&attachment[0])
        } else {
            info.color_attachments(&attachment)
        };
        unsafe {
            self.device().cmd_begin_rendering(self.cmd, &info);
            self.device().cmd_end_rendering(self.cmd);
        }
    }

    fn begin_rendering(&mut self) -> Result<(), GraphicsError> {
        if self.rendering {
            return Ok(());
        }
        let extent = self
            .color
            .or(self.depth)
            .map(|target| target.extent)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter("draw without render targets".to_string())
            })?;

        let colors: Vec<vk::RenderingAttachmentInfo> = self
            .color
            .iter()
            .map(|target| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(target.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
            })
            .collect();
        let depth = self.depth.map(|target| {
            vk::RenderingAttachmentInfo::default()
                .image_view(target.view)
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::LOAD)
                .store_op(vk::AttachmentStoreOp::STORE)
        });

        let mut info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .layer_count(1)
            .color_attachments(&colors);
        if let Some(depth) = &depth {
            info = info.depth_attachment(depth);
        }
        unsafe { self.device().cmd_begin_rendering(self.cmd, &info) };
        self.rendering = true;
        Ok(())
    }

    fn end_rendering(&mut self) {
        if self.rendering {
            unsafe { self.device().cmd_end_rendering(self.cmd) };
            self.rendering = false;
        }
    }

    fn end_event(&self) {
        if let Some(debug_utils) = &self.ctx.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.cmd) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_is_flipped() {
        let viewport = Viewport {
            x: 0.0,
            y: 0.0,
            width: 1280.0,
            height: 720.0,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let flipped = flipped_viewport(&viewport);
        assert_eq!(flipped.y, 720.0);
        assert_eq!(flipped.height, -720.0);
        assert_eq!(flipped.width, 1280.0);
        assert_eq!(flipped.max_depth, 1.0);
    }

    #[test]
    fn test_scissor_keeps_offset() {
        let rect = scissor(&ScissorRect::new(4, 8, 100, 50));
        assert_eq!(rect.offset.x, 4);
        assert_eq!(rect.offset.y, 8);
        assert_eq!(rect.extent.width, 100);
        assert_eq!(rect.extent.height, 50);
    }
}
