//! Command queues, allocators and command lists.
//!
//! A [`CommandList`] records backend-neutral [`Command`]s between
//! [`reset`](CommandList::reset) and [`close`](CommandList::close); the
//! backend encodes them into native commands when the list is submitted to a
//! [`CommandQueue`]. The [`CommandAllocator`] a list was reset with backs the
//! encoded commands and must not be reset while that work is in flight.

use std::sync::Arc;

use lumen_core::mesh::PrimitiveTopology;

use crate::accel::AccelBuildCommand;
use crate::backend::{
    AllocatorId, BufferId, DescriptorHeapId, GpuBackend, PipelineId, QueueId, SwapChainId,
    TextureId,
};
use crate::descriptor::DescriptorIndex;
use crate::device::GpuDevice;
use crate::error::GraphicsError;
use crate::shader_table::DispatchRaysDesc;
use crate::sync::Fence;
use crate::types::{
    IndexBufferView, ResourceBarrier, ResourceState, ScissorRect, VertexBufferView, Viewport,
};

/// Kind of work a queue, allocator and list accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueKind {
    /// Graphics, compute and copy.
    #[default]
    Direct,
    /// Compute and copy.
    Compute,
    /// Copy only.
    Copy,
}

/// A recorded GPU command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// One batch of barriers, executed together.
    ResourceBarrier(Vec<ResourceBarrier>),
    /// Copy a whole buffer into another of the same size.
    CopyBuffer { src: BufferId, dst: BufferId },
    CopyBufferRegion {
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
    ClearRenderTarget { target: TextureId, color: [f32; 4] },
    ClearDepth { target: TextureId, depth: f32 },
    SetRenderTargets {
        color: Option<TextureId>,
        depth: Option<TextureId>,
    },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetPrimitiveTopology(PrimitiveTopology),
    SetPipeline(PipelineId),
    SetDescriptorHeap(DescriptorHeapId),
    /// Point root parameter `parameter` at heap slots starting at `base`.
    SetRootDescriptorTable { parameter: u32, base: DescriptorIndex },
    /// Bind a constant buffer range as root parameter `parameter`.
    SetRootConstantBuffer {
        parameter: u32,
        buffer: BufferId,
        offset: u64,
    },
    SetVertexBuffer(VertexBufferView),
    SetIndexBuffer(IndexBufferView),
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    BuildAccelerationStructure(AccelBuildCommand),
    DispatchRays(DispatchRaysDesc),
    /// Open a named debug region.
    BeginEvent(String),
    EndEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListState {
    Closed,
    Recording,
}

/// A list of recorded commands.
///
/// Lists are created closed; [`reset`](Self::reset) opens them for
/// recording.
#[derive(Debug)]
pub struct CommandList {
    kind: QueueKind,
    label: String,
    state: ListState,
    allocator: Option<AllocatorId>,
    commands: Vec<Command>,
    open_events: u32,
    misuse: Option<String>,
}

impl CommandList {
    pub fn new(kind: QueueKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            state: ListState::Closed,
            allocator: None,
            commands: Vec::new(),
            open_events: 0,
            misuse: None,
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_recording(&self) -> bool {
        self.state == ListState::Recording
    }

    /// Allocator backing the current recording.
    pub fn allocator(&self) -> Option<AllocatorId> {
        self.allocator
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Discard the previous contents and start recording into `allocator`.
    pub fn reset(&mut self, allocator: &CommandAllocator) -> Result<(), GraphicsError> {
        if self.state == ListState::Recording {
            return Err(GraphicsError::InvalidParameter(format!(
                "command list '{}' reset while still recording",
                self.label
            )));
        }
        if allocator.kind() != self.kind {
            return Err(GraphicsError::InvalidParameter(format!(
                "command list '{}' ({:?}) reset with a {:?} allocator",
                self.label,
                self.kind,
                allocator.kind()
            )));
        }
        self.commands.clear();
        self.allocator = Some(allocator.id());
        self.open_events = 0;
        self.misuse = None;
        self.state = ListState::Recording;
        Ok(())
    }

    /// Finish recording.
    pub fn close(&mut self) -> Result<(), GraphicsError> {
        if self.state != ListState::Recording {
            return Err(GraphicsError::InvalidParameter(format!(
                "command list '{}' closed while not recording",
                self.label
            )));
        }
        self.state = ListState::Closed;
        if let Some(msg) = self.misuse.take() {
            return Err(GraphicsError::InvalidParameter(msg));
        }
        if self.open_events != 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "command list '{}' closed with {} open debug events",
                self.label, self.open_events
            )));
        }
        Ok(())
    }

    fn record(&mut self, command: Command) {
        if self.state != ListState::Recording {
            if self.misuse.is_none() {
                self.misuse = Some(format!(
                    "command recorded into closed command list '{}'",
                    self.label
                ));
            }
            log::error!("Command recorded into closed command list '{}'", self.label);
            return;
        }
        self.commands.push(command);
    }

    /// Record one batch of barriers.
    pub fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) {
        if !barriers.is_empty() {
            self.record(Command::ResourceBarrier(barriers.to_vec()));
        }
    }

    /// Record a single state transition.
    pub fn transition(
        &mut self,
        resource: impl Into<crate::types::Resource>,
        before: ResourceState,
        after: ResourceState,
    ) {
        self.resource_barrier(&[ResourceBarrier::transition(resource, before, after)]);
    }

    pub fn copy_buffer(&mut self, src: BufferId, dst: BufferId) {
        self.record(Command::CopyBuffer { src, dst });
    }

    pub fn copy_buffer_region(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) {
        self.record(Command::CopyBufferRegion {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    pub fn clear_render_target(&mut self, target: TextureId, color: [f32; 4]) {
        self.record(Command::ClearRenderTarget { target, color });
    }

    pub fn clear_depth(&mut self, target: TextureId, depth: f32) {
        self.record(Command::ClearDepth { target, depth });
    }

    pub fn set_render_targets(&mut self, color: Option<TextureId>, depth: Option<TextureId>) {
        self.record(Command::SetRenderTargets { color, depth });
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.record(Command::SetViewport(viewport));
    }

    pub fn set_scissor(&mut self, scissor: ScissorRect) {
        self.record(Command::SetScissor(scissor));
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.record(Command::SetPrimitiveTopology(topology));
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineId) {
        self.record(Command::SetPipeline(pipeline));
    }

    pub fn set_descriptor_heap(&mut self, heap: DescriptorHeapId) {
        self.record(Command::SetDescriptorHeap(heap));
    }

    pub fn set_root_descriptor_table(&mut self, parameter: u32, base: DescriptorIndex) {
        self.record(Command::SetRootDescriptorTable { parameter, base });
    }

    pub fn set_root_constant_buffer(&mut self, parameter: u32, buffer: BufferId, offset: u64) {
        self.record(Command::SetRootConstantBuffer {
            parameter,
            buffer,
            offset,
        });
    }

    pub fn set_vertex_buffer(&mut self, view: VertexBufferView) {
        self.record(Command::SetVertexBuffer(view));
    }

    pub fn set_index_buffer(&mut self, view: IndexBufferView) {
        self.record(Command::SetIndexBuffer(view));
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) {
        self.record(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        });
    }

    pub fn build_acceleration_structure(&mut self, build: AccelBuildCommand) {
        self.record(Command::BuildAccelerationStructure(build));
    }

    pub fn dispatch_rays(&mut self, desc: DispatchRaysDesc) {
        self.record(Command::DispatchRays(desc));
    }

    pub fn begin_event(&mut self, name: impl Into<String>) {
        self.open_events += 1;
        self.record(Command::BeginEvent(name.into()));
    }

    pub fn end_event(&mut self) {
        match self.open_events.checked_sub(1) {
            Some(open) => {
                self.open_events = open;
                self.record(Command::EndEvent);
            }
            None => {
                if self.misuse.is_none() {
                    self.misuse = Some(format!(
                        "end_event without begin_event in command list '{}'",
                        self.label
                    ));
                }
            }
        }
    }
}

/// Memory backing the commands of the lists reset with it.
pub struct CommandAllocator {
    backend: Arc<dyn GpuBackend>,
    id: AllocatorId,
    kind: QueueKind,
}

impl CommandAllocator {
    pub fn new(device: &GpuDevice, kind: QueueKind) -> Result<Self, GraphicsError> {
        let id = device.backend().create_command_allocator(kind)?;
        Ok(Self {
            backend: device.backend().clone(),
            id,
            kind,
        })
    }

    pub fn id(&self) -> AllocatorId {
        self.id
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Recycle the allocator. Fails while GPU work recorded from it is in flight.
    pub fn reset(&self) -> Result<(), GraphicsError> {
        self.backend.reset_command_allocator(self.id)
    }
}

impl Drop for CommandAllocator {
    fn drop(&mut self) {
        self.backend.destroy_command_allocator(self.id);
    }
}

impl std::fmt::Debug for CommandAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandAllocator")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Ordered submission channel to the GPU.
pub struct CommandQueue {
    backend: Arc<dyn GpuBackend>,
    id: QueueId,
    kind: QueueKind,
    label: String,
}

impl CommandQueue {
    pub fn new(device: &GpuDevice, kind: QueueKind, label: &str) -> Result<Self, GraphicsError> {
        let id = device.backend().create_queue(kind, label)?;
        log::debug!("Created {kind:?} queue '{label}'");
        Ok(Self {
            backend: device.backend().clone(),
            id,
            kind,
            label: label.to_string(),
        })
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Submit closed lists for execution, in order.
    pub fn execute(&self, lists: &[&CommandList]) -> Result<(), GraphicsError> {
        self.validate(lists)?;
        self.backend.submit(self.id, lists, None)
    }

    /// Submit lists that render into the acquired back buffer of `swap_chain`.
    pub fn execute_for_present(
        &self,
        lists: &[&CommandList],
        swap_chain: SwapChainId,
    ) -> Result<(), GraphicsError> {
        self.validate(lists)?;
        self.backend.submit(self.id, lists, Some(swap_chain))
    }

    /// Signal `fence` to `value` once all work submitted so far completes.
    pub fn signal(&self, fence: &Fence, value: u64) -> Result<(), GraphicsError> {
        self.backend.signal_fence(self.id, fence.id(), value)
    }

    fn validate(&self, lists: &[&CommandList]) -> Result<(), GraphicsError> {
        for list in lists {
            if list.is_recording() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "command list '{}' submitted before close",
                    list.label()
                )));
            }
            if list.allocator().is_none() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "command list '{}' submitted without recording",
                    list.label()
                )));
            }
            if list.kind() != self.kind {
                return Err(GraphicsError::InvalidParameter(format!(
                    "{:?} command list '{}' submitted to {:?} queue '{}'",
                    list.kind(),
                    list.label(),
                    self.kind,
                    self.label
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_device;

    #[test]
    fn test_list_starts_closed() {
        let list = CommandList::new(QueueKind::Direct, "main");
        assert!(!list.is_recording());
        assert!(list.allocator().is_none());
    }

    #[test]
    fn test_reset_close_cycle() {
        let device = test_device();
        let allocator = CommandAllocator::new(&device, QueueKind::Direct).unwrap();
        let mut list = CommandList::new(QueueKind::Direct, "main");

        list.reset(&allocator).unwrap();
        list.clear_depth(TextureId(1), 1.0);
        assert!(list.reset(&allocator).is_err());
        list.close().unwrap();
        assert_eq!(list.commands().len(), 1);
        assert!(list.close().is_err());
    }

    #[test]
    fn test_recording_into_closed_list_is_reported() {
        let device = test_device();
        let allocator = CommandAllocator::new(&device, QueueKind::Direct).unwrap();
        let mut list = CommandList::new(QueueKind::Direct, "main");
        list.set_pipeline(PipelineId(3));
        assert!(list.commands().is_empty());

        list.reset(&allocator).unwrap();
        list.close().unwrap();
    }

    #[test]
    fn test_unbalanced_events_fail_close() {
        let device = test_device();
        let allocator = CommandAllocator::new(&device, QueueKind::Direct).unwrap();
        let mut list = CommandList::new(QueueKind::Direct, "main");
        list.reset(&allocator).unwrap();
        list.begin_event("overlay");
        assert!(list.close().is_err());

        list.reset(&allocator).unwrap();
        list.end_event();
        assert!(list.close().is_err());
    }

    #[test]
    fn test_allocator_kind_must_match() {
        let device = test_device();
        let allocator = CommandAllocator::new(&device, QueueKind::Copy).unwrap();
        let mut list = CommandList::new(QueueKind::Direct, "main");
        assert!(list.reset(&allocator).is_err());
    }

    #[test]
    fn test_queue_rejects_open_list() {
        let device = test_device();
        let queue = CommandQueue::new(&device, QueueKind::Direct, "direct").unwrap();
        let allocator = CommandAllocator::new(&device, QueueKind::Direct).unwrap();
        let mut list = CommandList::new(QueueKind::Direct, "main");
        list.reset(&allocator).unwrap();
        assert!(queue.execute(&[&list]).is_err());
        list.close().unwrap();
        queue.execute(&[&list]).unwrap();
    }
}
