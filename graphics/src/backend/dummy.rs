//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to a GPU. It keeps every object in host memory
//! and simulates a GPU that only makes progress when the CPU waits on it:
//! submitted lists and fence signals are queued per command queue and
//! retired, in submission order, by [`GpuBackend::wait_fence`],
//! [`GpuBackend::wait_idle`] or [`DummyBackend::retire_all`]. Buffer copies,
//! clears, draws and acceleration structure builds take effect when retired.
//!
//! Command lists are validated when submitted, the way a debug layer would:
//! barrier `before` states must match the tracked state, copies need a
//! `CopyDest` destination, acceleration structure reads need a UAV barrier
//! after the build, and so on. Violations are returned as
//! [`GraphicsError::Internal`]. Misuse that a real driver would only report
//! (releasing a resource the GPU still references) is logged and collected
//! in [`DummyBackend::validation_messages`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::accel::{
    AccelBuildCommand, AccelBuildFlags, AccelBuildInputs, AccelGeometry, AccelKind,
    AccelPrebuildInfo, BuildMode, TlasInstance,
};
use crate::command::{Command, CommandList, QueueKind};
use crate::descriptor::{DescriptorBinding, DescriptorHeapLayout, DescriptorIndex};
use crate::device::{AdapterInfo, AdapterType, DeviceCapabilities};
use crate::error::GraphicsError;
use crate::pipeline::{GraphicsPipelineDesc, RayTracingPipelineDesc};
use crate::resources::align_up;
use crate::swapchain::{PresentRequest, SurfaceTarget, SwapChainDescriptor};
use crate::types::{
    BufferDescriptor, BufferUsage, Resource, ResourceBarrier, ResourceState, TextureDescriptor,
    TextureUsage,
};

use super::{
    AccelId, AllocatorId, BufferId, DescriptorHeapId, FenceId, GpuBackend, GpuInstance,
    PipelineId, QueueId, SwapChainId, TextureId,
};

const POLL_INTERVAL: Duration = Duration::from_millis(1);
const BUFFER_ADDRESS_BASE: u64 = 0x1_0000_0000;
const BUFFER_ADDRESS_ALIGNMENT: u64 = 64 * 1024;

struct BufferState {
    desc: BufferDescriptor,
    data: Vec<u8>,
    address: u64,
    state: ResourceState,
}

struct TextureState {
    state: ResourceState,
    clear_color: Option<[f32; 4]>,
    clear_depth: Option<f32>,
    draw_count: u64,
}

struct SwapChainState {
    desc: SwapChainDescriptor,
    back_buffers: Vec<TextureId>,
    current: u32,
    present_count: u64,
    last_present: Option<PresentRequest>,
}

struct AccelState {
    kind: AccelKind,
    buffer: BufferId,
    address: u64,
    /// A build of this structure has been submitted.
    build_submitted: bool,
    built: bool,
    instances: Vec<TlasInstance>,
}

struct PipelineState {
    ray_tracing: bool,
    exports: Vec<String>,
}

struct HeapState {
    layout: DescriptorHeapLayout,
    bindings: Vec<Option<DescriptorBinding>>,
}

enum Work {
    Execute {
        allocator: AllocatorId,
        commands: Vec<Command>,
    },
    Signal {
        fence: FenceId,
        value: u64,
    },
}

struct QueueState {
    kind: QueueKind,
    label: String,
    pending: VecDeque<Work>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    next_address: u64,
    queues: BTreeMap<u64, QueueState>,
    /// Allocator kind and number of queued lists recorded from it.
    allocators: HashMap<u64, (QueueKind, u32)>,
    fences: HashMap<u64, u64>,
    buffers: HashMap<u64, BufferState>,
    textures: HashMap<u64, TextureState>,
    swap_chains: HashMap<u64, SwapChainState>,
    heaps: HashMap<u64, HeapState>,
    pipelines: HashMap<u64, PipelineState>,
    accels: HashMap<u64, AccelState>,
    /// Resources whose release waits for the GPU to stop referencing them.
    deferred: Vec<Resource>,
    messages: Vec<String>,
    dispatch_count: u64,
}

impl State {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn alloc_address(&mut self, size: u64) -> u64 {
        if self.next_address == 0 {
            self.next_address = BUFFER_ADDRESS_BASE;
        }
        let address = self.next_address;
        self.next_address += align_up(size.max(1), BUFFER_ADDRESS_ALIGNMENT);
        address
    }

    fn report(&mut self, message: String) {
        log::warn!("DummyBackend validation: {message}");
        self.messages.push(message);
    }

    fn buffer(&self, id: BufferId) -> Result<&BufferState, GraphicsError> {
        self.buffers
            .get(&id.0)
            .ok_or_else(|| invalid(format!("unknown buffer {id:?}")))
    }

    fn buffer_mut(&mut self, id: BufferId) -> Result<&mut BufferState, GraphicsError> {
        self.buffers
            .get_mut(&id.0)
            .ok_or_else(|| invalid(format!("unknown buffer {id:?}")))
    }

    fn accel(&self, id: AccelId) -> Result<&AccelState, GraphicsError> {
        self.accels
            .get(&id.0)
            .ok_or_else(|| invalid(format!("unknown acceleration structure {id:?}")))
    }

    fn swap_chain(&self, id: SwapChainId) -> Result<&SwapChainState, GraphicsError> {
        self.swap_chains
            .get(&id.0)
            .ok_or_else(|| invalid(format!("unknown swap chain {id:?}")))
    }

    fn resource_state(&self, resource: Resource) -> Result<ResourceState, GraphicsError> {
        match resource {
            Resource::Buffer(id) => Ok(self.buffer(id)?.state),
            Resource::Texture(id) => self
                .textures
                .get(&id.0)
                .map(|t| t.state)
                .ok_or_else(|| invalid(format!("unknown texture {id:?}"))),
        }
    }

    fn fence_reached(&self, fence: FenceId, value: u64) -> Result<bool, GraphicsError> {
        self.fences
            .get(&fence.0)
            .map(|&completed| completed >= value)
            .ok_or_else(|| invalid(format!("unknown fence {fence:?}")))
    }

    /// Whether any queued list references `resource`.
    fn in_flight(&self, resource: Resource) -> bool {
        let accel_buffers: HashMap<u64, BufferId> =
            self.accels.iter().map(|(&id, a)| (id, a.buffer)).collect();
        self.queues.values().flat_map(|q| &q.pending).any(|work| match work {
            Work::Execute { commands, .. } => commands
                .iter()
                .any(|command| references(command, resource, &accel_buffers)),
            Work::Signal { .. } => false,
        })
    }

    /// Retire queued work until `fence` reaches `value` or nothing is left.
    fn retire_until(&mut self, fence: FenceId, value: u64) -> Result<bool, GraphicsError> {
        let queues: Vec<u64> = self.queues.keys().copied().collect();
        for queue in queues {
            while !self.fence_reached(fence, value)? {
                let Some(work) = self.queues.get_mut(&queue).and_then(|q| q.pending.pop_front())
                else {
                    break;
                };
                self.retire(work)?;
            }
        }
        self.release_deferred();
        self.fence_reached(fence, value)
    }

    fn retire_all(&mut self) -> Result<(), GraphicsError> {
        let queues: Vec<u64> = self.queues.keys().copied().collect();
        for queue in queues {
            while let Some(work) = self.queues.get_mut(&queue).and_then(|q| q.pending.pop_front()) {
                self.retire(work)?;
            }
        }
        self.release_deferred();
        Ok(())
    }

    fn retire(&mut self, work: Work) -> Result<(), GraphicsError> {
        match work {
            Work::Signal { fence, value } => {
                // Signals of destroyed fences are dropped.
                if let Some(completed) = self.fences.get_mut(&fence.0) {
                    *completed = (*completed).max(value);
                }
            }
            Work::Execute {
                allocator,
                commands,
            } => {
                let mut color_target = None;
                for command in &commands {
                    self.execute(command, &mut color_target)?;
                }
                if let Some((_, queued)) = self.allocators.get_mut(&allocator.0) {
                    *queued = queued.saturating_sub(1);
                }
            }
        }
        Ok(())
    }

    fn execute(
        &mut self,
        command: &Command,
        color_target: &mut Option<TextureId>,
    ) -> Result<(), GraphicsError> {
        match command {
            Command::CopyBuffer { src, dst } => {
                let data = self.buffer(*src)?.data.clone();
                self.buffer_mut(*dst)?.data.copy_from_slice(&data);
            }
            Command::CopyBufferRegion {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let (from, len) = (*src_offset as usize, *size as usize);
                let data = self.buffer(*src)?.data[from..from + len].to_vec();
                let to = *dst_offset as usize;
                self.buffer_mut(*dst)?.data[to..to + len].copy_from_slice(&data);
            }
            Command::ClearRenderTarget { target, color } => {
                if let Some(texture) = self.textures.get_mut(&target.0) {
                    texture.clear_color = Some(*color);
                }
            }
            Command::ClearDepth { target, depth } => {
                if let Some(texture) = self.textures.get_mut(&target.0) {
                    texture.clear_depth = Some(*depth);
                }
            }
            Command::SetRenderTargets { color, .. } => *color_target = *color,
            Command::DrawIndexed { .. } => {
                if let Some(texture) = color_target.and_then(|t| self.textures.get_mut(&t.0)) {
                    texture.draw_count += 1;
                }
            }
            Command::BuildAccelerationStructure(build) => self.execute_build(build)?,
            Command::DispatchRays(_) => self.dispatch_count += 1,
            _ => {}
        }
        Ok(())
    }

    fn execute_build(&mut self, build: &AccelBuildCommand) -> Result<(), GraphicsError> {
        match &build.inputs.geometry {
            AccelGeometry::Triangles(_) => {
                let accel = self
                    .accels
                    .get_mut(&build.dst.0)
                    .ok_or_else(|| invalid(format!("unknown acceleration structure {:?}", build.dst)))?;
                accel.built = true;
            }
            AccelGeometry::Instances {
                buffer,
                offset,
                count,
            } => {
                let start = *offset as usize;
                let len = *count as usize * std::mem::size_of::<TlasInstance>();
                let bytes = self.buffer(*buffer)?.data[start..start + len].to_vec();
                let result = self.accel(build.dst)?.buffer;
                self.buffer_mut(result)?.data[..len].copy_from_slice(&bytes);

                let accel = self
                    .accels
                    .get_mut(&build.dst.0)
                    .ok_or_else(|| invalid(format!("unknown acceleration structure {:?}", build.dst)))?;
                accel.instances = bytes
                    .chunks_exact(std::mem::size_of::<TlasInstance>())
                    .map(bytemuck::pod_read_unaligned)
                    .collect();
                accel.built = true;
            }
        }
        Ok(())
    }

    fn release_deferred(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        for resource in deferred {
            if self.in_flight(resource) {
                self.deferred.push(resource);
                continue;
            }
            match resource {
                Resource::Buffer(id) => {
                    self.buffers.remove(&id.0);
                }
                Resource::Texture(id) => {
                    self.textures.remove(&id.0);
                }
            }
        }
    }
}

/// Whether `command` reads or writes `resource`.
fn references(
    command: &Command,
    resource: Resource,
    accel_buffers: &HashMap<u64, BufferId>,
) -> bool {
    let buffer = |id: BufferId| resource == Resource::Buffer(id);
    let texture = |id: Option<TextureId>| id.is_some_and(|id| resource == Resource::Texture(id));
    match command {
        Command::ResourceBarrier(barriers) => barriers.iter().any(|barrier| match barrier {
            ResourceBarrier::Transition { resource: r, .. } => *r == resource,
            ResourceBarrier::Uav { resource: r } => *r == Some(resource),
        }),
        Command::CopyBuffer { src, dst } | Command::CopyBufferRegion { src, dst, .. } => {
            buffer(*src) || buffer(*dst)
        }
        Command::ClearRenderTarget { target, .. } | Command::ClearDepth { target, .. } => {
            texture(Some(*target))
        }
        Command::SetRenderTargets { color, depth } => texture(*color) || texture(*depth),
        Command::SetRootConstantBuffer { buffer: b, .. } => buffer(*b),
        Command::SetVertexBuffer(view) => buffer(view.buffer),
        Command::SetIndexBuffer(view) => buffer(view.buffer),
        Command::BuildAccelerationStructure(build) => {
            let inputs = match &build.inputs.geometry {
                AccelGeometry::Triangles(geometry) => geometry
                    .iter()
                    .any(|g| buffer(g.vertex_buffer) || buffer(g.index_buffer)),
                AccelGeometry::Instances { buffer: b, .. } => buffer(*b),
            };
            inputs
                || buffer(build.scratch)
                || accel_buffers.get(&build.dst.0).is_some_and(|&b| buffer(b))
        }
        Command::DispatchRays(desc) => {
            buffer(desc.ray_generation.buffer)
                || buffer(desc.miss.buffer)
                || buffer(desc.hit_group.buffer)
        }
        _ => false,
    }
}

fn invalid(message: String) -> GraphicsError {
    GraphicsError::InvalidParameter(message)
}

fn validation(message: String) -> GraphicsError {
    log::error!("DummyBackend validation: {message}");
    GraphicsError::Internal(message)
}

/// Validates one submission against tracked resource states.
///
/// State changes are staged here and only committed once every list of the
/// submission passed.
struct SubmitValidator<'a> {
    state: &'a State,
    states: HashMap<Resource, ResourceState>,
    built: HashSet<u64>,
}

#[derive(Default)]
struct ListScope {
    label: String,
    pipeline: Option<PipelineId>,
    index_count: Option<u64>,
    /// Structures built since the last UAV barrier covering them.
    unflushed: Vec<(AccelId, AccelKind, BufferId)>,
}

impl<'a> SubmitValidator<'a> {
    fn new(state: &'a State) -> Self {
        Self {
            state,
            states: HashMap::new(),
            built: HashSet::new(),
        }
    }

    fn current(&self, resource: Resource) -> Result<ResourceState, GraphicsError> {
        match self.states.get(&resource) {
            Some(&state) => Ok(state),
            None => self.state.resource_state(resource),
        }
    }

    fn expect(
        &self,
        scope: &ListScope,
        resource: Resource,
        what: &str,
        ok: impl Fn(ResourceState) -> bool,
    ) -> Result<(), GraphicsError> {
        let current = self.current(resource)?;
        if ok(current) {
            Ok(())
        } else {
            Err(validation(format!(
                "list '{}': {what} {resource:?} is in state {current:?}",
                scope.label
            )))
        }
    }

    fn validate_list(&mut self, list: &CommandList) -> Result<(), GraphicsError> {
        let mut scope = ListScope {
            label: list.label().to_string(),
            ..ListScope::default()
        };
        for command in list.commands() {
            self.validate_command(&mut scope, command)?;
        }
        Ok(())
    }

    fn validate_command(
        &mut self,
        scope: &mut ListScope,
        command: &Command,
    ) -> Result<(), GraphicsError> {
        match command {
            Command::ResourceBarrier(barriers) => {
                for barrier in barriers {
                    self.validate_barrier(scope, barrier)?;
                }
            }
            Command::CopyBuffer { src, dst } => {
                let (from, to) = (self.state.buffer(*src)?, self.state.buffer(*dst)?);
                if from.desc.size != to.desc.size {
                    return Err(validation(format!(
                        "list '{}': whole-buffer copy between sizes {} and {}",
                        scope.label, from.desc.size, to.desc.size
                    )));
                }
                self.validate_copy(scope, *src, *dst)?;
            }
            Command::CopyBufferRegion {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let (from, to) = (self.state.buffer(*src)?, self.state.buffer(*dst)?);
                if src_offset + size > from.desc.size || dst_offset + size > to.desc.size {
                    return Err(validation(format!(
                        "list '{}': copy of {size} bytes out of bounds",
                        scope.label
                    )));
                }
                self.validate_copy(scope, *src, *dst)?;
            }
            Command::ClearRenderTarget { target, .. } => self.expect(
                scope,
                Resource::Texture(*target),
                "cleared render target",
                |s| s == ResourceState::RenderTarget,
            )?,
            Command::ClearDepth { target, .. } => self.expect(
                scope,
                Resource::Texture(*target),
                "cleared depth buffer",
                |s| s == ResourceState::DepthWrite,
            )?,
            Command::SetRenderTargets { color, depth } => {
                if let Some(color) = color {
                    self.expect(scope, Resource::Texture(*color), "render target", |s| {
                        s == ResourceState::RenderTarget
                    })?;
                }
                if let Some(depth) = depth {
                    self.expect(scope, Resource::Texture(*depth), "depth target", |s| {
                        s == ResourceState::DepthWrite
                    })?;
                }
            }
            Command::SetPipeline(pipeline) => {
                if !self.state.pipelines.contains_key(&pipeline.0) {
                    return Err(invalid(format!("unknown pipeline {pipeline:?}")));
                }
                scope.pipeline = Some(*pipeline);
            }
            Command::SetDescriptorHeap(heap) => {
                if !self.state.heaps.contains_key(&heap.0) {
                    return Err(invalid(format!("unknown descriptor heap {heap:?}")));
                }
            }
            Command::SetRootConstantBuffer { buffer, offset, .. } => {
                let size = self.state.buffer(*buffer)?.desc.size;
                if *offset >= size || offset % 256 != 0 {
                    return Err(validation(format!(
                        "list '{}': constant buffer offset {offset} invalid for size {size}",
                        scope.label
                    )));
                }
            }
            Command::SetVertexBuffer(view) => {
                self.state.buffer(view.buffer)?;
            }
            Command::SetIndexBuffer(view) => {
                self.state.buffer(view.buffer)?;
                scope.index_count = Some(view.size / 4);
            }
            Command::DrawIndexed {
                index_count,
                first_index,
                ..
            } => {
                if !self.pipeline_is(scope, false) {
                    return Err(validation(format!(
                        "list '{}': draw without a graphics pipeline",
                        scope.label
                    )));
                }
                let available = scope.index_count.ok_or_else(|| {
                    validation(format!("list '{}': draw without an index buffer", scope.label))
                })?;
                if u64::from(*first_index) + u64::from(*index_count) > available {
                    return Err(validation(format!(
                        "list '{}': draw reads past the {available} bound indices",
                        scope.label
                    )));
                }
            }
            Command::BuildAccelerationStructure(build) => self.validate_build(scope, build)?,
            Command::DispatchRays(desc) => {
                if !self.pipeline_is(scope, true) {
                    return Err(validation(format!(
                        "list '{}': dispatch without a ray tracing pipeline",
                        scope.label
                    )));
                }
                if let Some((accel, ..)) = scope.unflushed.first() {
                    return Err(validation(format!(
                        "list '{}': dispatch reads {accel:?} before a UAV barrier",
                        scope.label
                    )));
                }
                if desc.ray_generation.size == 0 || desc.width == 0 || desc.height == 0 {
                    return Err(validation(format!(
                        "list '{}': empty ray dispatch",
                        scope.label
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn pipeline_is(&self, scope: &ListScope, ray_tracing: bool) -> bool {
        scope
            .pipeline
            .and_then(|p| self.state.pipelines.get(&p.0))
            .is_some_and(|p| p.ray_tracing == ray_tracing)
    }

    fn validate_barrier(
        &mut self,
        scope: &mut ListScope,
        barrier: &ResourceBarrier,
    ) -> Result<(), GraphicsError> {
        match *barrier {
            ResourceBarrier::Transition {
                resource,
                before,
                after,
            } => {
                if let Resource::Buffer(id) = resource {
                    let heap = self.state.buffer(id)?.desc.heap;
                    if heap.fixed_state().is_some() {
                        return Err(validation(format!(
                            "list '{}': {heap:?} heap buffer {id:?} cannot be transitioned",
                            scope.label
                        )));
                    }
                }
                let current = self.current(resource)?;
                if current != before {
                    return Err(validation(format!(
                        "list '{}': barrier expects {resource:?} in {before:?}, tracked state is {current:?}",
                        scope.label
                    )));
                }
                self.states.insert(resource, after);
            }
            ResourceBarrier::Uav { resource: None } => scope.unflushed.clear(),
            ResourceBarrier::Uav {
                resource: Some(resource),
            } => scope
                .unflushed
                .retain(|(_, _, buffer)| Resource::Buffer(*buffer) != resource),
        }
        Ok(())
    }

    fn validate_copy(
        &self,
        scope: &ListScope,
        src: BufferId,
        dst: BufferId,
    ) -> Result<(), GraphicsError> {
        self.expect(scope, Resource::Buffer(dst), "copy destination", |s| {
            s == ResourceState::CopyDest
        })?;
        self.expect(scope, Resource::Buffer(src), "copy source", |s| s.allows_copy_source())
    }

    fn validate_build(
        &mut self,
        scope: &mut ListScope,
        build: &AccelBuildCommand,
    ) -> Result<(), GraphicsError> {
        let accel = self.state.accel(build.dst)?;
        if accel.kind != build.inputs.kind() {
            return Err(validation(format!(
                "list '{}': {:?} inputs built into a {:?} structure",
                scope.label,
                build.inputs.kind(),
                accel.kind
            )));
        }
        if build.mode == BuildMode::Update {
            if !build.inputs.flags.contains(AccelBuildFlags::ALLOW_UPDATE) {
                return Err(validation(format!(
                    "list '{}': update of {:?} built without ALLOW_UPDATE",
                    scope.label, build.dst
                )));
            }
            if !accel.build_submitted && !self.built.contains(&build.dst.0) {
                return Err(validation(format!(
                    "list '{}': update of {:?} before its first build",
                    scope.label, build.dst
                )));
            }
        }
        self.expect(scope, Resource::Buffer(accel.buffer), "acceleration structure storage", |s| {
            s == ResourceState::AccelerationStructure
        })?;
        self.expect(scope, Resource::Buffer(build.scratch), "scratch buffer", |s| {
            s == ResourceState::UnorderedAccess
        })?;

        let mut inputs = Vec::new();
        match &build.inputs.geometry {
            AccelGeometry::Triangles(geometry) => {
                for g in geometry {
                    inputs.push(g.vertex_buffer);
                    inputs.push(g.index_buffer);
                }
            }
            AccelGeometry::Instances {
                buffer,
                offset,
                count,
            } => {
                let end = offset + u64::from(*count) * std::mem::size_of::<TlasInstance>() as u64;
                if end > self.state.buffer(*buffer)?.desc.size {
                    return Err(validation(format!(
                        "list '{}': {count} instances at {offset} overrun the instance buffer",
                        scope.label
                    )));
                }
                if let Some((blas, ..)) =
                    scope.unflushed.iter().find(|(_, kind, _)| *kind == AccelKind::BottomLevel)
                {
                    return Err(validation(format!(
                        "list '{}': top-level build reads {blas:?} before a UAV barrier",
                        scope.label
                    )));
                }
                inputs.push(*buffer);
            }
        }
        for input in inputs {
            if scope.unflushed.iter().any(|(_, _, b)| *b == input) {
                return Err(validation(format!(
                    "list '{}': build reads {input:?} before a UAV barrier",
                    scope.label
                )));
            }
            self.expect(scope, Resource::Buffer(input), "build input", |s| s.allows_build_input())?;
        }

        self.built.insert(build.dst.0);
        scope.unflushed.push((build.dst, accel.kind, accel.buffer));
        Ok(())
    }
}

/// Dummy GPU backend.
pub struct DummyBackend {
    capabilities: DeviceCapabilities,
    state: Mutex<State>,
    paused: AtomicBool,
}

impl DummyBackend {
    /// Create a dummy backend with ray tracing support and no tearing.
    pub fn new() -> Self {
        Self::with_capabilities(DeviceCapabilities {
            ray_tracing: true,
            ..DeviceCapabilities::default()
        })
    }

    pub fn with_capabilities(capabilities: DeviceCapabilities) -> Self {
        Self {
            capabilities,
            state: Mutex::new(State::default()),
            paused: AtomicBool::new(false),
        }
    }

    /// Stop (or resume) the simulated GPU. While paused no work retires and
    /// fence waits run into their timeout.
    pub fn set_paused(&self, paused: bool) {
        log::trace!("DummyBackend: paused = {paused}");
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Complete all queued work, even while paused.
    pub fn retire_all(&self) -> Result<(), GraphicsError> {
        self.state.lock().retire_all()
    }

    /// Number of queued work items (lists and signals) not yet retired.
    pub fn pending_work(&self) -> usize {
        self.state.lock().queues.values().map(|q| q.pending.len()).sum()
    }

    /// Misuse reported so far without failing the call.
    pub fn validation_messages(&self) -> Vec<String> {
        self.state.lock().messages.clone()
    }

    /// Submission-order state of a buffer.
    pub fn buffer_state(&self, buffer: BufferId) -> Option<ResourceState> {
        self.state.lock().buffers.get(&buffer.0).map(|b| b.state)
    }

    /// Submission-order state of a texture.
    pub fn texture_state(&self, texture: TextureId) -> Option<ResourceState> {
        self.state.lock().textures.get(&texture.0).map(|t| t.state)
    }

    /// Color of the last retired clear of `texture`.
    pub fn texture_clear_color(&self, texture: TextureId) -> Option<[f32; 4]> {
        self.state.lock().textures.get(&texture.0).and_then(|t| t.clear_color)
    }

    /// Depth of the last retired clear of `texture`.
    pub fn texture_clear_depth(&self, texture: TextureId) -> Option<f32> {
        self.state.lock().textures.get(&texture.0).and_then(|t| t.clear_depth)
    }

    /// Retired draws that rendered into `texture`.
    pub fn texture_draw_count(&self, texture: TextureId) -> u64 {
        self.state
            .lock()
            .textures
            .get(&texture.0)
            .map_or(0, |t| t.draw_count)
    }

    /// Retired ray dispatches.
    pub fn dispatch_count(&self) -> u64 {
        self.state.lock().dispatch_count
    }

    pub fn present_count(&self, swap_chain: SwapChainId) -> u64 {
        self.state
            .lock()
            .swap_chains
            .get(&swap_chain.0)
            .map_or(0, |s| s.present_count)
    }

    pub fn last_present(&self, swap_chain: SwapChainId) -> Option<PresentRequest> {
        self.state
            .lock()
            .swap_chains
            .get(&swap_chain.0)
            .and_then(|s| s.last_present)
    }

    /// Instance records of the last retired top-level build.
    pub fn acceleration_structure_instances(&self, accel: AccelId) -> Vec<TlasInstance> {
        self.state
            .lock()
            .accels
            .get(&accel.0)
            .map(|a| a.instances.clone())
            .unwrap_or_default()
    }

    /// Whether a build of `accel` has retired.
    pub fn acceleration_structure_built(&self, accel: AccelId) -> bool {
        self.state.lock().accels.get(&accel.0).is_some_and(|a| a.built)
    }

    /// Binding last written to a descriptor slot.
    pub fn descriptor(
        &self,
        heap: DescriptorHeapId,
        index: DescriptorIndex,
    ) -> Option<DescriptorBinding> {
        self.state
            .lock()
            .heaps
            .get(&heap.0)
            .and_then(|h| h.bindings.get(index.get() as usize).copied().flatten())
    }

    fn create_texture_locked(state: &mut State, desc: &TextureDescriptor) -> TextureId {
        let id = TextureId(state.alloc_id());
        state.textures.insert(
            id.0,
            TextureState {
                state: desc.initial_state,
                clear_color: None,
                clear_depth: None,
                draw_count: 0,
            },
        );
        id
    }

    fn create_back_buffers(state: &mut State, desc: &SwapChainDescriptor) -> Vec<TextureId> {
        (0..desc.back_buffer_count)
            .map(|i| {
                let texture = TextureDescriptor::new_2d(
                    desc.width,
                    desc.height,
                    desc.format,
                    TextureUsage::RENDER_TARGET | TextureUsage::PRESENT,
                )
                .with_label(format!("back_buffer{i}"))
                .with_initial_state(ResourceState::Present);
                Self::create_texture_locked(state, &texture)
            })
            .collect()
    }

    fn release(&self, resource: Resource) {
        let mut state = self.state.lock();
        if state.in_flight(resource) {
            state.report(format!("{resource:?} released while referenced by queued GPU work"));
            state.deferred.push(resource);
            return;
        }
        match resource {
            Resource::Buffer(id) => {
                state.buffers.remove(&id.0);
            }
            Resource::Texture(id) => {
                state.textures.remove(&id.0);
            }
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyBackend")
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn create_queue(&self, kind: QueueKind, label: &str) -> Result<QueueId, GraphicsError> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.queues.insert(
            id,
            QueueState {
                kind,
                label: label.to_string(),
                pending: VecDeque::new(),
            },
        );
        log::trace!("DummyBackend: creating {kind:?} queue '{label}'");
        Ok(QueueId(id))
    }

    fn create_command_allocator(&self, kind: QueueKind) -> Result<AllocatorId, GraphicsError> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.allocators.insert(id, (kind, 0));
        Ok(AllocatorId(id))
    }

    fn reset_command_allocator(&self, allocator: AllocatorId) -> Result<(), GraphicsError> {
        let state = self.state.lock();
        match state.allocators.get(&allocator.0) {
            None => Err(invalid(format!("unknown command allocator {allocator:?}"))),
            Some((_, 0)) => Ok(()),
            Some((_, queued)) => Err(validation(format!(
                "allocator {allocator:?} reset while {queued} of its lists are in flight"
            ))),
        }
    }

    fn destroy_command_allocator(&self, allocator: AllocatorId) {
        let mut state = self.state.lock();
        if let Some((_, queued)) = state.allocators.remove(&allocator.0)
            && queued > 0
        {
            state.report(format!(
                "allocator {allocator:?} destroyed while {queued} of its lists are in flight"
            ));
        }
    }

    fn submit(
        &self,
        queue: QueueId,
        lists: &[&CommandList],
        present_sync: Option<SwapChainId>,
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let queue_kind = state
            .queues
            .get(&queue.0)
            .map(|q| q.kind)
            .ok_or_else(|| invalid(format!("unknown queue {queue:?}")))?;
        if let Some(swap_chain) = present_sync {
            state.swap_chain(swap_chain)?;
        }

        let mut validator = SubmitValidator::new(&state);
        let mut work = Vec::with_capacity(lists.len());
        for list in lists {
            let allocator = list.allocator().ok_or_else(|| {
                invalid(format!("command list '{}' was never reset", list.label()))
            })?;
            match validator.state.allocators.get(&allocator.0) {
                Some((kind, _)) if *kind == queue_kind => {}
                Some((kind, _)) => {
                    return Err(invalid(format!(
                        "{kind:?} allocator submitted to a {queue_kind:?} queue"
                    )));
                }
                None => return Err(invalid(format!("unknown command allocator {allocator:?}"))),
            }
            validator.validate_list(list)?;
            work.push(Work::Execute {
                allocator,
                commands: list.commands().to_vec(),
            });
        }

        let SubmitValidator { states, built, .. } = validator;
        for (resource, new_state) in states {
            match resource {
                Resource::Buffer(id) => {
                    if let Some(buffer) = state.buffers.get_mut(&id.0) {
                        buffer.state = new_state;
                    }
                }
                Resource::Texture(id) => {
                    if let Some(texture) = state.textures.get_mut(&id.0) {
                        texture.state = new_state;
                    }
                }
            }
        }
        for accel in built {
            if let Some(accel) = state.accels.get_mut(&accel) {
                accel.build_submitted = true;
            }
        }
        for item in &work {
            if let Work::Execute { allocator, .. } = item
                && let Some((_, queued)) = state.allocators.get_mut(&allocator.0)
            {
                *queued += 1;
            }
        }
        if let Some(q) = state.queues.get_mut(&queue.0) {
            log::trace!("DummyBackend: {} lists queued on '{}'", work.len(), q.label);
            q.pending.extend(work);
        }
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> Result<FenceId, GraphicsError> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.fences.insert(id, initial_value);
        Ok(FenceId(id))
    }

    fn destroy_fence(&self, fence: FenceId) {
        self.state.lock().fences.remove(&fence.0);
    }

    fn fence_completed_value(&self, fence: FenceId) -> Result<u64, GraphicsError> {
        self.state
            .lock()
            .fences
            .get(&fence.0)
            .copied()
            .ok_or_else(|| invalid(format!("unknown fence {fence:?}")))
    }

    fn signal_fence(
        &self,
        queue: QueueId,
        fence: FenceId,
        value: u64,
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if !state.fences.contains_key(&fence.0) {
            return Err(invalid(format!("unknown fence {fence:?}")));
        }
        let q = state
            .queues
            .get_mut(&queue.0)
            .ok_or_else(|| invalid(format!("unknown queue {queue:?}")))?;
        q.pending.push_back(Work::Signal { fence, value });
        Ok(())
    }

    fn wait_fence(
        &self,
        fence: FenceId,
        value: u64,
        timeout: Duration,
    ) -> Result<bool, GraphicsError> {
        let start = Instant::now();
        loop {
            {
                let mut state = self.state.lock();
                if state.fence_reached(fence, value)? {
                    return Ok(true);
                }
                if !self.is_paused() {
                    if state.retire_until(fence, value)? {
                        return Ok(true);
                    }
                    // Nothing queued signals the value; only another thread could.
                    if timeout == Duration::MAX {
                        return Err(validation(format!(
                            "infinite wait for {fence:?} to reach {value} can never complete"
                        )));
                    }
                    return Ok(false);
                }
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<BufferId, GraphicsError> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {}, heap: {:?})",
            desc.label,
            desc.size,
            desc.heap
        );
        let mut state = self.state.lock();
        let id = state.alloc_id();
        let address = state.alloc_address(desc.size);
        state.buffers.insert(
            id,
            BufferState {
                desc: desc.clone(),
                data: vec![0; desc.size as usize],
                address,
                state: desc.effective_initial_state(),
            },
        );
        Ok(BufferId(id))
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        self.release(Resource::Buffer(buffer));
    }

    fn write_buffer(
        &self,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let target = state.buffer_mut(buffer)?;
        if !target.desc.heap.is_cpu_visible() {
            return Err(invalid(format!("buffer {buffer:?} is not CPU visible")));
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > target.data.len() {
            return Err(invalid(format!("write of {} bytes at {offset} out of bounds", data.len())));
        }
        target.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: BufferId,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), GraphicsError> {
        let state = self.state.lock();
        let source = state.buffer(buffer)?;
        if !source.desc.heap.is_cpu_visible() {
            return Err(invalid(format!("buffer {buffer:?} is not CPU visible")));
        }
        let start = offset as usize;
        let end = start + out.len();
        if end > source.data.len() {
            return Err(invalid(format!("read of {} bytes at {offset} out of bounds", out.len())));
        }
        out.copy_from_slice(&source.data[start..end]);
        Ok(())
    }

    fn buffer_device_address(&self, buffer: BufferId) -> Result<u64, GraphicsError> {
        Ok(self.state.lock().buffer(buffer)?.address)
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<TextureId, GraphicsError> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(Self::create_texture_locked(&mut self.state.lock(), desc))
    }

    fn destroy_texture(&self, texture: TextureId) {
        self.release(Resource::Texture(texture));
    }

    fn create_swap_chain(
        &self,
        target: &SurfaceTarget,
        desc: &SwapChainDescriptor,
    ) -> Result<SwapChainId, GraphicsError> {
        if desc.allow_tearing && !self.capabilities.tearing_supported {
            return Err(invalid("tearing requested but not supported".to_string()));
        }
        let mut state = self.state.lock();
        let back_buffers = Self::create_back_buffers(&mut state, desc);
        let id = state.alloc_id();
        state.swap_chains.insert(
            id,
            SwapChainState {
                desc: *desc,
                back_buffers,
                current: 0,
                present_count: 0,
                last_present: None,
            },
        );
        log::trace!(
            "DummyBackend: creating swap chain {}x{} for {}",
            desc.width,
            desc.height,
            if matches!(target, SurfaceTarget::Headless) { "headless target" } else { "window" }
        );
        Ok(SwapChainId(id))
    }

    fn destroy_swap_chain(&self, swap_chain: SwapChainId) {
        let mut state = self.state.lock();
        if let Some(chain) = state.swap_chains.remove(&swap_chain.0) {
            for texture in chain.back_buffers {
                state.textures.remove(&texture.0);
            }
        }
    }

    fn swap_chain_back_buffers(
        &self,
        swap_chain: SwapChainId,
    ) -> Result<Vec<TextureId>, GraphicsError> {
        Ok(self.state.lock().swap_chain(swap_chain)?.back_buffers.clone())
    }

    fn acquire_back_buffer(&self, swap_chain: SwapChainId) -> Result<u32, GraphicsError> {
        Ok(self.state.lock().swap_chain(swap_chain)?.current)
    }

    fn present(
        &self,
        queue: QueueId,
        swap_chain: SwapChainId,
        request: PresentRequest,
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if !state.queues.contains_key(&queue.0) {
            return Err(invalid(format!("unknown queue {queue:?}")));
        }
        let chain = state.swap_chain(swap_chain)?;
        if request.allow_tearing && (!chain.desc.allow_tearing || request.sync_interval != 0) {
            return Err(invalid(
                "tearing present needs a tearing swap chain and sync interval 0".to_string(),
            ));
        }
        let back_buffer = chain.back_buffers[chain.current as usize];
        let current = state.resource_state(Resource::Texture(back_buffer))?;
        if current != ResourceState::Present {
            return Err(validation(format!(
                "presented back buffer {back_buffer:?} is in state {current:?}"
            )));
        }

        if let Some(chain) = state.swap_chains.get_mut(&swap_chain.0) {
            chain.current = (chain.current + 1) % chain.back_buffers.len() as u32;
            chain.present_count += 1;
            chain.last_present = Some(request);
        }
        Ok(())
    }

    fn resize_swap_chain(
        &self,
        swap_chain: SwapChainId,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let old = state.swap_chain(swap_chain)?.back_buffers.clone();
        if let Some(busy) = old.iter().find(|t| state.in_flight(Resource::Texture(**t))) {
            return Err(validation(format!(
                "swap chain resized while back buffer {busy:?} is referenced by queued work"
            )));
        }
        for texture in &old {
            state.textures.remove(&texture.0);
        }
        let desc = SwapChainDescriptor {
            width,
            height,
            ..state.swap_chain(swap_chain)?.desc
        };
        let back_buffers = Self::create_back_buffers(&mut state, &desc);
        if let Some(chain) = state.swap_chains.get_mut(&swap_chain.0) {
            chain.desc = desc;
            chain.back_buffers = back_buffers;
            chain.current = 0;
        }
        Ok(())
    }

    fn create_descriptor_heap(
        &self,
        layout: &DescriptorHeapLayout,
    ) -> Result<DescriptorHeapId, GraphicsError> {
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.heaps.insert(
            id,
            HeapState {
                layout: layout.clone(),
                bindings: vec![None; layout.capacity() as usize],
            },
        );
        Ok(DescriptorHeapId(id))
    }

    fn write_descriptor(
        &self,
        heap: DescriptorHeapId,
        index: DescriptorIndex,
        binding: &DescriptorBinding,
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        match *binding {
            DescriptorBinding::Texture(t) | DescriptorBinding::StorageTexture(t) => {
                if !state.textures.contains_key(&t.0) {
                    return Err(invalid(format!("unknown texture {t:?}")));
                }
            }
            DescriptorBinding::ConstantBuffer { buffer, offset, size } => {
                if offset + size > state.buffer(buffer)?.desc.size {
                    return Err(invalid(format!("constant buffer view {offset}+{size} out of bounds")));
                }
            }
            DescriptorBinding::AccelerationStructure(a) => {
                state.accel(a)?;
            }
        }
        let entry = state
            .heaps
            .get_mut(&heap.0)
            .ok_or_else(|| invalid(format!("unknown descriptor heap {heap:?}")))?;
        entry.layout.validate(index, binding)?;
        entry.bindings[index.get() as usize] = Some(*binding);
        Ok(())
    }

    fn destroy_descriptor_heap(&self, heap: DescriptorHeapId) {
        self.state.lock().heaps.remove(&heap.0);
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
    ) -> Result<PipelineId, GraphicsError> {
        if desc.vertex.bytecode.is_empty() || desc.pixel.bytecode.is_empty() {
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "pipeline '{}' has empty shader bytecode",
                desc.label
            )));
        }
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.pipelines.insert(
            id,
            PipelineState {
                ray_tracing: false,
                exports: Vec::new(),
            },
        );
        log::trace!("DummyBackend: creating graphics pipeline '{}'", desc.label);
        Ok(PipelineId(id))
    }

    fn create_ray_tracing_pipeline(
        &self,
        desc: &RayTracingPipelineDesc,
    ) -> Result<PipelineId, GraphicsError> {
        if !self.capabilities.ray_tracing {
            return Err(GraphicsError::FeatureNotSupported("ray tracing".to_string()));
        }
        if desc.library.bytecode.is_empty() {
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "pipeline '{}' has an empty shader library",
                desc.label
            )));
        }
        let mut state = self.state.lock();
        let id = state.alloc_id();
        state.pipelines.insert(
            id,
            PipelineState {
                ray_tracing: true,
                exports: desc.group_names().map(str::to_string).collect(),
            },
        );
        log::trace!("DummyBackend: creating ray tracing pipeline '{}'", desc.label);
        Ok(PipelineId(id))
    }

    fn shader_identifier(
        &self,
        pipeline: PipelineId,
        export: &str,
    ) -> Result<Vec<u8>, GraphicsError> {
        let state = self.state.lock();
        let entry = state
            .pipelines
            .get(&pipeline.0)
            .ok_or_else(|| invalid(format!("unknown pipeline {pipeline:?}")))?;
        if !entry.exports.iter().any(|e| e == export) {
            return Err(invalid(format!("pipeline {pipeline:?} has no export '{export}'")));
        }
        Ok(shader_identifier(
            pipeline,
            export,
            self.capabilities.shader_identifier_size as usize,
        ))
    }

    fn destroy_pipeline(&self, pipeline: PipelineId) {
        self.state.lock().pipelines.remove(&pipeline.0);
    }

    fn acceleration_structure_sizes(
        &self,
        inputs: &AccelBuildInputs,
    ) -> Result<AccelPrebuildInfo, GraphicsError> {
        const ALIGN: u64 = crate::accel::ACCEL_ALIGNMENT;
        let (result_size, scratch_size) = match &inputs.geometry {
            AccelGeometry::Triangles(geometry) => {
                let triangles: u64 = geometry.iter().map(|g| u64::from(g.triangle_count())).sum();
                if triangles == 0 {
                    return Err(invalid("bottom-level build without triangles".to_string()));
                }
                (align_up(triangles * 64 + 128, ALIGN), align_up(triangles * 32 + 256, ALIGN))
            }
            AccelGeometry::Instances { count, .. } => {
                let count = u64::from(*count);
                (align_up(count * 64 + 128, ALIGN), align_up(count * 32 + 256, ALIGN))
            }
        };
        let update_scratch_size = if inputs.flags.contains(AccelBuildFlags::ALLOW_UPDATE) {
            scratch_size
        } else {
            0
        };
        Ok(AccelPrebuildInfo {
            result_size,
            scratch_size,
            update_scratch_size,
        })
    }

    fn create_acceleration_structure(
        &self,
        kind: AccelKind,
        buffer: BufferId,
        size: u64,
    ) -> Result<AccelId, GraphicsError> {
        let mut state = self.state.lock();
        let storage = state.buffer(buffer)?;
        if !storage.desc.usage.contains(BufferUsage::ACCELERATION_STRUCTURE) {
            return Err(invalid(format!(
                "buffer {buffer:?} lacks ACCELERATION_STRUCTURE usage"
            )));
        }
        if size > storage.desc.size {
            return Err(invalid(format!(
                "acceleration structure of {size} bytes does not fit buffer of {}",
                storage.desc.size
            )));
        }
        let address = storage.address;
        let id = state.alloc_id();
        state.accels.insert(
            id,
            AccelState {
                kind,
                buffer,
                address,
                build_submitted: false,
                built: false,
                instances: Vec::new(),
            },
        );
        Ok(AccelId(id))
    }

    fn acceleration_structure_address(&self, accel: AccelId) -> Result<u64, GraphicsError> {
        Ok(self.state.lock().accel(accel)?.address)
    }

    fn destroy_acceleration_structure(&self, accel: AccelId) {
        self.state.lock().accels.remove(&accel.0);
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        if self.is_paused() {
            return Err(validation("wait_idle while the simulated GPU is paused".to_string()));
        }
        self.retire_all()
    }
}

/// Deterministic per-export identifier, `size` bytes long.
fn shader_identifier(pipeline: PipelineId, export: &str, size: usize) -> Vec<u8> {
    // FNV-1a, re-seeded per 8-byte lane.
    (0..size.div_ceil(8) as u64)
        .flat_map(|lane| {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ pipeline.0.wrapping_mul(lane + 1);
            for byte in export.bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
            hash.to_le_bytes()
        })
        .take(size)
        .collect()
}

/// Instance for the dummy backend with a configurable adapter list.
#[derive(Debug, Clone)]
pub struct DummyInstance {
    adapters: Vec<AdapterInfo>,
    /// Adapter indices whose device creation fails.
    failing: Vec<usize>,
}

impl DummyInstance {
    /// A software adapter plus one qualifying hardware adapter.
    pub fn new() -> Self {
        Self::with_adapters(vec![
            AdapterInfo::new(0, "Dummy Software Adapter", AdapterType::Software, 0),
            AdapterInfo::new(1, "Dummy GPU", AdapterType::Discrete, 4 << 30),
        ])
    }

    pub fn with_adapters(adapters: Vec<AdapterInfo>) -> Self {
        Self {
            adapters,
            failing: Vec::new(),
        }
    }

    /// Make device creation on adapter `index` fail, as a driver that
    /// rejects the requested feature level would.
    #[must_use]
    pub fn with_failing_adapter(mut self, index: usize) -> Self {
        self.failing.push(index);
        self
    }
}

impl Default for DummyInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuInstance for DummyInstance {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        self.adapters.clone()
    }

    fn create_device(&self, adapter: &AdapterInfo) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
        if self.failing.contains(&adapter.index) {
            return Err(GraphicsError::InitializationFailed(format!(
                "device creation refused on {}",
                adapter.name
            )));
        }
        log::trace!("DummyBackend: opening device on {}", adapter.name);
        Ok(Arc::new(DummyBackend::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandAllocator;
    use crate::device::GpuDevice;
    use crate::types::HeapType;

    fn setup() -> (Arc<DummyBackend>, GpuDevice) {
        let backend = Arc::new(DummyBackend::new());
        let device = GpuDevice::new(
            AdapterInfo::new(0, "Test Adapter", AdapterType::Discrete, 1 << 30),
            backend.clone(),
        );
        (backend, device)
    }

    fn list_with(
        device: &GpuDevice,
        record: impl FnOnce(&mut CommandList),
    ) -> (CommandAllocator, CommandList) {
        let allocator = CommandAllocator::new(device, QueueKind::Direct).unwrap();
        let mut list = CommandList::new(QueueKind::Direct, "test");
        list.reset(&allocator).unwrap();
        record(&mut list);
        list.close().unwrap();
        (allocator, list)
    }

    fn upload(backend: &DummyBackend, size: u64) -> BufferId {
        backend
            .create_buffer(&BufferDescriptor::upload(size, BufferUsage::empty()))
            .unwrap()
    }

    fn gpu(backend: &DummyBackend, size: u64, state: ResourceState) -> BufferId {
        backend
            .create_buffer(&BufferDescriptor::gpu(size, BufferUsage::VERTEX, state))
            .unwrap()
    }

    #[test]
    fn test_copy_retires_on_fence_wait() {
        let (backend, device) = setup();
        let queue = backend.create_queue(QueueKind::Direct, "q").unwrap();
        let fence = backend.create_fence(0).unwrap();
        let src = upload(&backend, 4);
        let dst = backend.create_buffer(&BufferDescriptor::readback(4)).unwrap();
        backend.write_buffer(src, 0, &[1, 2, 3, 4]).unwrap();

        let (_allocator, list) = list_with(&device, |l| l.copy_buffer(src, dst));
        backend.submit(queue, &[&list], None).unwrap();
        backend.signal_fence(queue, fence, 1).unwrap();

        let mut out = [0u8; 4];
        backend.read_buffer(dst, 0, &mut out).unwrap();
        assert_eq!(out, [0; 4], "nothing retires before a wait");
        assert_eq!(backend.fence_completed_value(fence).unwrap(), 0);

        assert!(backend.wait_fence(fence, 1, Duration::ZERO).unwrap());
        backend.read_buffer(dst, 0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_barrier_before_state_mismatch() {
        let (backend, device) = setup();
        let queue = backend.create_queue(QueueKind::Direct, "q").unwrap();
        let buffer = gpu(&backend, 16, ResourceState::CopyDest);
        let (_allocator, list) = list_with(&device, |l| {
            l.transition(buffer, ResourceState::Common, ResourceState::IndexBuffer)
        });
        assert!(matches!(
            backend.submit(queue, &[&list], None),
            Err(GraphicsError::Internal(_))
        ));
        // A failed submission commits no state.
        assert_eq!(backend.buffer_state(buffer), Some(ResourceState::CopyDest));
    }

    #[test]
    fn test_transitions_commit_in_submission_order() {
        let (backend, device) = setup();
        let queue = backend.create_queue(QueueKind::Direct, "q").unwrap();
        let buffer = gpu(&backend, 16, ResourceState::CopyDest);
        let (_allocator, list) = list_with(&device, |l| {
            l.transition(buffer, ResourceState::CopyDest, ResourceState::VertexAndConstantBuffer)
        });
        backend.submit(queue, &[&list], None).unwrap();
        assert_eq!(backend.buffer_state(buffer), Some(ResourceState::VertexAndConstantBuffer));
    }

    #[test]
    fn test_copy_needs_copy_dest() {
        let (backend, device) = setup();
        let queue = backend.create_queue(QueueKind::Direct, "q").unwrap();
        let src = upload(&backend, 16);
        let dst = gpu(&backend, 16, ResourceState::Common);
        let (_allocator, list) = list_with(&device, |l| l.copy_buffer(src, dst));
        assert!(backend.submit(queue, &[&list], None).is_err());
    }

    #[test]
    fn test_upload_heap_cannot_transition() {
        let (backend, device) = setup();
        let queue = backend.create_queue(QueueKind::Direct, "q").unwrap();
        let buffer = upload(&backend, 16);
        assert_eq!(
            backend.state.lock().buffer(buffer).unwrap().desc.heap,
            HeapType::Upload
        );
        let (_allocator, list) = list_with(&device, |l| {
            l.transition(buffer, ResourceState::GenericRead, ResourceState::CopyDest)
        });
        assert!(backend.submit(queue, &[&list], None).is_err());
    }

    #[test]
    fn test_allocator_reset_while_in_flight() {
        let (backend, device) = setup();
        let queue = backend.create_queue(QueueKind::Direct, "q").unwrap();
        let fence = backend.create_fence(0).unwrap();
        let (allocator, list) = list_with(&device, |_| {});
        let allocator = allocator.id();
        backend.submit(queue, &[&list], None).unwrap();
        backend.signal_fence(queue, fence, 1).unwrap();

        assert!(backend.reset_command_allocator(allocator).is_err());
        backend.wait_fence(fence, 1, Duration::ZERO).unwrap();
        backend.reset_command_allocator(allocator).unwrap();
    }

    #[test]
    fn test_release_in_flight_is_deferred() {
        let (backend, device) = setup();
        let queue = backend.create_queue(QueueKind::Direct, "q").unwrap();
        let src = upload(&backend, 8);
        let dst = gpu(&backend, 8, ResourceState::CopyDest);
        let (_allocator, list) = list_with(&device, |l| l.copy_buffer(src, dst));
        backend.submit(queue, &[&list], None).unwrap();

        backend.destroy_buffer(src);
        assert_eq!(backend.validation_messages().len(), 1);
        // Still alive for the queued copy.
        assert!(backend.buffer_state(src).is_some());

        backend.retire_all().unwrap();
        assert!(backend.buffer_state(src).is_none());
    }

    #[test]
    fn test_unreachable_infinite_wait_is_an_error() {
        let backend = DummyBackend::new();
        let fence = backend.create_fence(0).unwrap();
        assert!(!backend.wait_fence(fence, 1, Duration::from_millis(1)).unwrap());
        assert!(backend.wait_fence(fence, 1, Duration::MAX).is_err());
    }

    #[test]
    fn test_paused_wait_times_out() {
        let backend = DummyBackend::new();
        let queue = backend.create_queue(QueueKind::Direct, "q").unwrap();
        let fence = backend.create_fence(0).unwrap();
        backend.signal_fence(queue, fence, 1).unwrap();
        backend.set_paused(true);
        assert!(!backend.wait_fence(fence, 1, Duration::from_millis(5)).unwrap());
        assert_eq!(backend.pending_work(), 1);

        backend.set_paused(false);
        assert!(backend.wait_fence(fence, 1, Duration::ZERO).unwrap());
        assert_eq!(backend.pending_work(), 0);
    }

    #[test]
    fn test_shader_identifiers() {
        let a = shader_identifier(PipelineId(1), "RayGen", 32);
        assert_eq!(a.len(), 32);
        assert_eq!(a, shader_identifier(PipelineId(1), "RayGen", 32));
        assert_ne!(a, shader_identifier(PipelineId(1), "Miss", 32));
        assert_ne!(a, shader_identifier(PipelineId(2), "RayGen", 32));
    }

    #[test]
    fn test_dummy_instance_has_qualifying_adapter() {
        let adapters = DummyInstance::new().enumerate_adapters();
        assert!(crate::device::rank_adapters(&adapters).is_ok());
    }
}
