//! Staging geometry into GPU-local memory.
//!
//! Uploads go through a dedicated [`UploadQueue`] with its own allocator,
//! list and fence. Every batch is recorded, submitted and waited on before
//! the call returns, so the intermediate upload buffers can be released as
//! soon as it does.
//!
//! # Example
//!
//! ```ignore
//! let mut upload = UploadQueue::new(&device, INFINITE)?;
//! let meshes = upload.upload_meshes(&device, &[&generate_cube(1.0)])?;
//! list.set_vertex_buffer(meshes[0].vertex_buffer_view());
//! ```

use std::time::Duration;

use lumen_core::mesh::{CpuMesh, Vertex};

use crate::accel::TriangleGeometry;
use crate::command::{CommandAllocator, CommandList, CommandQueue, QueueKind};
use crate::device::GpuDevice;
use crate::error::GraphicsError;
use crate::resources::Buffer;
use crate::sync::Fence;
use crate::types::{
    BufferDescriptor, BufferUsage, IndexBufferView, ResourceBarrier, ResourceState,
    VertexBufferView,
};

/// Geometry resident in GPU-local memory, immutable after upload.
pub struct Mesh {
    label: Option<String>,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn vertex_buffer(&self) -> &Buffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &Buffer {
        &self.index_buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_buffer_view(&self) -> VertexBufferView {
        VertexBufferView {
            buffer: self.vertex_buffer.id(),
            size: self.vertex_buffer.size(),
            stride: Vertex::STRIDE,
        }
    }

    pub fn index_buffer_view(&self) -> IndexBufferView {
        IndexBufferView {
            buffer: self.index_buffer.id(),
            size: self.index_buffer.size(),
        }
    }

    /// Build input describing this mesh as opaque triangles.
    pub fn triangle_geometry(&self) -> TriangleGeometry {
        TriangleGeometry {
            vertex_buffer: self.vertex_buffer.id(),
            vertex_count: self.vertex_count,
            vertex_stride: Vertex::STRIDE as u64,
            index_buffer: self.index_buffer.id(),
            index_count: self.index_count,
            opaque: true,
        }
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("label", &self.label)
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.index_count)
            .finish()
    }
}

/// A GPU-local destination and the upload buffer that fills it.
struct StagedBuffer {
    destination: Buffer,
    intermediate: Buffer,
    final_state: ResourceState,
}

impl StagedBuffer {
    fn new(
        device: &GpuDevice,
        data: &[u8],
        usage: BufferUsage,
        final_state: ResourceState,
        label: &str,
    ) -> Result<Self, GraphicsError> {
        let destination = device.create_buffer(
            &BufferDescriptor::gpu(
                data.len() as u64,
                usage | BufferUsage::COPY_DST,
                ResourceState::CopyDest,
            )
            .with_label(label),
        )?;
        let intermediate = device.create_buffer(
            &BufferDescriptor::upload(data.len() as u64, BufferUsage::empty())
                .with_label(format!("{label}_upload")),
        )?;
        intermediate.write(0, data)?;
        Ok(Self {
            destination,
            intermediate,
            final_state,
        })
    }

    fn transition(&self) -> ResourceBarrier {
        ResourceBarrier::transition(
            self.destination.id(),
            ResourceState::CopyDest,
            self.final_state,
        )
    }
}

/// Queue, allocator, list and fence dedicated to blocking uploads.
pub struct UploadQueue {
    queue: CommandQueue,
    allocator: CommandAllocator,
    list: CommandList,
    fence: Fence,
    fence_value: u64,
    timeout: Duration,
}

impl UploadQueue {
    pub fn new(device: &GpuDevice, timeout: Duration) -> Result<Self, GraphicsError> {
        Ok(Self {
            queue: CommandQueue::new(device, QueueKind::Direct, "upload")?,
            allocator: CommandAllocator::new(device, QueueKind::Direct)?,
            list: CommandList::new(QueueKind::Direct, "upload"),
            fence: Fence::new(device, 0)?,
            fence_value: 0,
            timeout,
        })
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// Value signaled by the last batch.
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    /// Record one batch with `record`, submit it and block until it completes.
    pub fn execute<F>(&mut self, record: F) -> Result<(), GraphicsError>
    where
        F: FnOnce(&mut CommandList) -> Result<(), GraphicsError>,
    {
        self.allocator.reset()?;
        self.list.reset(&self.allocator)?;
        if let Err(e) = record(&mut self.list) {
            // Leave the list closed so the next batch can reset it.
            if let Err(close) = self.list.close() {
                log::warn!("Discarding upload batch: {close}");
            }
            return Err(e);
        }
        self.list.close()?;
        self.queue.execute(&[&self.list])?;

        self.fence_value += 1;
        self.queue.signal(&self.fence, self.fence_value)?;
        self.fence.wait(self.fence_value, self.timeout)
    }

    /// Copy each mesh into GPU-local vertex and index buffers.
    ///
    /// All copies share one list, one batch of transitions, one submission
    /// and one fence wait. The intermediates are released on return.
    pub fn upload_meshes(
        &mut self,
        device: &GpuDevice,
        meshes: &[&CpuMesh],
    ) -> Result<Vec<Mesh>, GraphicsError> {
        let mut staged = Vec::with_capacity(meshes.len() * 2);
        for (i, mesh) in meshes.iter().enumerate() {
            validate_mesh(mesh, i)?;
            let label = mesh.label().map_or_else(|| format!("mesh{i}"), str::to_string);
            staged.push(StagedBuffer::new(
                device,
                mesh.vertex_bytes(),
                BufferUsage::VERTEX | BufferUsage::ACCELERATION_STRUCTURE_INPUT,
                ResourceState::VertexAndConstantBuffer,
                &format!("{label}_vertices"),
            )?);
            staged.push(StagedBuffer::new(
                device,
                mesh.index_bytes(),
                BufferUsage::INDEX | BufferUsage::ACCELERATION_STRUCTURE_INPUT,
                ResourceState::IndexBuffer,
                &format!("{label}_indices"),
            )?);
        }

        self.execute(|list| {
            for buffer in &staged {
                list.copy_buffer(buffer.intermediate.id(), buffer.destination.id());
            }
            let barriers: Vec<ResourceBarrier> =
                staged.iter().map(StagedBuffer::transition).collect();
            list.resource_barrier(&barriers);
            Ok(())
        })?;

        let mut staged = staged.into_iter();
        let uploaded = meshes
            .iter()
            .zip(std::iter::from_fn(|| Some((staged.next()?, staged.next()?))))
            .map(|(cpu, (vertices, indices))| Mesh {
                label: cpu.label().map(str::to_string),
                vertex_buffer: vertices.destination,
                index_buffer: indices.destination,
                vertex_count: cpu.vertex_count(),
                index_count: cpu.index_count(),
            })
            .collect::<Vec<_>>();
        log::debug!("Uploaded {} meshes in one batch", uploaded.len());
        Ok(uploaded)
    }

    /// Fill a new GPU-local buffer with `data`, leaving it in `final_state`.
    pub fn upload_buffer(
        &mut self,
        device: &GpuDevice,
        data: &[u8],
        usage: BufferUsage,
        final_state: ResourceState,
        label: &str,
    ) -> Result<Buffer, GraphicsError> {
        let staged = StagedBuffer::new(device, data, usage, final_state, label)?;
        self.execute(|list| {
            list.copy_buffer(staged.intermediate.id(), staged.destination.id());
            list.resource_barrier(&[staged.transition()]);
            Ok(())
        })?;
        Ok(staged.destination)
    }

    /// Copy `buffer`, currently in `state`, back to the CPU.
    ///
    /// The buffer is returned to `state` afterwards.
    pub fn read_back_buffer(
        &mut self,
        device: &GpuDevice,
        buffer: &Buffer,
        state: ResourceState,
    ) -> Result<Vec<u8>, GraphicsError> {
        if buffer.descriptor().heap.is_cpu_visible() {
            let mut out = vec![0; buffer.size() as usize];
            buffer.read(0, &mut out)?;
            return Ok(out);
        }

        let readback = device.create_buffer(
            &BufferDescriptor::readback(buffer.size()).with_label("readback"),
        )?;
        let needs_transition = !state.allows_copy_source();
        self.execute(|list| {
            if needs_transition {
                list.transition(buffer.id(), state, ResourceState::CopySource);
            }
            list.copy_buffer(buffer.id(), readback.id());
            if needs_transition {
                list.transition(buffer.id(), ResourceState::CopySource, state);
            }
            Ok(())
        })?;

        let mut out = vec![0; buffer.size() as usize];
        readback.read(0, &mut out)?;
        Ok(out)
    }
}

impl std::fmt::Debug for UploadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadQueue")
            .field("queue", &self.queue.id())
            .field("fence_value", &self.fence_value)
            .finish()
    }
}

fn validate_mesh(mesh: &CpuMesh, index: usize) -> Result<(), GraphicsError> {
    let name = mesh.label().unwrap_or("unnamed");
    if mesh.vertices().is_empty() || mesh.indices().is_empty() {
        return Err(GraphicsError::InvalidParameter(format!(
            "mesh {index} ({name}) has no vertices or no indices"
        )));
    }
    if !mesh.indices_in_range() {
        return Err(GraphicsError::InvalidParameter(format!(
            "mesh {index} ({name}) indexes past its {} vertices",
            mesh.vertex_count()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_device;
    use crate::sync::INFINITE;
    use lumen_core::mesh::generators::{generate_cube, generate_sphere};

    #[test]
    fn test_upload_mesh_contents() {
        let device = test_device();
        let mut upload = UploadQueue::new(&device, INFINITE).unwrap();
        let cube = generate_cube(1.0);
        let meshes = upload.upload_meshes(&device, &[&cube]).unwrap();
        assert_eq!(meshes.len(), 1);

        let mesh = &meshes[0];
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.index_count(), 36);
        assert_eq!(mesh.vertex_buffer_view().stride, 32);
        assert_eq!(mesh.vertex_buffer_view().size, 24 * 32);
        assert_eq!(mesh.index_buffer_view().size, 36 * 4);

        let vertices = upload
            .read_back_buffer(&device, mesh.vertex_buffer(), ResourceState::VertexAndConstantBuffer)
            .unwrap();
        assert_eq!(vertices, cube.vertex_bytes());
        let indices = upload
            .read_back_buffer(&device, mesh.index_buffer(), ResourceState::IndexBuffer)
            .unwrap();
        assert_eq!(indices, cube.index_bytes());
    }

    #[test]
    fn test_batch_uses_one_fence_wait() {
        let device = test_device();
        let mut upload = UploadQueue::new(&device, INFINITE).unwrap();
        let cube = generate_cube(1.0);
        let sphere = generate_sphere(1.0, 8, 4);
        let meshes = upload.upload_meshes(&device, &[&cube, &sphere]).unwrap();
        assert_eq!(meshes.len(), 2);
        assert_eq!(upload.fence_value(), 1);
        assert_eq!(upload.fence().completed_value().unwrap(), 1);
        assert_eq!(meshes[1].index_count(), sphere.index_count());
    }

    #[test]
    fn test_empty_mesh_rejected() {
        let device = test_device();
        let mut upload = UploadQueue::new(&device, INFINITE).unwrap();
        let empty = CpuMesh::new(Vec::new(), Vec::new());
        assert!(matches!(
            upload.upload_meshes(&device, &[&empty]),
            Err(GraphicsError::InvalidParameter(_))
        ));
        // Nothing was submitted.
        assert_eq!(upload.fence_value(), 0);
    }

    #[test]
    fn test_failed_recording_leaves_queue_usable() {
        let device = test_device();
        let mut upload = UploadQueue::new(&device, INFINITE).unwrap();
        let err = upload.execute(|_| Err(GraphicsError::Internal("record".to_string())));
        assert!(err.is_err());
        upload.execute(|_| Ok(())).unwrap();
        assert_eq!(upload.fence_value(), 1);
    }

    #[test]
    fn test_upload_buffer() {
        let device = test_device();
        let mut upload = UploadQueue::new(&device, INFINITE).unwrap();
        let data: Vec<u8> = (0..=255).collect();
        let buffer = upload
            .upload_buffer(
                &device,
                &data,
                BufferUsage::CONSTANT,
                ResourceState::VertexAndConstantBuffer,
                "lut",
            )
            .unwrap();
        let back = upload
            .read_back_buffer(&device, &buffer, ResourceState::VertexAndConstantBuffer)
            .unwrap();
        assert_eq!(back, data);
    }
}
