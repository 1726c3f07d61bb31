//! Shader-visible descriptor heap with named slot reservations.
//!
//! The renderer owns one heap shared by the UI overlay, the ray tracing
//! dispatch and the scene. Every user reserves its slots by name up front in
//! a [`DescriptorHeapLayout`], so two users can never alias the same slot.

use std::sync::Arc;

use crate::backend::{AccelId, BufferId, DescriptorHeapId, GpuBackend, TextureId};
use crate::device::GpuDevice;
use crate::error::GraphicsError;

/// Conventional slot names.
pub mod slots {
    /// Font atlas of the UI overlay.
    pub const UI: &str = "ui";
    /// Top-level acceleration structure traced by the ray dispatch.
    pub const SCENE_TLAS: &str = "scene_tlas";
    /// Storage texture the ray dispatch writes.
    pub const RAYTRACE_OUTPUT: &str = "raytrace_output";
}

/// Kind of view a slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    ShaderResource,
    UnorderedAccess,
    ConstantBuffer,
    AccelerationStructure,
}

/// Position of a slot in the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorIndex(pub u32);

impl DescriptorIndex {
    pub fn get(&self) -> u32 {
        self.0
    }
}

/// View written into a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorBinding {
    /// Sampled texture.
    Texture(TextureId),
    /// Read-write storage texture.
    StorageTexture(TextureId),
    ConstantBuffer {
        buffer: BufferId,
        offset: u64,
        size: u64,
    },
    AccelerationStructure(AccelId),
}

impl DescriptorBinding {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::Texture(_) => DescriptorKind::ShaderResource,
            Self::StorageTexture(_) => DescriptorKind::UnorderedAccess,
            Self::ConstantBuffer { .. } => DescriptorKind::ConstantBuffer,
            Self::AccelerationStructure(_) => DescriptorKind::AccelerationStructure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reservation {
    name: String,
    kind: DescriptorKind,
}

/// Fixed-capacity list of named slot reservations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorHeapLayout {
    capacity: u32,
    reservations: Vec<Reservation>,
}

impl DescriptorHeapLayout {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            reservations: Vec::new(),
        }
    }

    /// Reserve the next free slot under `name`.
    ///
    /// # Errors
    ///
    /// Fails if `name` is already reserved or the heap is full.
    pub fn reserve(
        &mut self,
        name: &str,
        kind: DescriptorKind,
    ) -> Result<DescriptorIndex, GraphicsError> {
        if self.index_of(name).is_some() {
            return Err(GraphicsError::InvalidParameter(format!(
                "descriptor slot '{name}' reserved twice"
            )));
        }
        if self.reservations.len() as u32 >= self.capacity {
            return Err(GraphicsError::InvalidParameter(format!(
                "descriptor heap full ({} slots), cannot reserve '{name}'",
                self.capacity
            )));
        }
        self.reservations.push(Reservation {
            name: name.to_string(),
            kind,
        });
        Ok(DescriptorIndex(self.reservations.len() as u32 - 1))
    }

    pub fn index_of(&self, name: &str) -> Option<DescriptorIndex> {
        self.reservations
            .iter()
            .position(|r| r.name == name)
            .map(|i| DescriptorIndex(i as u32))
    }

    pub fn kind_of(&self, index: DescriptorIndex) -> Option<DescriptorKind> {
        self.reservations.get(index.0 as usize).map(|r| r.kind)
    }

    pub fn name_of(&self, index: DescriptorIndex) -> Option<&str> {
        self.reservations
            .get(index.0 as usize)
            .map(|r| r.name.as_str())
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of reserved slots.
    pub fn len(&self) -> u32 {
        self.reservations.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    /// Check that `binding` may be written at `index`.
    pub fn validate(
        &self,
        index: DescriptorIndex,
        binding: &DescriptorBinding,
    ) -> Result<(), GraphicsError> {
        let kind = self.kind_of(index).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "descriptor slot {} is not reserved",
                index.0
            ))
        })?;
        if kind != binding.kind() {
            return Err(GraphicsError::InvalidParameter(format!(
                "descriptor slot '{}' holds {:?} views, got {:?}",
                self.reservations[index.0 as usize].name,
                kind,
                binding.kind()
            )));
        }
        Ok(())
    }
}

/// A shader-visible descriptor heap.
pub struct DescriptorHeap {
    backend: Arc<dyn GpuBackend>,
    id: DescriptorHeapId,
    layout: DescriptorHeapLayout,
}

impl DescriptorHeap {
    pub fn new(device: &GpuDevice, layout: DescriptorHeapLayout) -> Result<Self, GraphicsError> {
        let max = device.capabilities().max_descriptor_heap_size;
        if layout.capacity() == 0 || layout.capacity() > max {
            return Err(GraphicsError::InvalidParameter(format!(
                "descriptor heap capacity {} outside 1..={max}",
                layout.capacity()
            )));
        }
        let id = device.backend().create_descriptor_heap(&layout)?;
        log::debug!(
            "Created descriptor heap with {} of {} slots reserved",
            layout.len(),
            layout.capacity()
        );
        Ok(Self {
            backend: device.backend().clone(),
            id,
            layout,
        })
    }

    pub fn id(&self) -> DescriptorHeapId {
        self.id
    }

    pub fn layout(&self) -> &DescriptorHeapLayout {
        &self.layout
    }

    pub fn index_of(&self, name: &str) -> Option<DescriptorIndex> {
        self.layout.index_of(name)
    }

    /// Write a view into a reserved slot of matching kind.
    pub fn write(
        &self,
        index: DescriptorIndex,
        binding: &DescriptorBinding,
    ) -> Result<(), GraphicsError> {
        self.layout.validate(index, binding)?;
        self.backend.write_descriptor(self.id, index, binding)
    }

    /// Write a view into the slot reserved under `name`.
    pub fn write_named(
        &self,
        name: &str,
        binding: &DescriptorBinding,
    ) -> Result<(), GraphicsError> {
        let index = self.index_of(name).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("descriptor slot '{name}' is not reserved"))
        })?;
        self.write(index, binding)
    }
}

impl Drop for DescriptorHeap {
    fn drop(&mut self) {
        self.backend.destroy_descriptor_heap(self.id);
    }
}

impl std::fmt::Debug for DescriptorHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorHeap")
            .field("id", &self.id)
            .field("layout", &self.layout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_device;

    fn layout() -> DescriptorHeapLayout {
        let mut layout = DescriptorHeapLayout::new(8);
        layout.reserve(slots::UI, DescriptorKind::ShaderResource).unwrap();
        layout
            .reserve(slots::SCENE_TLAS, DescriptorKind::AccelerationStructure)
            .unwrap();
        layout
            .reserve(slots::RAYTRACE_OUTPUT, DescriptorKind::UnorderedAccess)
            .unwrap();
        layout
    }

    #[test]
    fn test_reservations_are_sequential() {
        let layout = layout();
        assert_eq!(layout.index_of(slots::UI), Some(DescriptorIndex(0)));
        assert_eq!(layout.index_of(slots::SCENE_TLAS), Some(DescriptorIndex(1)));
        assert_eq!(
            layout.index_of(slots::RAYTRACE_OUTPUT),
            Some(DescriptorIndex(2))
        );
        assert_eq!(layout.len(), 3);
    }

    #[test]
    fn test_duplicate_reservation_rejected() {
        let mut layout = layout();
        assert!(layout.reserve(slots::UI, DescriptorKind::ShaderResource).is_err());
        assert_eq!(layout.len(), 3);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut layout = DescriptorHeapLayout::new(1);
        layout.reserve("a", DescriptorKind::ConstantBuffer).unwrap();
        assert!(layout.reserve("b", DescriptorKind::ConstantBuffer).is_err());
    }

    #[test]
    fn test_write_checks_kind_and_reservation() {
        let device = test_device();
        let heap = DescriptorHeap::new(&device, layout()).unwrap();

        let tlas = DescriptorBinding::AccelerationStructure(AccelId(7));
        heap.write_named(slots::SCENE_TLAS, &tlas).unwrap();
        assert!(heap.write_named(slots::UI, &tlas).is_err());
        assert!(heap.write(DescriptorIndex(5), &tlas).is_err());
        assert!(heap.write_named("missing", &tlas).is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let device = test_device();
        assert!(DescriptorHeap::new(&device, DescriptorHeapLayout::new(0)).is_err());
    }
}
