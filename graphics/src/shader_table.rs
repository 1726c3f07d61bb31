//! Shader binding tables for ray dispatches.
//!
//! A table has three regions (ray generation, miss, hit group). Every record
//! is a shader identifier followed by that group's root arguments. All
//! records share one stride, and every region starts on the device's table
//! alignment:
//!
//! ```text
//! stride      = align_up(identifier_size + max_root_args, record_alignment)
//! region.size = stride * record_count
//! ```

use crate::backend::{BufferId, PipelineId};
use crate::device::{DeviceCapabilities, GpuDevice};
use crate::error::GraphicsError;
use crate::resources::{Buffer, align_up};
use crate::types::{BufferDescriptor, BufferUsage};

/// Region of a shader table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderGroupKind {
    RayGeneration,
    Miss,
    HitGroup,
}

impl ShaderGroupKind {
    pub const ALL: [Self; 3] = [Self::RayGeneration, Self::Miss, Self::HitGroup];

    fn index(self) -> usize {
        match self {
            Self::RayGeneration => 0,
            Self::Miss => 1,
            Self::HitGroup => 2,
        }
    }
}

/// Address range of one region, as a dispatch consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderTableRegion {
    pub buffer: BufferId,
    pub offset: u64,
    pub size: u64,
    pub stride: u64,
}

/// Arguments of a ray dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchRaysDesc {
    pub ray_generation: ShaderTableRegion,
    pub miss: ShaderTableRegion,
    pub hit_group: ShaderTableRegion,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RecordDesc {
    export: String,
    root_arguments: Vec<u8>,
}

/// Offsets of one region within the table buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegionLayout {
    pub offset: u64,
    pub size: u64,
    pub count: u32,
}

/// Computed placement of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderTableLayout {
    pub identifier_size: u64,
    pub stride: u64,
    pub regions: [RegionLayout; 3],
    pub total_size: u64,
}

impl ShaderTableLayout {
    pub fn region(&self, kind: ShaderGroupKind) -> &RegionLayout {
        &self.regions[kind.index()]
    }

    /// Byte offset of record `index` of region `kind`.
    pub fn record_offset(&self, kind: ShaderGroupKind, index: u32) -> Option<u64> {
        let region = self.region(kind);
        (index < region.count).then(|| region.offset + index as u64 * self.stride)
    }
}

/// Declarative list of shader records.
#[derive(Debug, Clone, Default)]
pub struct ShaderTableBuilder {
    groups: [Vec<RecordDesc>; 3],
}

impl ShaderTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record for `export` with its root argument bytes.
    #[must_use]
    pub fn with_record(
        mut self,
        kind: ShaderGroupKind,
        export: &str,
        root_arguments: &[u8],
    ) -> Self {
        self.groups[kind.index()].push(RecordDesc {
            export: export.to_string(),
            root_arguments: root_arguments.to_vec(),
        });
        self
    }

    #[must_use]
    pub fn ray_generation(self, export: &str, root_arguments: &[u8]) -> Self {
        self.with_record(ShaderGroupKind::RayGeneration, export, root_arguments)
    }

    #[must_use]
    pub fn miss(self, export: &str, root_arguments: &[u8]) -> Self {
        self.with_record(ShaderGroupKind::Miss, export, root_arguments)
    }

    #[must_use]
    pub fn hit_group(self, export: &str, root_arguments: &[u8]) -> Self {
        self.with_record(ShaderGroupKind::HitGroup, export, root_arguments)
    }

    /// Largest root argument block of any record.
    pub fn max_root_arguments(&self) -> u64 {
        self.groups
            .iter()
            .flatten()
            .map(|r| r.root_arguments.len() as u64)
            .max()
            .unwrap_or(0)
    }

    /// Place the records using the device's identifier size and alignments.
    pub fn layout(&self, caps: &DeviceCapabilities) -> Result<ShaderTableLayout, GraphicsError> {
        let record_alignment = caps.shader_record_alignment as u64;
        let table_alignment = caps.shader_table_alignment as u64;
        if !record_alignment.is_power_of_two()
            || !table_alignment.is_power_of_two()
            || table_alignment % record_alignment != 0
        {
            return Err(GraphicsError::Internal(format!(
                "invalid shader table alignments (record {record_alignment}, table {table_alignment})"
            )));
        }
        if self.groups[ShaderGroupKind::RayGeneration.index()].len() != 1 {
            return Err(GraphicsError::InvalidParameter(format!(
                "shader table needs exactly one ray generation record, got {}",
                self.groups[0].len()
            )));
        }

        let identifier_size = caps.shader_identifier_size as u64;
        let stride = align_up(identifier_size + self.max_root_arguments(), record_alignment);
        let mut regions = [RegionLayout::default(); 3];
        let mut cursor = 0;
        for (region, group) in regions.iter_mut().zip(&self.groups) {
            let offset = align_up(cursor, table_alignment);
            let size = stride * group.len() as u64;
            *region = RegionLayout {
                offset,
                size,
                count: group.len() as u32,
            };
            cursor = offset + size;
        }

        Ok(ShaderTableLayout {
            identifier_size,
            stride,
            regions,
            total_size: cursor,
        })
    }

    /// Fetch identifiers from `pipeline` and write every record into a new
    /// upload buffer.
    pub fn build(
        &self,
        device: &GpuDevice,
        pipeline: PipelineId,
    ) -> Result<ShaderTable, GraphicsError> {
        let layout = self.layout(device.capabilities())?;
        let mut bytes = vec![0u8; layout.total_size as usize];

        for kind in ShaderGroupKind::ALL {
            for (i, record) in self.groups[kind.index()].iter().enumerate() {
                let identifier = device.backend().shader_identifier(pipeline, &record.export)?;
                if identifier.len() as u64 != layout.identifier_size {
                    return Err(GraphicsError::Internal(format!(
                        "shader identifier for '{}' is {} bytes, expected {}",
                        record.export,
                        identifier.len(),
                        layout.identifier_size
                    )));
                }
                let start = (layout.region(kind).offset + i as u64 * layout.stride) as usize;
                let args_start = start + identifier.len();
                bytes[start..args_start].copy_from_slice(&identifier);
                bytes[args_start..args_start + record.root_arguments.len()]
                    .copy_from_slice(&record.root_arguments);
            }
        }

        let buffer = device.create_buffer(
            &BufferDescriptor::upload(layout.total_size, BufferUsage::SHADER_TABLE)
                .with_label("shader_table"),
        )?;
        buffer.write(0, &bytes)?;
        log::debug!(
            "Built shader table: stride {}, {} bytes",
            layout.stride,
            layout.total_size
        );
        Ok(ShaderTable { buffer, layout })
    }
}

/// Shader records resident in GPU-readable memory.
pub struct ShaderTable {
    buffer: Buffer,
    layout: ShaderTableLayout,
}

impl ShaderTable {
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn layout(&self) -> &ShaderTableLayout {
        &self.layout
    }

    pub fn region(&self, kind: ShaderGroupKind) -> ShaderTableRegion {
        let region = self.layout.region(kind);
        ShaderTableRegion {
            buffer: self.buffer.id(),
            offset: region.offset,
            size: region.size,
            stride: self.layout.stride,
        }
    }

    /// Dispatch description covering all three regions.
    pub fn dispatch(&self, width: u32, height: u32) -> DispatchRaysDesc {
        DispatchRaysDesc {
            ray_generation: self.region(ShaderGroupKind::RayGeneration),
            miss: self.region(ShaderGroupKind::Miss),
            hit_group: self.region(ShaderGroupKind::HitGroup),
            width,
            height,
            depth: 1,
        }
    }

    /// Overwrite the root arguments of one record in place.
    ///
    /// No dispatch reading this table may be in flight.
    pub fn update_root_arguments(
        &self,
        kind: ShaderGroupKind,
        index: u32,
        root_arguments: &[u8],
    ) -> Result<(), GraphicsError> {
        let offset = self.layout.record_offset(kind, index).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("no {kind:?} record {index} in shader table"))
        })?;
        if self.layout.identifier_size + root_arguments.len() as u64 > self.layout.stride {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} bytes of root arguments do not fit a {} byte record",
                root_arguments.len(),
                self.layout.stride
            )));
        }
        self.buffer
            .write(offset + self.layout.identifier_size, root_arguments)
    }
}

impl std::fmt::Debug for ShaderTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderTable")
            .field("layout", &self.layout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> DeviceCapabilities {
        DeviceCapabilities::default()
    }

    #[test]
    fn test_layout_aligns_regions() {
        let builder = ShaderTableBuilder::new()
            .ray_generation("RayGen", &[0u8; 40])
            .miss("Miss", &[])
            .hit_group("HitGroup", &[])
            .hit_group("ShadowHitGroup", &[]);
        let layout = builder.layout(&caps()).unwrap();

        // 32 byte identifier + 40 bytes of arguments, rounded to 32.
        assert_eq!(layout.stride, 96);
        assert_eq!(
            *layout.region(ShaderGroupKind::RayGeneration),
            RegionLayout { offset: 0, size: 96, count: 1 }
        );
        assert_eq!(
            *layout.region(ShaderGroupKind::Miss),
            RegionLayout { offset: 128, size: 96, count: 1 }
        );
        assert_eq!(
            *layout.region(ShaderGroupKind::HitGroup),
            RegionLayout { offset: 256, size: 192, count: 2 }
        );
        assert_eq!(layout.total_size, 448);
        assert_eq!(layout.record_offset(ShaderGroupKind::HitGroup, 1), Some(352));
        assert_eq!(layout.record_offset(ShaderGroupKind::HitGroup, 2), None);
    }

    #[test]
    fn test_layout_requires_single_ray_generation() {
        let none = ShaderTableBuilder::new().miss("Miss", &[]);
        assert!(none.layout(&caps()).is_err());

        let two = ShaderTableBuilder::new()
            .ray_generation("A", &[])
            .ray_generation("B", &[]);
        assert!(two.layout(&caps()).is_err());
    }

    #[test]
    fn test_layout_without_arguments() {
        let layout = ShaderTableBuilder::new()
            .ray_generation("RayGen", &[])
            .miss("Miss", &[])
            .hit_group("HitGroup", &[])
            .layout(&caps())
            .unwrap();
        assert_eq!(layout.stride, 32);
        assert_eq!(layout.region(ShaderGroupKind::Miss).offset, 64);
        assert_eq!(layout.region(ShaderGroupKind::HitGroup).offset, 128);
    }
}
