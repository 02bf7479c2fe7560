//! Mesh geometry and merging.
//!
//! Every mesh type lives in one shared vertex buffer and one shared index
//! buffer. [`MeshMerger`] concatenates the per-type meshes and remembers
//! where each one landed; those ranges seed the indirect draw template.

pub mod shapes;

use glam::{Mat3, Mat4, Vec3};

use crate::gpu::arena::{BufferArena, BufferHandle, BufferRange, UploadContext, UploadError};
use crate::gpu::device::{DescriptorKind, GpuDevice, MemoryClass};
use crate::gpu::types::MESH_COUNT;

/// Mesh types, in draw order. The discriminant indexes the draw-call buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MeshId {
    /// Atom sphere.
    Atom = 0,
    /// Unit cell edge frame.
    UnitCell = 1,
    /// Surface vector arrow.
    Vector = 2,
    /// Event cylinder.
    Cylinder = 3,
    /// Bond cylinder.
    Bond = 4,
}

impl MeshId {
    /// All mesh ids in draw order.
    pub const ALL: [Self; MESH_COUNT] = [
        Self::Atom,
        Self::UnitCell,
        Self::Vector,
        Self::Cylinder,
        Self::Bond,
    ];

    /// Position in the draw-call buffer.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Vertex shared by every mesh type.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BasicVertex {
    /// Object-space position.
    pub position: [f32; 3],
    /// Object-space normal.
    pub normal: [f32; 3],
    /// Vertex tint, multiplied with the object color.
    pub color: [f32; 3],
}

impl BasicVertex {
    /// White vertex.
    #[must_use]
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            color: [1.0; 3],
        }
    }

    /// Vertex buffer layout matching `VertexInput` in `mesh.wgsl`.
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x3,
                    offset: 0,
                    shader_location: 0, // position
                },
                wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x3,
                    offset: 12,
                    shader_location: 1, // normal
                },
                wgpu::VertexAttribute {
                    format: wgpu::VertexFormat::Float32x3,
                    offset: 24,
                    shader_location: 2, // color
                },
            ],
        }
    }
}

/// Indexed triangle list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    /// Vertices.
    pub vertices: Vec<BasicVertex>,
    /// Triangle indices, three per face.
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Distance of the farthest vertex from the origin.
    #[must_use]
    pub fn bounding_radius(&self) -> f32 {
        self.vertices
            .iter()
            .map(|v| Vec3::from_array(v.position).length())
            .fold(0.0, f32::max)
    }

    /// Append `other`, rebasing its indices.
    pub fn append(&mut self, other: &Self) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.indices.extend(other.indices.iter().map(|i| i + base));
    }

    /// Copy of the mesh with positions transformed by `m` and normals by its
    /// inverse transpose.
    #[must_use]
    pub fn transformed(&self, m: Mat4) -> Self {
        let normal_matrix = Mat3::from_mat4(m).inverse().transpose();
        let vertices = self
            .vertices
            .iter()
            .map(|v| BasicVertex {
                position: m.transform_point3(Vec3::from_array(v.position)).to_array(),
                normal: (normal_matrix * Vec3::from_array(v.normal))
                    .normalize_or_zero()
                    .to_array(),
                color: v.color,
            })
            .collect();
        Self {
            vertices,
            indices: self.indices.clone(),
        }
    }

    /// Recolor every vertex.
    #[must_use]
    pub fn with_color(mut self, color: Vec3) -> Self {
        for v in &mut self.vertices {
            v.color = color.to_array();
        }
        self
    }
}

/// Where one mesh type sits in the merged buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeshInfo {
    /// First index in the merged index buffer.
    pub first_index: u32,
    /// Index count of the mesh.
    pub index_count: u32,
    /// Added to every index of the mesh.
    pub first_vertex: i32,
    /// Bounding radius in object space.
    pub radius: f32,
}

/// Concatenates meshes into shared vertex and index lists.
#[derive(Debug, Default)]
pub struct MeshMerger {
    vertices: Vec<BasicVertex>,
    indices: Vec<u32>,
    infos: [MeshInfo; MESH_COUNT],
}

impl MeshMerger {
    /// Empty merger. Mesh types never added keep an empty range.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `mesh` as the geometry of `id`. Indices stay mesh-local;
    /// `first_vertex` rebases them at draw time.
    pub fn add(&mut self, id: MeshId, mesh: &Mesh) -> MeshInfo {
        let info = MeshInfo {
            first_index: self.indices.len() as u32,
            index_count: mesh.indices.len() as u32,
            first_vertex: self.vertices.len() as i32,
            radius: mesh.bounding_radius(),
        };
        self.vertices.extend_from_slice(&mesh.vertices);
        self.indices.extend_from_slice(&mesh.indices);
        self.infos[id.index()] = info;
        info
    }

    /// Range of `id`.
    #[must_use]
    pub fn info(&self, id: MeshId) -> MeshInfo {
        self.infos[id.index()]
    }

    /// Ranges of every mesh type, in draw order.
    #[must_use]
    pub fn infos(&self) -> [MeshInfo; MESH_COUNT] {
        self.infos
    }

    /// Merged vertices.
    #[must_use]
    pub fn vertices(&self) -> &[BasicVertex] {
        &self.vertices
    }

    /// Merged indices.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Stage the merged geometry into new device-local buffers.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError`] if buffer creation or a staged copy fails.
    /// Buffers created before the failure are released.
    pub fn upload<D: GpuDevice>(
        &self,
        device: &mut D,
        arena: &mut BufferArena,
        upload: &mut UploadContext,
    ) -> Result<MeshBuffers, UploadError> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&self.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&self.indices);

        let vertex = arena.create_buffer(
            device,
            "Mesh Vertices",
            vertex_bytes.len().max(4) as u64,
            wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            MemoryClass::DeviceLocal,
        )?;
        let index = match arena.create_buffer(
            device,
            "Mesh Indices",
            index_bytes.len().max(4) as u64,
            wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            MemoryClass::DeviceLocal,
        ) {
            Ok(index) => index,
            Err(e) => {
                arena.destroy_buffer(device, vertex);
                return Err(e.into());
            }
        };
        let buffers = MeshBuffers { vertex, index };

        let staged = [(vertex, vertex_bytes), (index, index_bytes)]
            .into_iter()
            .try_for_each(|(handle, bytes)| {
                let view = arena.create_buffer_resource(
                    handle,
                    0,
                    BufferRange::Whole,
                    DescriptorKind::StorageBuffer,
                );
                arena.stage_buffer(device, upload, bytes, &view)
            });
        if let Err(e) = staged {
            buffers.destroy(device, arena);
            return Err(e);
        }
        log::debug!(
            "uploaded {} vertices, {} indices",
            self.vertices.len(),
            self.indices.len()
        );
        Ok(buffers)
    }
}

/// Device-local merged geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBuffers {
    /// Vertex buffer.
    pub vertex: BufferHandle,
    /// Index buffer.
    pub index: BufferHandle,
}

impl MeshBuffers {
    /// Release both buffers.
    pub fn destroy<D: GpuDevice>(self, device: &mut D, arena: &mut BufferArena) {
        arena.destroy_buffer(device, self.vertex);
        arena.destroy_buffer(device, self.index);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gpu::soft::SoftDevice;

    fn triangle() -> Mesh {
        Mesh {
            vertices: vec![
                BasicVertex::new(Vec3::X, Vec3::Z),
                BasicVertex::new(Vec3::Y, Vec3::Z),
                BasicVertex::new(Vec3::ZERO, Vec3::Z),
            ],
            indices: vec![0, 1, 2],
        }
    }

    #[test]
    fn vertex_layout_matches_struct() {
        assert_eq!(size_of::<BasicVertex>(), 36);
        assert_eq!(BasicVertex::layout().array_stride, 36);
        assert_eq!(BasicVertex::layout().attributes.len(), 3);
    }

    #[test]
    fn merger_records_consecutive_ranges() {
        let mut merger = MeshMerger::new();
        let a = merger.add(MeshId::Atom, &triangle());
        let b = merger.add(MeshId::Bond, &triangle());

        assert_eq!((a.first_index, a.index_count, a.first_vertex), (0, 3, 0));
        assert_eq!((b.first_index, b.index_count, b.first_vertex), (3, 3, 3));
        assert_eq!(merger.info(MeshId::Vector), MeshInfo::default());
        assert_eq!(merger.vertices().len(), 6);
        // Indices stay local to each mesh.
        assert_eq!(merger.indices(), &[0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn append_rebases_indices() {
        let mut mesh = triangle();
        mesh.append(&triangle());
        assert_eq!(mesh.indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn transformed_moves_positions_and_keeps_unit_normals() {
        let m = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 1.0, 1.0),
            glam::Quat::IDENTITY,
            Vec3::new(0.0, 0.0, 5.0),
        );
        let mesh = triangle().transformed(m);
        assert_eq!(mesh.vertices[0].position, [2.0, 0.0, 5.0]);
        let n = Vec3::from_array(mesh.vertices[0].normal);
        assert!((n.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn upload_stages_geometry_into_device_local_buffers() {
        let mut device = SoftDevice::new();
        let mut arena = BufferArena::new();
        let mut upload = UploadContext::new(&mut device, Duration::from_secs(1)).unwrap();
        let mut merger = MeshMerger::new();
        let _ = merger.add(MeshId::Atom, &triangle());

        let buffers = merger.upload(&mut device, &mut arena, &mut upload).unwrap();
        let bytes = device.buffer_contents(arena.raw(buffers.index));
        let indices: Vec<u32> = bytemuck::pod_collect_to_vec(&bytes);
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(arena.class(buffers.vertex), MemoryClass::DeviceLocal);
        // Staging buffers are gone.
        assert_eq!(arena.live_count(), 2);
    }
}
