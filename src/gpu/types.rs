//! GPU-visible data layout shared with the WGSL shaders.
//!
//! Every struct here is `#[repr(C)]` + `Pod` and mirrors a struct in
//! `assets/shaders/modules/types.wgsl` byte for byte. The layout constants
//! are emitted into the generated `trajview::constants` shader module by
//! [`constants_wgsl`], so host and shader cannot drift apart.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Periodic images per object (3×3×3 neighborhood).
pub const REPLICA_COUNT: usize = 27;
/// Largest per-axis cell count the replica table supports.
pub const MAX_CELLS_PER_AXIS: u32 = 3;
/// Local workgroup size of the cull kernel.
pub const CULL_WORKGROUP_SIZE: u32 = 256;
/// Mesh types held in the merged vertex/index buffers.
pub const MESH_COUNT: usize = 5;
/// Depth buckets in the mouse-picking feedback buffer.
pub const MOUSE_BUCKET_COUNT: usize = 4096;

/// WGSL source of the `trajview::constants` module.
#[must_use]
pub fn constants_wgsl() -> String {
    format!(
        "#define_import_path trajview::constants\n\n\
         const REPLICA_COUNT: u32 = {REPLICA_COUNT}u;\n\
         const CULL_WORKGROUP_SIZE: u32 = {CULL_WORKGROUP_SIZE}u;\n\
         const MESH_COUNT: u32 = {MESH_COUNT}u;\n\
         const MOUSE_BUCKET_COUNT: u32 = {MOUSE_BUCKET_COUNT}u;\n"
    )
}

/// Per-object record: transform, colors and bounding radius.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuObjectData {
    /// Model matrix, column-major.
    pub model: [[f32; 4]; 4],
    /// Primary color (RGBA).
    pub color1: [f32; 4],
    /// Secondary color, used by the far half of bonds.
    pub color2: [f32; 4],
    /// Bond axis (xyz), zero for non-bonds.
    pub bond_normal: [f32; 4],
    /// Bounding-sphere radius in world units.
    pub radius: f32,
    /// Mesh type of the object.
    pub batch_id: u32,
    /// Padding to a 16-byte multiple.
    pub _pad: [u32; 2],
}

impl GpuObjectData {
    /// Object with the given transform, color, radius and mesh type.
    #[must_use]
    pub fn new(model: Mat4, color: Vec4, radius: f32, batch_id: u32) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            color1: color.to_array(),
            color2: color.to_array(),
            bond_normal: [0.0; 4],
            radius,
            batch_id,
            _pad: [0; 2],
        }
    }

    /// World-space center (translation column of the model matrix).
    #[must_use]
    pub fn center(&self) -> Vec3 {
        Vec3::new(self.model[3][0], self.model[3][1], self.model[3][2])
    }
}

/// Per-object cull input: which object, which mesh batch.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuInstance {
    /// Index into the object buffer.
    pub object_id: u32,
    /// Mesh type.
    pub batch_id: u32,
}

/// Cull output: a visible (object, periodic image) pair.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuFinalInstance {
    /// Index into the object buffer.
    pub object_id: u32,
    /// Index into the replica offset table.
    pub offset_id: u32,
}

/// Replica translation table.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuOffsets {
    /// Translation per periodic image (xyz, w unused).
    pub offsets: [[f32; 4]; REPLICA_COUNT],
}

impl Default for GpuOffsets {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Indexed indirect draw arguments, laid out as the APIs read them.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectCommand {
    /// Indices per instance.
    pub index_count: u32,
    /// Instances to draw; incremented by the cull kernel.
    pub instance_count: u32,
    /// First index in the merged index buffer.
    pub first_index: u32,
    /// Added to every index.
    pub base_vertex: i32,
    /// First slot in the final-instance buffer.
    pub first_instance: u32,
}

/// One draw command per mesh type.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuDrawCalls {
    /// Commands indexed by mesh id.
    pub commands: [DrawIndexedIndirectCommand; MESH_COUNT],
}

impl GpuDrawCalls {
    /// Byte stride between consecutive commands.
    pub const STRIDE: u64 =
        size_of::<DrawIndexedIndirectCommand>() as u64;
}

/// Indirect dispatch arguments.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchIndirectCommand {
    /// Workgroups along x.
    pub x: u32,
    /// Workgroups along y.
    pub y: u32,
    /// Workgroups along z.
    pub z: u32,
}

impl DispatchIndirectCommand {
    /// Arguments covering `objects` invocations with one-dimensional
    /// groups of [`CULL_WORKGROUP_SIZE`]. Zero objects yield zero groups.
    #[must_use]
    pub fn for_objects(objects: u32) -> Self {
        Self {
            x: objects.div_ceil(CULL_WORKGROUP_SIZE),
            y: 1,
            z: 1,
        }
    }
}

/// Cull kernel parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuCullData {
    /// World-to-view matrix.
    pub view: [[f32; 4]; 4],
    /// View-space frustum planes (normal xyz, distance w).
    pub frustum: [[f32; 4]; 6],
    /// Event cylinder center (xyz).
    pub cylinder_center: [f32; 4],
    /// Event cylinder unit axis (xyz).
    pub cylinder_normal: [f32; 4],
    /// Event cylinder length.
    pub cylinder_length: f32,
    /// Squared event cylinder radius.
    pub cylinder_radius_sq: f32,
    /// Objects written this frame.
    pub unique_object_count: u32,
    /// Active entries in the replica table.
    pub offset_count: u32,
    /// Non-zero when the frustum test is active.
    pub culling_enabled: u32,
    /// Non-zero when the cylinder test is active.
    pub cull_cylinder: u32,
    /// Padding to a 16-byte multiple.
    pub _pad: [u32; 2],
}

impl Default for GpuCullData {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Camera uniform.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuCameraData {
    /// Projection × view.
    pub proj_view: [[f32; 4]; 4],
    /// World-to-view matrix.
    pub view: [[f32; 4]; 4],
    /// Eye position (xyz).
    pub position: [f32; 4],
    /// Direction towards the light (xyz).
    pub light_dir: [f32; 4],
}

impl Default for GpuCameraData {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Per-frame scene uniform, bound with a dynamic offset per slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuSceneData {
    /// Ambient light color (rgb) and strength (a).
    pub ambient: [f32; 4],
    /// Per-mesh shading parameters: specular strength, shininess.
    pub mesh_params: [[f32; 4]; MESH_COUNT],
    /// Mouse pixel (xy) and picking-armed flag (z).
    pub mouse: [f32; 4],
    /// Point light position (xyz).
    pub light_position: [f32; 4],
    /// Point light color (rgb) and intensity (a).
    pub light_color: [f32; 4],
}

impl Default for GpuSceneData {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// The mouse-bucket feedback buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuMouseBuckets {
    /// Picked object id + 1 per depth bucket, zero when empty.
    pub buckets: [u32; MOUSE_BUCKET_COUNT],
}
