//! Object types: each knows how many objects it contributes to a frame and
//! how to write their GPU records.

use glam::{Mat3, Mat4, Quat, Vec3, Vec4};

use super::trajectory::{tags, Trajectory};
use crate::gpu::types::{GpuInstance, GpuObjectData, MESH_COUNT};
use crate::mesh::shapes::segment_transform;
use crate::mesh::{MeshId, MeshInfo};
use crate::options::{ColorOptions, EventOptions, GeometryOptions};

/// How atoms without a selection tag are colored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AtomColoring {
    /// CPK color of the element.
    #[default]
    ByElement,
    /// Catalyst and chemical colors first, then the element color.
    ByBaseType,
}

impl AtomColoring {
    /// Color of an atom with `tag` and element color `element`.
    #[must_use]
    pub fn color(self, tag: u32, element: Vec3, colors: &ColorOptions) -> Vec4 {
        let has = |bits: u32| tag & bits != 0;
        if has(tags::SELECTED_FOR_MEASUREMENT) {
            return Vec4::from_array(colors.measurement);
        }
        if has(tags::SELECTED_FOR_TAGGING) {
            return Vec4::from_array(colors.tagging);
        }
        if has(tags::HIGHLIGHTED) {
            return Vec4::from_array(colors.highlighted);
        }
        if self == Self::ByBaseType {
            if has(tags::CATALYST) {
                return Vec4::from_array(colors.catalyst);
            }
            if has(tags::CHEMICAL) {
                return Vec4::from_array(colors.chemical);
            }
        }
        element.extend(1.0)
    }
}

/// Everything an object type reads while writing one frame.
#[derive(Debug, Clone, Copy)]
pub struct WriteContext<'a> {
    /// Source data.
    pub trajectory: &'a Trajectory,
    /// Frame being written.
    pub frame: usize,
    /// Sizes and scales.
    pub geometry: &'a GeometryOptions,
    /// Palette.
    pub colors: &'a ColorOptions,
    /// Event cylinder options.
    pub event: &'a EventOptions,
    /// Merged mesh ranges, for bounding radii.
    pub meshes: &'a [MeshInfo; MESH_COUNT],
    /// Atom coloring strategy.
    pub coloring: AtomColoring,
    /// Shift keeping the freeze atom still.
    pub anti_stutter: Vec3,
}

impl WriteContext<'_> {
    fn mesh_radius(&self, id: MeshId) -> f32 {
        self.meshes[id.index()].radius
    }

    fn atom_radius(&self, atom: usize) -> f32 {
        self.trajectory.element(atom).covalent_radius * self.geometry.atom_size
    }

    fn position(&self, atom: usize) -> Vec3 {
        self.trajectory
            .positions
            .get(self.frame)
            .and_then(|frame| frame.get(atom))
            .copied()
            .unwrap_or(Vec3::ZERO)
    }
}

/// Source of one mesh type's objects.
pub trait ObjectType {
    /// Display name.
    fn name(&self) -> &'static str;

    /// Mesh the objects are drawn with.
    fn mesh_id(&self) -> MeshId;

    /// Objects contributed at `frame`.
    fn count(&self, trajectory: &Trajectory, frame: usize) -> usize;

    /// Largest count over all frames.
    fn max_count(&self, trajectory: &Trajectory) -> usize;

    /// Whether the trajectory has anything of this type.
    fn is_loaded(&self, trajectory: &Trajectory) -> bool;

    /// Write this type's records for `ctx.frame` starting at `first_index`.
    /// Records that do not fit are dropped. Returns the number written.
    fn write_objects(
        &self,
        ctx: &WriteContext<'_>,
        first_index: u32,
        selected: Option<u32>,
        objects: &mut [GpuObjectData],
        instances: &mut [GpuInstance],
    ) -> usize;

    /// One-line description of object `index` of this type at `frame`.
    fn object_info(&self, trajectory: &Trajectory, frame: usize, index: usize) -> String;
}

/// Writes `records` at `first_index`, pairing each with its instance.
fn write_records(
    mesh: MeshId,
    first_index: u32,
    records: impl Iterator<Item = GpuObjectData>,
    objects: &mut [GpuObjectData],
    instances: &mut [GpuInstance],
) -> usize {
    let first = first_index as usize;
    let mut written = 0;
    for ((object, instance), record) in objects
        .iter_mut()
        .skip(first)
        .zip(instances.iter_mut().skip(first))
        .zip(records)
    {
        *object = record;
        *instance = GpuInstance {
            object_id: first_index + written as u32,
            batch_id: mesh as u32,
        };
        written += 1;
    }
    written
}

fn selected_or(selected: Option<u32>, index: u32, colors: &ColorOptions, base: [f32; 4]) -> Vec4 {
    if selected == Some(index) {
        Vec4::from_array(colors.selected)
    } else {
        Vec4::from_array(base)
    }
}

fn format_vec(v: Vec3) -> String {
    format!("({:.3}, {:.3}, {:.3})", v.x, v.y, v.z)
}

/// One sphere per atom.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomType;

impl ObjectType for AtomType {
    fn name(&self) -> &'static str {
        "Atoms"
    }

    fn mesh_id(&self) -> MeshId {
        MeshId::Atom
    }

    fn count(&self, trajectory: &Trajectory, _frame: usize) -> usize {
        trajectory.atom_count()
    }

    fn max_count(&self, trajectory: &Trajectory) -> usize {
        trajectory.atom_count()
    }

    fn is_loaded(&self, trajectory: &Trajectory) -> bool {
        trajectory.atom_count() > 0
    }

    fn write_objects(
        &self,
        ctx: &WriteContext<'_>,
        first_index: u32,
        _selected: Option<u32>,
        objects: &mut [GpuObjectData],
        instances: &mut [GpuInstance],
    ) -> usize {
        let mesh_radius = ctx.mesh_radius(MeshId::Atom);
        let records = (0..ctx.trajectory.atom_count()).map(|atom| {
            let element = ctx.trajectory.element(atom);
            let radius = ctx.atom_radius(atom);
            let model = Mat4::from_translation(ctx.position(atom) + ctx.anti_stutter)
                * Mat4::from_scale(Vec3::splat(radius));
            let color = ctx
                .coloring
                .color(ctx.trajectory.tags[atom], element.color, ctx.colors);
            GpuObjectData::new(model, color, mesh_radius * radius, MeshId::Atom as u32)
        });
        write_records(MeshId::Atom, first_index, records, objects, instances)
    }

    fn object_info(&self, trajectory: &Trajectory, frame: usize, index: usize) -> String {
        let element = trajectory.element(index);
        let position = trajectory
            .positions
            .get(frame)
            .and_then(|f| f.get(index))
            .copied()
            .unwrap_or(Vec3::ZERO);
        format!("Atom {index}: {} at {}", element.symbol, format_vec(position))
    }
}

/// The cell frame, one object when the trajectory is periodic.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitCellType;

impl ObjectType for UnitCellType {
    fn name(&self) -> &'static str {
        "Unit Cell"
    }

    fn mesh_id(&self) -> MeshId {
        MeshId::UnitCell
    }

    fn count(&self, trajectory: &Trajectory, _frame: usize) -> usize {
        usize::from(self.is_loaded(trajectory))
    }

    fn max_count(&self, trajectory: &Trajectory) -> usize {
        usize::from(self.is_loaded(trajectory))
    }

    fn is_loaded(&self, trajectory: &Trajectory) -> bool {
        trajectory.cell != Mat3::ZERO
    }

    fn write_objects(
        &self,
        ctx: &WriteContext<'_>,
        first_index: u32,
        selected: Option<u32>,
        objects: &mut [GpuObjectData],
        instances: &mut [GpuInstance],
    ) -> usize {
        if !self.is_loaded(ctx.trajectory) {
            return 0;
        }
        let color = selected_or(selected, first_index, ctx.colors, ctx.colors.unit_cell);
        let record = GpuObjectData::new(
            Mat4::IDENTITY,
            color,
            ctx.mesh_radius(MeshId::UnitCell),
            MeshId::UnitCell as u32,
        );
        write_records(
            MeshId::UnitCell,
            first_index,
            std::iter::once(record),
            objects,
            instances,
        )
    }

    fn object_info(&self, trajectory: &Trajectory, _frame: usize, _index: usize) -> String {
        let c = trajectory.cell;
        format!(
            "Unit cell a={} b={} c={}",
            format_vec(c.x_axis),
            format_vec(c.y_axis),
            format_vec(c.z_axis)
        )
    }
}

/// One arrow per surface vector.
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorType;

impl ObjectType for VectorType {
    fn name(&self) -> &'static str {
        "Vectors"
    }

    fn mesh_id(&self) -> MeshId {
        MeshId::Vector
    }

    fn count(&self, trajectory: &Trajectory, _frame: usize) -> usize {
        trajectory.vectors.len()
    }

    fn max_count(&self, trajectory: &Trajectory) -> usize {
        trajectory.vectors.len()
    }

    fn is_loaded(&self, trajectory: &Trajectory) -> bool {
        !trajectory.vectors.is_empty()
    }

    fn write_objects(
        &self,
        ctx: &WriteContext<'_>,
        first_index: u32,
        selected: Option<u32>,
        objects: &mut [GpuObjectData],
        instances: &mut [GpuInstance],
    ) -> usize {
        let geometry = ctx.geometry;
        let mesh_radius = ctx.mesh_radius(MeshId::Vector);
        let records = ctx.trajectory.vectors.iter().enumerate().map(|(i, v)| {
            let atom = v.atom as usize;
            let base =
                ctx.position(atom) + v.direction * ctx.atom_radius(atom) + ctx.anti_stutter;
            let length = v.magnitude * geometry.vector_length;
            let model = Mat4::from_scale_rotation_translation(
                Vec3::new(geometry.vector_thickness, length, geometry.vector_thickness),
                Quat::from_rotation_arc(Vec3::Y, v.direction),
                base,
            );
            let index = first_index + i as u32;
            let color = selected_or(selected, index, ctx.colors, ctx.colors.vector);
            GpuObjectData::new(model, color, mesh_radius * length, MeshId::Vector as u32)
        });
        write_records(MeshId::Vector, first_index, records, objects, instances)
    }

    fn object_info(&self, trajectory: &Trajectory, _frame: usize, index: usize) -> String {
        trajectory.vectors.get(index).map_or_else(String::new, |v| {
            format!(
                "Vector {index} on atom {}: {} x {:.3}",
                v.atom,
                format_vec(v.direction),
                v.magnitude
            )
        })
    }
}

/// The event cylinder, always one object.
#[derive(Debug, Clone, Copy, Default)]
pub struct CylinderType;

impl ObjectType for CylinderType {
    fn name(&self) -> &'static str {
        "Event Cylinder"
    }

    fn mesh_id(&self) -> MeshId {
        MeshId::Cylinder
    }

    fn count(&self, _trajectory: &Trajectory, _frame: usize) -> usize {
        1
    }

    fn max_count(&self, _trajectory: &Trajectory) -> usize {
        1
    }

    fn is_loaded(&self, _trajectory: &Trajectory) -> bool {
        true
    }

    fn write_objects(
        &self,
        ctx: &WriteContext<'_>,
        first_index: u32,
        _selected: Option<u32>,
        objects: &mut [GpuObjectData],
        instances: &mut [GpuInstance],
    ) -> usize {
        let length = ctx.event.cylinder_length;
        let radius = ctx.event.cylinder_radius;
        let scale = Vec3::new(radius, length, radius);
        let model = match &ctx.trajectory.active_event {
            Some(event) => Mat4::from_scale_rotation_translation(
                scale,
                Quat::from_rotation_arc(Vec3::Y, event.axis(ctx.event.surface_normals)),
                event.center,
            ),
            None => Mat4::from_translation(ctx.anti_stutter) * Mat4::from_scale(scale),
        };
        let record = GpuObjectData::new(
            model,
            Vec4::from_array(ctx.colors.cylinder),
            ctx.mesh_radius(MeshId::Cylinder) * length.max(2.0 * radius),
            MeshId::Cylinder as u32,
        );
        write_records(
            MeshId::Cylinder,
            first_index,
            std::iter::once(record),
            objects,
            instances,
        )
    }

    fn object_info(&self, trajectory: &Trajectory, _frame: usize, _index: usize) -> String {
        match &trajectory.active_event {
            Some(event) => format!(
                "Event at frame {} around {}",
                event.frame,
                format_vec(event.center)
            ),
            None => "Event cylinder (inactive)".to_owned(),
        }
    }
}

/// One two-colored cylinder per bond of the frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct BondType;

impl ObjectType for BondType {
    fn name(&self) -> &'static str {
        "Bonds"
    }

    fn mesh_id(&self) -> MeshId {
        MeshId::Bond
    }

    fn count(&self, trajectory: &Trajectory, frame: usize) -> usize {
        trajectory.bonds.get(frame).map_or(0, Vec::len)
    }

    fn max_count(&self, trajectory: &Trajectory) -> usize {
        trajectory.bonds.iter().map(Vec::len).max().unwrap_or(0)
    }

    fn is_loaded(&self, trajectory: &Trajectory) -> bool {
        trajectory.bonds.iter().any(|b| !b.is_empty())
    }

    fn write_objects(
        &self,
        ctx: &WriteContext<'_>,
        first_index: u32,
        _selected: Option<u32>,
        objects: &mut [GpuObjectData],
        instances: &mut [GpuInstance],
    ) -> usize {
        let Some(bonds) = ctx.trajectory.bonds.get(ctx.frame) else {
            return 0;
        };
        let geometry = ctx.geometry;
        let mesh_radius = ctx.mesh_radius(MeshId::Bond);
        let records = bonds.iter().map(|bond| {
            let pos1 = bond.pos1 + ctx.anti_stutter;
            let end = pos1 + (bond.pos2 - bond.pos1) * geometry.bond_length;
            let length = bond.pos1.distance(bond.pos2) * geometry.bond_length;
            let mut record = GpuObjectData::new(
                segment_transform(end, pos1, geometry.bond_thickness),
                ctx.trajectory.element(bond.atom1 as usize).color.extend(1.0),
                mesh_radius * length * 0.5,
                MeshId::Bond as u32,
            );
            record.color2 = ctx
                .trajectory
                .element(bond.atom2 as usize)
                .color
                .extend(1.0)
                .to_array();
            record.bond_normal = (bond.pos1 - bond.pos2).extend(0.0).to_array();
            record
        });
        write_records(MeshId::Bond, first_index, records, objects, instances)
    }

    fn object_info(&self, trajectory: &Trajectory, frame: usize, index: usize) -> String {
        trajectory
            .bonds
            .get(frame)
            .and_then(|b| b.get(index))
            .map_or_else(String::new, |bond| {
                format!(
                    "Bond {index}: {}{}-{}{} length {:.3}",
                    trajectory.element(bond.atom1 as usize).symbol,
                    bond.atom1,
                    trajectory.element(bond.atom2 as usize).symbol,
                    bond.atom2,
                    bond.pos1.distance(bond.pos2)
                )
            })
    }
}

/// The object types in draw order.
#[must_use]
pub fn default_types() -> Vec<Box<dyn ObjectType>> {
    vec![
        Box::new(AtomType),
        Box::new(UnitCellType),
        Box::new(VectorType),
        Box::new(CylinderType),
        Box::new(BondType),
    ]
}
