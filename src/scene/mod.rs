//! Scene: the loaded trajectory, the object types drawn from it, and the
//! user-facing state around them (visibility, coloring, selections, events).
//!
//! Object types are walked in a fixed order. Each shown and loaded type
//! writes a contiguous range of object records, so an object index maps
//! back to exactly one type.

pub mod objects;
pub mod trajectory;

use std::collections::VecDeque;
use std::fmt;

use glam::Vec3;
pub use objects::{AtomColoring, ObjectType, WriteContext};
pub use trajectory::{Bond, Event, SurfaceVector, Trajectory};
use trajectory::tags;

use crate::gpu::types::{GpuInstance, GpuObjectData, MESH_COUNT};
use crate::mesh::{MeshId, MeshInfo};
use crate::options::RenderOptions;
use crate::renderer::cull::{select_atoms_in_volume, CullCylinder, CullVolume};

/// Most atoms a measurement holds at once.
pub const MAX_MEASURED_ATOMS: usize = 3;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while building or editing a scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// The trajectory has no frames.
    NoFrames,
    /// A frame's atom count differs from the first frame's.
    FrameSizeMismatch {
        /// Offending frame.
        frame: usize,
        /// Atom count of the trajectory.
        expected: usize,
        /// Atom count of the frame.
        found: usize,
    },
    /// A frame index past the end.
    FrameOutOfRange {
        /// Requested frame.
        frame: usize,
        /// Frames available.
        count: usize,
    },
    /// An atom index past the end.
    UnknownAtom(u32),
    /// An event needs at least one catalyst atom.
    NoCatalyst,
    /// The scene needs more object slots than the frame buffers hold.
    TooManyObjects {
        /// Summed maximum object counts.
        required: usize,
        /// Configured object capacity.
        capacity: usize,
    },
}

impl fmt::Display for SceneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFrames => write!(f, "trajectory has no frames"),
            Self::FrameSizeMismatch {
                frame,
                expected,
                found,
            } => write!(f, "frame {frame} has {found} atoms, expected {expected}"),
            Self::FrameOutOfRange { frame, count } => {
                write!(f, "frame {frame} out of range ({count} frames)")
            }
            Self::UnknownAtom(atom) => write!(f, "no atom {atom}"),
            Self::NoCatalyst => write!(f, "event has no catalyst atoms"),
            Self::TooManyObjects { required, capacity } => write!(
                f,
                "scene needs {required} objects but frames hold {capacity}"
            ),
        }
    }
}

impl std::error::Error for SceneError {}

// ---------------------------------------------------------------------------
// Picking mode
// ---------------------------------------------------------------------------

/// What a pick does to the picked atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PickMode {
    /// Report only.
    #[default]
    Inspect,
    /// Toggle the tagging selection.
    Tag,
    /// Add to the measurement.
    Measure,
}

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

/// A trajectory plus the object types drawing it.
pub struct Scene {
    trajectory: Trajectory,
    types: Vec<Box<dyn ObjectType>>,
    shown: [bool; MESH_COUNT],
    coloring: AtomColoring,
    mode: PickMode,
    measurement: VecDeque<u32>,
    frame: usize,
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("atoms", &self.trajectory.atom_count())
            .field("frames", &self.trajectory.frame_count())
            .field("shown", &self.shown)
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

impl Scene {
    /// Scene over `trajectory` with the default object types. Vectors and
    /// the event cylinder start hidden.
    #[must_use]
    pub fn new(trajectory: Trajectory) -> Self {
        let mut shown = [true; MESH_COUNT];
        shown[MeshId::Vector.index()] = false;
        shown[MeshId::Cylinder.index()] = false;
        Self {
            trajectory,
            types: objects::default_types(),
            shown,
            coloring: AtomColoring::default(),
            mode: PickMode::default(),
            measurement: VecDeque::new(),
            frame: 0,
        }
    }

    /// The trajectory.
    #[must_use]
    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// Mutable trajectory.
    pub fn trajectory_mut(&mut self) -> &mut Trajectory {
        &mut self.trajectory
    }

    /// Current frame.
    #[must_use]
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Jump to `frame`, clamped to the last frame.
    pub fn set_frame(&mut self, frame: usize) {
        self.frame = frame.min(self.trajectory.frame_count().saturating_sub(1));
    }

    /// Show or hide a mesh type.
    pub fn set_shown(&mut self, mesh: MeshId, shown: bool) {
        self.shown[mesh.index()] = shown;
    }

    /// Whether a mesh type is shown.
    #[must_use]
    pub fn is_shown(&self, mesh: MeshId) -> bool {
        self.shown[mesh.index()]
    }

    /// Atom coloring strategy.
    #[must_use]
    pub fn coloring(&self) -> AtomColoring {
        self.coloring
    }

    /// Switch the atom coloring strategy.
    pub fn set_coloring(&mut self, coloring: AtomColoring) {
        self.coloring = coloring;
    }

    /// Current pick mode.
    #[must_use]
    pub fn pick_mode(&self) -> PickMode {
        self.mode
    }

    /// Switch pick mode.
    pub fn set_pick_mode(&mut self, mode: PickMode) {
        self.mode = mode;
    }

    /// Atoms of the current measurement, oldest first.
    #[must_use]
    pub fn measurement(&self) -> &VecDeque<u32> {
        &self.measurement
    }

    fn drawn_types(&self) -> impl Iterator<Item = &dyn ObjectType> + '_ {
        self.types
            .iter()
            .map(AsRef::as_ref)
            .filter(|ty| self.shown[ty.mesh_id().index()] && ty.is_loaded(&self.trajectory))
    }

    /// Objects written for `frame` across shown, loaded types.
    #[must_use]
    pub fn unique_shown_object_count(&self, frame: usize) -> usize {
        self.drawn_types()
            .map(|ty| ty.count(&self.trajectory, frame))
            .sum()
    }

    /// Largest object count any frame can need, whatever is shown.
    #[must_use]
    pub fn max_object_count(&self) -> usize {
        self.max_counts().iter().map(|&n| n as usize).sum()
    }

    /// Per-mesh maximum counts, zero for types with nothing loaded.
    #[must_use]
    pub fn max_counts(&self) -> [u32; MESH_COUNT] {
        let mut counts = [0; MESH_COUNT];
        for ty in &self.types {
            if ty.is_loaded(&self.trajectory) {
                counts[ty.mesh_id().index()] = ty.max_count(&self.trajectory) as u32;
            }
        }
        counts
    }

    /// Type and type-local index of `object_index` at `frame`.
    #[must_use]
    pub fn locate(&self, frame: usize, object_index: u32) -> Option<(MeshId, usize)> {
        let mut remaining = object_index as usize;
        for ty in self.drawn_types() {
            let count = ty.count(&self.trajectory, frame);
            if remaining < count {
                return Some((ty.mesh_id(), remaining));
            }
            remaining -= count;
        }
        None
    }

    /// Description of `object_index` at `frame`.
    #[must_use]
    pub fn object_info(&self, frame: usize, object_index: u32) -> Option<String> {
        let (mesh, local) = self.locate(frame, object_index)?;
        let ty = self.types.iter().find(|ty| ty.mesh_id() == mesh)?;
        Some(format!(
            "{}: {}",
            ty.name(),
            ty.object_info(&self.trajectory, frame, local)
        ))
    }

    /// Write every shown type's records for the current frame. Returns the
    /// number of objects written.
    pub fn write_objects(
        &self,
        options: &RenderOptions,
        meshes: &[MeshInfo; MESH_COUNT],
        selected: Option<u32>,
        objects: &mut [GpuObjectData],
        instances: &mut [GpuInstance],
    ) -> u32 {
        let ctx = WriteContext {
            trajectory: &self.trajectory,
            frame: self.frame,
            geometry: &options.geometry,
            colors: &options.colors,
            event: &options.event,
            meshes,
            coloring: self.coloring,
            anti_stutter: self.trajectory.anti_stutter_offset(self.frame),
        };
        let mut first = 0u32;
        for ty in self.drawn_types() {
            first += ty.write_objects(&ctx, first, selected, objects, instances) as u32;
        }
        first
    }

    /// Cylinder restricting visibility while an event is active.
    #[must_use]
    pub fn cull_cylinder(&self, options: &RenderOptions) -> Option<CullCylinder> {
        let event = self.trajectory.active_event.as_ref()?;
        options.event.cylinder_culling.then(|| {
            CullCylinder::new(
                event.center,
                event.axis(options.event.surface_normals),
                options.event.cylinder_length,
                options.event.cylinder_radius,
            )
        })
    }

    /// Focus on an event: highlight its atoms, swap the unit cell for the
    /// event cylinder and jump to its frame.
    ///
    /// # Errors
    ///
    /// Returns the [`Event::new`] errors.
    pub fn enter_event(
        &mut self,
        frame: usize,
        catalyst: Vec<u32>,
        chemical: Vec<u32>,
    ) -> Result<(), SceneError> {
        self.leave_event();
        let event = Event::new(&self.trajectory, frame, catalyst, chemical)?;
        for atom in event.atoms() {
            self.trajectory.set_tag(atom as usize, tags::HIGHLIGHTED);
        }
        log::info!(
            "entering event at frame {frame} around {:?}",
            event.center
        );
        self.trajectory.active_event = Some(event);
        self.set_shown(MeshId::UnitCell, false);
        self.set_shown(MeshId::Cylinder, true);
        self.set_frame(frame);
        Ok(())
    }

    /// Leave the active event, if any, restoring the default view.
    pub fn leave_event(&mut self) {
        let Some(event) = self.trajectory.active_event.take() else {
            return;
        };
        for atom in event.atoms() {
            self.trajectory.clear_tag(atom as usize, tags::HIGHLIGHTED);
        }
        self.set_shown(MeshId::UnitCell, true);
        self.set_shown(MeshId::Cylinder, false);
    }

    /// Apply a pick result at the current frame. Only atoms react; picking
    /// nothing clears the measurement. Returns the picked atom.
    pub fn handle_pick(&mut self, object_index: Option<u32>) -> Option<u32> {
        let Some(index) = object_index else {
            self.clear_measurement();
            return None;
        };
        let (MeshId::Atom, atom) = self.locate(self.frame, index)? else {
            return None;
        };
        match self.mode {
            PickMode::Inspect => {}
            PickMode::Tag => {
                if let Some(tag) = self.trajectory.tags.get_mut(atom) {
                    *tag ^= tags::SELECTED_FOR_TAGGING;
                }
            }
            PickMode::Measure => {
                if !self
                    .trajectory
                    .has_tag(atom, tags::SELECTED_FOR_MEASUREMENT)
                {
                    self.trajectory
                        .set_tag(atom, tags::SELECTED_FOR_MEASUREMENT);
                    self.measurement.push_back(atom as u32);
                    if self.measurement.len() > MAX_MEASURED_ATOMS {
                        if let Some(oldest) = self.measurement.pop_front() {
                            self.trajectory
                                .clear_tag(oldest as usize, tags::SELECTED_FOR_MEASUREMENT);
                        }
                    }
                }
            }
        }
        Some(atom as u32)
    }

    /// Drop every measured atom.
    pub fn clear_measurement(&mut self) {
        for atom in self.measurement.drain(..) {
            self.trajectory
                .clear_tag(atom as usize, tags::SELECTED_FOR_MEASUREMENT);
        }
    }

    /// Distance, angle or dihedral of the measured atoms at the current
    /// frame, in Å or degrees.
    #[must_use]
    pub fn measurement_value(&self) -> Option<f32> {
        let positions = self.trajectory.positions.get(self.frame)?;
        let p: Vec<Vec3> = self
            .measurement
            .iter()
            .map(|&a| positions.get(a as usize).copied())
            .collect::<Option<_>>()?;
        match p.as_slice() {
            [a, b] => Some(self.trajectory.minimum_image(*b - *a).length()),
            [a, b, c] => {
                let ba = self.trajectory.minimum_image(*a - *b);
                let bc = self.trajectory.minimum_image(*c - *b);
                Some(ba.angle_between(bc).to_degrees())
            }
            _ => None,
        }
    }

    /// Tag every atom visible in at least one replica of `volume` at the
    /// current frame. Returns how many atoms matched.
    pub fn select_in_volume(
        &mut self,
        volume: &CullVolume,
        offsets: &[Vec3],
        options: &RenderOptions,
    ) -> usize {
        let anti_stutter = self.trajectory.anti_stutter_offset(self.frame);
        let Some(frame) = self.trajectory.positions.get(self.frame) else {
            return 0;
        };
        let positions: Vec<Vec3> = frame.iter().map(|&p| p + anti_stutter).collect();
        let radii: Vec<f32> = (0..positions.len())
            .map(|i| self.trajectory.element(i).covalent_radius * options.geometry.atom_size)
            .collect();
        let selected = select_atoms_in_volume(&positions, &radii, volume, offsets);
        for &atom in &selected {
            self.trajectory.set_tag(atom, tags::SELECTED_FOR_TAGGING);
        }
        selected.len()
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat3, Mat4};

    use super::*;

    fn chain(atoms: usize) -> Trajectory {
        let frame = (0..atoms).map(|i| Vec3::X * i as f32 * 3.0).collect();
        let cell = Mat3::from_diagonal(Vec3::splat(30.0));
        let mut t = Trajectory::new(&vec![6; atoms], vec![frame], cell).unwrap();
        t.create_bonds(1.15);
        t
    }

    #[test]
    fn vectors_and_cylinder_start_hidden() {
        let scene = Scene::new(chain(2));
        assert!(scene.is_shown(MeshId::Atom));
        assert!(!scene.is_shown(MeshId::Vector));
        assert!(!scene.is_shown(MeshId::Cylinder));
        // Two atoms plus the unit cell; no bonds at 3 Å.
        assert_eq!(scene.unique_shown_object_count(0), 3);
        assert_eq!(scene.max_counts(), [2, 1, 0, 1, 0]);
        assert_eq!(scene.max_object_count(), 4);
    }

    #[test]
    fn object_info_walks_types_in_order() {
        let scene = Scene::new(chain(2));
        assert_eq!(scene.locate(0, 1), Some((MeshId::Atom, 1)));
        assert_eq!(scene.locate(0, 2), Some((MeshId::UnitCell, 0)));
        assert_eq!(scene.locate(0, 3), None);
        assert!(scene.object_info(0, 0).unwrap().starts_with("Atoms: Atom 0: C"));
    }

    #[test]
    fn write_objects_fills_contiguous_ranges() {
        let scene = Scene::new(chain(3));
        let options = RenderOptions::default();
        let meshes = [MeshInfo::default(); MESH_COUNT];
        let mut objects = vec![GpuObjectData::new(Mat4::IDENTITY, glam::Vec4::ONE, 0.0, 0); 8];
        let mut instances = vec![GpuInstance::default(); 8];
        let n = scene.write_objects(&options, &meshes, None, &mut objects, &mut instances);
        assert_eq!(n, 4);
        let batches: Vec<u32> = instances[..4].iter().map(|i| i.batch_id).collect();
        assert_eq!(batches, vec![0, 0, 0, 1]);
    }

    #[test]
    fn tag_mode_toggles() {
        let mut scene = Scene::new(chain(2));
        scene.set_pick_mode(PickMode::Tag);
        assert_eq!(scene.handle_pick(Some(1)), Some(1));
        assert!(scene.trajectory().has_tag(1, tags::SELECTED_FOR_TAGGING));
        let _ = scene.handle_pick(Some(1));
        assert!(!scene.trajectory().has_tag(1, tags::SELECTED_FOR_TAGGING));
        // The unit cell is not an atom.
        assert_eq!(scene.handle_pick(Some(2)), None);
    }

    #[test]
    fn measurement_keeps_the_three_newest_atoms() {
        let mut scene = Scene::new(chain(5));
        scene.set_pick_mode(PickMode::Measure);
        for atom in [0, 1, 1, 2] {
            let _ = scene.handle_pick(Some(atom));
        }
        assert_eq!(scene.measurement(), &[0, 1, 2]);
        assert!((scene.measurement_value().unwrap() - 180.0).abs() < 1e-3);

        let _ = scene.handle_pick(Some(3));
        assert_eq!(scene.measurement(), &[1, 2, 3]);
        assert!(!scene.trajectory().has_tag(0, tags::SELECTED_FOR_MEASUREMENT));

        let _ = scene.handle_pick(None);
        assert!(scene.measurement().is_empty());
        assert!(!scene.trajectory().has_tag(3, tags::SELECTED_FOR_MEASUREMENT));
    }

    #[test]
    fn events_swap_cell_for_cylinder_and_back() {
        let mut scene = Scene::new(chain(3));
        scene.enter_event(0, vec![0], vec![1]).unwrap();
        assert!(!scene.is_shown(MeshId::UnitCell));
        assert!(scene.is_shown(MeshId::Cylinder));
        assert!(scene.trajectory().has_tag(1, tags::HIGHLIGHTED));
        let options = RenderOptions::default();
        assert!(scene.cull_cylinder(&options).is_some());

        scene.leave_event();
        assert!(scene.is_shown(MeshId::UnitCell));
        assert!(!scene.is_shown(MeshId::Cylinder));
        assert!(!scene.trajectory().has_tag(1, tags::HIGHLIGHTED));
        assert!(scene.cull_cylinder(&options).is_none());
    }

    #[test]
    fn volume_selection_tags_visible_atoms() {
        let mut scene = Scene::new(chain(3));
        let proj = Mat4::perspective_rh(0.2, 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let volume = CullVolume::new(view, proj);
        let options = RenderOptions::default();
        assert_eq!(scene.select_in_volume(&volume, &[Vec3::ZERO], &options), 1);
        assert!(scene.trajectory().has_tag(0, tags::SELECTED_FOR_TAGGING));
        assert!(!scene.trajectory().has_tag(2, tags::SELECTED_FOR_TAGGING));
    }
}
