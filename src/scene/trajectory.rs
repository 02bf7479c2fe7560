//! In-memory trajectory: per-frame positions, per-atom tags and elements,
//! bonds, the periodic cell and surface vectors.

use glam::{Mat3, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

use super::SceneError;
use crate::util::elements::{self, ElementData, UNKNOWN_ELEMENT};
use crate::util::xyz::{BaseType, XyzTrajectory};

/// Per-atom tag bits. The low byte holds the atomic number.
pub mod tags {
    /// Atom belongs to the catalyst.
    pub const CATALYST: u32 = 1 << 30;
    /// Atom belongs to the reacting chemical.
    pub const CHEMICAL: u32 = 1 << 29;
    /// Atom takes part in the active event.
    pub const HIGHLIGHTED: u32 = 1 << 27;
    /// Atom is part of the current measurement.
    pub const SELECTED_FOR_MEASUREMENT: u32 = 1 << 26;
    /// Atom was tagged by the user.
    pub const SELECTED_FOR_TAGGING: u32 = 1 << 8;
    /// Atomic number bits.
    pub const ELEMENT_MASK: u32 = 0xFF;

    /// Atomic number stored in `tag`.
    #[must_use]
    pub fn element(tag: u32) -> u8 {
        (tag & ELEMENT_MASK) as u8
    }
}

/// Arrow anchored at an atom, e.g. a surface normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceVector {
    /// Atom the arrow starts from.
    pub atom: u32,
    /// Unit direction.
    pub direction: Vec3,
    /// Length before scaling by the vector length option.
    pub magnitude: f32,
}

/// Bond between two atoms in one frame.
///
/// `pos2` is the minimum image of `atom2` seen from `pos1`, so bonds across
/// the cell boundary stay short.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bond {
    /// First atom.
    pub atom1: u32,
    /// Second atom.
    pub atom2: u32,
    /// Position of the first atom.
    pub pos1: Vec3,
    /// Position of the second atom's nearest image.
    pub pos2: Vec3,
}

/// Focused view of a catalyst/chemical interaction at one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Frame the event was defined at.
    pub frame: usize,
    /// Catalyst atoms.
    pub catalyst: Vec<u32>,
    /// Chemical atoms.
    pub chemical: Vec<u32>,
    /// Mean catalyst position at `frame`.
    pub center: Vec3,
    /// Surface vector of the first catalyst atom that has one.
    pub surface_normal: Option<Vec3>,
    /// Direction from the first chemical atom to the first catalyst atom.
    pub connection_normal: Vec3,
}

impl Event {
    /// Event over `catalyst` and `chemical` atoms at `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::NoCatalyst`] when `catalyst` is empty,
    /// [`SceneError::FrameOutOfRange`] for a bad frame and
    /// [`SceneError::UnknownAtom`] for an atom outside the trajectory.
    pub fn new(
        trajectory: &Trajectory,
        frame: usize,
        catalyst: Vec<u32>,
        chemical: Vec<u32>,
    ) -> Result<Self, SceneError> {
        let positions = trajectory.frame_positions(frame)?;
        let position = |atom: u32| {
            positions
                .get(atom as usize)
                .copied()
                .ok_or(SceneError::UnknownAtom(atom))
        };
        let Some(&first) = catalyst.first() else {
            return Err(SceneError::NoCatalyst);
        };
        let mut center = Vec3::ZERO;
        for &atom in &catalyst {
            center += position(atom)?;
        }
        center /= catalyst.len() as f32;
        for &atom in &chemical {
            let _ = position(atom)?;
        }

        let surface_normal = catalyst.iter().find_map(|&atom| {
            trajectory
                .vectors
                .iter()
                .find(|v| v.atom == atom)
                .map(|v| v.direction)
        });
        let connection_normal = match chemical.first() {
            Some(&chem) => (position(first)? - position(chem)?).normalize_or(Vec3::Y),
            None => Vec3::Y,
        };
        Ok(Self {
            frame,
            catalyst,
            chemical,
            center,
            surface_normal,
            connection_normal,
        })
    }

    /// Axis of the event cylinder.
    #[must_use]
    pub fn axis(&self, use_surface_normal: bool) -> Vec3 {
        match self.surface_normal {
            Some(normal) if use_surface_normal => normal,
            _ => self.connection_normal,
        }
    }

    /// Every atom of the event.
    pub fn atoms(&self) -> impl Iterator<Item = u32> + '_ {
        self.catalyst.iter().chain(&self.chemical).copied()
    }
}

/// Positions over time plus everything needed to draw them.
#[derive(Debug, Clone)]
pub struct Trajectory {
    /// Positions per frame; every frame has one entry per atom.
    pub positions: Vec<Vec<Vec3>>,
    /// Tag bits per atom, see [`tags`].
    pub tags: Vec<u32>,
    /// Element data by atomic number, for the elements present.
    pub elements: FxHashMap<u8, ElementData>,
    /// Cell vectors as columns; zero when the system is not periodic.
    pub cell: Mat3,
    /// Arrows anchored at atoms.
    pub vectors: Vec<SurfaceVector>,
    /// Bonds per frame, empty until [`Trajectory::create_bonds`].
    pub bonds: Vec<Vec<Bond>>,
    /// Event currently in focus.
    pub active_event: Option<Event>,
    /// Atom kept still across frames.
    pub freeze_atom: Option<usize>,
}

impl Trajectory {
    /// Trajectory of atoms with atomic numbers `numbers` over `frames`.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::NoFrames`] for an empty frame list and
    /// [`SceneError::FrameSizeMismatch`] when a frame has the wrong atom
    /// count.
    pub fn new(numbers: &[u8], frames: Vec<Vec<Vec3>>, cell: Mat3) -> Result<Self, SceneError> {
        if frames.is_empty() {
            return Err(SceneError::NoFrames);
        }
        if let Some((frame, found)) = frames
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|&(_, len)| len != numbers.len())
        {
            return Err(SceneError::FrameSizeMismatch {
                frame,
                expected: numbers.len(),
                found,
            });
        }
        let elements = numbers
            .iter()
            .filter_map(|&n| elements::by_number(n).map(|e| (n, e)))
            .collect();
        Ok(Self {
            positions: frames,
            tags: numbers.iter().map(|&n| u32::from(n)).collect(),
            elements,
            cell,
            vectors: Vec::new(),
            bonds: Vec::new(),
            active_event: None,
            freeze_atom: None,
        })
    }

    /// Trajectory from a parsed extended-XYZ file. Unknown species get the
    /// fallback element.
    ///
    /// # Errors
    ///
    /// Same as [`Trajectory::new`].
    pub fn from_xyz(xyz: XyzTrajectory) -> Result<Self, SceneError> {
        let numbers: Vec<u8> = xyz
            .species
            .iter()
            .map(|s| elements::by_symbol(s).map_or(0, |e| e.number))
            .collect();
        let mut trajectory = Self::new(&numbers, xyz.frames, xyz.lattice.unwrap_or(Mat3::ZERO))?;
        for (tag, base) in trajectory.tags.iter_mut().zip(&xyz.base_types) {
            match base {
                BaseType::Catalyst => *tag |= tags::CATALYST,
                BaseType::Chemical => *tag |= tags::CHEMICAL,
                BaseType::Other => {}
            }
        }
        trajectory.vectors = xyz
            .surface_vectors
            .iter()
            .filter(|(atom, _)| (*atom as usize) < numbers.len())
            .map(|&(atom, v)| SurfaceVector {
                atom,
                direction: v.normalize(),
                magnitude: v.length(),
            })
            .collect();
        Ok(trajectory)
    }

    /// Simple cubic lattice of `element` atoms, `counts` per axis, with
    /// seeded thermal jitter over `frames` frames. The cell wraps the
    /// lattice exactly.
    #[must_use]
    pub fn synthetic_lattice(
        element: u8,
        counts: [u32; 3],
        spacing: f32,
        frames: usize,
        jitter: f32,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let [nx, ny, nz] = counts.map(|n| n.max(1));
        let mut base = Vec::with_capacity((nx * ny * nz) as usize);
        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    base.push(Vec3::new(i as f32, j as f32, k as f32) * spacing);
                }
            }
        }
        let frames = (0..frames.max(1))
            .map(|_| {
                base.iter()
                    .map(|&p| {
                        if jitter > 0.0 {
                            p + Vec3::new(
                                rng.random_range(-jitter..jitter),
                                rng.random_range(-jitter..jitter),
                                rng.random_range(-jitter..jitter),
                            )
                        } else {
                            p
                        }
                    })
                    .collect()
            })
            .collect();
        let cell = Mat3::from_diagonal(Vec3::new(nx as f32, ny as f32, nz as f32) * spacing);
        let numbers = vec![element; base.len()];
        Self {
            positions: frames,
            tags: numbers.iter().map(|&n| u32::from(n)).collect(),
            elements: elements::by_number(element)
                .map(|e| (element, e))
                .into_iter()
                .collect(),
            cell,
            vectors: Vec::new(),
            bonds: Vec::new(),
            active_event: None,
            freeze_atom: None,
        }
    }

    /// Number of frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of atoms.
    #[must_use]
    pub fn atom_count(&self) -> usize {
        self.tags.len()
    }

    /// Positions at `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::FrameOutOfRange`] past the last frame.
    pub fn frame_positions(&self, frame: usize) -> Result<&[Vec3], SceneError> {
        self.positions
            .get(frame)
            .map(Vec::as_slice)
            .ok_or(SceneError::FrameOutOfRange {
                frame,
                count: self.positions.len(),
            })
    }

    /// Element of `atom`, or the fallback element.
    #[must_use]
    pub fn element(&self, atom: usize) -> ElementData {
        self.tags
            .get(atom)
            .and_then(|&tag| self.elements.get(&tags::element(tag)))
            .copied()
            .unwrap_or(UNKNOWN_ELEMENT)
    }

    /// Whether the cell spans a volume.
    #[must_use]
    pub fn is_periodic(&self) -> bool {
        self.cell.determinant().abs() > f32::EPSILON
    }

    /// `delta` wrapped to its nearest periodic image.
    #[must_use]
    pub fn minimum_image(&self, delta: Vec3) -> Vec3 {
        if !self.is_periodic() {
            return delta;
        }
        let fractional = self.cell.inverse() * delta;
        self.cell * (fractional - fractional.round())
    }

    /// Compute bonds for every frame: atoms bond when their minimum-image
    /// distance is below `tolerance` times the sum of their covalent radii.
    ///
    /// Quadratic in the atom count per frame.
    pub fn create_bonds(&mut self, tolerance: f32) {
        let radii: Vec<f32> = (0..self.atom_count())
            .map(|i| self.element(i).covalent_radius)
            .collect();
        let bonds: Vec<Vec<Bond>> = self
            .positions
            .iter()
            .map(|frame| {
                let mut bonds = Vec::new();
                for (j, &pj) in frame.iter().enumerate() {
                    for (k, &pk) in frame.iter().enumerate().skip(j + 1) {
                        let r = self.minimum_image(pj - pk);
                        if r.length() < tolerance * (radii[j] + radii[k]) {
                            bonds.push(Bond {
                                atom1: j as u32,
                                atom2: k as u32,
                                pos1: pj,
                                pos2: pj - r,
                            });
                        }
                    }
                }
                bonds
            })
            .collect();
        log::debug!(
            "created {} bonds over {} frames",
            bonds.iter().map(Vec::len).sum::<usize>(),
            bonds.len()
        );
        self.bonds = bonds;
    }

    /// Choose the atom to hold still: the first whose displacement to the
    /// next atom matches between the first and middle frames, or between
    /// the middle and last frames.
    ///
    /// Needs at least three frames and two atoms.
    pub fn pick_freeze_atom(&mut self) -> Option<usize> {
        let frames = self.frame_count();
        let atoms = self.atom_count();
        self.freeze_atom = None;
        if frames < 3 || atoms < 2 {
            return None;
        }
        let (first, mid, last) = (0, (frames - 1) / 2, frames - 1);
        let step = |frame: usize, i: usize| self.positions[frame][i + 1] - self.positions[frame][i];
        self.freeze_atom = (0..atoms - 1).find(|&i| {
            step(first, i).abs_diff_eq(step(mid, i), 1e-5)
                || step(mid, i).abs_diff_eq(step(last, i), 1e-5)
        });
        self.freeze_atom
    }

    /// Shift applied to every object of `frame` so the freeze atom keeps its
    /// first-frame position.
    #[must_use]
    pub fn anti_stutter_offset(&self, frame: usize) -> Vec3 {
        let Some(atom) = self.freeze_atom else {
            return Vec3::ZERO;
        };
        match (self.positions.first(), self.positions.get(frame)) {
            (Some(first), Some(current)) => first[atom] - current[atom],
            _ => Vec3::ZERO,
        }
    }

    /// Axis-aligned bounds over every frame, or `None` without atoms.
    #[must_use]
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        self.positions.iter().flatten().fold(None, |acc, &p| match acc {
            None => Some((p, p)),
            Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
        })
    }

    /// Set `bits` on `atom`.
    pub fn set_tag(&mut self, atom: usize, bits: u32) {
        if let Some(tag) = self.tags.get_mut(atom) {
            *tag |= bits;
        }
    }

    /// Clear `bits` on `atom`.
    pub fn clear_tag(&mut self, atom: usize, bits: u32) {
        if let Some(tag) = self.tags.get_mut(atom) {
            *tag &= !bits;
        }
    }

    /// Whether `atom` carries every bit of `bits`.
    #[must_use]
    pub fn has_tag(&self, atom: usize, bits: u32) -> bool {
        self.tags.get(atom).is_some_and(|t| t & bits == bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_hydrogens(distance: f32, cell: Mat3) -> Trajectory {
        Trajectory::new(
            &[1, 1],
            vec![vec![Vec3::ZERO, Vec3::new(distance, 0.0, 0.0)]],
            cell,
        )
        .unwrap()
    }

    #[test]
    fn frames_must_match_the_atom_count() {
        let err = Trajectory::new(&[1, 1], vec![vec![Vec3::ZERO]], Mat3::ZERO).unwrap_err();
        assert_eq!(
            err,
            SceneError::FrameSizeMismatch {
                frame: 0,
                expected: 2,
                found: 1
            }
        );
        assert_eq!(
            Trajectory::new(&[1], Vec::new(), Mat3::ZERO).unwrap_err(),
            SceneError::NoFrames
        );
    }

    #[test]
    fn bonds_use_the_covalent_radius_sum() {
        // H-H radius sum 0.64, tolerance 1.15 gives a cutoff of 0.736.
        let mut near = two_hydrogens(0.7, Mat3::ZERO);
        near.create_bonds(1.15);
        assert_eq!(near.bonds[0].len(), 1);

        let mut far = two_hydrogens(0.8, Mat3::ZERO);
        far.create_bonds(1.15);
        assert!(far.bonds[0].is_empty());
    }

    #[test]
    fn bonds_wrap_across_the_cell() {
        let cell = Mat3::from_diagonal(Vec3::splat(10.0));
        let mut t = two_hydrogens(9.5, cell);
        t.create_bonds(1.15);
        let bond = t.bonds[0][0];
        assert_eq!(bond.pos1, Vec3::ZERO);
        assert!(bond.pos2.distance(Vec3::new(-0.5, 0.0, 0.0)) < 1e-5);
    }

    #[test]
    fn freeze_atom_holds_a_rigid_pair_still() {
        let frames = (0..5)
            .map(|f| {
                let shift = Vec3::new(f as f32, 0.0, 0.0);
                vec![
                    Vec3::new(0.0, 0.0, f as f32 * 0.3),
                    shift,
                    shift + Vec3::Y,
                ]
            })
            .collect();
        let mut t = Trajectory::new(&[6, 6, 6], frames, Mat3::ZERO).unwrap();
        assert_eq!(t.pick_freeze_atom(), Some(1));
        assert_eq!(t.anti_stutter_offset(3), Vec3::new(-3.0, 0.0, 0.0));
    }

    #[test]
    fn freeze_atom_needs_three_frames() {
        let mut t = two_hydrogens(1.0, Mat3::ZERO);
        assert_eq!(t.pick_freeze_atom(), None);
        assert_eq!(t.anti_stutter_offset(0), Vec3::ZERO);
    }

    #[test]
    fn event_prefers_the_surface_vector() {
        let mut t = Trajectory::new(
            &[78, 78, 8],
            vec![vec![Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 2.0)]],
            Mat3::ZERO,
        )
        .unwrap();
        let event = Event::new(&t, 0, vec![0, 1], vec![2]).unwrap();
        assert_eq!(event.center, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(event.connection_normal, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(event.axis(true), event.connection_normal);

        t.vectors.push(SurfaceVector {
            atom: 1,
            direction: Vec3::X,
            magnitude: 1.0,
        });
        let event = Event::new(&t, 0, vec![0, 1], vec![2]).unwrap();
        assert_eq!(event.axis(true), Vec3::X);
        assert_eq!(event.axis(false), event.connection_normal);
        assert_eq!(
            Event::new(&t, 0, Vec::new(), vec![2]).unwrap_err(),
            SceneError::NoCatalyst
        );
    }

    #[test]
    fn synthetic_lattice_is_reproducible() {
        let a = Trajectory::synthetic_lattice(78, [2, 2, 2], 2.8, 3, 0.05, 7);
        let b = Trajectory::synthetic_lattice(78, [2, 2, 2], 2.8, 3, 0.05, 7);
        assert_eq!(a.positions, b.positions);
        assert_eq!(a.atom_count(), 8);
        assert_eq!(a.frame_count(), 3);
        assert_eq!(a.cell.x_axis.x, 5.6);
        assert_eq!(a.element(0).symbol, "Pt");
    }

    #[test]
    fn tags_keep_the_element_number() {
        let mut t = two_hydrogens(1.0, Mat3::ZERO);
        t.set_tag(0, tags::SELECTED_FOR_TAGGING);
        assert!(t.has_tag(0, tags::SELECTED_FOR_TAGGING));
        assert_eq!(tags::element(t.tags[0]), 1);
        t.clear_tag(0, tags::SELECTED_FOR_TAGGING);
        assert_eq!(t.tags[0], 1);
    }
}
