//! Visibility volume, periodic replicas and the CPU cull kernel.
//!
//! The frustum lives in view space: planes are extracted from the projection
//! matrix alone and instances are moved into view space before testing, the
//! same way the compute shader does it. [`run_cull`] is the host rendition of
//! `cull.wgsl` and drives the software device and host-side selection.

use glam::{Mat3, Mat4, Vec3, Vec4};

use crate::gpu::types::{
    DrawIndexedIndirectCommand, GpuCullData, GpuFinalInstance, GpuInstance,
    GpuObjectData, GpuOffsets, MAX_CELLS_PER_AXIS, REPLICA_COUNT,
};

/// A plane `n · p + d = 0` with unit normal pointing inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal pointing into the positive half-space.
    pub normal: Vec3,
    /// Signed distance from the origin.
    pub distance: f32,
}

impl Plane {
    /// Normalized plane from raw coefficients. Degenerate input yields the
    /// zero plane.
    #[must_use]
    pub fn from_coefficients(v: Vec4) -> Self {
        let len = v.truncate().length();
        if len > 0.0 {
            Self {
                normal: v.truncate() / len,
                distance: v.w / len,
            }
        } else {
            Self {
                normal: Vec3::ZERO,
                distance: 0.0,
            }
        }
    }

    /// Signed distance from `point` to the plane.
    #[inline]
    #[must_use]
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// Shader representation `(normal, distance)`.
    #[must_use]
    pub fn to_array(self) -> [f32; 4] {
        self.normal.extend(self.distance).to_array()
    }
}

/// Six inward-facing planes: left, right, bottom, top, near, far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    /// Clipping planes.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract planes from `m` (Gribb/Hartmann, `[0,1]` depth).
    ///
    /// With a projection matrix the planes are in view space; with a
    /// view-projection matrix they are in world space.
    #[must_use]
    pub fn from_matrix(m: Mat4) -> Self {
        let row0 = m.row(0);
        let row1 = m.row(1);
        let row2 = m.row(2);
        let row3 = m.row(3);

        Self {
            planes: [
                Plane::from_coefficients(row3 + row0),
                Plane::from_coefficients(row3 - row0),
                Plane::from_coefficients(row3 + row1),
                Plane::from_coefficients(row3 - row1),
                Plane::from_coefficients(row2),
                Plane::from_coefficients(row3 - row2),
            ],
        }
    }

    /// Whether a sphere at `center` reaches inside every plane.
    #[inline]
    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(center) > -radius)
    }

    /// Planes in shader layout.
    #[must_use]
    pub fn to_gpu(&self) -> [[f32; 4]; 6] {
        self.planes.map(Plane::to_array)
    }
}

/// Bounding cylinder restricting visibility around an event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullCylinder {
    /// Center of the cylinder.
    pub center: Vec3,
    /// Unit axis.
    pub axis: Vec3,
    /// Full length along the axis.
    pub length: f32,
    /// Squared radius.
    pub radius_sq: f32,
}

impl CullCylinder {
    /// Cylinder around `center` along `axis` (normalized here).
    #[must_use]
    pub fn new(center: Vec3, axis: Vec3, length: f32, radius: f32) -> Self {
        Self {
            center,
            axis: axis.normalize_or(Vec3::Y),
            length,
            radius_sq: radius * radius,
        }
    }

    /// Whether `point` lies inside the cylinder.
    #[must_use]
    pub fn contains(&self, point: Vec3) -> bool {
        let d = point - self.center;
        let along = d.dot(self.axis);
        let radial = d - self.axis * along;
        along.abs() <= 0.5 * self.length
            && radial.length_squared() <= self.radius_sq
    }
}

/// Everything the cull kernel needs to decide visibility.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullVolume {
    /// World-to-view transform applied before the plane tests.
    pub view: Mat4,
    /// View-space frustum.
    pub frustum: Frustum,
    /// Optional event cylinder, tested in world space.
    pub cylinder: Option<CullCylinder>,
    /// When false the frustum test is skipped.
    pub culling_enabled: bool,
}

impl CullVolume {
    /// Volume seen by a camera with the given view and projection.
    #[must_use]
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view,
            frustum: Frustum::from_matrix(projection),
            cylinder: None,
            culling_enabled: true,
        }
    }

    /// Restrict the volume to `cylinder` as well.
    #[must_use]
    pub fn with_cylinder(mut self, cylinder: CullCylinder) -> Self {
        self.cylinder = Some(cylinder);
        self
    }

    /// Kernel parameters for this volume.
    #[must_use]
    pub fn to_gpu(&self, unique_object_count: u32, offset_count: u32) -> GpuCullData {
        let cylinder = self.cylinder.unwrap_or(CullCylinder {
            center: Vec3::ZERO,
            axis: Vec3::Y,
            length: 0.0,
            radius_sq: 0.0,
        });
        GpuCullData {
            view: self.view.to_cols_array_2d(),
            frustum: self.frustum.to_gpu(),
            cylinder_center: cylinder.center.extend(0.0).to_array(),
            cylinder_normal: cylinder.axis.extend(0.0).to_array(),
            cylinder_length: cylinder.length,
            cylinder_radius_sq: cylinder.radius_sq,
            unique_object_count,
            offset_count,
            culling_enabled: u32::from(self.culling_enabled),
            cull_cylinder: u32::from(self.cylinder.is_some()),
            _pad: [0; 2],
        }
    }
}

/// Translation of every periodic image for cell vectors `basis` (columns
/// a, b, c) and per-axis cell `counts`.
///
/// Counts clamp to `1..=3`. Images are laid out row-major in x-y-z with
/// per-axis shifts `i - (n - 1) / 2`, so a 3×3×3 neighborhood puts the
/// original cell at index 13.
#[must_use]
pub fn periodic_offsets(basis: Mat3, counts: [u32; 3]) -> Vec<Vec3> {
    let [nx, ny, nz] = counts.map(|n| n.clamp(1, MAX_CELLS_PER_AXIS) as i32);
    let shift = |i: i32, n: i32| (i - (n - 1) / 2) as f32;

    let mut offsets = Vec::with_capacity((nx * ny * nz) as usize);
    for i in 0..nx {
        for j in 0..ny {
            for k in 0..nz {
                offsets.push(
                    basis.x_axis * shift(i, nx)
                        + basis.y_axis * shift(j, ny)
                        + basis.z_axis * shift(k, nz),
                );
            }
        }
    }
    offsets
}

/// Pack offsets into the replica table. Entries past the end stay zero.
#[must_use]
pub fn offsets_to_gpu(offsets: &[Vec3]) -> GpuOffsets {
    let mut table = GpuOffsets::default();
    for (dst, src) in table.offsets.iter_mut().zip(offsets.iter().take(REPLICA_COUNT)) {
        *dst = src.extend(0.0).to_array();
    }
    table
}

/// Whether the image of an object at `world` with bounding `radius` passes
/// the frustum and cylinder tests encoded in `cull`.
#[must_use]
pub fn instance_visible(cull: &GpuCullData, world: Vec3, radius: f32) -> bool {
    if cull.culling_enabled != 0 {
        let view_pos = Mat4::from_cols_array_2d(&cull.view) * world.extend(1.0);
        let inside = cull
            .frustum
            .iter()
            .all(|plane| Vec4::from_array(*plane).dot(view_pos) > -radius);
        if !inside {
            return false;
        }
    }
    if cull.cull_cylinder != 0 {
        let cylinder = CullCylinder {
            center: Vec4::from_array(cull.cylinder_center).truncate(),
            axis: Vec4::from_array(cull.cylinder_normal).truncate(),
            length: cull.cylinder_length,
            radius_sq: cull.cylinder_radius_sq,
        };
        return cylinder.contains(world);
    }
    true
}

/// Host execution of the cull kernel over `invocations` threads.
///
/// Each instance below `cull.unique_object_count` is expanded over the
/// first `cull.offset_count` replicas; visible images bump the instance count
/// of their mesh's draw command and land in `finals` at `first_instance +
/// slot`. Writes outside `finals` are dropped, as on a robust device.
pub fn run_cull(
    objects: &[GpuObjectData],
    instances: &[GpuInstance],
    cull: &GpuCullData,
    offsets: &GpuOffsets,
    invocations: u32,
    draws: &mut [DrawIndexedIndirectCommand],
    finals: &mut [GpuFinalInstance],
) {
    let count = cull.unique_object_count.min(invocations) as usize;
    let offset_count = (cull.offset_count as usize).min(REPLICA_COUNT);

    for inst in instances.iter().take(count) {
        let Some(obj) = objects.get(inst.object_id as usize) else {
            continue;
        };
        let Some(draw) = draws.get_mut(inst.batch_id as usize) else {
            continue;
        };
        let center = obj.center();
        for (j, offset) in offsets.offsets[..offset_count].iter().enumerate() {
            let world = center + Vec4::from_array(*offset).truncate();
            if !instance_visible(cull, world, obj.radius) {
                continue;
            }
            let slot = draw.instance_count;
            draw.instance_count += 1;
            let dst = (draw.first_instance + slot) as usize;
            if let Some(out) = finals.get_mut(dst) {
                *out = GpuFinalInstance {
                    object_id: inst.object_id,
                    offset_id: j as u32,
                };
            }
        }
    }
}

/// Indices of the points visible in at least one periodic image of
/// `volume`, treating point `i` as a sphere of `radii[i]` (zero when
/// missing).
#[must_use]
pub fn select_atoms_in_volume(
    positions: &[Vec3],
    radii: &[f32],
    volume: &CullVolume,
    offsets: &[Vec3],
) -> Vec<usize> {
    let cull = volume.to_gpu(positions.len() as u32, offsets.len() as u32);
    positions
        .iter()
        .enumerate()
        .filter(|&(i, p)| {
            let radius = radii.get(i).copied().unwrap_or(0.0);
            offsets
                .iter()
                .any(|&offset| instance_visible(&cull, *p + offset, radius))
        })
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;

    fn camera() -> (Mat4, Mat4) {
        let proj = Mat4::perspective_rh(45.0_f32.to_radians(), 1.0, 0.1, 100.0);
        let view =
            Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        (view, proj)
    }

    #[test]
    fn test_view_space_frustum_matches_world_space() {
        let (view, proj) = camera();
        let view_space = Frustum::from_matrix(proj);
        let world_space = Frustum::from_matrix(proj * view);

        for p in [
            Vec3::ZERO,
            Vec3::new(0.0, 0.0, 20.0),
            Vec3::new(3.0, 1.0, -5.0),
            Vec3::new(50.0, 0.0, 0.0),
        ] {
            let vp = view.transform_point3(p);
            assert_eq!(
                view_space.intersects_sphere(vp, 0.5),
                world_space.intersects_sphere(p, 0.5),
                "disagreement at {p}"
            );
        }
        assert!(world_space.intersects_sphere(Vec3::ZERO, 1.0));
        assert!(!world_space.intersects_sphere(Vec3::new(0.0, 0.0, 50.0), 1.0));
    }

    #[test]
    fn test_full_neighborhood_centers_original_cell() {
        let basis = Mat3::from_diagonal(Vec3::new(10.0, 20.0, 30.0));
        let offsets = periodic_offsets(basis, [3, 3, 3]);
        assert_eq!(offsets.len(), 27);
        assert_eq!(offsets[13], Vec3::ZERO);
        assert_eq!(offsets[0], Vec3::new(-10.0, -20.0, -30.0));
        assert_eq!(offsets[26], Vec3::new(10.0, 20.0, 30.0));
        // x is the slowest axis.
        assert_eq!(offsets[9], Vec3::new(0.0, -20.0, -30.0));
        assert_eq!(offsets[1], Vec3::new(-10.0, -20.0, 0.0));
    }

    #[test]
    fn test_cell_counts_clamp() {
        let basis = Mat3::IDENTITY;
        assert_eq!(periodic_offsets(basis, [1, 1, 1]), vec![Vec3::ZERO]);
        assert_eq!(periodic_offsets(basis, [0, 0, 0]), vec![Vec3::ZERO]);
        assert_eq!(periodic_offsets(basis, [7, 1, 1]).len(), 3);
        let two = periodic_offsets(basis, [2, 1, 1]);
        assert_eq!(two, vec![Vec3::ZERO, Vec3::X]);
    }

    #[test]
    fn test_cylinder_contains() {
        let c = CullCylinder::new(Vec3::ZERO, Vec3::new(0.0, 0.0, 4.0), 10.0, 2.0);
        assert_eq!(c.axis, Vec3::Z);
        assert!(c.contains(Vec3::new(1.0, 1.0, 4.9)));
        assert!(!c.contains(Vec3::new(0.0, 0.0, 5.1)));
        assert!(!c.contains(Vec3::new(2.0, 1.0, 0.0)));
    }

    fn atoms(n: usize, spacing: f32) -> (Vec<GpuObjectData>, Vec<GpuInstance>) {
        let objects = (0..n)
            .map(|i| {
                let x = (i % 10) as f32 * spacing - 4.5 * spacing;
                let y = (i / 10) as f32 * spacing - 4.5 * spacing;
                GpuObjectData::new(
                    Mat4::from_translation(Vec3::new(x, y, 0.0)),
                    Vec4::ONE,
                    0.3,
                    0,
                )
            })
            .collect();
        let instances = (0..n as u32)
            .map(|object_id| GpuInstance {
                object_id,
                batch_id: 0,
            })
            .collect();
        (objects, instances)
    }

    #[test]
    fn test_run_cull_counts_every_visible_object() {
        let (view, proj) = camera();
        let (objects, instances) = atoms(100, 0.5);
        let volume = CullVolume::new(view, proj);
        let cull = volume.to_gpu(100, 1);
        let offsets = offsets_to_gpu(&[Vec3::ZERO]);

        let mut draws = [DrawIndexedIndirectCommand::default(); 5];
        draws[0].first_instance = 4;
        let mut finals = vec![GpuFinalInstance::default(); 200];
        run_cull(&objects, &instances, &cull, &offsets, 256, &mut draws, &mut finals);

        assert_eq!(draws[0].instance_count, 100);
        assert!(draws[1..].iter().all(|d| d.instance_count == 0));
        let mut ids: Vec<u32> = finals[4..104].iter().map(|f| f.object_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_run_cull_respects_invocation_bound() {
        let (view, proj) = camera();
        let (objects, instances) = atoms(100, 0.5);
        let cull = CullVolume::new(view, proj).to_gpu(100, 1);
        let offsets = offsets_to_gpu(&[Vec3::ZERO]);
        let mut draws = [DrawIndexedIndirectCommand::default(); 5];
        let mut finals = vec![GpuFinalInstance::default(); 100];
        run_cull(&objects, &instances, &cull, &offsets, 40, &mut draws, &mut finals);
        assert_eq!(draws[0].instance_count, 40);
    }

    #[test]
    fn test_disabled_culling_keeps_hidden_objects() {
        let (view, proj) = camera();
        let behind = GpuObjectData::new(
            Mat4::from_translation(Vec3::new(0.0, 0.0, 40.0)),
            Vec4::ONE,
            0.3,
            0,
        );
        let instances = [GpuInstance {
            object_id: 0,
            batch_id: 0,
        }];
        let offsets = offsets_to_gpu(&[Vec3::ZERO]);
        let mut volume = CullVolume::new(view, proj);

        let mut draws = [DrawIndexedIndirectCommand::default(); 5];
        let mut finals = [GpuFinalInstance::default(); 1];
        run_cull(&[behind], &instances, &volume.to_gpu(1, 1), &offsets, 1, &mut draws, &mut finals);
        assert_eq!(draws[0].instance_count, 0);

        volume.culling_enabled = false;
        run_cull(&[behind], &instances, &volume.to_gpu(1, 1), &offsets, 1, &mut draws, &mut finals);
        assert_eq!(draws[0].instance_count, 1);
    }

    #[test]
    fn test_replicas_expand_and_cylinder_restricts() {
        let (view, proj) = camera();
        let (objects, instances) = atoms(1, 1.0);
        let basis = Mat3::from_diagonal(Vec3::splat(2.0));
        let offsets = periodic_offsets(basis, [3, 3, 3]);
        let table = offsets_to_gpu(&offsets);
        let mut volume = CullVolume::new(view, proj);
        volume.culling_enabled = false;

        let mut draws = [DrawIndexedIndirectCommand::default(); 5];
        let mut finals = vec![GpuFinalInstance::default(); 27];
        run_cull(&objects, &instances, &volume.to_gpu(1, 27), &table, 256, &mut draws, &mut finals);
        assert_eq!(draws[0].instance_count, 27);

        let center = objects[0].center();
        let volume = volume.with_cylinder(CullCylinder::new(center, Vec3::Z, 1.0, 0.5));
        let mut draws = [DrawIndexedIndirectCommand::default(); 5];
        run_cull(&objects, &instances, &volume.to_gpu(1, 27), &table, 256, &mut draws, &mut finals);
        assert_eq!(draws[0].instance_count, 1);
        assert_eq!(finals[0].offset_id, 13);
    }

    #[test]
    fn test_select_atoms_in_volume() {
        let (view, proj) = camera();
        let positions = [
            Vec3::ZERO,
            Vec3::new(0.0, 0.0, 40.0),
            Vec3::new(200.0, 0.0, 0.0),
        ];
        let volume = CullVolume::new(view, proj);
        assert_eq!(
            select_atoms_in_volume(&positions, &[0.3; 3], &volume, &[Vec3::ZERO]),
            vec![0]
        );
        let shifted = [Vec3::ZERO, Vec3::new(-200.0, 0.0, 0.0)];
        assert_eq!(
            select_atoms_in_volume(&positions, &[0.3; 3], &volume, &shifted),
            vec![0, 2]
        );
    }
}
