//! Procedural meshes for the five mesh types.

use std::f32::consts::{PI, TAU};

use glam::{Mat3, Mat4, Quat, Vec3};

use super::{BasicVertex, Mesh};

/// Quad strip between two rings of `slices + 1` vertices each, starting at
/// `upper` and `lower`. Faces point outward when the upper ring sits above.
fn ring_strip(indices: &mut Vec<u32>, upper: u32, lower: u32, slices: u32) {
    for j in 0..slices {
        let a = upper + j;
        let b = lower + j;
        let c = lower + j + 1;
        let d = upper + j + 1;
        indices.extend_from_slice(&[a, c, b, a, d, c]);
    }
}

fn ring_point(phi: f32) -> Vec3 {
    Vec3::new(phi.cos(), 0.0, phi.sin())
}

/// Unit UV sphere.
#[must_use]
pub fn uv_sphere(stacks: u32, slices: u32) -> Mesh {
    let stacks = stacks.max(2);
    let slices = slices.max(3);
    let mut mesh = Mesh::default();
    for i in 0..=stacks {
        let theta = PI * i as f32 / stacks as f32;
        for j in 0..=slices {
            let phi = TAU * j as f32 / slices as f32;
            let p = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
            mesh.vertices.push(BasicVertex::new(p, p));
        }
    }
    let row = slices + 1;
    for i in 0..stacks {
        ring_strip(&mut mesh.indices, i * row, (i + 1) * row, slices);
    }
    mesh
}

/// Cylinder of radius 1 along Y from -0.5 to 0.5.
#[must_use]
pub fn cylinder(slices: u32, capped: bool) -> Mesh {
    let slices = slices.max(3);
    let mut mesh = Mesh::default();
    for y in [0.5, -0.5] {
        for j in 0..=slices {
            let ring = ring_point(TAU * j as f32 / slices as f32);
            mesh.vertices.push(BasicVertex::new(ring + Vec3::Y * y, ring));
        }
    }
    ring_strip(&mut mesh.indices, 0, slices + 1, slices);
    if capped {
        add_cap(&mut mesh, 0.5, slices);
        add_cap(&mut mesh, -0.5, slices);
    }
    mesh
}

fn add_cap(mesh: &mut Mesh, y: f32, slices: u32) {
    let normal = Vec3::Y * y.signum();
    let center = mesh.vertices.len() as u32;
    mesh.vertices.push(BasicVertex::new(Vec3::Y * y, normal));
    for j in 0..=slices {
        let ring = ring_point(TAU * j as f32 / slices as f32);
        mesh.vertices.push(BasicVertex::new(ring + Vec3::Y * y, normal));
    }
    for j in 0..slices {
        let p = center + 1 + j;
        if y > 0.0 {
            mesh.indices.extend_from_slice(&[center, p + 1, p]);
        } else {
            mesh.indices.extend_from_slice(&[center, p, p + 1]);
        }
    }
}

/// Cone of base radius 1 from y = 0 to an apex at y = 1.
fn cone(slices: u32) -> Mesh {
    let mut mesh = Mesh::default();
    let slant = Vec3::new(1.0, 1.0, 0.0).normalize();
    for y in [1.0, 0.0] {
        for j in 0..=slices {
            let phi = TAU * j as f32 / slices as f32;
            let ring = ring_point(phi);
            let normal = Vec3::new(phi.cos() * slant.x, slant.y, phi.sin() * slant.x);
            let position = if y > 0.0 { Vec3::Y } else { ring };
            mesh.vertices.push(BasicVertex::new(position, normal));
        }
    }
    ring_strip(&mut mesh.indices, 0, slices + 1, slices);
    // y = 0 winds the cap like a bottom cap; only the normals need fixing.
    add_cap(&mut mesh, 0.0, slices);
    for v in &mut mesh.vertices[2 * (slices as usize + 1)..] {
        v.normal = [0.0, -1.0, 0.0];
    }
    mesh
}

/// Arrow of length 1 along +Y: a shaft of radius `shaft_radius` and a head
/// taking the last `head_length`.
#[must_use]
pub fn arrow(slices: u32, shaft_radius: f32, head_length: f32) -> Mesh {
    let slices = slices.max(3);
    let head_length = head_length.clamp(0.05, 0.95);
    let shaft_length = 1.0 - head_length;
    let mut mesh = cylinder(slices, true).transformed(Mat4::from_scale_rotation_translation(
        Vec3::new(shaft_radius, shaft_length, shaft_radius),
        Quat::IDENTITY,
        Vec3::Y * shaft_length * 0.5,
    ));
    let head = cone(slices).transformed(Mat4::from_scale_rotation_translation(
        Vec3::new(shaft_radius * 2.5, head_length, shaft_radius * 2.5),
        Quat::IDENTITY,
        Vec3::Y * shaft_length,
    ));
    mesh.append(&head);
    mesh
}

/// Transform taking the unit Y cylinder onto the segment `a`..`b`.
#[must_use]
pub fn segment_transform(a: Vec3, b: Vec3, radius: f32) -> Mat4 {
    let axis = b - a;
    let length = axis.length();
    let rotation = if length > f32::EPSILON {
        Quat::from_rotation_arc(Vec3::Y, axis / length)
    } else {
        Quat::IDENTITY
    };
    Mat4::from_scale_rotation_translation(
        Vec3::new(radius, length, radius),
        rotation,
        (a + b) * 0.5,
    )
}

/// The twelve edges of the cell spanned by the columns of `basis`, as thin
/// cylinders in world space.
#[must_use]
pub fn unit_cell_frame(basis: Mat3, thickness: f32) -> Mesh {
    let corner = |x: f32, y: f32, z: f32| basis * Vec3::new(x, y, z);
    let edge = cylinder(8, false);
    let mut mesh = Mesh::default();
    for (from, to) in [
        ((0.0, 0.0, 0.0), (1.0, 0.0, 0.0)),
        ((0.0, 1.0, 0.0), (1.0, 1.0, 0.0)),
        ((0.0, 0.0, 1.0), (1.0, 0.0, 1.0)),
        ((0.0, 1.0, 1.0), (1.0, 1.0, 1.0)),
        ((0.0, 0.0, 0.0), (0.0, 1.0, 0.0)),
        ((1.0, 0.0, 0.0), (1.0, 1.0, 0.0)),
        ((0.0, 0.0, 1.0), (0.0, 1.0, 1.0)),
        ((1.0, 0.0, 1.0), (1.0, 1.0, 1.0)),
        ((0.0, 0.0, 0.0), (0.0, 0.0, 1.0)),
        ((1.0, 0.0, 0.0), (1.0, 0.0, 1.0)),
        ((0.0, 1.0, 0.0), (0.0, 1.0, 1.0)),
        ((1.0, 1.0, 0.0), (1.0, 1.0, 1.0)),
    ] {
        let a = corner(from.0, from.1, from.2);
        let b = corner(to.0, to.1, to.2);
        mesh.append(&edge.transformed(segment_transform(a, b, thickness)));
    }
    mesh
}

/// Open translucent-looking cylinder marking an event region; unit radius
/// and length, scaled by the object transform.
#[must_use]
pub fn event_cylinder(slices: u32) -> Mesh {
    cylinder(slices, false).with_color(Vec3::new(0.6, 0.8, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn faces_point_outward(mesh: &Mesh, center: Vec3) -> bool {
        mesh.indices.chunks_exact(3).all(|tri| {
            let p = |i: u32| Vec3::from_array(mesh.vertices[i as usize].position);
            let (a, b, c) = (p(tri[0]), p(tri[1]), p(tri[2]));
            let normal = (b - a).cross(c - a);
            // Degenerate pole triangles have no direction.
            normal.length_squared() < 1e-10
                || normal.dot((a + b + c) / 3.0 - center) > 0.0
        })
    }

    fn indices_in_range(mesh: &Mesh) -> bool {
        mesh.indices.len() % 3 == 0
            && mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len())
    }

    #[test]
    fn sphere_is_unit_and_outward() {
        let sphere = uv_sphere(8, 12);
        assert!(indices_in_range(&sphere));
        assert!((sphere.bounding_radius() - 1.0).abs() < 1e-5);
        assert!(faces_point_outward(&sphere, Vec3::ZERO));
        for v in &sphere.vertices {
            assert!(Vec3::from_array(v.normal).dot(Vec3::from_array(v.position)) > 0.99);
        }
    }

    #[test]
    fn capped_cylinder_is_outward() {
        let mesh = cylinder(12, true);
        assert!(indices_in_range(&mesh));
        assert!(faces_point_outward(&mesh, Vec3::ZERO));
    }

    #[test]
    fn arrow_spans_unit_length() {
        let mesh = arrow(8, 0.05, 0.3);
        assert!(indices_in_range(&mesh));
        let top = mesh
            .vertices
            .iter()
            .map(|v| v.position[1])
            .fold(f32::MIN, f32::max);
        let bottom = mesh
            .vertices
            .iter()
            .map(|v| v.position[1])
            .fold(f32::MAX, f32::min);
        assert!((top - 1.0).abs() < 1e-5);
        assert!(bottom.abs() < 1e-5);
    }

    #[test]
    fn segment_transform_maps_cylinder_ends() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(1.0, 2.0, 7.0);
        let m = segment_transform(a, b, 0.2);
        assert!(m.transform_point3(Vec3::Y * 0.5).distance(b) < 1e-5);
        assert!(m.transform_point3(Vec3::Y * -0.5).distance(a) < 1e-5);
    }

    #[test]
    fn cell_frame_reaches_the_far_corner() {
        let basis = Mat3::from_diagonal(Vec3::new(10.0, 20.0, 30.0));
        let mesh = unit_cell_frame(basis, 0.05);
        assert!(indices_in_range(&mesh));
        let far = Vec3::new(10.0, 20.0, 30.0);
        assert!(mesh
            .vertices
            .iter()
            .any(|v| Vec3::from_array(v.position).distance(far) < 0.1));
    }
}
