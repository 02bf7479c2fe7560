use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
/// Sizes and tessellation of the procedural meshes.
pub struct GeometryOptions {
    /// Multiplier on element radii.
    pub atom_size: f32,
    /// Multiplier on bond length.
    pub bond_length: f32,
    /// Bond cylinder radius.
    pub bond_thickness: f32,
    /// Multiplier on surface-vector magnitude.
    pub vector_length: f32,
    /// Surface-vector shaft radius.
    pub vector_thickness: f32,
    /// Unit cell edge radius.
    pub cell_thickness: f32,
    /// Two atoms bond when closer than this factor times their radii sum.
    pub bond_tolerance: f32,
    /// Latitude bands of the atom sphere.
    pub sphere_stacks: u32,
    /// Longitude segments of the atom sphere.
    pub sphere_slices: u32,
    /// Radial segments of cylinders and arrows.
    pub cylinder_slices: u32,
}

impl Default for GeometryOptions {
    fn default() -> Self {
        Self {
            atom_size: 0.5,
            bond_length: 1.0,
            bond_thickness: 0.12,
            vector_length: 1.0,
            vector_thickness: 0.08,
            cell_thickness: 0.05,
            bond_tolerance: 1.15,
            sphere_stacks: 12,
            sphere_slices: 16,
            cylinder_slices: 12,
        }
    }
}
