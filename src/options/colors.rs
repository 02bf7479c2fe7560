use serde::{Deserialize, Serialize};

/// Color palette and shading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColorOptions {
    /// Atoms picked for measurement.
    pub measurement: [f32; 4],
    /// Atoms picked for tagging.
    pub tagging: [f32; 4],
    /// Highlighted atoms (event participants).
    pub highlighted: [f32; 4],
    /// Catalyst atoms when coloring by base type.
    pub catalyst: [f32; 4],
    /// Chemical atoms when coloring by base type.
    pub chemical: [f32; 4],
    /// Unit cell frame.
    pub unit_cell: [f32; 4],
    /// Surface vectors.
    pub vector: [f32; 4],
    /// Event cylinder.
    pub cylinder: [f32; 4],
    /// Picked unit cell or vector.
    pub selected: [f32; 4],
    /// Ambient light color (rgb) and strength (a).
    pub ambient: [f32; 4],
    /// Point light color (rgb) and intensity (a).
    pub light: [f32; 4],
    /// Specular strength.
    pub specular: f32,
    /// Specular exponent.
    pub shininess: f32,
}

impl Default for ColorOptions {
    fn default() -> Self {
        Self {
            measurement: [0.224, 1.0, 0.078, 1.0],
            tagging: [0.7, 0.72, 0.95, 1.0],
            highlighted: [0.83, 0.1, 0.7, 1.0],
            catalyst: [0.95, 0.55, 0.1, 1.0],
            chemical: [0.2, 0.6, 0.95, 1.0],
            unit_cell: [1.0, 1.0, 1.0, 1.0],
            vector: [1.0, 0.0, 0.0, 1.0],
            cylinder: [1.0, 1.0, 1.0, 0.35],
            selected: [0.0, 1.0, 0.0, 1.0],
            ambient: [1.0, 1.0, 1.0, 0.25],
            light: [1.0, 1.0, 1.0, 0.6],
            specular: 0.3,
            shininess: 32.0,
        }
    }
}
