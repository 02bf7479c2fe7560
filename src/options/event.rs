use serde::{Deserialize, Serialize};

/// Event viewer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventOptions {
    /// Length of the event cylinder along its axis.
    pub cylinder_length: f32,
    /// Radius of the event cylinder.
    pub cylinder_radius: f32,
    /// Restrict visibility to the cylinder while an event is active.
    pub cylinder_culling: bool,
    /// Orient the cylinder by the surface normal instead of the
    /// connection normal.
    pub surface_normals: bool,
}

impl Default for EventOptions {
    fn default() -> Self {
        Self {
            cylinder_length: 11.0,
            cylinder_radius: 8.0,
            cylinder_culling: true,
            surface_normals: true,
        }
    }
}
