//! Renderer options with TOML preset support.
//!
//! Every tunable (frame pipeline sizing, culling, mesh geometry, palette,
//! event viewer, playback, camera) lives here. Options serialize to and from
//! TOML; partial files override only what they name.

mod camera;
mod colors;
mod culling;
mod event;
mod frames;
mod geometry;
mod movie;

use std::path::Path;

pub use camera::CameraOptions;
pub use colors::ColorOptions;
pub use culling::CullingOptions;
pub use event::EventOptions;
pub use frames::FrameOptions;
pub use geometry::GeometryOptions;
pub use movie::MovieOptions;
use serde::{Deserialize, Serialize};

use crate::error::TrajviewError;

/// Top-level options container. All sub-structs use `#[serde(default)]` so
/// partial TOML files (e.g. only overriding `[culling]`) work correctly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RenderOptions {
    /// Frame pipeline sizing and timeouts.
    pub frames: FrameOptions,
    /// GPU culling and periodic images.
    pub culling: CullingOptions,
    /// Procedural mesh sizes.
    pub geometry: GeometryOptions,
    /// Color palette and shading.
    pub colors: ColorOptions,
    /// Event viewer.
    pub event: EventOptions,
    /// Trajectory playback.
    pub movie: MovieOptions,
    /// Camera projection.
    pub camera: CameraOptions,
}

impl RenderOptions {
    /// Load options from a TOML file. Missing fields use defaults.
    pub fn load(path: &Path) -> Result<Self, TrajviewError> {
        let content =
            std::fs::read_to_string(path).map_err(TrajviewError::Io)?;
        toml::from_str(&content)
            .map_err(|e| TrajviewError::OptionsParse(e.to_string()))
    }

    /// Save options to a TOML file (pretty-printed).
    pub fn save(&self, path: &Path) -> Result<(), TrajviewError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TrajviewError::OptionsParse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(TrajviewError::Io)?;
        }
        std::fs::write(path, content).map_err(TrajviewError::Io)
    }

    /// Periodic image counts clamped to `1..=3` per axis.
    #[must_use]
    pub fn cell_counts(&self) -> [u32; 3] {
        self.culling.cell_counts.map(|n| n.clamp(1, 3))
    }
}
