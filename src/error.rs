//! Crate-level error types.

use std::fmt;

use crate::engine::FrameError;
use crate::gpu::arena::UploadError;
use crate::gpu::descriptors::DescriptorError;
use crate::gpu::device::DeviceError;
use crate::gpu::render_context::RenderContextError;
use crate::gpu::shader_composer::ShaderError;
use crate::scene::SceneError;

/// Errors produced by the trajview crate.
#[derive(Debug)]
pub enum TrajviewError {
    /// GPU context initialization failure.
    Gpu(RenderContextError),
    /// WGSL composition or validation failure.
    Shader(ShaderError),
    /// Device object creation or host access failure.
    Device(DeviceError),
    /// Staged upload failure.
    Upload(UploadError),
    /// Descriptor layout or set failure.
    Descriptor(DescriptorError),
    /// Per-frame pipeline failure.
    Frame(FrameError),
    /// The scene does not fit the configured limits.
    Scene(SceneError),
    /// Generic I/O failure.
    Io(std::io::Error),
    /// TOML options parsing/serialization failure.
    OptionsParse(String),
    /// Malformed trajectory file.
    TrajectoryParse(String),
}

impl fmt::Display for TrajviewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu(e) => write!(f, "GPU error: {e}"),
            Self::Shader(e) => write!(f, "shader error: {e}"),
            Self::Device(e) => write!(f, "device error: {e}"),
            Self::Upload(e) => write!(f, "{e}"),
            Self::Descriptor(e) => write!(f, "{e}"),
            Self::Frame(e) => write!(f, "frame error: {e}"),
            Self::Scene(e) => write!(f, "scene error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::OptionsParse(msg) => {
                write!(f, "options parse error: {msg}")
            }
            Self::TrajectoryParse(msg) => {
                write!(f, "trajectory parse error: {msg}")
            }
        }
    }
}

impl std::error::Error for TrajviewError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Gpu(e) => Some(e),
            Self::Shader(e) => Some(e),
            Self::Device(e) => Some(e),
            Self::Upload(e) => Some(e),
            Self::Descriptor(e) => Some(e),
            Self::Frame(e) => Some(e),
            Self::Scene(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::OptionsParse(_) | Self::TrajectoryParse(_) => None,
        }
    }
}

macro_rules! impl_from {
    ($($source:ty => $variant:ident),* $(,)?) => {$(
        impl From<$source> for TrajviewError {
            fn from(e: $source) -> Self {
                Self::$variant(e)
            }
        }
    )*};
}

impl_from! {
    RenderContextError => Gpu,
    ShaderError => Shader,
    DeviceError => Device,
    UploadError => Upload,
    DescriptorError => Descriptor,
    FrameError => Frame,
    SceneError => Scene,
    std::io::Error => Io,
}
