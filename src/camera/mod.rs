//! Orbiting perspective camera and its GPU uniform data.

/// Core camera struct.
pub mod core;

pub use self::core::Camera;
