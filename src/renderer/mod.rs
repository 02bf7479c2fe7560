//! GPU-driven culling and drawing.
//!
//! [`frame`] owns the per-slot state and records each frame's commands,
//! [`cull`] holds the visibility math shared by host and kernel,
//! [`draw_calls`] builds the indirect-draw template and [`pipelines`] the
//! three pipelines a frame binds.

pub mod cull;
pub mod draw_calls;
pub mod frame;
pub mod pipelines;

pub use self::frame::{FrameRing, FrameSlot, FRAMES_IN_FLIGHT};
pub use self::pipelines::Pipelines;
