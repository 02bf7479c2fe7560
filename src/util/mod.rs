//! Shared utilities: element data, trajectory file reading, movie playback
//! and frame timing.

pub mod elements;
pub mod frame_timing;
pub mod movie;
pub mod xyz;
