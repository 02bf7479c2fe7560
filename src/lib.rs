//! GPU-driven renderer for periodic molecular trajectories, built on wgpu.
//!
//! Per-object state lives in device buffers. Each frame a compute pass
//! expands every object over its periodic images, culls the images against
//! the view and an optional event cylinder, and counts the survivors
//! straight into indexed-indirect draw commands. The host never reads the
//! counts back.
//!
//! # Key entry points
//!
//! - [`engine::RenderEngine`] - owns the device and drives frames
//! - [`gpu::device::GpuDevice`] - the graphics capability layer, with a
//!   wgpu backend ([`gpu::wgpu_device::WgpuDevice`]) and an in-memory one
//!   ([`gpu::soft::SoftDevice`])
//! - [`gpu::arena::BufferArena`] - handle-based owner of every buffer
//! - [`gpu::descriptors`] - layout cache and growing pool allocator
//! - [`scene::Scene`] - the trajectory and the object types drawn from it
//! - [`options::RenderOptions`] - runtime configuration
//!
//! # Architecture
//!
//! Three frame slots are in flight. A slot owns private copies of every
//! per-frame buffer, its descriptor sets, a fence and two semaphores, and
//! is written only after its fence has signaled. Within a frame the draw
//! commands are reset from a template, the cull pass fills them, and a
//! barrier makes them visible to the indirect draws.

pub mod camera;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod mesh;
pub mod options;
pub mod renderer;
pub mod scene;
pub mod util;
