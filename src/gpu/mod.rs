//! GPU resource management.
//!
//! A backend-neutral [`device::GpuDevice`] seam with two implementations:
//! [`wgpu_device::WgpuDevice`] for real hardware and [`soft::SoftDevice`], an
//! in-process device that executes command lists on the CPU and reports
//! synchronization mistakes. Everything above the seam (buffer arena,
//! descriptor caching, per-frame state) is written against the trait.

/// Generational buffer arena, buffer views, and staged uploads.
pub mod arena;
/// Recorded command lists and submission descriptors.
pub mod command;
/// Descriptor layout cache, pool allocator, and set builder.
pub mod descriptors;
/// The device trait and its plain-data descriptors.
pub mod device;
/// Headless wgpu device and queue initialization.
pub mod render_context;
/// WGSL shader composition with `#import` support via naga-oil.
pub mod shader_composer;
/// CPU-executed device with hazard tracking.
pub mod soft;
/// `#[repr(C)]` types shared with the shaders.
pub mod types;
/// [`device::GpuDevice`] implemented on wgpu.
pub mod wgpu_device;

/// Depth-stencil state used by every render pipeline.
pub fn depth_stencil_state() -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: wgpu::TextureFormat::Depth32Float,
        depth_write_enabled: true,
        depth_compare: wgpu::CompareFunction::Less,
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    }
}
