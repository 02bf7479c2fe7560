//! Graphics capability layer.
//!
//! [`GpuDevice`] is the narrow surface the renderer core needs from a
//! graphics API: buffers with host mapping, descriptor layouts/pools/sets,
//! compute and render pipelines, fences and semaphores, and submission of a
//! recorded [`CommandList`]. Objects are referred to by small `Copy` ids so
//! that the arena, the descriptor cache and the frame ring can store them
//! without borrowing the device.
//!
//! Two implementations ship with the crate:
//! [`WgpuDevice`](super::wgpu_device::WgpuDevice) for real hardware and
//! [`SoftDevice`](super::soft::SoftDevice), an in-memory device that runs the
//! cull kernel on the CPU and doubles as the mock GPU in tests.

use std::fmt;
use std::time::Duration;

use super::command::{CommandList, SubmitInfo};
use super::shader_composer::Shader;

macro_rules! raw_ids {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Backend-assigned numeric id.
            #[must_use]
            pub fn id(self) -> u64 {
                self.0
            }
        }
    )*};
}

raw_ids! {
    /// Device buffer.
    RawBuffer,
    /// Descriptor-set layout.
    RawSetLayout,
    /// Descriptor pool.
    RawPool,
    /// Descriptor set allocated from a pool.
    RawSet,
    /// Compute or render pipeline.
    RawPipeline,
    /// Color + depth render target.
    RawTarget,
    /// Host-waitable completion fence.
    RawFence,
    /// Queue-side semaphore.
    RawSemaphore,
}

/// Where a buffer's memory lives and who may touch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    /// Device-only memory. Filled through staged uploads or GPU writes.
    DeviceLocal,
    /// Host-mappable memory written by the host and read by the device.
    HostVisible,
    /// Host-mappable memory written by the device and read back by the host.
    HostReadback,
}

impl MemoryClass {
    /// Whether buffers of this class can be mapped by the host.
    #[must_use]
    pub fn is_host_visible(self) -> bool {
        !matches!(self, Self::DeviceLocal)
    }
}

/// Parameters for [`GpuDevice::create_buffer`].
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Size in bytes.
    pub size: u64,
    /// How the buffer is bound.
    pub usage: wgpu::BufferUsages,
    /// Residency class.
    pub class: MemoryClass,
}

/// Descriptor kinds known to the pool allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorKind {
    /// Standalone sampler.
    Sampler,
    /// Texture paired with a sampler.
    CombinedImageSampler,
    /// Sampled texture.
    SampledImage,
    /// Storage texture.
    StorageImage,
    /// Uniform texel buffer.
    UniformTexelBuffer,
    /// Storage texel buffer.
    StorageTexelBuffer,
    /// Uniform buffer.
    UniformBuffer,
    /// Storage buffer.
    StorageBuffer,
    /// Uniform buffer bound with a dynamic offset.
    UniformBufferDynamic,
    /// Storage buffer bound with a dynamic offset.
    StorageBufferDynamic,
    /// Render-pass input attachment.
    InputAttachment,
}

impl DescriptorKind {
    /// All kinds, in pool-table order.
    pub const ALL: [Self; 11] = [
        Self::Sampler,
        Self::CombinedImageSampler,
        Self::SampledImage,
        Self::StorageImage,
        Self::UniformTexelBuffer,
        Self::StorageTexelBuffer,
        Self::UniformBuffer,
        Self::StorageBuffer,
        Self::UniformBufferDynamic,
        Self::StorageBufferDynamic,
        Self::InputAttachment,
    ];

    /// Whether descriptors of this kind reference a buffer range.
    #[must_use]
    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            Self::UniformBuffer
                | Self::StorageBuffer
                | Self::UniformBufferDynamic
                | Self::StorageBufferDynamic
        )
    }

    /// Whether the binding takes a dynamic offset at bind time.
    #[must_use]
    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            Self::UniformBufferDynamic | Self::StorageBufferDynamic
        )
    }
}

/// One binding of a descriptor-set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutBinding {
    /// Binding index within the set.
    pub binding: u32,
    /// Descriptor kind.
    pub kind: DescriptorKind,
    /// Array length (1 for scalars).
    pub count: u32,
    /// Shader stages that see the binding.
    pub stages: wgpu::ShaderStages,
}

impl LayoutBinding {
    /// Scalar binding shorthand.
    #[must_use]
    pub fn new(
        binding: u32,
        kind: DescriptorKind,
        stages: wgpu::ShaderStages,
    ) -> Self {
        Self {
            binding,
            kind,
            count: 1,
            stages,
        }
    }
}

/// A buffer range written into one binding of a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    /// Target binding index.
    pub binding: u32,
    /// Descriptor kind of the binding.
    pub kind: DescriptorKind,
    /// Buffer bound.
    pub buffer: RawBuffer,
    /// Byte offset into the buffer.
    pub offset: u64,
    /// Byte length of the bound range.
    pub range: u64,
}

/// Parameters for [`GpuDevice::create_compute_pipeline`].
#[derive(Debug, Clone, Copy)]
pub struct ComputePipelineDesc<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Shader to run.
    pub shader: Shader,
    /// Compute entry point.
    pub entry_point: &'a str,
    /// Set layouts, indexed by set number.
    pub set_layouts: &'a [RawSetLayout],
}

/// Parameters for [`GpuDevice::create_render_pipeline`].
#[derive(Debug, Clone, Copy)]
pub struct RenderPipelineDesc<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Shader holding both stages.
    pub shader: Shader,
    /// Vertex entry point.
    pub vertex_entry: &'a str,
    /// Fragment entry point.
    pub fragment_entry: &'a str,
    /// Set layouts, indexed by set number.
    pub set_layouts: &'a [RawSetLayout],
}

/// Device limits the renderer depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Required alignment of dynamic uniform offsets.
    pub min_uniform_offset_alignment: u32,
    /// Required alignment of storage buffer binding offsets.
    pub min_storage_offset_alignment: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_offset_alignment: 256,
            min_storage_offset_alignment: 256,
        }
    }
}

/// Errors reported by device object creation and host access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device ran out of memory for the request.
    OutOfMemory,
    /// An id did not name a live object of the expected type.
    UnknownObject {
        /// Object type name.
        kind: &'static str,
        /// Offending id.
        id: u64,
    },
    /// Host access to a buffer that is not mapped.
    NotMapped(RawBuffer),
    /// Host access outside the buffer.
    OutOfRange {
        /// Buffer accessed.
        buffer: RawBuffer,
        /// Requested end offset.
        end: u64,
        /// Buffer size.
        size: u64,
    },
    /// Backend-specific failure.
    Backend(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "device out of memory"),
            Self::UnknownObject { kind, id } => {
                write!(f, "unknown {kind} id {id}")
            }
            Self::NotMapped(buffer) => {
                write!(f, "buffer {} is not mapped", buffer.id())
            }
            Self::OutOfRange { buffer, end, size } => write!(
                f,
                "access to byte {end} of buffer {} exceeds its size {size}",
                buffer.id()
            ),
            Self::Backend(msg) => write!(f, "backend error: {msg}"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Outcome of a failed descriptor-set allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolAllocError {
    /// The pool has room in total but not contiguously.
    FragmentedPool,
    /// The pool's set or descriptor quota is used up.
    OutOfPoolMemory,
    /// Any other failure; never retried.
    Other(DeviceError),
}

impl PoolAllocError {
    /// Whether growing to a fresh pool may satisfy the allocation.
    #[must_use]
    pub fn is_pool_exhaustion(&self) -> bool {
        matches!(self, Self::FragmentedPool | Self::OutOfPoolMemory)
    }
}

impl fmt::Display for PoolAllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FragmentedPool => write!(f, "descriptor pool fragmented"),
            Self::OutOfPoolMemory => write!(f, "descriptor pool exhausted"),
            Self::Other(e) => write!(f, "descriptor allocation failed: {e}"),
        }
    }
}

impl std::error::Error for PoolAllocError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Other(e) => Some(e),
            _ => None,
        }
    }
}

/// Failure while waiting on a fence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenceError {
    /// The fence did not signal within the timeout.
    Timeout(Duration),
    /// The device stopped responding.
    DeviceLost,
    /// The fence id is unknown.
    Unknown(RawFence),
}

impl fmt::Display for FenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(t) => {
                write!(f, "fence not signaled after {} ms", t.as_millis())
            }
            Self::DeviceLost => write!(f, "device lost while waiting"),
            Self::Unknown(fence) => write!(f, "unknown fence {}", fence.id()),
        }
    }
}

impl std::error::Error for FenceError {}

/// Capabilities the renderer core consumes from a graphics API.
///
/// Every method takes `&mut self`: a device is owned by one host thread and
/// driven synchronously.
pub trait GpuDevice {
    /// Device limits.
    fn limits(&self) -> DeviceLimits;

    /// Create a buffer. Host-visible classes get host-mappable memory.
    fn create_buffer(
        &mut self,
        desc: &BufferDesc<'_>,
    ) -> Result<RawBuffer, DeviceError>;
    /// Release a buffer and its memory.
    fn destroy_buffer(&mut self, buffer: RawBuffer);
    /// Make a host-visible buffer accessible to the host.
    fn map_buffer(&mut self, buffer: RawBuffer) -> Result<(), DeviceError>;
    /// End host access to a buffer.
    fn unmap_buffer(&mut self, buffer: RawBuffer);
    /// Read access to `len` bytes of a mapped buffer at `offset`.
    fn mapped_range(
        &self,
        buffer: RawBuffer,
        offset: u64,
        len: u64,
    ) -> Result<&[u8], DeviceError>;
    /// Write access to `len` bytes of a mapped buffer at `offset`.
    fn mapped_range_mut(
        &mut self,
        buffer: RawBuffer,
        offset: u64,
        len: u64,
    ) -> Result<&mut [u8], DeviceError>;

    /// Create a descriptor-set layout from sorted bindings.
    fn create_set_layout(
        &mut self,
        bindings: &[LayoutBinding],
    ) -> Result<RawSetLayout, DeviceError>;
    /// Destroy a descriptor-set layout.
    fn destroy_set_layout(&mut self, layout: RawSetLayout);
    /// Create a descriptor pool with per-kind descriptor quotas.
    fn create_descriptor_pool(
        &mut self,
        max_sets: u32,
        sizes: &[(DescriptorKind, u32)],
    ) -> Result<RawPool, DeviceError>;
    /// Free every set allocated from `pool` at once.
    fn reset_descriptor_pool(&mut self, pool: RawPool);
    /// Destroy a descriptor pool.
    fn destroy_descriptor_pool(&mut self, pool: RawPool);
    /// Allocate one set with `layout` from `pool`.
    fn allocate_set(
        &mut self,
        pool: RawPool,
        layout: RawSetLayout,
    ) -> Result<RawSet, PoolAllocError>;
    /// Point the bindings of `set` at buffer ranges.
    fn update_set(
        &mut self,
        set: RawSet,
        writes: &[DescriptorWrite],
    ) -> Result<(), DeviceError>;

    /// Create a compute pipeline.
    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc<'_>,
    ) -> Result<RawPipeline, DeviceError>;
    /// Create a render pipeline drawing merged meshes.
    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDesc<'_>,
    ) -> Result<RawPipeline, DeviceError>;
    /// Destroy a pipeline.
    fn destroy_pipeline(&mut self, pipeline: RawPipeline);

    /// Create an offscreen color + depth target.
    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<RawTarget, DeviceError>;
    /// Destroy a render target.
    fn destroy_render_target(&mut self, target: RawTarget);
    /// Acquire `target` for rendering, signaling `signal` once usable.
    fn acquire_target(
        &mut self,
        target: RawTarget,
        signal: RawSemaphore,
    ) -> Result<(), DeviceError>;
    /// Present `target` after `wait` is signaled.
    fn present_target(
        &mut self,
        target: RawTarget,
        wait: RawSemaphore,
    ) -> Result<(), DeviceError>;

    /// Create a fence, optionally already signaled.
    fn create_fence(&mut self, signaled: bool) -> Result<RawFence, DeviceError>;
    /// Block until `fence` signals or `timeout` elapses.
    fn wait_fence(
        &mut self,
        fence: RawFence,
        timeout: Duration,
    ) -> Result<(), FenceError>;
    /// Return `fence` to the unsignaled state.
    fn reset_fence(&mut self, fence: RawFence);
    /// Destroy a fence.
    fn destroy_fence(&mut self, fence: RawFence);
    /// Create a semaphore.
    fn create_semaphore(&mut self) -> Result<RawSemaphore, DeviceError>;
    /// Destroy a semaphore.
    fn destroy_semaphore(&mut self, semaphore: RawSemaphore);

    /// Submit recorded commands.
    fn submit(
        &mut self,
        commands: &CommandList,
        info: &SubmitInfo,
    ) -> Result<(), DeviceError>;
    /// Block until all submitted work has finished.
    fn wait_idle(&mut self);
}
