//! Backend-neutral command recording.
//!
//! A [`CommandList`] is plain data. Backends translate it at
//! [`GpuDevice::submit`](super::device::GpuDevice::submit) time, so the same
//! frame recording drives both the wgpu backend and the software device.

use super::device::{
    RawBuffer, RawFence, RawPipeline, RawSemaphore, RawSet, RawTarget,
};

/// Pipeline stages used to scope barriers and semaphore waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Host reads and writes.
    Host,
    /// Buffer copies.
    Transfer,
    /// Compute shader execution.
    ComputeShader,
    /// Indirect argument fetch.
    DrawIndirect,
    /// Vertex shader execution.
    VertexShader,
    /// Fragment shader execution.
    FragmentShader,
    /// Color attachment writes.
    ColorAttachmentOutput,
}

/// Region of a buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopy {
    /// Source byte offset.
    pub src_offset: u64,
    /// Destination byte offset.
    pub dst_offset: u64,
    /// Bytes copied.
    pub size: u64,
}

/// Buffer memory barrier: writes made in `src_stage` become visible to
/// `dst_stages`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferBarrier {
    /// Stage that produced the writes.
    pub src_stage: PipelineStage,
    /// Stages that consume them.
    pub dst_stages: Vec<PipelineStage>,
    /// Guarded buffer.
    pub buffer: RawBuffer,
    /// Guarded byte offset.
    pub offset: u64,
    /// Guarded byte length.
    pub size: u64,
}

/// One recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Device-to-device copy.
    CopyBuffer {
        /// Source buffer.
        src: RawBuffer,
        /// Destination buffer.
        dst: RawBuffer,
        /// Copied region.
        region: BufferCopy,
    },
    /// Memory barrier on one buffer range.
    Barrier(BufferBarrier),
    /// Open a compute pass.
    BeginComputePass,
    /// Bind a compute pipeline.
    BindComputePipeline(RawPipeline),
    /// Bind a descriptor set for the current pass.
    BindDescriptorSet {
        /// Set number.
        index: u32,
        /// Descriptor set.
        set: RawSet,
        /// Offsets for dynamic bindings, in binding order.
        dynamic_offsets: Vec<u32>,
    },
    /// Dispatch with group counts read from a buffer.
    DispatchIndirect {
        /// Buffer holding `[x, y, z]`.
        buffer: RawBuffer,
        /// Byte offset of the arguments.
        offset: u64,
    },
    /// Close the compute pass.
    EndComputePass,
    /// Open a render pass on a target, clearing color and depth.
    BeginRenderPass {
        /// Render target.
        target: RawTarget,
        /// Clear color.
        clear: [f32; 4],
    },
    /// Bind a render pipeline.
    BindRenderPipeline(RawPipeline),
    /// Bind the vertex buffer at slot 0.
    BindVertexBuffer {
        /// Vertex buffer.
        buffer: RawBuffer,
        /// Byte offset.
        offset: u64,
    },
    /// Bind a `u32` index buffer.
    BindIndexBuffer {
        /// Index buffer.
        buffer: RawBuffer,
        /// Byte offset.
        offset: u64,
    },
    /// Indexed draw with arguments read from a buffer.
    DrawIndexedIndirect {
        /// Buffer holding the draw command.
        buffer: RawBuffer,
        /// Byte offset of the command.
        offset: u64,
    },
    /// Close the render pass.
    EndRenderPass,
    /// Make a [`MemoryClass::HostReadback`] buffer's device writes readable
    /// through its host mapping once the submission's fence signals.
    /// Buffers without this command keep their previous host contents.
    ///
    /// [`MemoryClass::HostReadback`]: super::device::MemoryClass::HostReadback
    Readback {
        /// Buffer copied back.
        buffer: RawBuffer,
    },
}

/// A semaphore wait attached to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreWait {
    /// Semaphore waited on.
    pub semaphore: RawSemaphore,
    /// First stage that must wait.
    pub stage: PipelineStage,
}

/// Synchronization attached to one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitInfo {
    /// Semaphores the submission waits on.
    pub wait: Vec<SemaphoreWait>,
    /// Semaphores signaled on completion.
    pub signal: Vec<RawSemaphore>,
    /// Fence signaled on completion.
    pub fence: Option<RawFence>,
}

/// Recorded commands for one submission. Reused across frames via
/// [`CommandList::reset`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop recorded commands, keeping the allocation.
    pub fn reset(&mut self) {
        self.commands.clear();
    }

    /// Append a command.
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Recorded commands in order.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Record a buffer copy.
    pub fn copy_buffer(
        &mut self,
        src: RawBuffer,
        dst: RawBuffer,
        region: BufferCopy,
    ) {
        self.push(Command::CopyBuffer { src, dst, region });
    }

    /// Record a barrier over `size` bytes of `buffer` at `offset`.
    pub fn barrier(
        &mut self,
        buffer: RawBuffer,
        offset: u64,
        size: u64,
        src_stage: PipelineStage,
        dst_stages: &[PipelineStage],
    ) {
        self.push(Command::Barrier(BufferBarrier {
            src_stage,
            dst_stages: dst_stages.to_vec(),
            buffer,
            offset,
            size,
        }));
    }

    /// Record a descriptor set bind.
    pub fn bind_set(&mut self, index: u32, set: RawSet, dynamic_offsets: &[u32]) {
        self.push(Command::BindDescriptorSet {
            index,
            set,
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_list_reusable() {
        let mut list = CommandList::new();
        list.copy_buffer(
            RawBuffer(1),
            RawBuffer(2),
            BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 16,
            },
        );
        list.barrier(
            RawBuffer(2),
            0,
            16,
            PipelineStage::Transfer,
            &[PipelineStage::ComputeShader],
        );
        assert_eq!(list.commands().len(), 2);

        list.reset();
        assert!(list.is_empty());
        list.push(Command::EndComputePass);
        assert_eq!(list.commands(), &[Command::EndComputePass]);
    }
}
