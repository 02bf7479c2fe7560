//! In-memory graphics device.
//!
//! `SoftDevice` implements [`GpuDevice`] on host memory. Submissions execute
//! eagerly: copies move bytes, indirect dispatches of the cull shader run
//! [`run_cull`] over the bound buffers and indirect draws are recorded with
//! the arguments they read. Completion is separate from execution so tests
//! can hold fences unsignaled ([`SoftDevice::set_auto_complete`]) and release
//! them with [`SoftDevice::complete_next`].
//!
//! While executing, the device checks synchronization the way a validation
//! layer would and records a [`Violation`] when:
//!
//! - a stage reads or writes a range another stage wrote without a barrier
//!   making it visible;
//! - the host writes a mapped range that an unfinished submission uses;
//! - a submission or present waits on a semaphore nothing will signal.

use std::collections::VecDeque;
use std::time::Duration;

use bytemuck::Pod;
use rustc_hash::FxHashMap;

use super::command::{BufferBarrier, Command, CommandList, PipelineStage, SubmitInfo};
use super::device::{
    BufferDesc, ComputePipelineDesc, DescriptorKind, DescriptorWrite,
    DeviceError, DeviceLimits, FenceError, GpuDevice, LayoutBinding,
    MemoryClass, PoolAllocError, RawBuffer, RawFence, RawPipeline, RawPool,
    RawSemaphore, RawSet, RawSetLayout, RawTarget, RenderPipelineDesc,
};
use super::shader_composer::Shader;
use super::types::{
    DispatchIndirectCommand, DrawIndexedIndirectCommand, GpuCullData,
    GpuFinalInstance, GpuInstance, GpuObjectData, GpuOffsets,
    CULL_WORKGROUP_SIZE,
};
use crate::renderer::cull::run_cull;

/// A synchronization error caught while executing or mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Host write into a range an unfinished submission uses.
    HostWriteInFlight {
        /// Buffer written.
        buffer: RawBuffer,
        /// Byte offset of the write.
        offset: u64,
        /// Byte length of the write.
        len: u64,
    },
    /// Device access to a range written by another stage without a barrier.
    UnsyncedAccess {
        /// Buffer accessed.
        buffer: RawBuffer,
        /// Stage that wrote the range.
        written_in: PipelineStage,
        /// Stage that accessed it.
        accessed_in: PipelineStage,
    },
    /// Wait on a semaphore that is neither signaled nor pending.
    UnsignaledWait(RawSemaphore),
}

/// An indexed indirect draw as the device executed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedDraw {
    /// Render pipeline bound for the draw.
    pub pipeline: RawPipeline,
    /// Buffer the arguments were read from.
    pub buffer: RawBuffer,
    /// Byte offset of the arguments.
    pub offset: u64,
    /// Arguments at execution time.
    pub command: DrawIndexedIndirectCommand,
}

#[derive(Debug)]
struct SoftBuffer {
    label: String,
    size: u64,
    words: Vec<u32>,
    class: MemoryClass,
    mapped: bool,
}

impl SoftBuffer {
    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.size as usize]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.size as usize]
    }
}

#[derive(Debug)]
struct SoftPool {
    max_sets: u32,
    quotas: FxHashMap<DescriptorKind, u32>,
    used: FxHashMap<DescriptorKind, u32>,
    sets: Vec<RawSet>,
}

#[derive(Debug)]
struct SoftSet {
    layout: RawSetLayout,
    writes: Vec<DescriptorWrite>,
}

#[derive(Debug)]
struct SoftPipeline {
    shader: Shader,
    compute: bool,
}

#[derive(Debug)]
struct SoftTarget {
    acquired: bool,
    presented: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    buffer: RawBuffer,
    start: u64,
    end: u64,
}

impl Span {
    fn overlaps(&self, other: &Span) -> bool {
        self.buffer == other.buffer
            && self.start < other.end
            && other.start < self.end
    }
}

#[derive(Debug)]
struct StageWrite {
    span: Span,
    stage: PipelineStage,
    visible_to: Vec<PipelineStage>,
}

#[derive(Debug)]
struct Submission {
    fence: Option<RawFence>,
    signal: Vec<RawSemaphore>,
    spans: Vec<Span>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Read,
    Write,
    ReadWrite,
}

/// How each shader uses the bindings of set 0.
fn binding_role(shader: Shader, binding: u32) -> Role {
    match (shader, binding) {
        (Shader::Cull, 3) | (Shader::Mesh, 5) => Role::Write,
        (Shader::Cull, 4) => Role::ReadWrite,
        _ => Role::Read,
    }
}

/// Per-submission execution state.
#[derive(Default)]
struct Exec {
    compute: Option<RawPipeline>,
    render: Option<RawPipeline>,
    sets: FxHashMap<u32, (RawSet, Vec<u32>)>,
    vertex: Option<Span>,
    index: Option<Span>,
    writes: Vec<StageWrite>,
    spans: Vec<Span>,
}

/// Host-memory device with synchronization checking.
#[derive(Debug)]
pub struct SoftDevice {
    next_id: u64,
    limits: DeviceLimits,
    buffers: FxHashMap<RawBuffer, SoftBuffer>,
    layouts: FxHashMap<RawSetLayout, Vec<LayoutBinding>>,
    pools: FxHashMap<RawPool, SoftPool>,
    sets: FxHashMap<RawSet, SoftSet>,
    pipelines: FxHashMap<RawPipeline, SoftPipeline>,
    targets: FxHashMap<RawTarget, SoftTarget>,
    fences: FxHashMap<RawFence, bool>,
    semaphores: FxHashMap<RawSemaphore, bool>,
    pending: VecDeque<Submission>,
    auto_complete: bool,
    injected: VecDeque<PoolAllocError>,
    allocation_attempts: usize,
    submissions: usize,
    draws: Vec<RecordedDraw>,
    readbacks: Vec<RawBuffer>,
    violations: Vec<Violation>,
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftDevice {
    /// Device with default limits that completes work on submit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    /// Device reporting `limits`.
    #[must_use]
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            next_id: 1,
            limits,
            buffers: FxHashMap::default(),
            layouts: FxHashMap::default(),
            pools: FxHashMap::default(),
            sets: FxHashMap::default(),
            pipelines: FxHashMap::default(),
            targets: FxHashMap::default(),
            fences: FxHashMap::default(),
            semaphores: FxHashMap::default(),
            pending: VecDeque::new(),
            auto_complete: true,
            injected: VecDeque::new(),
            allocation_attempts: 0,
            submissions: 0,
            draws: Vec::new(),
            readbacks: Vec::new(),
            violations: Vec::new(),
        }
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// When false, submissions stay pending until [`complete_next`] or
    /// [`complete_all`] is called.
    ///
    /// [`complete_next`]: Self::complete_next
    /// [`complete_all`]: Self::complete_all
    pub fn set_auto_complete(&mut self, auto_complete: bool) {
        self.auto_complete = auto_complete;
        if auto_complete {
            self.complete_all();
        }
    }

    /// Finish the oldest pending submission. Returns false if none is
    /// pending.
    pub fn complete_next(&mut self) -> bool {
        let Some(done) = self.pending.pop_front() else {
            return false;
        };
        self.finish(&done);
        true
    }

    /// Finish every pending submission.
    pub fn complete_all(&mut self) {
        while self.complete_next() {}
    }

    fn finish(&mut self, done: &Submission) {
        if let Some(fence) = done.fence {
            if let Some(signaled) = self.fences.get_mut(&fence) {
                *signaled = true;
            }
        }
        for semaphore in &done.signal {
            if let Some(signaled) = self.semaphores.get_mut(semaphore) {
                *signaled = true;
            }
        }
    }

    /// Submissions executed but not yet completed.
    #[must_use]
    pub fn pending_submissions(&self) -> usize {
        self.pending.len()
    }

    /// Submissions accepted so far.
    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.submissions
    }

    /// Make the next `allocate_set` call fail with `error`. Queued failures
    /// are consumed in order.
    pub fn inject_allocation_failure(&mut self, error: PoolAllocError) {
        self.injected.push_back(error);
    }

    /// `allocate_set` calls so far, including failed ones.
    #[must_use]
    pub fn allocation_attempts(&self) -> usize {
        self.allocation_attempts
    }

    /// Recorded synchronization errors.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Indirect draws executed so far.
    #[must_use]
    pub fn draws(&self) -> &[RecordedDraw] {
        &self.draws
    }

    /// Forget recorded draws.
    pub fn clear_draws(&mut self) {
        self.draws.clear();
    }

    /// Buffers named by executed `Readback` commands, in submission order.
    #[must_use]
    pub fn readbacks(&self) -> &[RawBuffer] {
        &self.readbacks
    }

    /// Copy of a buffer's contents regardless of mapping state.
    #[must_use]
    pub fn buffer_contents(&self, buffer: RawBuffer) -> Vec<u8> {
        self.buffers
            .get(&buffer)
            .map(|b| b.bytes().to_vec())
            .unwrap_or_default()
    }

    /// Debug label a buffer was created with.
    #[must_use]
    pub fn buffer_label(&self, buffer: RawBuffer) -> Option<&str> {
        self.buffers.get(&buffer).map(|b| b.label.as_str())
    }

    /// Write `bytes` into a buffer as a shader would, bypassing host checks.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if the buffer is unknown or too small.
    pub fn device_write(
        &mut self,
        buffer: RawBuffer,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), DeviceError> {
        let dst = self.bytes_mut(buffer, offset, bytes.len() as u64)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// Live buffers.
    #[must_use]
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Live descriptor-set layouts.
    #[must_use]
    pub fn live_layout_count(&self) -> usize {
        self.layouts.len()
    }

    /// Live descriptor pools.
    #[must_use]
    pub fn live_pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Live pipelines.
    #[must_use]
    pub fn live_pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Live fences and semaphores.
    #[must_use]
    pub fn live_sync_count(&self) -> usize {
        self.fences.len() + self.semaphores.len()
    }

    /// Writes currently recorded in `set`.
    #[must_use]
    pub fn set_writes(&self, set: RawSet) -> &[DescriptorWrite] {
        self.sets
            .get(&set)
            .map(|s| s.writes.as_slice())
            .unwrap_or_default()
    }

    /// Layout `set` was allocated with.
    #[must_use]
    pub fn set_layout_of(&self, set: RawSet) -> Option<RawSetLayout> {
        self.sets.get(&set).map(|s| s.layout)
    }

    /// Times `target` has been presented.
    #[must_use]
    pub fn presented_frames(&self, target: RawTarget) -> u64 {
        self.targets.get(&target).map_or(0, |t| t.presented)
    }

    fn buffer(&self, buffer: RawBuffer) -> Result<&SoftBuffer, DeviceError> {
        self.buffers.get(&buffer).ok_or(DeviceError::UnknownObject {
            kind: "buffer",
            id: buffer.id(),
        })
    }

    fn check_range(
        buffer: RawBuffer,
        size: u64,
        offset: u64,
        len: u64,
    ) -> Result<(usize, usize), DeviceError> {
        let end = offset.saturating_add(len);
        if end > size {
            return Err(DeviceError::OutOfRange { buffer, end, size });
        }
        Ok((offset as usize, end as usize))
    }

    fn bytes(
        &self,
        buffer: RawBuffer,
        offset: u64,
        len: u64,
    ) -> Result<&[u8], DeviceError> {
        let b = self.buffer(buffer)?;
        let (start, end) = Self::check_range(buffer, b.size, offset, len)?;
        Ok(&b.bytes()[start..end])
    }

    fn bytes_mut(
        &mut self,
        buffer: RawBuffer,
        offset: u64,
        len: u64,
    ) -> Result<&mut [u8], DeviceError> {
        let b = self.buffers.get_mut(&buffer).ok_or(DeviceError::UnknownObject {
            kind: "buffer",
            id: buffer.id(),
        })?;
        let (start, end) = Self::check_range(buffer, b.size, offset, len)?;
        Ok(&mut b.bytes_mut()[start..end])
    }

    fn read_pod<T: Pod>(&self, span: Span) -> Result<Vec<T>, DeviceError> {
        let bytes = self.bytes(span.buffer, span.start, span.end - span.start)?;
        let whole = bytes.len() - bytes.len() % size_of::<T>();
        Ok(bytemuck::pod_collect_to_vec(&bytes[..whole]))
    }

    fn write_pod<T: Pod>(&mut self, span: Span, values: &[T]) -> Result<(), DeviceError> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let len = (bytes.len() as u64).min(span.end - span.start);
        let dst = self.bytes_mut(span.buffer, span.start, len)?;
        dst.copy_from_slice(&bytes[..len as usize]);
        Ok(())
    }

    /// Buffer ranges a bound set exposes, with dynamic offsets applied in
    /// binding order.
    fn set_spans(
        &self,
        set: RawSet,
        dynamic_offsets: &[u32],
    ) -> Result<Vec<(u32, Span)>, DeviceError> {
        let s = self.sets.get(&set).ok_or(DeviceError::UnknownObject {
            kind: "descriptor set",
            id: set.id(),
        })?;
        let mut writes = s.writes.clone();
        writes.sort_by_key(|w| w.binding);
        let mut dynamic = dynamic_offsets.iter();
        Ok(writes
            .iter()
            .map(|w| {
                let extra = if w.kind.is_dynamic() {
                    u64::from(dynamic.next().copied().unwrap_or(0))
                } else {
                    0
                };
                let start = w.offset + extra;
                (
                    w.binding,
                    Span {
                        buffer: w.buffer,
                        start,
                        end: start + w.range,
                    },
                )
            })
            .collect())
    }

    fn access(&mut self, exec: &mut Exec, span: Span, stage: PipelineStage, role: Role) {
        for write in &exec.writes {
            if write.span.overlaps(&span)
                && write.stage != stage
                && !write.visible_to.contains(&stage)
            {
                log::warn!(
                    "unsynchronized {stage:?} access to buffer {} written in {:?}",
                    span.buffer.id(),
                    write.stage
                );
                self.violations.push(Violation::UnsyncedAccess {
                    buffer: span.buffer,
                    written_in: write.stage,
                    accessed_in: stage,
                });
            }
        }
        if role != Role::Read {
            exec.writes.push(StageWrite {
                span,
                stage,
                visible_to: Vec::new(),
            });
        }
        exec.spans.push(span);
    }

    fn barrier(exec: &mut Exec, barrier: &BufferBarrier) {
        let guarded = Span {
            buffer: barrier.buffer,
            start: barrier.offset,
            end: barrier.offset.saturating_add(barrier.size),
        };
        for write in &mut exec.writes {
            if write.stage == barrier.src_stage && write.span.overlaps(&guarded) {
                write.visible_to.extend_from_slice(&barrier.dst_stages);
            }
        }
    }

    fn pipeline_shader(
        &self,
        pipeline: RawPipeline,
        compute: bool,
    ) -> Result<Shader, DeviceError> {
        let p = self.pipelines.get(&pipeline).ok_or(DeviceError::UnknownObject {
            kind: "pipeline",
            id: pipeline.id(),
        })?;
        if p.compute != compute {
            return Err(DeviceError::Backend(format!(
                "pipeline {} bound at the wrong bind point",
                pipeline.id()
            )));
        }
        Ok(p.shader)
    }

    fn bound_set_spans(&self, exec: &Exec) -> Result<Vec<(u32, Span)>, DeviceError> {
        match exec.sets.get(&0) {
            Some((set, offsets)) => self.set_spans(*set, offsets),
            None => Ok(Vec::new()),
        }
    }

    fn dispatch(
        &mut self,
        exec: &mut Exec,
        args: Span,
    ) -> Result<(), DeviceError> {
        let pipeline = exec.compute.ok_or_else(|| {
            DeviceError::Backend("dispatch without a compute pipeline".into())
        })?;
        self.access(exec, args, PipelineStage::DrawIndirect, Role::Read);
        let groups: Vec<DispatchIndirectCommand> = self.read_pod(args)?;
        let groups = groups.first().copied().unwrap_or_default();

        let shader = self.pipeline_shader(pipeline, true)?;
        let bindings = self.bound_set_spans(exec)?;
        for &(binding, span) in &bindings {
            let role = binding_role(shader, binding);
            self.access(exec, span, PipelineStage::ComputeShader, role);
        }
        if shader != Shader::Cull {
            return Ok(());
        }

        let span_of = |binding: u32| {
            bindings
                .iter()
                .find(|(b, _)| *b == binding)
                .map(|(_, span)| *span)
                .ok_or_else(|| {
                    DeviceError::Backend(format!("cull binding {binding} not bound"))
                })
        };
        let objects: Vec<GpuObjectData> = self.read_pod(span_of(0)?)?;
        let cull: Vec<GpuCullData> = self.read_pod(span_of(1)?)?;
        let instances: Vec<GpuInstance> = self.read_pod(span_of(2)?)?;
        let mut finals: Vec<GpuFinalInstance> = self.read_pod(span_of(3)?)?;
        let mut draws: Vec<DrawIndexedIndirectCommand> = self.read_pod(span_of(4)?)?;
        let offsets: Vec<GpuOffsets> = self.read_pod(span_of(5)?)?;
        let (Some(cull), Some(offsets)) = (cull.first(), offsets.first()) else {
            return Err(DeviceError::Backend("cull parameters truncated".into()));
        };

        let invocations = groups.x * groups.y * groups.z * CULL_WORKGROUP_SIZE;
        run_cull(&objects, &instances, cull, offsets, invocations, &mut draws, &mut finals);

        self.write_pod(span_of(3)?, &finals)?;
        self.write_pod(span_of(4)?, &draws)
    }

    fn draw(&mut self, exec: &mut Exec, args: Span) -> Result<(), DeviceError> {
        let pipeline = exec.render.ok_or_else(|| {
            DeviceError::Backend("draw without a render pipeline".into())
        })?;
        self.access(exec, args, PipelineStage::DrawIndirect, Role::Read);
        let shader = self.pipeline_shader(pipeline, false)?;
        for (binding, span) in self.bound_set_spans(exec)? {
            match binding_role(shader, binding) {
                Role::Read => {
                    self.access(exec, span, PipelineStage::VertexShader, Role::Read);
                }
                role => {
                    self.access(exec, span, PipelineStage::FragmentShader, role);
                }
            }
        }
        for span in [exec.vertex, exec.index].into_iter().flatten() {
            self.access(exec, span, PipelineStage::VertexShader, Role::Read);
        }

        let command = self
            .read_pod::<DrawIndexedIndirectCommand>(args)?
            .first()
            .copied()
            .unwrap_or_default();
        self.draws.push(RecordedDraw {
            pipeline,
            buffer: args.buffer,
            offset: args.start,
            command,
        });
        Ok(())
    }

    fn whole_from(&self, buffer: RawBuffer, offset: u64) -> Result<Span, DeviceError> {
        let size = self.buffer(buffer)?.size;
        Ok(Span {
            buffer,
            start: offset.min(size),
            end: size,
        })
    }

    fn execute(&mut self, commands: &CommandList) -> Result<Vec<Span>, DeviceError> {
        let mut exec = Exec::default();
        for command in commands.commands() {
            match command {
                Command::CopyBuffer { src, dst, region } => {
                    let from = Span {
                        buffer: *src,
                        start: region.src_offset,
                        end: region.src_offset + region.size,
                    };
                    let to = Span {
                        buffer: *dst,
                        start: region.dst_offset,
                        end: region.dst_offset + region.size,
                    };
                    self.access(&mut exec, from, PipelineStage::Transfer, Role::Read);
                    let bytes = self.bytes(*src, region.src_offset, region.size)?.to_vec();
                    self.bytes_mut(*dst, region.dst_offset, region.size)?
                        .copy_from_slice(&bytes);
                    self.access(&mut exec, to, PipelineStage::Transfer, Role::Write);
                }
                Command::Barrier(barrier) => Self::barrier(&mut exec, barrier),
                Command::BeginComputePass | Command::EndComputePass => {
                    exec.sets.clear();
                }
                Command::BindComputePipeline(pipeline) => {
                    exec.compute = Some(*pipeline);
                }
                Command::BindDescriptorSet {
                    index,
                    set,
                    dynamic_offsets,
                } => {
                    let _ = exec.sets.insert(*index, (*set, dynamic_offsets.clone()));
                }
                Command::DispatchIndirect { buffer, offset } => {
                    let args = Span {
                        buffer: *buffer,
                        start: *offset,
                        end: offset + size_of::<DispatchIndirectCommand>() as u64,
                    };
                    self.dispatch(&mut exec, args)?;
                }
                Command::BeginRenderPass { target, .. } => {
                    let t = self.targets.get(target).ok_or(DeviceError::UnknownObject {
                        kind: "render target",
                        id: target.id(),
                    })?;
                    if !t.acquired {
                        return Err(DeviceError::Backend(format!(
                            "render target {} used before acquire",
                            target.id()
                        )));
                    }
                    exec.sets.clear();
                }
                Command::BindRenderPipeline(pipeline) => {
                    exec.render = Some(*pipeline);
                }
                Command::BindVertexBuffer { buffer, offset } => {
                    exec.vertex = Some(self.whole_from(*buffer, *offset)?);
                }
                Command::BindIndexBuffer { buffer, offset } => {
                    exec.index = Some(self.whole_from(*buffer, *offset)?);
                }
                Command::DrawIndexedIndirect { buffer, offset } => {
                    let args = Span {
                        buffer: *buffer,
                        start: *offset,
                        end: offset + size_of::<DrawIndexedIndirectCommand>() as u64,
                    };
                    self.draw(&mut exec, args)?;
                }
                Command::EndRenderPass => {
                    exec.sets.clear();
                    exec.vertex = None;
                    exec.index = None;
                }
                Command::Readback { buffer } => {
                    let span = self.whole_from(*buffer, 0)?;
                    self.access(&mut exec, span, PipelineStage::Transfer, Role::Read);
                    self.readbacks.push(*buffer);
                }
            }
        }
        Ok(exec.spans)
    }

    fn consume_wait(&mut self, semaphore: RawSemaphore) {
        let pending = self
            .pending
            .iter()
            .any(|s| s.signal.contains(&semaphore));
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if *signaled => *signaled = false,
            _ if pending => {}
            _ => {
                log::warn!("wait on unsignaled semaphore {}", semaphore.id());
                self.violations.push(Violation::UnsignaledWait(semaphore));
            }
        }
    }
}

impl GpuDevice for SoftDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<RawBuffer, DeviceError> {
        let id = RawBuffer(self.next());
        let words = usize::try_from(desc.size.div_ceil(4))
            .map_err(|_| DeviceError::OutOfMemory)?;
        let _ = self.buffers.insert(
            id,
            SoftBuffer {
                label: desc.label.to_owned(),
                size: desc.size,
                words: vec![0; words],
                class: desc.class,
                mapped: false,
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: RawBuffer) {
        let _ = self.buffers.remove(&buffer);
    }

    fn map_buffer(&mut self, buffer: RawBuffer) -> Result<(), DeviceError> {
        let b = self.buffers.get_mut(&buffer).ok_or(DeviceError::UnknownObject {
            kind: "buffer",
            id: buffer.id(),
        })?;
        if !b.class.is_host_visible() {
            return Err(DeviceError::Backend(format!(
                "buffer '{}' is device-local",
                b.label
            )));
        }
        b.mapped = true;
        Ok(())
    }

    fn unmap_buffer(&mut self, buffer: RawBuffer) {
        if let Some(b) = self.buffers.get_mut(&buffer) {
            b.mapped = false;
        }
    }

    fn mapped_range(
        &self,
        buffer: RawBuffer,
        offset: u64,
        len: u64,
    ) -> Result<&[u8], DeviceError> {
        if !self.buffer(buffer)?.mapped {
            return Err(DeviceError::NotMapped(buffer));
        }
        self.bytes(buffer, offset, len)
    }

    fn mapped_range_mut(
        &mut self,
        buffer: RawBuffer,
        offset: u64,
        len: u64,
    ) -> Result<&mut [u8], DeviceError> {
        if !self.buffer(buffer)?.mapped {
            return Err(DeviceError::NotMapped(buffer));
        }
        let span = Span {
            buffer,
            start: offset,
            end: offset.saturating_add(len),
        };
        let in_flight = self
            .pending
            .iter()
            .any(|s| s.spans.iter().any(|used| used.overlaps(&span)));
        if in_flight && len > 0 {
            log::warn!(
                "host write to buffer {} [{offset}, +{len}) while in flight",
                buffer.id()
            );
            self.violations.push(Violation::HostWriteInFlight {
                buffer,
                offset,
                len,
            });
        }
        self.bytes_mut(buffer, offset, len)
    }

    fn create_set_layout(
        &mut self,
        bindings: &[LayoutBinding],
    ) -> Result<RawSetLayout, DeviceError> {
        let id = RawSetLayout(self.next());
        let _ = self.layouts.insert(id, bindings.to_vec());
        Ok(id)
    }

    fn destroy_set_layout(&mut self, layout: RawSetLayout) {
        let _ = self.layouts.remove(&layout);
    }

    fn create_descriptor_pool(
        &mut self,
        max_sets: u32,
        sizes: &[(DescriptorKind, u32)],
    ) -> Result<RawPool, DeviceError> {
        let id = RawPool(self.next());
        let _ = self.pools.insert(
            id,
            SoftPool {
                max_sets,
                quotas: sizes.iter().copied().collect(),
                used: FxHashMap::default(),
                sets: Vec::new(),
            },
        );
        Ok(id)
    }

    fn reset_descriptor_pool(&mut self, pool: RawPool) {
        if let Some(p) = self.pools.get_mut(&pool) {
            for set in p.sets.drain(..) {
                let _ = self.sets.remove(&set);
            }
            p.used.clear();
        }
    }

    fn destroy_descriptor_pool(&mut self, pool: RawPool) {
        self.reset_descriptor_pool(pool);
        let _ = self.pools.remove(&pool);
    }

    fn allocate_set(
        &mut self,
        pool: RawPool,
        layout: RawSetLayout,
    ) -> Result<RawSet, PoolAllocError> {
        self.allocation_attempts += 1;
        if let Some(error) = self.injected.pop_front() {
            return Err(error);
        }
        let bindings = self.layouts.get(&layout).ok_or(PoolAllocError::Other(
            DeviceError::UnknownObject {
                kind: "set layout",
                id: layout.id(),
            },
        ))?;
        let mut need: FxHashMap<DescriptorKind, u32> = FxHashMap::default();
        for b in bindings {
            *need.entry(b.kind).or_default() += b.count;
        }

        let p = self.pools.get(&pool).ok_or(PoolAllocError::Other(
            DeviceError::UnknownObject {
                kind: "descriptor pool",
                id: pool.id(),
            },
        ))?;
        if p.sets.len() as u32 >= p.max_sets {
            return Err(PoolAllocError::OutOfPoolMemory);
        }
        let fits = need.iter().all(|(kind, n)| {
            let used = p.used.get(kind).copied().unwrap_or(0);
            used + n <= p.quotas.get(kind).copied().unwrap_or(0)
        });
        if !fits {
            return Err(PoolAllocError::OutOfPoolMemory);
        }

        let id = RawSet(self.next());
        if let Some(p) = self.pools.get_mut(&pool) {
            for (kind, n) in need {
                *p.used.entry(kind).or_default() += n;
            }
            p.sets.push(id);
        }
        let _ = self.sets.insert(
            id,
            SoftSet {
                layout,
                writes: Vec::new(),
            },
        );
        Ok(id)
    }

    fn update_set(
        &mut self,
        set: RawSet,
        writes: &[DescriptorWrite],
    ) -> Result<(), DeviceError> {
        for w in writes {
            let size = self.buffer(w.buffer)?.size;
            let _ = Self::check_range(w.buffer, size, w.offset, w.range)?;
        }
        let s = self.sets.get_mut(&set).ok_or(DeviceError::UnknownObject {
            kind: "descriptor set",
            id: set.id(),
        })?;
        for w in writes {
            s.writes.retain(|old| old.binding != w.binding);
            s.writes.push(*w);
        }
        Ok(())
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc<'_>,
    ) -> Result<RawPipeline, DeviceError> {
        if let Some(missing) = desc.set_layouts.iter().find(|l| !self.layouts.contains_key(*l)) {
            return Err(DeviceError::UnknownObject {
                kind: "set layout",
                id: missing.id(),
            });
        }
        let id = RawPipeline(self.next());
        let _ = self.pipelines.insert(
            id,
            SoftPipeline {
                shader: desc.shader,
                compute: true,
            },
        );
        Ok(id)
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDesc<'_>,
    ) -> Result<RawPipeline, DeviceError> {
        if let Some(missing) = desc.set_layouts.iter().find(|l| !self.layouts.contains_key(*l)) {
            return Err(DeviceError::UnknownObject {
                kind: "set layout",
                id: missing.id(),
            });
        }
        let id = RawPipeline(self.next());
        let _ = self.pipelines.insert(
            id,
            SoftPipeline {
                shader: desc.shader,
                compute: false,
            },
        );
        Ok(id)
    }

    fn destroy_pipeline(&mut self, pipeline: RawPipeline) {
        let _ = self.pipelines.remove(&pipeline);
    }

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<RawTarget, DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::Backend(format!(
                "empty render target {width}x{height}"
            )));
        }
        let id = RawTarget(self.next());
        let _ = self.targets.insert(
            id,
            SoftTarget {
                acquired: false,
                presented: 0,
            },
        );
        Ok(id)
    }

    fn destroy_render_target(&mut self, target: RawTarget) {
        let _ = self.targets.remove(&target);
    }

    fn acquire_target(
        &mut self,
        target: RawTarget,
        signal: RawSemaphore,
    ) -> Result<(), DeviceError> {
        let t = self.targets.get_mut(&target).ok_or(DeviceError::UnknownObject {
            kind: "render target",
            id: target.id(),
        })?;
        t.acquired = true;
        if let Some(signaled) = self.semaphores.get_mut(&signal) {
            *signaled = true;
        }
        Ok(())
    }

    fn present_target(
        &mut self,
        target: RawTarget,
        wait: RawSemaphore,
    ) -> Result<(), DeviceError> {
        self.consume_wait(wait);
        let t = self.targets.get_mut(&target).ok_or(DeviceError::UnknownObject {
            kind: "render target",
            id: target.id(),
        })?;
        t.acquired = false;
        t.presented += 1;
        Ok(())
    }

    fn create_fence(&mut self, signaled: bool) -> Result<RawFence, DeviceError> {
        let id = RawFence(self.next());
        let _ = self.fences.insert(id, signaled);
        Ok(id)
    }

    fn wait_fence(
        &mut self,
        fence: RawFence,
        timeout: Duration,
    ) -> Result<(), FenceError> {
        match self.fences.get(&fence) {
            Some(true) => Ok(()),
            Some(false) => Err(FenceError::Timeout(timeout)),
            None => Err(FenceError::Unknown(fence)),
        }
    }

    fn reset_fence(&mut self, fence: RawFence) {
        if let Some(signaled) = self.fences.get_mut(&fence) {
            *signaled = false;
        }
    }

    fn destroy_fence(&mut self, fence: RawFence) {
        let _ = self.fences.remove(&fence);
    }

    fn create_semaphore(&mut self) -> Result<RawSemaphore, DeviceError> {
        let id = RawSemaphore(self.next());
        let _ = self.semaphores.insert(id, false);
        Ok(id)
    }

    fn destroy_semaphore(&mut self, semaphore: RawSemaphore) {
        let _ = self.semaphores.remove(&semaphore);
    }

    fn submit(
        &mut self,
        commands: &CommandList,
        info: &SubmitInfo,
    ) -> Result<(), DeviceError> {
        for wait in &info.wait {
            self.consume_wait(wait.semaphore);
        }
        let spans = self.execute(commands)?;
        self.submissions += 1;

        let submission = Submission {
            fence: info.fence,
            signal: info.signal.clone(),
            spans,
        };
        if self.auto_complete {
            self.finish(&submission);
        } else {
            self.pending.push_back(submission);
        }
        Ok(())
    }

    fn wait_idle(&mut self) {
        self.complete_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::command::{BufferCopy, SemaphoreWait};

    fn buffer(device: &mut SoftDevice, size: u64, class: MemoryClass) -> RawBuffer {
        device
            .create_buffer(&BufferDesc {
                label: "test",
                size,
                usage: wgpu::BufferUsages::empty(),
                class,
            })
            .unwrap()
    }

    fn draw_setup(device: &mut SoftDevice) -> (RawTarget, RawPipeline, RawSemaphore) {
        let layout = device.create_set_layout(&[]).unwrap();
        let pipeline = device
            .create_render_pipeline(&RenderPipelineDesc {
                label: "mesh",
                shader: Shader::Mesh,
                vertex_entry: "vs_main",
                fragment_entry: "fs_main",
                set_layouts: &[layout],
            })
            .unwrap();
        let target = device.create_render_target(4, 4).unwrap();
        let acquired = device.create_semaphore().unwrap();
        device.acquire_target(target, acquired).unwrap();
        (target, pipeline, acquired)
    }

    fn copy_then_draw(
        template: RawBuffer,
        draws: RawBuffer,
        target: RawTarget,
        pipeline: RawPipeline,
        barrier: bool,
    ) -> CommandList {
        let mut list = CommandList::new();
        list.copy_buffer(
            template,
            draws,
            BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 20,
            },
        );
        if barrier {
            list.barrier(
                draws,
                0,
                20,
                PipelineStage::Transfer,
                &[PipelineStage::DrawIndirect],
            );
        }
        list.push(Command::BeginRenderPass {
            target,
            clear: [0.0; 4],
        });
        list.push(Command::BindRenderPipeline(pipeline));
        list.push(Command::DrawIndexedIndirect {
            buffer: draws,
            offset: 0,
        });
        list.push(Command::EndRenderPass);
        list
    }

    #[test]
    fn missing_barrier_is_reported() {
        let mut device = SoftDevice::new();
        let template = buffer(&mut device, 20, MemoryClass::DeviceLocal);
        let draws = buffer(&mut device, 20, MemoryClass::DeviceLocal);
        let (target, pipeline, _) = draw_setup(&mut device);

        let list = copy_then_draw(template, draws, target, pipeline, false);
        device.submit(&list, &SubmitInfo::default()).unwrap();
        assert_eq!(
            device.violations(),
            &[Violation::UnsyncedAccess {
                buffer: draws,
                written_in: PipelineStage::Transfer,
                accessed_in: PipelineStage::DrawIndirect,
            }]
        );
    }

    #[test]
    fn barrier_makes_copy_visible_to_draw() {
        let mut device = SoftDevice::new();
        let template = buffer(&mut device, 20, MemoryClass::HostVisible);
        let draws = buffer(&mut device, 20, MemoryClass::DeviceLocal);
        let (target, pipeline, _) = draw_setup(&mut device);

        device.map_buffer(template).unwrap();
        device
            .mapped_range_mut(template, 0, 20)
            .unwrap()
            .copy_from_slice(bytemuck::bytes_of(&DrawIndexedIndirectCommand {
                index_count: 36,
                instance_count: 0,
                first_index: 6,
                base_vertex: 0,
                first_instance: 0,
            }));

        let list = copy_then_draw(template, draws, target, pipeline, true);
        device.submit(&list, &SubmitInfo::default()).unwrap();
        assert!(device.violations().is_empty());
        assert_eq!(device.draws().len(), 1);
        assert_eq!(device.draws()[0].command.index_count, 36);
        assert_eq!(device.draws()[0].command.first_index, 6);
    }

    #[test]
    fn manual_fences_signal_only_on_completion() {
        let mut device = SoftDevice::new();
        device.set_auto_complete(false);
        let fence = device.create_fence(false).unwrap();
        device
            .submit(
                &CommandList::new(),
                &SubmitInfo {
                    fence: Some(fence),
                    ..SubmitInfo::default()
                },
            )
            .unwrap();
        assert!(matches!(
            device.wait_fence(fence, Duration::from_millis(1)),
            Err(FenceError::Timeout(_))
        ));
        assert!(device.complete_next());
        device.wait_fence(fence, Duration::from_millis(1)).unwrap();
        assert!(!device.complete_next());
    }

    #[test]
    fn host_write_into_in_flight_range_is_reported() {
        let mut device = SoftDevice::new();
        device.set_auto_complete(false);
        let src = buffer(&mut device, 64, MemoryClass::HostVisible);
        let dst = buffer(&mut device, 64, MemoryClass::DeviceLocal);
        device.map_buffer(src).unwrap();

        let mut list = CommandList::new();
        list.copy_buffer(
            src,
            dst,
            BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 32,
            },
        );
        device.submit(&list, &SubmitInfo::default()).unwrap();

        let _ = device.mapped_range_mut(src, 32, 32).unwrap();
        assert!(device.violations().is_empty(), "disjoint range is safe");
        let _ = device.mapped_range_mut(src, 16, 4).unwrap();
        assert_eq!(
            device.violations(),
            &[Violation::HostWriteInFlight {
                buffer: src,
                offset: 16,
                len: 4,
            }]
        );

        device.complete_all();
        let _ = device.mapped_range_mut(src, 0, 64).unwrap();
        assert_eq!(device.violations().len(), 1);
    }

    #[test]
    fn semaphore_waits_are_tracked() {
        let mut device = SoftDevice::new();
        let (target, _, acquired) = draw_setup(&mut device);
        let rendered = device.create_semaphore().unwrap();
        let info = SubmitInfo {
            wait: vec![SemaphoreWait {
                semaphore: acquired,
                stage: PipelineStage::ColorAttachmentOutput,
            }],
            signal: vec![rendered],
            fence: None,
        };
        device.submit(&CommandList::new(), &info).unwrap();
        device.present_target(target, rendered).unwrap();
        assert!(device.violations().is_empty());
        assert_eq!(device.presented_frames(target), 1);

        // Nothing re-acquired the target, so this wait can never be met.
        device.submit(&CommandList::new(), &info).unwrap();
        assert_eq!(device.violations(), &[Violation::UnsignaledWait(acquired)]);
    }

    #[test]
    fn pool_quota_exhaustion_is_reported() {
        let mut device = SoftDevice::new();
        let layout = device
            .create_set_layout(&[LayoutBinding::new(
                0,
                DescriptorKind::StorageBuffer,
                wgpu::ShaderStages::COMPUTE,
            )])
            .unwrap();
        let pool = device
            .create_descriptor_pool(10, &[(DescriptorKind::StorageBuffer, 2)])
            .unwrap();
        let _ = device.allocate_set(pool, layout).unwrap();
        let _ = device.allocate_set(pool, layout).unwrap();
        assert_eq!(
            device.allocate_set(pool, layout),
            Err(PoolAllocError::OutOfPoolMemory)
        );
        device.reset_descriptor_pool(pool);
        let _ = device.allocate_set(pool, layout).unwrap();
    }

    #[test]
    fn device_local_buffers_refuse_mapping() {
        let mut device = SoftDevice::new();
        let b = buffer(&mut device, 16, MemoryClass::DeviceLocal);
        assert!(device.map_buffer(b).is_err());
        assert!(matches!(
            device.mapped_range(b, 0, 4),
            Err(DeviceError::NotMapped(_))
        ));
    }
}
