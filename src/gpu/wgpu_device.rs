//! [`GpuDevice`] on wgpu.
//!
//! wgpu has no persistent host mappings, fences or explicit barriers, so this
//! backend emulates them:
//!
//! - host-visible buffers keep a host shadow; ranges written through
//!   [`GpuDevice::mapped_range_mut`] are flushed with `Queue::write_buffer`
//!   right before the next submission;
//! - [`MemoryClass::HostReadback`] buffers named by a `Readback` command are
//!   copied into a `MAP_READ` staging buffer at the end of the submission,
//!   and the shadow is refreshed when the submission's fence is waited;
//! - fences flip an atomic flag from `Queue::on_submitted_work_done`;
//! - semaphores and barriers are no-ops because queue work is ordered.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};
use web_time::Instant;

use super::command::{Command, CommandList, SubmitInfo};
use super::depth_stencil_state;
use super::device::{
    BufferDesc, ComputePipelineDesc, DescriptorKind, DescriptorWrite,
    DeviceError, DeviceLimits, FenceError, GpuDevice, LayoutBinding,
    MemoryClass, PoolAllocError, RawBuffer, RawFence, RawPipeline, RawPool,
    RawSemaphore, RawSet, RawSetLayout, RawTarget, RenderPipelineDesc,
};
use super::render_context::RenderContext;
use super::shader_composer::{Shader, ShaderComposer, ShaderError};
use crate::mesh::BasicVertex;

/// Color format of offscreen render targets.
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct Buffer {
    buffer: wgpu::Buffer,
    size: u64,
    class: MemoryClass,
    shadow: Vec<u8>,
    mapped: bool,
    dirty: Option<(u64, u64)>,
    readback: Option<wgpu::Buffer>,
}

struct Pool {
    max_sets: u32,
    quotas: FxHashMap<DescriptorKind, u32>,
    used: FxHashMap<DescriptorKind, u32>,
    sets: Vec<RawSet>,
}

struct Set {
    layout: RawSetLayout,
    writes: Vec<DescriptorWrite>,
    group: Option<wgpu::BindGroup>,
}

struct SetLayout {
    layout: wgpu::BindGroupLayout,
    bindings: Vec<LayoutBinding>,
}

enum Pipeline {
    Compute(wgpu::ComputePipeline),
    Render(wgpu::RenderPipeline),
}

struct Target {
    _color: wgpu::Texture,
    color_view: wgpu::TextureView,
    _depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
    presented: u64,
}

struct Fence {
    signaled: Arc<AtomicBool>,
    readbacks: Vec<RawBuffer>,
}

/// wgpu-backed device.
pub struct WgpuDevice {
    context: RenderContext,
    composer: ShaderComposer,
    modules: FxHashMap<Shader, wgpu::ShaderModule>,
    next_id: u64,
    buffers: FxHashMap<RawBuffer, Buffer>,
    layouts: FxHashMap<RawSetLayout, SetLayout>,
    pools: FxHashMap<RawPool, Pool>,
    sets: FxHashMap<RawSet, Set>,
    pipelines: FxHashMap<RawPipeline, Pipeline>,
    targets: FxHashMap<RawTarget, Target>,
    fences: FxHashMap<RawFence, Fence>,
    semaphores: FxHashSet<RawSemaphore>,
}

fn align4_down(n: u64) -> u64 {
    n & !(wgpu::COPY_BUFFER_ALIGNMENT - 1)
}

fn align4_up(n: u64) -> u64 {
    n.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT
}

fn binding_type(binding: &LayoutBinding) -> Result<wgpu::BindingType, DeviceError> {
    // Layouts carry no access mode: vertex-visible storage is read-only and
    // every other storage binding is read-write. Shaders declare to match.
    let read_only = binding.stages.contains(wgpu::ShaderStages::VERTEX);
    let ty = match binding.kind {
        DescriptorKind::UniformBuffer | DescriptorKind::UniformBufferDynamic => {
            wgpu::BufferBindingType::Uniform
        }
        DescriptorKind::StorageBuffer | DescriptorKind::StorageBufferDynamic => {
            wgpu::BufferBindingType::Storage { read_only }
        }
        other => {
            return Err(DeviceError::Backend(format!(
                "{other:?} bindings are not supported"
            )))
        }
    };
    Ok(wgpu::BindingType::Buffer {
        ty,
        has_dynamic_offset: binding.kind.is_dynamic(),
        min_binding_size: None,
    })
}

impl WgpuDevice {
    /// Wrap a render context. Shaders are composed lazily.
    ///
    /// # Errors
    ///
    /// Returns [`ShaderError`] if the shared shader modules fail to parse.
    pub fn new(context: RenderContext) -> Result<Self, ShaderError> {
        Ok(Self {
            context,
            composer: ShaderComposer::new()?,
            modules: FxHashMap::default(),
            next_id: 1,
            buffers: FxHashMap::default(),
            layouts: FxHashMap::default(),
            pools: FxHashMap::default(),
            sets: FxHashMap::default(),
            pipelines: FxHashMap::default(),
            targets: FxHashMap::default(),
            fences: FxHashMap::default(),
            semaphores: FxHashSet::default(),
        })
    }

    /// The wrapped context.
    #[must_use]
    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn module(&mut self, shader: Shader) -> Result<wgpu::ShaderModule, DeviceError> {
        if let Some(module) = self.modules.get(&shader) {
            return Ok(module.clone());
        }
        let module = self
            .composer
            .compose(&self.context.device, shader)
            .map_err(|e| DeviceError::Backend(e.to_string()))?;
        let _ = self.modules.insert(shader, module.clone());
        Ok(module)
    }

    fn buffer(&self, buffer: RawBuffer) -> Result<&Buffer, DeviceError> {
        self.buffers.get(&buffer).ok_or(DeviceError::UnknownObject {
            kind: "buffer",
            id: buffer.id(),
        })
    }

    fn pipeline_layout(
        &self,
        label: &str,
        set_layouts: &[RawSetLayout],
    ) -> Result<wgpu::PipelineLayout, DeviceError> {
        let layouts = set_layouts
            .iter()
            .map(|id| {
                self.layouts.get(id).map(|l| &l.layout).ok_or(
                    DeviceError::UnknownObject {
                        kind: "set layout",
                        id: id.id(),
                    },
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self
            .context
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            }))
    }

    /// Rebuild the bind group of `set` once every layout binding is written.
    fn rebuild_group(&mut self, set: RawSet) -> Result<(), DeviceError> {
        let Some(s) = self.sets.get(&set) else {
            return Err(DeviceError::UnknownObject {
                kind: "descriptor set",
                id: set.id(),
            });
        };
        let layout = self.layouts.get(&s.layout).ok_or(DeviceError::UnknownObject {
            kind: "set layout",
            id: s.layout.id(),
        })?;
        let complete = layout
            .bindings
            .iter()
            .all(|b| s.writes.iter().any(|w| w.binding == b.binding));
        if !complete {
            return Ok(());
        }

        let mut entries = Vec::with_capacity(s.writes.len());
        for w in &s.writes {
            entries.push(wgpu::BindGroupEntry {
                binding: w.binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &self.buffer(w.buffer)?.buffer,
                    offset: w.offset,
                    size: NonZeroU64::new(w.range),
                }),
            });
        }
        let group = self
            .context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Descriptor Set"),
                layout: &layout.layout,
                entries: &entries,
            });
        if let Some(s) = self.sets.get_mut(&set) {
            s.group = Some(group);
        }
        Ok(())
    }

    fn group(&self, set: RawSet) -> Result<&wgpu::BindGroup, DeviceError> {
        self.sets
            .get(&set)
            .and_then(|s| s.group.as_ref())
            .ok_or_else(|| {
                DeviceError::Backend(format!(
                    "descriptor set {} bound before being fully written",
                    set.id()
                ))
            })
    }

    fn flush_shadows(&mut self) {
        for b in self.buffers.values_mut() {
            if let Some((start, end)) = b.dirty.take() {
                self.context.queue.write_buffer(
                    &b.buffer,
                    start,
                    &b.shadow[start as usize..end as usize],
                );
            }
        }
    }

    fn encode(
        &self,
        commands: &CommandList,
        encoder: &mut wgpu::CommandEncoder,
    ) -> Result<Vec<RawBuffer>, DeviceError> {
        let mut readbacks = Vec::new();
        let mut compute: Option<wgpu::ComputePass<'static>> = None;
        let mut render: Option<wgpu::RenderPass<'static>> = None;

        for command in commands.commands() {
            match command {
                Command::CopyBuffer { src, dst, region } => {
                    encoder.copy_buffer_to_buffer(
                        &self.buffer(*src)?.buffer,
                        region.src_offset,
                        &self.buffer(*dst)?.buffer,
                        region.dst_offset,
                        region.size,
                    );
                }
                Command::Barrier(_) => {}
                Command::BeginComputePass => {
                    compute = Some(
                        encoder
                            .begin_compute_pass(&wgpu::ComputePassDescriptor {
                                label: Some("Cull Pass"),
                                timestamp_writes: None,
                            })
                            .forget_lifetime(),
                    );
                }
                Command::BindComputePipeline(id) => {
                    if let (Some(pass), Some(Pipeline::Compute(p))) =
                        (compute.as_mut(), self.pipelines.get(id))
                    {
                        pass.set_pipeline(p);
                    }
                }
                Command::BindDescriptorSet {
                    index,
                    set,
                    dynamic_offsets,
                } => {
                    let group = self.group(*set)?;
                    if let Some(pass) = compute.as_mut() {
                        pass.set_bind_group(*index, group, dynamic_offsets);
                    } else if let Some(pass) = render.as_mut() {
                        pass.set_bind_group(*index, group, dynamic_offsets);
                    }
                }
                Command::DispatchIndirect { buffer, offset } => {
                    if let Some(pass) = compute.as_mut() {
                        pass.dispatch_workgroups_indirect(
                            &self.buffer(*buffer)?.buffer,
                            *offset,
                        );
                    }
                }
                Command::EndComputePass => compute = None,
                Command::BeginRenderPass { target, clear } => {
                    let t = self.targets.get(target).ok_or(DeviceError::UnknownObject {
                        kind: "render target",
                        id: target.id(),
                    })?;
                    let [r, g, b, a] = clear.map(f64::from);
                    render = Some(
                        encoder
                            .begin_render_pass(&wgpu::RenderPassDescriptor {
                                label: Some("Mesh Pass"),
                                color_attachments: &[Some(
                                    wgpu::RenderPassColorAttachment {
                                        view: &t.color_view,
                                        depth_slice: None,
                                        resolve_target: None,
                                        ops: wgpu::Operations {
                                            load: wgpu::LoadOp::Clear(
                                                wgpu::Color { r, g, b, a },
                                            ),
                                            store: wgpu::StoreOp::Store,
                                        },
                                    },
                                )],
                                depth_stencil_attachment: Some(
                                    wgpu::RenderPassDepthStencilAttachment {
                                        view: &t.depth_view,
                                        depth_ops: Some(wgpu::Operations {
                                            load: wgpu::LoadOp::Clear(1.0),
                                            store: wgpu::StoreOp::Store,
                                        }),
                                        stencil_ops: None,
                                    },
                                ),
                                ..Default::default()
                            })
                            .forget_lifetime(),
                    );
                }
                Command::BindRenderPipeline(id) => {
                    if let (Some(pass), Some(Pipeline::Render(p))) =
                        (render.as_mut(), self.pipelines.get(id))
                    {
                        pass.set_pipeline(p);
                    }
                }
                Command::BindVertexBuffer { buffer, offset } => {
                    if let Some(pass) = render.as_mut() {
                        pass.set_vertex_buffer(
                            0,
                            self.buffer(*buffer)?.buffer.slice(*offset..),
                        );
                    }
                }
                Command::BindIndexBuffer { buffer, offset } => {
                    if let Some(pass) = render.as_mut() {
                        pass.set_index_buffer(
                            self.buffer(*buffer)?.buffer.slice(*offset..),
                            wgpu::IndexFormat::Uint32,
                        );
                    }
                }
                Command::DrawIndexedIndirect { buffer, offset } => {
                    if let Some(pass) = render.as_mut() {
                        pass.draw_indexed_indirect(
                            &self.buffer(*buffer)?.buffer,
                            *offset,
                        );
                    }
                }
                Command::EndRenderPass => render = None,
                Command::Readback { buffer } => {
                    if self.buffer(*buffer)?.readback.is_some() && !readbacks.contains(buffer) {
                        readbacks.push(*buffer);
                    }
                }
            }
        }
        drop(compute);
        drop(render);

        for id in &readbacks {
            let b = self.buffer(*id)?;
            if let Some(staging) = &b.readback {
                encoder.copy_buffer_to_buffer(&b.buffer, 0, staging, 0, staging.size());
            }
        }
        Ok(readbacks)
    }

    /// Map each readback staging buffer and refresh the host shadow.
    fn finish_readbacks(
        &mut self,
        readbacks: &[RawBuffer],
        deadline: Instant,
        timeout: Duration,
    ) -> Result<(), FenceError> {
        for id in readbacks {
            let Some(b) = self.buffers.get_mut(id) else {
                continue;
            };
            let Some(staging) = &b.readback else {
                continue;
            };
            let slice = staging.slice(..);
            let (tx, rx) = mpsc::channel();
            slice.map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
            let mapped = loop {
                if let Ok(result) = rx.try_recv() {
                    break result.is_ok();
                }
                if Instant::now() >= deadline {
                    return Err(FenceError::Timeout(timeout));
                }
                let _ = self
                    .context
                    .device
                    .poll(wgpu::PollType::Poll)
                    .map_err(|_| FenceError::DeviceLost)?;
                std::thread::yield_now();
            };
            if !mapped {
                return Err(FenceError::DeviceLost);
            }
            {
                let data = slice.get_mapped_range();
                let len = b.shadow.len().min(data.len());
                b.shadow[..len].copy_from_slice(&data[..len]);
            }
            staging.unmap();
        }
        Ok(())
    }
}

impl GpuDevice for WgpuDevice {
    fn limits(&self) -> DeviceLimits {
        let limits = self.context.device.limits();
        DeviceLimits {
            min_uniform_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            min_storage_offset_alignment: limits.min_storage_buffer_offset_alignment,
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<RawBuffer, DeviceError> {
        let padded = align4_up(desc.size.max(wgpu::COPY_BUFFER_ALIGNMENT));
        let mut usage = desc.usage;
        if desc.class.is_host_visible() {
            usage |= wgpu::BufferUsages::COPY_DST;
        }
        if desc.class == MemoryClass::HostReadback {
            usage |= wgpu::BufferUsages::COPY_SRC;
        }
        let buffer = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: padded,
            usage,
            mapped_at_creation: false,
        });
        let readback = (desc.class == MemoryClass::HostReadback).then(|| {
            self.context.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label),
                size: padded,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        let shadow = if desc.class.is_host_visible() {
            vec![0; padded as usize]
        } else {
            Vec::new()
        };

        let id = RawBuffer(self.next());
        let _ = self.buffers.insert(
            id,
            Buffer {
                buffer,
                size: desc.size,
                class: desc.class,
                shadow,
                mapped: false,
                dirty: None,
                readback,
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: RawBuffer) {
        if let Some(b) = self.buffers.remove(&buffer) {
            b.buffer.destroy();
            if let Some(staging) = b.readback {
                staging.destroy();
            }
        }
    }

    fn map_buffer(&mut self, buffer: RawBuffer) -> Result<(), DeviceError> {
        let b = self.buffers.get_mut(&buffer).ok_or(DeviceError::UnknownObject {
            kind: "buffer",
            id: buffer.id(),
        })?;
        if !b.class.is_host_visible() {
            return Err(DeviceError::Backend("device-local buffer mapped".into()));
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
        let b = self.buffer(buffer)?;
        if !b.mapped {
            return Err(DeviceError::NotMapped(buffer));
        }
        let end = offset.saturating_add(len);
        if end > b.size {
            return Err(DeviceError::OutOfRange {
                buffer,
                end,
                size: b.size,
            });
        }
        Ok(&b.shadow[offset as usize..end as usize])
    }

    fn mapped_range_mut(
        &mut self,
        buffer: RawBuffer,
        offset: u64,
        len: u64,
    ) -> Result<&mut [u8], DeviceError> {
        let b = self.buffers.get_mut(&buffer).ok_or(DeviceError::UnknownObject {
            kind: "buffer",
            id: buffer.id(),
        })?;
        if !b.mapped {
            return Err(DeviceError::NotMapped(buffer));
        }
        let end = offset.saturating_add(len);
        if end > b.size {
            return Err(DeviceError::OutOfRange {
                buffer,
                end,
                size: b.size,
            });
        }
        if len > 0 {
            let start = align4_down(offset);
            let stop = align4_up(end).min(b.shadow.len() as u64);
            b.dirty = Some(match b.dirty {
                Some((s, e)) => (s.min(start), e.max(stop)),
                None => (start, stop),
            });
        }
        Ok(&mut b.shadow[offset as usize..end as usize])
    }

    fn create_set_layout(
        &mut self,
        bindings: &[LayoutBinding],
    ) -> Result<RawSetLayout, DeviceError> {
        let entries = bindings
            .iter()
            .map(|b| {
                Ok(wgpu::BindGroupLayoutEntry {
                    binding: b.binding,
                    visibility: b.stages,
                    ty: binding_type(b)?,
                    count: None,
                })
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;
        let layout = self
            .context
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Descriptor Layout"),
                entries: &entries,
            });
        let id = RawSetLayout(self.next());
        let _ = self.layouts.insert(
            id,
            SetLayout {
                layout,
                bindings: bindings.to_vec(),
            },
        );
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
            Pool {
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
        let bindings = &self
            .layouts
            .get(&layout)
            .ok_or(PoolAllocError::Other(DeviceError::UnknownObject {
                kind: "set layout",
                id: layout.id(),
            }))?
            .bindings;
        let mut need: FxHashMap<DescriptorKind, u32> = FxHashMap::default();
        for b in bindings {
            *need.entry(b.kind).or_default() += b.count;
        }
        let p = self.pools.get_mut(&pool).ok_or(PoolAllocError::Other(
            DeviceError::UnknownObject {
                kind: "descriptor pool",
                id: pool.id(),
            },
        ))?;
        if p.sets.len() as u32 >= p.max_sets {
            return Err(PoolAllocError::OutOfPoolMemory);
        }
        let fits = need.iter().all(|(kind, n)| {
            p.used.get(kind).copied().unwrap_or(0) + n
                <= p.quotas.get(kind).copied().unwrap_or(0)
        });
        if !fits {
            return Err(PoolAllocError::OutOfPoolMemory);
        }
        for (kind, n) in need {
            *p.used.entry(kind).or_default() += n;
        }

        let id = RawSet(self.next());
        if let Some(p) = self.pools.get_mut(&pool) {
            p.sets.push(id);
        }
        let _ = self.sets.insert(
            id,
            Set {
                layout,
                writes: Vec::new(),
                group: None,
            },
        );
        Ok(id)
    }

    fn update_set(
        &mut self,
        set: RawSet,
        writes: &[DescriptorWrite],
    ) -> Result<(), DeviceError> {
        let s = self.sets.get_mut(&set).ok_or(DeviceError::UnknownObject {
            kind: "descriptor set",
            id: set.id(),
        })?;
        for w in writes {
            s.writes.retain(|old| old.binding != w.binding);
            s.writes.push(*w);
        }
        s.writes.sort_by_key(|w| w.binding);
        self.rebuild_group(set)
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc<'_>,
    ) -> Result<RawPipeline, DeviceError> {
        let module = self.module(desc.shader)?;
        let layout = self.pipeline_layout(desc.label, desc.set_layouts)?;
        let pipeline = self.context.device.create_compute_pipeline(
            &wgpu::ComputePipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&layout),
                module: &module,
                entry_point: Some(desc.entry_point),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            },
        );
        let id = RawPipeline(self.next());
        let _ = self.pipelines.insert(id, Pipeline::Compute(pipeline));
        Ok(id)
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDesc<'_>,
    ) -> Result<RawPipeline, DeviceError> {
        let module = self.module(desc.shader)?;
        let layout = self.pipeline_layout(desc.label, desc.set_layouts)?;
        let pipeline = self.context.device.create_render_pipeline(
            &wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some(desc.vertex_entry),
                    buffers: &[BasicVertex::layout()],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some(desc.fragment_entry),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: Some(wgpu::Face::Back),
                    ..Default::default()
                },
                depth_stencil: Some(depth_stencil_state()),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            },
        );
        let id = RawPipeline(self.next());
        let _ = self.pipelines.insert(id, Pipeline::Render(pipeline));
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
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = |label, format, usage| {
            self.context.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };
        let color = texture(
            "Color Target",
            COLOR_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let depth = texture(
            "Depth Target",
            depth_stencil_state().format,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        );
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        let id = RawTarget(self.next());
        let _ = self.targets.insert(
            id,
            Target {
                _color: color,
                color_view,
                _depth: depth,
                depth_view,
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
        _signal: RawSemaphore,
    ) -> Result<(), DeviceError> {
        if self.targets.contains_key(&target) {
            Ok(())
        } else {
            Err(DeviceError::UnknownObject {
                kind: "render target",
                id: target.id(),
            })
        }
    }

    fn present_target(
        &mut self,
        target: RawTarget,
        _wait: RawSemaphore,
    ) -> Result<(), DeviceError> {
        let t = self.targets.get_mut(&target).ok_or(DeviceError::UnknownObject {
            kind: "render target",
            id: target.id(),
        })?;
        t.presented += 1;
        Ok(())
    }

    fn create_fence(&mut self, signaled: bool) -> Result<RawFence, DeviceError> {
        let id = RawFence(self.next());
        let _ = self.fences.insert(
            id,
            Fence {
                signaled: Arc::new(AtomicBool::new(signaled)),
                readbacks: Vec::new(),
            },
        );
        Ok(id)
    }

    fn wait_fence(
        &mut self,
        fence: RawFence,
        timeout: Duration,
    ) -> Result<(), FenceError> {
        let deadline = Instant::now() + timeout;
        let flag = self
            .fences
            .get(&fence)
            .map(|f| Arc::clone(&f.signaled))
            .ok_or(FenceError::Unknown(fence))?;
        while !flag.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                return Err(FenceError::Timeout(timeout));
            }
            let _ = self
                .context
                .device
                .poll(wgpu::PollType::Poll)
                .map_err(|_| FenceError::DeviceLost)?;
            std::thread::yield_now();
        }
        let readbacks = self
            .fences
            .get_mut(&fence)
            .map(|f| std::mem::take(&mut f.readbacks))
            .unwrap_or_default();
        self.finish_readbacks(&readbacks, deadline, timeout)
    }

    fn reset_fence(&mut self, fence: RawFence) {
        if let Some(f) = self.fences.get(&fence) {
            f.signaled.store(false, Ordering::Release);
        }
    }

    fn destroy_fence(&mut self, fence: RawFence) {
        let _ = self.fences.remove(&fence);
    }

    fn create_semaphore(&mut self) -> Result<RawSemaphore, DeviceError> {
        let id = RawSemaphore(self.next());
        let _ = self.semaphores.insert(id);
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
        let mut encoder = self.context.create_encoder();
        let readbacks = self.encode(commands, &mut encoder)?;
        self.flush_shadows();
        let _ = self.context.submit(encoder);

        if let Some(fence) = info.fence.and_then(|f| self.fences.get_mut(&f)) {
            fence.signaled.store(false, Ordering::Release);
            fence.readbacks = readbacks;
            let flag = Arc::clone(&fence.signaled);
            self.context.queue.on_submitted_work_done(move || {
                flag.store(true, Ordering::Release);
            });
        }
        Ok(())
    }

    fn wait_idle(&mut self) {
        let pending: Vec<RawFence> = self
            .fences
            .iter()
            .filter(|(_, f)| !f.signaled.load(Ordering::Acquire))
            .map(|(id, _)| *id)
            .collect();
        for fence in pending {
            if let Err(e) = self.wait_fence(fence, Duration::from_secs(10)) {
                log::warn!("wait_idle: fence {} not drained: {e}", fence.id());
            }
        }
    }
}
