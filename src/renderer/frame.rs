//! Frames in flight.
//!
//! Every slot owns a private copy of each per-frame buffer, its own cull and
//! mesh descriptor sets, a completion fence and two semaphores. The scene
//! uniform is one buffer split into padded per-slot regions, bound with a
//! dynamic offset. Host-visible buffers stay mapped for the slot's lifetime.
//!
//! A slot may only be written after its fence signals; the fence is created
//! signaled so the first use of each slot does not block.

use std::mem::size_of;

use crate::gpu::arena::{
    padded_uniform_size, BufferArena, BufferHandle, BufferRange, BufferView,
};
use crate::gpu::command::{BufferCopy, Command, CommandList, PipelineStage};
use crate::gpu::descriptors::{
    DescriptorAllocator, DescriptorBuilder, DescriptorError, DescriptorLayoutCache,
};
use crate::gpu::device::{
    DescriptorKind, DeviceError, GpuDevice, MemoryClass, RawFence, RawSemaphore, RawSet,
    RawSetLayout, RawTarget,
};
use crate::gpu::types::{
    DispatchIndirectCommand, GpuCameraData, GpuCullData, GpuDrawCalls, GpuFinalInstance,
    GpuInstance, GpuMouseBuckets, GpuObjectData, GpuOffsets, GpuSceneData, REPLICA_COUNT,
};
use crate::mesh::{MeshBuffers, MeshId};
use crate::renderer::pipelines::Pipelines;

/// Number of frame slots.
pub const FRAMES_IN_FLIGHT: usize = 3;

/// Byte size of one slot's draw-call buffer.
pub const DRAW_CALLS_SIZE: u64 = size_of::<GpuDrawCalls>() as u64;

/// Views of one slot's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBuffers {
    /// Object records, host-written.
    pub objects: BufferView,
    /// Cull input, host-written.
    pub instances: BufferView,
    /// Cull output, device-written.
    pub finals: BufferView,
    /// Indirect draw commands, reset from the template then device-written.
    pub draws: BufferView,
    /// Indirect dispatch arguments, host-written.
    pub dispatch: BufferView,
    /// Cull parameters, host-written.
    pub cull: BufferView,
    /// Replica offsets, host-written.
    pub offsets: BufferView,
    /// Camera uniform, host-written.
    pub camera: BufferView,
    /// Picking feedback, device-written and read back.
    pub mouse: BufferView,
}

impl FrameBuffers {
    fn handles(&self) -> [BufferHandle; 9] {
        [
            self.objects.handle,
            self.instances.handle,
            self.finals.handle,
            self.draws.handle,
            self.dispatch.handle,
            self.cull.handle,
            self.offsets.handle,
            self.camera.handle,
            self.mouse.handle,
        ]
    }
}

/// Everything shared by all slots that a frame recording references.
#[derive(Debug, Clone, Copy)]
pub struct FrameRecording<'a> {
    /// Cull, mesh and bond pipelines.
    pub pipelines: &'a Pipelines,
    /// Merged mesh geometry.
    pub meshes: MeshBuffers,
    /// Zero-instance draw-call template.
    pub template: BufferHandle,
    /// Render target drawn into.
    pub target: RawTarget,
    /// Clear color.
    pub clear: [f32; 4],
}

/// One frame-in-flight slot.
#[derive(Debug)]
pub struct FrameSlot {
    /// Position in the ring.
    pub index: usize,
    /// Private buffers.
    pub buffers: FrameBuffers,
    /// This slot's region of the shared scene uniform.
    pub scene: BufferView,
    /// Dynamic offset of `scene`.
    pub scene_offset: u32,
    /// Cull pass bindings.
    pub cull_set: RawSet,
    /// Draw pass bindings.
    pub mesh_set: RawSet,
    /// Signaled when the slot's last submission finished.
    pub fence: RawFence,
    /// Signaled when the render target is ready.
    pub image_acquired: RawSemaphore,
    /// Signaled when rendering finished.
    pub render_complete: RawSemaphore,
    /// Reused command list.
    pub commands: CommandList,
    /// The last submission from this slot recorded a pick.
    pub pick_armed: bool,
}

impl FrameSlot {
    /// Record the frame's device work: draw-call reset, cull dispatch and
    /// one indirect draw per mesh type. An armed pick adds a readback of the
    /// mouse buckets.
    pub fn record(&mut self, arena: &BufferArena, rec: &FrameRecording<'_>) {
        let raw = |view: &BufferView| arena.raw(view.handle);
        let b = &self.buffers;
        let draws = raw(&b.draws);
        let finals = raw(&b.finals);
        let list = &mut self.commands;
        list.reset();

        list.copy_buffer(
            arena.raw(rec.template),
            draws,
            BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: DRAW_CALLS_SIZE,
            },
        );
        list.barrier(
            draws,
            0,
            DRAW_CALLS_SIZE,
            PipelineStage::Transfer,
            &[PipelineStage::ComputeShader, PipelineStage::DrawIndirect],
        );

        list.push(Command::BeginComputePass);
        list.push(Command::BindComputePipeline(rec.pipelines.cull));
        list.bind_set(0, self.cull_set, &[]);
        list.push(Command::DispatchIndirect {
            buffer: raw(&b.dispatch),
            offset: 0,
        });
        list.push(Command::EndComputePass);

        let after_cull = [PipelineStage::DrawIndirect, PipelineStage::VertexShader];
        list.barrier(finals, 0, b.finals.range, PipelineStage::ComputeShader, &after_cull);
        list.barrier(draws, 0, DRAW_CALLS_SIZE, PipelineStage::ComputeShader, &after_cull);

        list.push(Command::BeginRenderPass {
            target: rec.target,
            clear: rec.clear,
        });
        list.push(Command::BindRenderPipeline(rec.pipelines.mesh));
        list.bind_set(0, self.mesh_set, &[self.scene_offset]);
        list.push(Command::BindVertexBuffer {
            buffer: arena.raw(rec.meshes.vertex),
            offset: 0,
        });
        list.push(Command::BindIndexBuffer {
            buffer: arena.raw(rec.meshes.index),
            offset: 0,
        });
        for mesh in MeshId::ALL {
            if mesh == MeshId::Bond {
                list.push(Command::BindRenderPipeline(rec.pipelines.bond));
            }
            list.push(Command::DrawIndexedIndirect {
                buffer: draws,
                offset: GpuDrawCalls::STRIDE * mesh.index() as u64,
            });
        }
        list.push(Command::EndRenderPass);

        if self.pick_armed {
            let mouse = raw(&b.mouse);
            list.barrier(
                mouse,
                0,
                b.mouse.range,
                PipelineStage::FragmentShader,
                &[PipelineStage::Transfer],
            );
            list.push(Command::Readback { buffer: mouse });
        }
    }
}

/// Size, usage and memory class of one per-slot buffer.
#[derive(Debug, Clone, Copy)]
struct SlotBuffer {
    label: &'static str,
    size: u64,
    usage: wgpu::BufferUsages,
    class: MemoryClass,
    kind: DescriptorKind,
}

/// Create a buffer and map it when host-visible; returns a whole-buffer
/// view.
fn frame_buffer<D: GpuDevice>(
    device: &mut D,
    arena: &mut BufferArena,
    created: &mut Vec<BufferHandle>,
    slot: usize,
    buffer: SlotBuffer,
) -> Result<BufferView, DeviceError> {
    let label = format!("Frame {slot} {}", buffer.label);
    let handle = arena.create_buffer(device, &label, buffer.size, buffer.usage, buffer.class)?;
    created.push(handle);
    if buffer.class.is_host_visible() {
        arena.map_buffer(device, handle)?;
    }
    Ok(arena.create_buffer_resource(handle, 0, BufferRange::Whole, buffer.kind))
}

/// The slots plus the shared scene uniform.
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    current: usize,
    scene_buffer: Option<BufferHandle>,
    padded_scene_size: u64,
    cull_layout: RawSetLayout,
    mesh_layout: RawSetLayout,
    capacity: u32,
}

impl FrameRing {
    /// Allocate [`FRAMES_IN_FLIGHT`] slots sized for `capacity` unique
    /// objects.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] if a buffer, set or sync object cannot be
    /// created. Buffers and sync objects created before the failure are
    /// released.
    pub fn new<D: GpuDevice>(
        device: &mut D,
        arena: &mut BufferArena,
        cache: &mut DescriptorLayoutCache,
        allocator: &mut DescriptorAllocator,
        capacity: u32,
    ) -> Result<Self, DescriptorError> {
        let alignment = u64::from(device.limits().min_uniform_offset_alignment);
        let padded_scene_size = padded_uniform_size(size_of::<GpuSceneData>() as u64, alignment);
        let scene_buffer = arena.create_buffer(
            device,
            "Scene Uniform",
            padded_scene_size * FRAMES_IN_FLIGHT as u64,
            wgpu::BufferUsages::UNIFORM,
            MemoryClass::HostVisible,
        )?;
        let mut ring = Self {
            slots: Vec::with_capacity(FRAMES_IN_FLIGHT),
            current: 0,
            scene_buffer: Some(scene_buffer),
            padded_scene_size,
            cull_layout: RawSetLayout(0),
            mesh_layout: RawSetLayout(0),
            capacity,
        };
        if let Err(e) = arena.map_buffer(device, scene_buffer) {
            ring.destroy(device, arena);
            return Err(e.into());
        }
        for index in 0..FRAMES_IN_FLIGHT {
            match ring.create_slot(device, arena, cache, allocator, index) {
                Ok(slot) => ring.slots.push(slot),
                Err(e) => {
                    ring.destroy(device, arena);
                    return Err(e);
                }
            }
        }
        log::info!(
            "created {FRAMES_IN_FLIGHT} frame slots for {capacity} objects ({} buffers live)",
            arena.live_count()
        );
        Ok(ring)
    }

    fn create_slot<D: GpuDevice>(
        &mut self,
        device: &mut D,
        arena: &mut BufferArena,
        cache: &mut DescriptorLayoutCache,
        allocator: &mut DescriptorAllocator,
        index: usize,
    ) -> Result<FrameSlot, DescriptorError> {
        let mut created = Vec::new();
        let result = self.create_slot_resources(
            device,
            arena,
            cache,
            allocator,
            index,
            &mut created,
        );
        if result.is_err() {
            for handle in created {
                arena.destroy_buffer(device, handle);
            }
        }
        result
    }

    fn create_slot_resources<D: GpuDevice>(
        &mut self,
        device: &mut D,
        arena: &mut BufferArena,
        cache: &mut DescriptorLayoutCache,
        allocator: &mut DescriptorAllocator,
        index: usize,
        created: &mut Vec<BufferHandle>,
    ) -> Result<FrameSlot, DescriptorError> {
        use wgpu::BufferUsages as U;
        use DescriptorKind::{StorageBuffer, UniformBuffer, UniformBufferDynamic};
        use MemoryClass::{DeviceLocal, HostReadback, HostVisible};

        let max = u64::from(self.capacity.max(1));
        let bytes = |n: usize| n as u64;
        let slot_buffer = |label, size, usage, class, kind| SlotBuffer {
            label,
            size,
            usage,
            class,
            kind,
        };
        let slot_buffers = [
            slot_buffer(
                "Objects",
                max * bytes(size_of::<GpuObjectData>()),
                U::STORAGE,
                HostVisible,
                StorageBuffer,
            ),
            slot_buffer(
                "Instances",
                max * bytes(size_of::<GpuInstance>()),
                U::STORAGE,
                HostVisible,
                StorageBuffer,
            ),
            slot_buffer(
                "Final Instances",
                max * REPLICA_COUNT as u64 * bytes(size_of::<GpuFinalInstance>()),
                U::STORAGE,
                DeviceLocal,
                StorageBuffer,
            ),
            slot_buffer(
                "Draw Calls",
                DRAW_CALLS_SIZE,
                U::STORAGE | U::INDIRECT | U::COPY_DST,
                DeviceLocal,
                StorageBuffer,
            ),
            slot_buffer(
                "Dispatch",
                bytes(size_of::<DispatchIndirectCommand>()),
                U::INDIRECT,
                HostVisible,
                StorageBuffer,
            ),
            slot_buffer(
                "Cull Data",
                bytes(size_of::<GpuCullData>()),
                U::STORAGE,
                HostVisible,
                StorageBuffer,
            ),
            slot_buffer(
                "Offsets",
                bytes(size_of::<GpuOffsets>()),
                U::STORAGE,
                HostVisible,
                StorageBuffer,
            ),
            slot_buffer(
                "Camera",
                bytes(size_of::<GpuCameraData>()),
                U::UNIFORM,
                HostVisible,
                UniformBuffer,
            ),
            slot_buffer(
                "Mouse Buckets",
                bytes(size_of::<GpuMouseBuckets>()),
                U::STORAGE,
                HostReadback,
                StorageBuffer,
            ),
        ];
        let mut views = Vec::with_capacity(slot_buffers.len());
        for s in slot_buffers {
            views.push(frame_buffer(device, arena, created, index, s)?);
        }
        let buffers = FrameBuffers {
            objects: views[0],
            instances: views[1],
            finals: views[2],
            draws: views[3],
            dispatch: views[4],
            cull: views[5],
            offsets: views[6],
            camera: views[7],
            mouse: views[8],
        };

        let scene_size = size_of::<GpuSceneData>() as u64;
        let scene_buffer = self.scene_buffer.ok_or(DeviceError::UnknownObject {
            kind: "scene uniform",
            id: 0,
        })?;
        let scene_binding = arena.create_buffer_resource(
            scene_buffer,
            0,
            BufferRange::Bytes(scene_size),
            UniformBufferDynamic,
        );
        let scene_offset = self.padded_scene_size * index as u64;
        let scene = arena.create_buffer_resource(
            scene_buffer,
            scene_offset,
            BufferRange::Bytes(scene_size),
            UniformBufferDynamic,
        );

        let compute = wgpu::ShaderStages::COMPUTE;
        let (cull_set, cull_layout) = DescriptorBuilder::new()
            .bind_buffer(0, buffers.objects, compute)
            .bind_buffer(1, buffers.cull, compute)
            .bind_buffer(2, buffers.instances, compute)
            .bind_buffer(3, buffers.finals, compute)
            .bind_buffer(4, buffers.draws, compute)
            .bind_buffer(5, buffers.offsets, compute)
            .build(device, arena, cache, allocator)?;

        let vertex = wgpu::ShaderStages::VERTEX;
        let both = wgpu::ShaderStages::VERTEX_FRAGMENT;
        let (mesh_set, mesh_layout) = DescriptorBuilder::new()
            .bind_buffer(0, buffers.camera, both)
            .bind_buffer(1, scene_binding, both)
            .bind_buffer(2, buffers.objects, vertex)
            .bind_buffer(3, buffers.finals, vertex)
            .bind_buffer(4, buffers.offsets, vertex)
            .bind_buffer(5, buffers.mouse, wgpu::ShaderStages::FRAGMENT)
            .build(device, arena, cache, allocator)?;
        self.cull_layout = cull_layout;
        self.mesh_layout = mesh_layout;

        let fence = device.create_fence(true)?;
        let image_acquired = match device.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                device.destroy_fence(fence);
                return Err(e.into());
            }
        };
        let render_complete = match device.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                device.destroy_fence(fence);
                device.destroy_semaphore(image_acquired);
                return Err(e.into());
            }
        };

        Ok(FrameSlot {
            index,
            buffers,
            scene,
            scene_offset: scene_offset as u32,
            cull_set,
            mesh_set,
            fence,
            image_acquired,
            render_complete,
            commands: CommandList::new(),
            pick_armed: false,
        })
    }

    /// Slot the next frame uses.
    #[must_use]
    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    /// Mutable slot the next frame uses.
    pub fn current_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    /// Index of the current slot.
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Every slot.
    #[must_use]
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// Every slot, mutably.
    pub fn slots_mut(&mut self) -> &mut [FrameSlot] {
        &mut self.slots
    }

    /// Move to the next slot.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len().max(1);
    }

    /// Unique objects each slot holds.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Byte stride between slot regions of the scene uniform.
    #[must_use]
    pub fn padded_scene_size(&self) -> u64 {
        self.padded_scene_size
    }

    /// Cull and mesh set layouts.
    #[must_use]
    pub fn layouts(&self) -> (RawSetLayout, RawSetLayout) {
        (self.cull_layout, self.mesh_layout)
    }

    /// Release every buffer and sync object, leaving an empty ring.
    /// Descriptor sets are returned with the next pool reset. The device
    /// must be idle.
    pub fn destroy<D: GpuDevice>(&mut self, device: &mut D, arena: &mut BufferArena) {
        for slot in self.slots.drain(..) {
            for handle in slot.buffers.handles() {
                arena.destroy_buffer(device, handle);
            }
            device.destroy_fence(slot.fence);
            device.destroy_semaphore(slot.image_acquired);
            device.destroy_semaphore(slot.render_complete);
        }
        if let Some(scene_buffer) = self.scene_buffer.take() {
            arena.destroy_buffer(device, scene_buffer);
        }
        self.current = 0;
    }

    /// Whether [`destroy`](Self::destroy) has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.slots.is_empty()
    }
}
