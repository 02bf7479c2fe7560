//! The frame orchestrator.
//!
//! [`RenderEngine`] owns the device and every object created on it: the
//! buffer arena, the descriptor layout cache and pool allocator, the frame
//! ring, the pipelines and the loaded scene. Each call to
//! [`RenderEngine::render_frame`] drives one slot through its fixed
//! sequence: wait on the slot's fence, collect the pick the slot recorded
//! last time, write host data, record, submit and present.

mod accessors;
mod animation;
mod picking_system;
mod scene_management;

use std::fmt;
use std::time::Duration;

use glam::Vec3;

pub use self::picking_system::decode_mouse_buckets;
use self::picking_system::PickingSystem;
use crate::camera::Camera;
use crate::error::TrajviewError;
use crate::gpu::arena::{BufferArena, BufferHandle, UploadContext, UploadError};
use crate::gpu::command::{PipelineStage, SemaphoreWait, SubmitInfo};
use crate::gpu::descriptors::{DescriptorAllocator, DescriptorError, DescriptorLayoutCache};
use crate::gpu::device::{DeviceError, FenceError, GpuDevice, RawTarget};
use crate::gpu::types::{
    DispatchIndirectCommand, GpuInstance, GpuObjectData, GpuSceneData, MESH_COUNT,
};
use crate::mesh::{MeshBuffers, MeshInfo};
use crate::options::RenderOptions;
use crate::renderer::cull::offsets_to_gpu;
use crate::renderer::frame::{FrameRecording, FrameRing};
use crate::renderer::pipelines::Pipelines;
use crate::scene::{Scene, SceneError};
use crate::util::frame_timing::FrameTiming;
use crate::util::movie::MoviePlayer;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a per-frame or pipeline-rebuild step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The slot's fence did not signal in time. The engine is poisoned.
    FenceTimeout {
        /// Slot waited on.
        slot: usize,
        /// Timeout that expired.
        timeout: Duration,
    },
    /// The fence wait failed for another reason. The engine is poisoned.
    Fence(FenceError),
    /// An earlier frame failed unrecoverably.
    Poisoned,
    /// No scene is loaded.
    NoScene,
    /// Target acquisition, submission or presentation failed.
    Device(DeviceError),
    /// Frame ring descriptor setup failed.
    Descriptor(DescriptorError),
    /// A staged upload failed.
    Upload(UploadError),
    /// The scene does not fit the frame buffers.
    Scene(SceneError),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FenceTimeout { slot, timeout } => write!(
                f,
                "frame slot {slot} not finished after {} ms",
                timeout.as_millis()
            ),
            Self::Fence(e) => write!(f, "frame fence failed: {e}"),
            Self::Poisoned => write!(f, "engine stopped after an earlier device fault"),
            Self::NoScene => write!(f, "no scene loaded"),
            Self::Device(e) => write!(f, "{e}"),
            Self::Descriptor(e) => write!(f, "{e}"),
            Self::Upload(e) => write!(f, "{e}"),
            Self::Scene(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fence(e) => Some(e),
            Self::Device(e) => Some(e),
            Self::Descriptor(e) => Some(e),
            Self::Upload(e) => Some(e),
            Self::Scene(e) => Some(e),
            Self::FenceTimeout { .. } | Self::Poisoned | Self::NoScene => None,
        }
    }
}

impl From<DeviceError> for FrameError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl From<DescriptorError> for FrameError {
    fn from(e: DescriptorError) -> Self {
        Self::Descriptor(e)
    }
}

impl From<UploadError> for FrameError {
    fn from(e: UploadError) -> Self {
        Self::Upload(e)
    }
}

impl From<SceneError> for FrameError {
    fn from(e: SceneError) -> Self {
        Self::Scene(e)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// What one rendered frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames rendered before this one.
    pub frame: u64,
    /// Slot the frame used.
    pub slot: usize,
    /// Trajectory frame drawn.
    pub trajectory_frame: usize,
    /// Unique objects written.
    pub objects: u32,
    /// Object picked by the slot's previous submission, if it recorded a
    /// pick and hit something.
    pub picked: Option<u32>,
}

/// A scene with its GPU geometry.
struct LoadedScene {
    scene: Scene,
    meshes: MeshBuffers,
    infos: [MeshInfo; MESH_COUNT],
    template: BufferHandle,
    movie: MoviePlayer,
}

/// GPU-driven periodic trajectory renderer.
pub struct RenderEngine<D: GpuDevice> {
    device: D,
    arena: BufferArena,
    layouts: DescriptorLayoutCache,
    descriptors: DescriptorAllocator,
    ring: FrameRing,
    pipelines: Pipelines,
    upload: UploadContext,
    target: RawTarget,
    options: RenderOptions,
    camera: Camera,
    loaded: Option<LoadedScene>,
    picking: PickingSystem,
    timing: FrameTiming,
    objects: Vec<GpuObjectData>,
    instances: Vec<GpuInstance>,
    frames_rendered: u64,
    poisoned: bool,
}

impl<D: GpuDevice> fmt::Debug for RenderEngine<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderEngine")
            .field("capacity", &self.ring.capacity())
            .field("slot", &self.ring.current_index())
            .field("scene", &self.loaded.as_ref().map(|l| &l.scene))
            .field("frames_rendered", &self.frames_rendered)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

fn aspect(options: &RenderOptions) -> f32 {
    options.frames.width.max(1) as f32 / options.frames.height.max(1) as f32
}

impl<D: GpuDevice> RenderEngine<D> {
    /// Build the frame ring, pipelines and render target on `device`.
    ///
    /// # Errors
    ///
    /// Returns [`TrajviewError`] if any device object cannot be created.
    pub fn new(mut device: D, options: RenderOptions) -> Result<Self, TrajviewError> {
        let mut arena = BufferArena::new();
        let mut layouts = DescriptorLayoutCache::new();
        let mut descriptors = DescriptorAllocator::new();
        let capacity = options.frames.max_unique_objects;

        let ring = FrameRing::new(
            &mut device,
            &mut arena,
            &mut layouts,
            &mut descriptors,
            capacity,
        )?;
        let (cull_layout, mesh_layout) = ring.layouts();
        let pipelines = Pipelines::new(&mut device, cull_layout, mesh_layout)?;
        let upload = UploadContext::new(
            &mut device,
            Duration::from_millis(options.frames.upload_timeout_ms),
        )?;
        let target = device.create_render_target(options.frames.width, options.frames.height)?;

        log::info!(
            "render engine ready: {}x{}, {capacity} objects per frame",
            options.frames.width,
            options.frames.height
        );
        Ok(Self {
            camera: Camera::from_options(&options.camera, aspect(&options)),
            timing: FrameTiming::new(options.frames.target_fps),
            objects: vec![GpuObjectData::default(); capacity as usize],
            instances: vec![GpuInstance::default(); capacity as usize],
            device,
            arena,
            layouts,
            descriptors,
            ring,
            pipelines,
            upload,
            target,
            options,
            loaded: None,
            picking: PickingSystem::default(),
            frames_rendered: 0,
            poisoned: false,
        })
    }

    /// Render one frame through the current slot.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::FenceTimeout`] when the slot's previous
    /// submission does not finish in time, after which every call returns
    /// [`FrameError::Poisoned`]. Submission failures poison the engine too.
    pub fn render_frame(&mut self) -> Result<FrameStats, FrameError> {
        if self.poisoned {
            return Err(FrameError::Poisoned);
        }
        if self.loaded.is_none() {
            return Err(FrameError::NoScene);
        }
        let slot = self.ring.current_index();

        self.wait_for_slot(slot)?;
        let picked = self.collect_pick();
        let objects = self.write_frame_data();
        if let Err(e) = self.submit_frame() {
            self.poisoned = true;
            log::error!("frame {} submission failed: {e}", self.frames_rendered);
            return Err(e);
        }

        let stats = FrameStats {
            frame: self.frames_rendered,
            slot,
            trajectory_frame: self.loaded.as_ref().map_or(0, |l| l.scene.frame()),
            objects,
            picked,
        };
        self.ring.advance();
        self.frames_rendered += 1;
        self.timing.end_frame();
        Ok(stats)
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        let fence = self.ring.current().fence;
        let timeout = Duration::from_millis(self.options.frames.fence_timeout_ms);
        match self.device.wait_fence(fence, timeout) {
            Ok(()) => Ok(()),
            Err(FenceError::Timeout(_)) => {
                self.poisoned = true;
                log::error!(
                    "frame slot {slot} still in flight after {} ms",
                    timeout.as_millis()
                );
                Err(FrameError::FenceTimeout { slot, timeout })
            }
            Err(e) => {
                self.poisoned = true;
                log::error!("frame slot {slot} fence failed: {e}");
                Err(FrameError::Fence(e))
            }
        }
    }

    /// Write object, instance, cull, offset, camera, scene and dispatch data
    /// into the current slot. Returns the number of objects written.
    fn write_frame_data(&mut self) -> u32 {
        let Some(loaded) = self.loaded.as_ref() else {
            return 0;
        };
        let options = &self.options;
        let scene = &loaded.scene;

        let count = scene.write_objects(
            options,
            &loaded.infos,
            self.picking.last_pick(),
            &mut self.objects,
            &mut self.instances,
        );
        let written = count as usize;

        let offsets = scene_management::replica_offsets(scene.trajectory(), options);
        let mut volume = self.camera.cull_volume();
        volume.culling_enabled = options.culling.frustum_culling;
        if let Some(cylinder) = scene.cull_cylinder(options) {
            volume = volume.with_cylinder(cylinder);
        }
        let cull = volume.to_gpu(count, offsets.len() as u32);

        let colors = &options.colors;
        let armed = self.picking.is_pending();
        let mouse = self.picking.take_mouse();
        let scene_data = GpuSceneData {
            ambient: colors.ambient,
            mesh_params: [[colors.specular, colors.shininess, 0.0, 0.0]; MESH_COUNT],
            mouse,
            light_position: self.camera.eye.extend(1.0).to_array(),
            light_color: colors.light,
        };
        let camera = self.camera.gpu_data(Vec3::from_array(options.camera.light_dir));

        let slot = self.ring.current_mut();
        slot.pick_armed = armed;
        let b = slot.buffers;
        let scene_view = slot.scene;
        let (arena, device) = (&self.arena, &mut self.device);
        arena.write_pod(device, &b.objects, &self.objects[..written]);
        arena.write_pod(device, &b.instances, &self.instances[..written]);
        arena.write_pod(device, &b.cull, &[cull]);
        arena.write_pod(device, &b.offsets, &[offsets_to_gpu(&offsets)]);
        arena.write_pod(device, &b.camera, &[camera]);
        arena.write_pod(device, &scene_view, &[scene_data]);
        arena.write_pod(device, &b.dispatch, &[DispatchIndirectCommand::for_objects(count)]);
        count
    }

    fn submit_frame(&mut self) -> Result<(), FrameError> {
        let Some(loaded) = self.loaded.as_ref() else {
            return Err(FrameError::NoScene);
        };
        let slot = self.ring.current_mut();
        self.device.reset_fence(slot.fence);
        self.device.acquire_target(self.target, slot.image_acquired)?;
        slot.record(
            &self.arena,
            &FrameRecording {
                pipelines: &self.pipelines,
                meshes: loaded.meshes,
                template: loaded.template,
                target: self.target,
                clear: self.options.frames.clear_color,
            },
        );
        let info = SubmitInfo {
            wait: vec![SemaphoreWait {
                semaphore: slot.image_acquired,
                stage: PipelineStage::ColorAttachmentOutput,
            }],
            signal: vec![slot.render_complete],
            fence: Some(slot.fence),
        };
        self.device.submit(&slot.commands, &info)?;
        self.device.present_target(self.target, slot.render_complete)?;
        Ok(())
    }

    /// Apply new options. Waits for the device, rebuilds every frame slot
    /// and the render target, and resets the descriptor pools.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Scene`] when the loaded scene does not fit the
    /// new capacity, leaving the engine unchanged. A failed rebuild poisons
    /// the engine.
    pub fn reconfigure(&mut self, options: RenderOptions) -> Result<(), FrameError> {
        if self.poisoned {
            return Err(FrameError::Poisoned);
        }
        let capacity = options.frames.max_unique_objects;
        if let Some(loaded) = &self.loaded {
            let required = loaded.scene.max_object_count();
            if required > capacity as usize {
                return Err(SceneError::TooManyObjects {
                    required,
                    capacity: capacity as usize,
                }
                .into());
            }
        }

        self.device.wait_idle();
        self.ring.destroy(&mut self.device, &mut self.arena);
        self.descriptors.reset_pools(&mut self.device);
        self.ring = match FrameRing::new(
            &mut self.device,
            &mut self.arena,
            &mut self.layouts,
            &mut self.descriptors,
            capacity,
        ) {
            Ok(ring) => ring,
            Err(e) => {
                self.poisoned = true;
                log::error!("frame ring rebuild failed: {e}");
                return Err(e.into());
            }
        };

        let frames = &options.frames;
        let old = &self.options.frames;
        if (frames.width, frames.height) != (old.width, old.height) {
            self.device.destroy_render_target(self.target);
            self.target = match self.device.create_render_target(frames.width, frames.height) {
                Ok(target) => target,
                Err(e) => {
                    self.poisoned = true;
                    return Err(e.into());
                }
            };
        }

        self.camera.aspect = aspect(&options);
        self.camera.fovy = options.camera.fovy;
        self.camera.znear = options.camera.znear;
        self.camera.zfar = options.camera.zfar;
        self.objects.resize(capacity as usize, GpuObjectData::default());
        self.instances.resize(capacity as usize, GpuInstance::default());
        self.timing = FrameTiming::new(frames.target_fps);
        if let Some(loaded) = self.loaded.as_mut() {
            loaded.movie.set_fps(options.movie.frame_rate as f32);
            loaded.movie.set_looping(options.movie.looped);
        }
        log::info!("reconfigured frame ring for {capacity} objects");
        self.options = options;
        Ok(())
    }

    /// Wait for the device and release everything created on it. Returns
    /// the device.
    pub fn shutdown(self) -> D {
        let Self {
            mut device,
            mut arena,
            mut layouts,
            mut descriptors,
            mut ring,
            pipelines,
            upload,
            target,
            loaded,
            ..
        } = self;
        device.wait_idle();
        if let Some(loaded) = loaded {
            loaded.meshes.destroy(&mut device, &mut arena);
            arena.destroy_buffer(&mut device, loaded.template);
        }
        ring.destroy(&mut device, &mut arena);
        pipelines.destroy(&mut device);
        upload.destroy(&mut device);
        device.destroy_render_target(target);
        descriptors.cleanup(&mut device);
        layouts.cleanup(&mut device);
        arena.destroy_all(&mut device);
        log::info!("render engine shut down");
        device
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat3, Vec2};

    use super::*;
    use crate::gpu::soft::{SoftDevice, Violation};
    use crate::gpu::types::{GpuDrawCalls, MOUSE_BUCKET_COUNT};
    use crate::mesh::MeshId;
    use crate::renderer::FRAMES_IN_FLIGHT;
    use crate::scene::Trajectory;

    fn options(capacity: u32) -> RenderOptions {
        let mut options = RenderOptions::default();
        options.frames.max_unique_objects = capacity;
        options.frames.width = 64;
        options.frames.height = 64;
        options.culling.frustum_culling = false;
        options.culling.cell_counts = [1, 1, 1];
        options
    }

    fn lattice_scene() -> Scene {
        Scene::new(Trajectory::synthetic_lattice(6, [10, 10, 1], 1.5, 4, 0.0, 7))
    }

    fn engine_with_scene(capacity: u32) -> RenderEngine<SoftDevice> {
        let mut engine = RenderEngine::new(SoftDevice::new(), options(capacity)).unwrap();
        engine.load_scene(lattice_scene()).unwrap();
        engine
    }

    fn draw_calls(engine: &RenderEngine<SoftDevice>, slot: usize) -> GpuDrawCalls {
        let draws = engine.frame_ring().slots()[slot].buffers.draws;
        let bytes = engine.device().buffer_contents(engine.arena().raw(draws.handle));
        bytemuck::pod_read_unaligned(&bytes[..size_of::<GpuDrawCalls>()])
    }

    #[test]
    fn hundred_atoms_without_culling_draw_a_hundred_instances() {
        let mut engine = engine_with_scene(1000);
        let stats = engine.render_frame().unwrap();

        assert_eq!(stats.slot, 0);
        assert_eq!(stats.objects, 101);
        let calls = draw_calls(&engine, 0);
        assert_eq!(calls.commands[MeshId::Atom.index()].instance_count, 100);
        assert_eq!(calls.commands[MeshId::UnitCell.index()].instance_count, 1);
        assert_eq!(calls.commands[MeshId::Vector.index()].instance_count, 0);
        assert_eq!(calls.commands[MeshId::Bond.index()].instance_count, 0);
        assert!(engine.device().violations().is_empty(), "{:?}", engine.device().violations());
    }

    #[test]
    fn every_mesh_type_gets_a_draw_even_when_empty() {
        let mut engine = engine_with_scene(1000);
        let _ = engine.render_frame().unwrap();
        let draws = engine.device().draws();
        assert_eq!(draws.len(), MESH_COUNT);
        assert_eq!(draws[MeshId::Bond.index()].pipeline, engine.pipelines.bond);
        assert_eq!(draws[MeshId::Atom.index()].pipeline, engine.pipelines.mesh);
    }

    #[test]
    fn slots_rotate_and_reuse_after_their_fence() {
        let mut engine = engine_with_scene(1000);
        let slots: Vec<usize> = (0..5).map(|_| engine.render_frame().unwrap().slot).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1]);
        assert!(engine.device().violations().is_empty());
        assert_eq!(engine.device().presented_frames(engine.target), 5);
    }

    #[test]
    fn fourth_frame_times_out_then_poisons() {
        let mut engine = engine_with_scene(1000);
        engine.device_mut().set_auto_complete(false);
        for _ in 0..FRAMES_IN_FLIGHT {
            let _ = engine.render_frame().unwrap();
        }
        match engine.render_frame() {
            Err(FrameError::FenceTimeout { slot, .. }) => assert_eq!(slot, 0),
            other => panic!("expected a fence timeout, got {other:?}"),
        }
        assert!(engine.is_poisoned());
        assert_eq!(engine.render_frame(), Err(FrameError::Poisoned));
        assert!(engine.device().violations().is_empty());
    }

    #[test]
    fn completing_the_oldest_submission_frees_its_slot() {
        let mut engine = engine_with_scene(1000);
        engine.device_mut().set_auto_complete(false);
        for _ in 0..FRAMES_IN_FLIGHT {
            let _ = engine.render_frame().unwrap();
        }
        assert!(engine.device_mut().complete_next());
        let stats = engine.render_frame().unwrap();
        assert_eq!(stats.slot, 0);
        assert!(engine.device().violations().is_empty());
    }

    #[test]
    fn host_write_into_an_unfinished_slot_is_detected() {
        let mut engine = engine_with_scene(1000);
        engine.device_mut().set_auto_complete(false);
        let _ = engine.render_frame().unwrap();

        let objects = engine.frame_ring().slots()[0].buffers.objects;
        let (arena, device) = (&engine.arena, &mut engine.device);
        arena.write_pod(device, &objects, &[GpuObjectData::default()]);
        assert!(matches!(
            engine.device().violations(),
            [Violation::HostWriteInFlight { .. }]
        ));
    }

    #[test]
    fn full_neighborhood_puts_the_origin_in_the_middle() {
        let mut options = options(1000);
        options.culling.cell_counts = [3, 3, 3];
        let mut engine = RenderEngine::new(SoftDevice::new(), options).unwrap();
        engine.load_scene(lattice_scene()).unwrap();
        let _ = engine.render_frame().unwrap();

        let view = engine.frame_ring().slots()[0].buffers.offsets;
        let bytes = engine.device().buffer_contents(engine.arena().raw(view.handle));
        let table: crate::gpu::types::GpuOffsets = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(table.offsets[13], [0.0; 4]);
        assert!(table.offsets.iter().enumerate().all(|(i, o)| i == 13 || *o != [0.0; 4]));

        let calls = draw_calls(&engine, 0);
        assert_eq!(calls.commands[MeshId::Atom.index()].instance_count, 100 * 27);
    }

    #[test]
    fn picks_are_read_back_when_the_slot_comes_around() {
        let mut engine = engine_with_scene(1000);
        engine.request_pick(Vec2::new(10.0, 20.0));
        let first = engine.render_frame().unwrap();
        assert_eq!(first.picked, None);
        assert!(engine.frame_ring().slots()[0].pick_armed);

        let mouse = engine.frame_ring().slots()[0].buffers.mouse;
        let raw = engine.arena().raw(mouse.handle);
        let mut buckets = vec![0u32; MOUSE_BUCKET_COUNT];
        buckets[40] = 8;
        buckets[90] = 3;
        engine
            .device_mut()
            .device_write(raw, 0, bytemuck::cast_slice(&buckets))
            .unwrap();

        let _ = engine.render_frame().unwrap();
        let _ = engine.render_frame().unwrap();
        let again = engine.render_frame().unwrap();
        assert_eq!(again.slot, 0);
        assert_eq!(again.picked, Some(7));
        assert_eq!(engine.last_pick(), Some(7));

        let cleared = engine.device().buffer_contents(raw);
        assert!(cleared.iter().all(|&b| b == 0));
    }

    #[test]
    fn mouse_buckets_are_read_back_only_for_armed_frames() {
        let mut engine = engine_with_scene(1000);
        for _ in 0..FRAMES_IN_FLIGHT + 1 {
            let _ = engine.render_frame().unwrap();
        }
        assert!(engine.device().readbacks().is_empty());

        engine.request_pick(Vec2::new(5.0, 5.0));
        let armed = engine.render_frame().unwrap();
        let _ = engine.render_frame().unwrap();
        let mouse = engine.frame_ring().slots()[armed.slot].buffers.mouse;
        assert_eq!(engine.device().readbacks(), &[engine.arena().raw(mouse.handle)]);
        assert!(engine.device().violations().is_empty(), "{:?}", engine.device().violations());
    }

    #[test]
    fn scenes_larger_than_the_frames_are_rejected() {
        let mut engine = RenderEngine::new(SoftDevice::new(), options(50)).unwrap();
        match engine.load_scene(lattice_scene()) {
            Err(TrajviewError::Scene(SceneError::TooManyObjects { required, capacity })) => {
                assert_eq!(capacity, 50);
                assert!(required > 100);
            }
            other => panic!("expected a capacity error, got {other:?}"),
        }
        assert_eq!(engine.render_frame(), Err(FrameError::NoScene));
    }

    #[test]
    fn reconfigure_rebuilds_slots_with_the_same_layouts() {
        let mut engine = engine_with_scene(1000);
        let _ = engine.render_frame().unwrap();
        let layouts = engine.layouts.cached_layout_count();
        let before = engine.frame_ring().layouts();

        engine.reconfigure(options(2000)).unwrap();
        assert_eq!(engine.layouts.cached_layout_count(), layouts);
        assert_eq!(engine.frame_ring().layouts(), before);
        assert_eq!(engine.frame_ring().capacity(), 2000);
        assert_eq!(engine.frame_ring().current_index(), 0);

        let _ = engine.render_frame().unwrap();
        assert_eq!(
            draw_calls(&engine, 0).commands[MeshId::Atom.index()].instance_count,
            100
        );
        assert!(engine.device().violations().is_empty());
    }

    #[test]
    fn reconfigure_refuses_a_capacity_below_the_scene() {
        let mut engine = engine_with_scene(1000);
        assert!(matches!(
            engine.reconfigure(options(10)),
            Err(FrameError::Scene(SceneError::TooManyObjects { .. }))
        ));
        assert_eq!(engine.frame_ring().capacity(), 1000);
        assert!(engine.render_frame().is_ok());
    }

    #[test]
    fn shutdown_releases_every_device_object() {
        let mut engine = engine_with_scene(1000);
        let _ = engine.render_frame().unwrap();
        let device = engine.shutdown();
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_layout_count(), 0);
        assert_eq!(device.live_pool_count(), 0);
        assert_eq!(device.live_pipeline_count(), 0);
        assert_eq!(device.live_sync_count(), 0);
    }

    #[test]
    fn non_periodic_scenes_draw_a_single_image() {
        let mut trajectory = Trajectory::synthetic_lattice(8, [2, 2, 2], 2.0, 1, 0.0, 1);
        trajectory.cell = Mat3::ZERO;
        let mut options = options(100);
        options.culling.cell_counts = [3, 3, 3];
        let mut engine = RenderEngine::new(SoftDevice::new(), options).unwrap();
        engine.load_scene(Scene::new(trajectory)).unwrap();
        let stats = engine.render_frame().unwrap();
        assert_eq!(stats.objects, 8);
        assert_eq!(draw_calls(&engine, 0).commands[MeshId::Atom.index()].instance_count, 8);
    }
}
