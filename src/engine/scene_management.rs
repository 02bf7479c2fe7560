//! Scene loading, events and selection for [`RenderEngine`].

use glam::{Vec2, Vec3};

use super::{LoadedScene, RenderEngine};
use crate::error::TrajviewError;
use crate::gpu::arena::{BufferHandle, BufferRange, UploadError};
use crate::gpu::device::{DescriptorKind, GpuDevice, MemoryClass};
use crate::gpu::types::GpuDrawCalls;
use crate::mesh::shapes;
use crate::mesh::{MeshId, MeshMerger};
use crate::options::{GeometryOptions, RenderOptions};
use crate::renderer::cull::{periodic_offsets, CullVolume};
use crate::renderer::draw_calls::draw_call_template;
use crate::renderer::frame::DRAW_CALLS_SIZE;
use crate::scene::{Scene, SceneError, Trajectory};
use crate::util::movie::MoviePlayer;

/// Replica translations for `trajectory`: the configured neighborhood when
/// periodic, the identity image otherwise.
pub(crate) fn replica_offsets(trajectory: &Trajectory, options: &RenderOptions) -> Vec<Vec3> {
    if trajectory.is_periodic() {
        periodic_offsets(trajectory.cell, options.cell_counts())
    } else {
        vec![Vec3::ZERO]
    }
}

/// Geometry of every mesh type, merged in draw order.
fn merge_meshes(trajectory: &Trajectory, geometry: &GeometryOptions) -> MeshMerger {
    let mut merger = MeshMerger::new();
    for id in MeshId::ALL {
        let mesh = match id {
            MeshId::Atom => shapes::uv_sphere(geometry.sphere_stacks, geometry.sphere_slices),
            MeshId::UnitCell => shapes::unit_cell_frame(trajectory.cell, geometry.cell_thickness),
            MeshId::Vector => shapes::arrow(geometry.cylinder_slices, 1.0, 0.25),
            MeshId::Cylinder => shapes::event_cylinder(geometry.cylinder_slices),
            MeshId::Bond => shapes::cylinder(geometry.cylinder_slices, false),
        };
        let _ = merger.add(id, &mesh);
    }
    merger
}

impl<D: GpuDevice> RenderEngine<D> {
    /// Replace the current scene.
    ///
    /// Merges and uploads the mesh geometry and stages the zero-instance
    /// draw template sized from the scene's maximum object counts.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::TooManyObjects`] when the scene cannot fit in
    /// the frame buffers, or an upload error. The previous scene is kept on
    /// a capacity error and dropped on an upload error.
    pub fn load_scene(&mut self, scene: Scene) -> Result<(), TrajviewError> {
        let required = scene.max_object_count();
        let capacity = self.ring.capacity() as usize;
        if required > capacity {
            return Err(SceneError::TooManyObjects { required, capacity }.into());
        }
        self.unload_scene();

        let merger = merge_meshes(scene.trajectory(), &self.options.geometry);
        let infos = merger.infos();
        let meshes = merger.upload(&mut self.device, &mut self.arena, &mut self.upload)?;
        let template = match self.stage_template(&draw_call_template(&infos, &scene.max_counts())) {
            Ok(template) => template,
            Err(e) => {
                meshes.destroy(&mut self.device, &mut self.arena);
                return Err(e.into());
            }
        };

        if let Some(first) = scene.trajectory().positions.first() {
            self.camera.fit_to_positions(first);
        }
        let movie = MoviePlayer::new(scene.trajectory().frame_count(), &self.options.movie);
        log::info!(
            "loaded scene: {} atoms, {} frames, {required} objects at most",
            scene.trajectory().atom_count(),
            scene.trajectory().frame_count()
        );
        self.loaded = Some(LoadedScene {
            scene,
            meshes,
            infos,
            template,
            movie,
        });
        Ok(())
    }

    fn stage_template(&mut self, calls: &GpuDrawCalls) -> Result<BufferHandle, UploadError> {
        let handle = self.arena.create_buffer(
            &mut self.device,
            "Draw Call Template",
            DRAW_CALLS_SIZE,
            wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            MemoryClass::DeviceLocal,
        )?;
        let view = self.arena.create_buffer_resource(
            handle,
            0,
            BufferRange::Whole,
            DescriptorKind::StorageBuffer,
        );
        if let Err(e) = self.arena.stage_buffer(
            &mut self.device,
            &mut self.upload,
            bytemuck::bytes_of(calls),
            &view,
        ) {
            self.arena.destroy_buffer(&mut self.device, handle);
            return Err(e);
        }
        Ok(handle)
    }

    fn unload_scene(&mut self) {
        let Some(loaded) = self.loaded.take() else {
            return;
        };
        self.device.wait_idle();
        loaded.meshes.destroy(&mut self.device, &mut self.arena);
        self.arena.destroy_buffer(&mut self.device, loaded.template);
        for slot in self.ring.slots_mut() {
            slot.pick_armed = false;
        }
        self.picking.clear_results();
    }

    /// Focus on the event at `frame` between `catalyst` and `chemical`
    /// atoms.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError`] when no scene is loaded or the event is
    /// invalid.
    pub fn enter_event(
        &mut self,
        frame: usize,
        catalyst: Vec<u32>,
        chemical: Vec<u32>,
    ) -> Result<(), SceneError> {
        let loaded = self.loaded.as_mut().ok_or(SceneError::NoFrames)?;
        loaded.scene.enter_event(frame, catalyst, chemical)?;
        let _ = loaded.movie.set_frame(frame);
        Ok(())
    }

    /// Leave the active event, if any.
    pub fn leave_event(&mut self) {
        if let Some(loaded) = self.loaded.as_mut() {
            loaded.scene.leave_event();
        }
    }

    /// Tag every atom drawn inside the pixel rectangle `a`..`b`, in any
    /// periodic image. Returns how many atoms were tagged.
    pub fn select_in_rect(&mut self, a: Vec2, b: Vec2) -> usize {
        let Some(loaded) = self.loaded.as_mut() else {
            return 0;
        };
        let frames = &self.options.frames;
        let size = Vec2::new(frames.width.max(1) as f32, frames.height.max(1) as f32);
        let to_ndc = |p: Vec2| Vec2::new(p.x / size.x * 2.0 - 1.0, 1.0 - p.y / size.y * 2.0);
        let mut volume = CullVolume::new(
            self.camera.view(),
            self.camera.sub_projection(to_ndc(a), to_ndc(b)),
        );
        if let Some(cylinder) = loaded.scene.cull_cylinder(&self.options) {
            volume = volume.with_cylinder(cylinder);
        }
        let offsets = replica_offsets(loaded.scene.trajectory(), &self.options);
        let tagged = loaded.scene.select_in_volume(&volume, &offsets, &self.options);
        log::debug!("rectangle selection tagged {tagged} atoms");
        tagged
    }
}

#[cfg(test)]
mod tests {
    use glam::Mat3;

    use super::*;
    use crate::gpu::soft::SoftDevice;
    use crate::gpu::types::MOUSE_BUCKET_COUNT;
    use crate::renderer::FRAMES_IN_FLIGHT;
    use crate::scene::trajectory::tags;

    fn engine() -> RenderEngine<SoftDevice> {
        let mut options = RenderOptions::default();
        options.frames.max_unique_objects = 500;
        options.frames.width = 100;
        options.frames.height = 100;
        let mut engine = RenderEngine::new(SoftDevice::new(), options).unwrap();
        let trajectory = Trajectory::synthetic_lattice(6, [4, 4, 4], 1.5, 3, 0.0, 3);
        engine.load_scene(Scene::new(trajectory)).unwrap();
        engine
    }

    #[test]
    fn meshes_are_merged_in_draw_order() {
        let trajectory = Trajectory::synthetic_lattice(6, [2, 2, 2], 1.0, 1, 0.0, 0);
        let merger = merge_meshes(&trajectory, &GeometryOptions::default());
        let infos = merger.infos();
        for pair in infos.windows(2) {
            assert_eq!(pair[1].first_index, pair[0].first_index + pair[0].index_count);
        }
        assert!(infos.iter().all(|info| info.index_count > 0));
    }

    #[test]
    fn non_periodic_trajectories_have_one_image() {
        let mut trajectory = Trajectory::synthetic_lattice(6, [2, 2, 2], 1.0, 1, 0.0, 0);
        let mut options = RenderOptions::default();
        options.culling.cell_counts = [3, 3, 3];
        assert_eq!(replica_offsets(&trajectory, &options).len(), 27);
        trajectory.cell = Mat3::ZERO;
        assert_eq!(replica_offsets(&trajectory, &options), vec![Vec3::ZERO]);
    }

    #[test]
    fn reloading_releases_the_previous_geometry() {
        let mut engine = engine();
        let live = engine.arena().live_count();
        let trajectory = Trajectory::synthetic_lattice(6, [3, 3, 3], 1.5, 2, 0.0, 4);
        engine.load_scene(Scene::new(trajectory)).unwrap();
        assert_eq!(engine.arena().live_count(), live);
    }

    #[test]
    fn reloading_forgets_the_previous_pick() {
        let mut engine = engine();
        engine.request_pick(Vec2::new(50.0, 50.0));
        let _ = engine.render_frame().unwrap();
        let mouse = engine.frame_ring().slots()[0].buffers.mouse;
        let raw = engine.arena().raw(mouse.handle);
        let mut buckets = vec![0u32; MOUSE_BUCKET_COUNT];
        buckets[0] = 5;
        engine
            .device_mut()
            .device_write(raw, 0, bytemuck::cast_slice(&buckets))
            .unwrap();
        for _ in 0..FRAMES_IN_FLIGHT {
            let _ = engine.render_frame().unwrap();
        }
        assert_eq!(engine.last_pick(), Some(4));
        assert_eq!(engine.last_picked_atom(), Some(4));

        let trajectory = Trajectory::synthetic_lattice(6, [2, 2, 2], 1.5, 1, 0.0, 5);
        engine.load_scene(Scene::new(trajectory)).unwrap();
        assert_eq!(engine.last_pick(), None);
        assert_eq!(engine.last_picked_atom(), None);
    }

    #[test]
    fn events_jump_to_their_frame_and_swap_cell_for_cylinder() {
        let mut engine = engine();
        engine.enter_event(2, vec![0], vec![1]).unwrap();
        let scene = engine.scene().unwrap();
        assert_eq!(scene.frame(), 2);
        assert!(scene.is_shown(MeshId::Cylinder));
        assert!(!scene.is_shown(MeshId::UnitCell));
        assert_eq!(engine.movie().map(MoviePlayer::current_frame), Some(2));

        engine.leave_event();
        let scene = engine.scene().unwrap();
        assert!(scene.is_shown(MeshId::UnitCell));
        assert!(!scene.is_shown(MeshId::Cylinder));
    }

    #[test]
    fn whole_screen_rectangle_tags_visible_atoms() {
        let mut engine = engine();
        let tagged = engine.select_in_rect(Vec2::ZERO, Vec2::new(100.0, 100.0));
        assert!(tagged > 0);
        let trajectory = engine.scene().unwrap().trajectory();
        let count = (0..trajectory.atom_count())
            .filter(|&i| trajectory.has_tag(i, tags::SELECTED_FOR_TAGGING))
            .count();
        assert_eq!(count, tagged);
    }
}
