//! Read-only queries and direct handles into [`RenderEngine`].

use super::RenderEngine;
use crate::camera::Camera;
use crate::gpu::arena::BufferArena;
use crate::gpu::device::{GpuDevice, RawTarget};
use crate::options::RenderOptions;
use crate::renderer::frame::FrameRing;
use crate::scene::Scene;
use crate::util::movie::MoviePlayer;

// ── Device ──

impl<D: GpuDevice> RenderEngine<D> {
    /// The device.
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The device, mutably. Work submitted directly is not tracked by the
    /// frame ring.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// The buffer arena.
    #[must_use]
    pub fn arena(&self) -> &BufferArena {
        &self.arena
    }

    /// The frame ring.
    #[must_use]
    pub fn frame_ring(&self) -> &FrameRing {
        &self.ring
    }

    /// Render target frames are drawn into.
    #[must_use]
    pub fn target(&self) -> RawTarget {
        self.target
    }

    /// Whether a device fault stopped the engine.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

// ── Scene ──

impl<D: GpuDevice> RenderEngine<D> {
    /// The loaded scene.
    #[must_use]
    pub fn scene(&self) -> Option<&Scene> {
        self.loaded.as_ref().map(|l| &l.scene)
    }

    /// The loaded scene, mutably. Visibility, coloring and pick mode changes
    /// show on the next frame.
    pub fn scene_mut(&mut self) -> Option<&mut Scene> {
        self.loaded.as_mut().map(|l| &mut l.scene)
    }

    /// Movie player of the loaded scene.
    #[must_use]
    pub fn movie(&self) -> Option<&MoviePlayer> {
        self.loaded.as_ref().map(|l| &l.movie)
    }

    /// Describe object `index` of the current frame.
    #[must_use]
    pub fn object_info(&self, index: u32) -> Option<String> {
        let scene = self.scene()?;
        scene.object_info(scene.frame(), index)
    }
}

// ── View ──

impl<D: GpuDevice> RenderEngine<D> {
    /// The camera.
    #[must_use]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// The camera, mutably.
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Current options.
    #[must_use]
    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Smoothed frames per second.
    #[must_use]
    pub fn fps(&self) -> f32 {
        self.timing.fps()
    }

    /// Frames rendered so far.
    #[must_use]
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Whether the frame limiter allows another frame now.
    #[must_use]
    pub fn should_render(&self) -> bool {
        self.timing.should_render()
    }
}
