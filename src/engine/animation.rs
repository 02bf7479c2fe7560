//! Movie playback for [`RenderEngine`].

use web_time::Instant;

use super::RenderEngine;
use crate::gpu::device::GpuDevice;

impl<D: GpuDevice> RenderEngine<D> {
    /// Advance the movie by the time elapsed since its last step. Returns
    /// the new trajectory frame when it changed.
    pub fn advance_movie(&mut self) -> Option<usize> {
        self.advance_movie_at(Instant::now())
    }

    /// [`advance_movie`](Self::advance_movie) with an explicit clock.
    pub fn advance_movie_at(&mut self, now: Instant) -> Option<usize> {
        let loaded = self.loaded.as_mut()?;
        let frame = loaded.movie.tick(now)?;
        loaded.scene.set_frame(frame);
        Some(frame)
    }

    /// Jump to `frame`, clamped to the trajectory. Returns the frame shown.
    pub fn set_movie_frame(&mut self, frame: usize) -> Option<usize> {
        let loaded = self.loaded.as_mut()?;
        let frame = loaded.movie.set_frame(frame);
        loaded.scene.set_frame(frame);
        Some(frame)
    }

    /// Step one frame forward or back. Returns the frame shown.
    pub fn step_movie(&mut self, forward: bool) -> Option<usize> {
        let loaded = self.loaded.as_mut()?;
        let frame = if forward {
            loaded.movie.step_forward()
        } else {
            loaded.movie.step_back()
        };
        loaded.scene.set_frame(frame);
        Some(frame)
    }

    /// Pause or resume playback.
    pub fn toggle_movie(&mut self) {
        if let Some(loaded) = self.loaded.as_mut() {
            loaded.movie.toggle_playback();
        }
    }
}

#[cfg(test)]
mod tests {
    use web_time::Duration;

    use super::*;
    use crate::gpu::soft::SoftDevice;
    use crate::options::RenderOptions;
    use crate::scene::{Scene, Trajectory};

    fn engine(frames: usize) -> RenderEngine<SoftDevice> {
        let mut options = RenderOptions::default();
        options.frames.max_unique_objects = 100;
        options.movie.frame_rate = 10;
        options.movie.manual = false;
        options.movie.looped = true;
        let mut engine = RenderEngine::new(SoftDevice::new(), options).unwrap();
        let trajectory = Trajectory::synthetic_lattice(6, [2, 2, 2], 1.5, frames, 0.01, 9);
        engine.load_scene(Scene::new(trajectory)).unwrap();
        engine
    }

    #[test]
    fn playback_moves_the_scene_frame() {
        let mut engine = engine(3);
        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(engine.advance_movie_at(later), Some(1));
        assert_eq!(engine.scene().map(Scene::frame), Some(1));
        let stats = engine.render_frame().unwrap();
        assert_eq!(stats.trajectory_frame, 1);
    }

    #[test]
    fn manual_steps_and_jumps_are_clamped() {
        let mut engine = engine(4);
        engine.toggle_movie();
        assert_eq!(engine.set_movie_frame(10), Some(3));
        assert_eq!(engine.step_movie(false), Some(2));
        assert_eq!(engine.scene().map(Scene::frame), Some(2));
    }

    #[test]
    fn no_scene_means_no_movie() {
        let mut engine = RenderEngine::new(SoftDevice::new(), RenderOptions::default()).unwrap();
        assert_eq!(engine.advance_movie(), None);
        assert_eq!(engine.set_movie_frame(1), None);
    }
}
