//! Frame rate measurement and limiting.

use web_time::{Duration, Instant};

/// Frame timing with FPS calculation and optional frame limiting
#[derive(Debug, Clone)]
pub struct FrameTiming {
    /// Target FPS (0 = unlimited)
    target_fps: u32,
    /// Minimum frame duration based on target FPS
    min_frame_duration: Duration,
    /// Last frame timestamp
    last_frame: Instant,
    /// Smoothed FPS using exponential moving average
    smoothed_fps: f32,
    /// Weight of the newest sample
    smoothing: f32,
    /// Frames completed since creation
    frames: u64,
    /// Duration of the last completed frame
    last_duration: Duration,
}

impl FrameTiming {
    /// Create a new frame timer with the given FPS target (0 = unlimited).
    #[must_use]
    pub fn new(target_fps: u32) -> Self {
        let min_frame_duration = if target_fps > 0 {
            Duration::from_secs_f64(1.0 / f64::from(target_fps))
        } else {
            Duration::ZERO
        };

        Self {
            target_fps,
            min_frame_duration,
            last_frame: Instant::now(),
            smoothed_fps: 60.0,
            smoothing: 0.05,
            frames: 0,
            last_duration: Duration::ZERO,
        }
    }

    /// Whether enough time has passed since the last frame to render.
    #[must_use]
    pub fn should_render(&self) -> bool {
        if self.target_fps == 0 {
            return true;
        }
        self.last_frame.elapsed() >= self.min_frame_duration
    }

    /// Call after rendering to update timing.
    pub fn end_frame(&mut self) {
        self.end_frame_at(Instant::now());
    }

    fn end_frame_at(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_frame);
        self.last_frame = now;
        self.last_duration = elapsed;
        self.frames += 1;

        let frame_time = elapsed.as_secs_f32();
        if frame_time > 0.0 {
            let instant_fps = 1.0 / frame_time;
            self.smoothed_fps =
                self.smoothed_fps * (1.0 - self.smoothing) + instant_fps * self.smoothing;
        }
    }

    /// Get the current FPS (smoothed)
    #[must_use]
    pub fn fps(&self) -> f32 {
        self.smoothed_fps
    }

    /// Frames completed so far.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Wall time of the last completed frame.
    #[must_use]
    pub fn last_frame_duration(&self) -> Duration {
        self.last_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_timer_always_renders() {
        assert!(FrameTiming::new(0).should_render());
    }

    #[test]
    fn end_frame_counts_and_smooths() {
        let mut timing = FrameTiming::new(0);
        let start = timing.last_frame;
        timing.end_frame_at(start + Duration::from_millis(10));
        assert_eq!(timing.frame_count(), 1);
        assert_eq!(timing.last_frame_duration(), Duration::from_millis(10));
        // 60 * 0.95 + 100 * 0.05
        assert!((timing.fps() - 62.0).abs() < 1e-3);
    }
}
