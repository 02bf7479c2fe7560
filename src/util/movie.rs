//! Movie playback over the frames of a loaded trajectory.

use web_time::{Duration, Instant};

use crate::options::MovieOptions;

/// Frame sequencer that auto-advances at a fixed rate, or only on explicit
/// steps in manual mode.
#[derive(Debug, Clone)]
pub struct MoviePlayer {
    frame_count: usize,
    current_frame: usize,
    last_advance: Instant,
    frame_duration: Duration,
    playing: bool,
    looping: bool,
}

impl MoviePlayer {
    /// Player over `frame_count` frames, starting at frame 0.
    #[must_use]
    pub fn new(frame_count: usize, options: &MovieOptions) -> Self {
        let mut player = Self {
            frame_count,
            current_frame: 0,
            last_advance: Instant::now(),
            frame_duration: Duration::ZERO,
            playing: !options.manual,
            looping: options.looped,
        };
        player.set_fps(options.frame_rate as f32);
        player
    }

    /// Advance time; returns the new frame index when a step occurred.
    pub fn tick(&mut self, now: Instant) -> Option<usize> {
        if !self.playing || self.frame_count < 2 {
            return None;
        }
        if now.duration_since(self.last_advance) < self.frame_duration {
            return None;
        }
        self.last_advance = now;

        let next = self.current_frame + 1;
        if next >= self.frame_count {
            if self.looping {
                self.current_frame = 0;
            } else {
                self.playing = false;
                return None;
            }
        } else {
            self.current_frame = next;
        }
        Some(self.current_frame)
    }

    /// Step one frame forward, wrapping when looping.
    pub fn step_forward(&mut self) -> usize {
        if self.frame_count > 0 {
            self.current_frame = if self.current_frame + 1 < self.frame_count {
                self.current_frame + 1
            } else if self.looping {
                0
            } else {
                self.current_frame
            };
        }
        self.current_frame
    }

    /// Step one frame back, wrapping when looping.
    pub fn step_back(&mut self) -> usize {
        if self.current_frame > 0 {
            self.current_frame -= 1;
        } else if self.looping && self.frame_count > 0 {
            self.current_frame = self.frame_count - 1;
        }
        self.current_frame
    }

    /// Jump to `frame`, clamped to the last frame.
    pub fn set_frame(&mut self, frame: usize) -> usize {
        self.current_frame = frame.min(self.frame_count.saturating_sub(1));
        self.current_frame
    }

    /// Toggle between playing and paused states.
    pub fn toggle_playback(&mut self) {
        self.playing = !self.playing;
        if self.playing {
            self.last_advance = Instant::now();
        }
    }

    /// Set playback speed in frames per second (clamped to >= 0.1).
    pub fn set_fps(&mut self, fps: f32) {
        self.frame_duration = Duration::from_secs_f64(1.0 / f64::from(fps.max(0.1)));
    }

    /// Enable or disable looping at the end of the trajectory.
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Index of the current frame.
    #[must_use]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Total number of frames.
    #[must_use]
    pub fn total_frames(&self) -> usize {
        self.frame_count
    }

    /// Whether the player is currently advancing frames.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(manual: bool, looped: bool) -> MovieOptions {
        MovieOptions {
            frame_rate: 10,
            looped,
            manual,
        }
    }

    #[test]
    fn tick_waits_for_the_frame_duration() {
        let mut player = MoviePlayer::new(3, &options(false, true));
        let start = player.last_advance;
        assert_eq!(player.tick(start + Duration::from_millis(50)), None);
        assert_eq!(player.tick(start + Duration::from_millis(100)), Some(1));
        assert_eq!(player.tick(start + Duration::from_millis(200)), Some(2));
        assert_eq!(player.tick(start + Duration::from_millis(300)), Some(0));
    }

    #[test]
    fn non_looping_player_stops_at_the_end() {
        let mut player = MoviePlayer::new(2, &options(false, false));
        let start = player.last_advance;
        assert_eq!(player.tick(start + Duration::from_secs(1)), Some(1));
        assert_eq!(player.tick(start + Duration::from_secs(2)), None);
        assert!(!player.is_playing());
        assert_eq!(player.current_frame(), 1);
    }

    #[test]
    fn manual_mode_only_moves_on_steps() {
        let mut player = MoviePlayer::new(4, &options(true, true));
        assert_eq!(player.tick(Instant::now() + Duration::from_secs(5)), None);
        assert_eq!(player.step_back(), 3);
        assert_eq!(player.step_forward(), 0);
        assert_eq!(player.set_frame(99), 3);
    }
}
