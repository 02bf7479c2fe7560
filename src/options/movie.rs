use serde::{Deserialize, Serialize};

/// Trajectory playback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MovieOptions {
    /// Trajectory frames per second.
    pub frame_rate: u32,
    /// Restart at the first frame after the last one.
    pub looped: bool,
    /// Frames only change on explicit seeks.
    pub manual: bool,
}

impl Default for MovieOptions {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            looped: true,
            manual: false,
        }
    }
}
