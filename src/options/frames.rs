use serde::{Deserialize, Serialize};

/// Frame pipeline sizing and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FrameOptions {
    /// Upper bound on objects written per frame. Sizes every per-frame
    /// buffer; scenes needing more are rejected at load.
    pub max_unique_objects: u32,
    /// Per-frame fence wait before the frame is declared stalled.
    pub fence_timeout_ms: u64,
    /// Fence wait of a staged upload.
    pub upload_timeout_ms: u64,
    /// Render target width in pixels.
    pub width: u32,
    /// Render target height in pixels.
    pub height: u32,
    /// Clear color (RGBA).
    pub clear_color: [f32; 4],
    /// Frame limiter target (0 = unlimited).
    pub target_fps: u32,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            max_unique_objects: 50_000,
            fence_timeout_ms: 1_000,
            upload_timeout_ms: 10_000,
            width: 1280,
            height: 720,
            clear_color: [0.08, 0.08, 0.1, 1.0],
            target_fps: 0,
        }
    }
}
