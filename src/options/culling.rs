use serde::{Deserialize, Serialize};

/// GPU culling and periodic replication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CullingOptions {
    /// Frustum test on or off. Off keeps every replica.
    pub frustum_culling: bool,
    /// Periodic images along each cell axis, clamped to 1..=3.
    pub cell_counts: [u32; 3],
}

impl Default for CullingOptions {
    fn default() -> Self {
        Self {
            frustum_culling: true,
            cell_counts: [3, 3, 3],
        }
    }
}
