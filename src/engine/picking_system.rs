//! Mouse picking through the fragment shader's bucket buffer.
//!
//! A pick request arms the next frame: its scene uniform carries the mouse
//! pixel and the fragment shader stores `object + 1` into the bucket of the
//! fragment's depth. The slot's buffer is read back and cleared the next
//! time the slot comes around, after its fence has signaled.

use glam::Vec2;

use super::RenderEngine;
use crate::gpu::device::GpuDevice;
use crate::gpu::types::MOUSE_BUCKET_COUNT;

/// Pending request and the last resolved pick.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PickingSystem {
    pending: Option<Vec2>,
    last_pick: Option<u32>,
    last_atom: Option<u32>,
}

impl PickingSystem {
    pub fn request(&mut self, pixel: Vec2) {
        self.pending = Some(pixel);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Mouse field of the scene uniform. Consumes the pending request.
    pub fn take_mouse(&mut self) -> [f32; 4] {
        self.pending
            .take()
            .map_or([0.0; 4], |p| [p.x, p.y, 1.0, 0.0])
    }

    pub fn last_pick(&self) -> Option<u32> {
        self.last_pick
    }

    pub fn last_atom(&self) -> Option<u32> {
        self.last_atom
    }

    /// Forget resolved picks. A pending request is kept.
    pub fn clear_results(&mut self) {
        self.last_pick = None;
        self.last_atom = None;
    }
}

/// Object index stored in the nearest non-empty bucket.
#[must_use]
pub fn decode_mouse_buckets(buckets: &[u32]) -> Option<u32> {
    buckets.iter().find(|&&b| b != 0).map(|&b| b - 1)
}

impl<D: GpuDevice> RenderEngine<D> {
    /// Pick whatever is under `pixel` on the next frame. The result is
    /// available once that frame's slot is reused.
    pub fn request_pick(&mut self, pixel: Vec2) {
        self.picking.request(pixel);
    }

    /// Object picked most recently, if any.
    #[must_use]
    pub fn last_pick(&self) -> Option<u32> {
        self.picking.last_pick()
    }

    /// Atom picked most recently, if the pick hit an atom.
    #[must_use]
    pub fn last_picked_atom(&self) -> Option<u32> {
        self.picking.last_atom()
    }

    /// Read and clear the current slot's buckets if its last submission
    /// recorded a pick, and apply the result to the scene.
    pub(super) fn collect_pick(&mut self) -> Option<u32> {
        let slot = self.ring.current_mut();
        if !slot.pick_armed {
            return None;
        }
        slot.pick_armed = false;
        let view = slot.buffers.mouse;

        let mut buckets = vec![0u32; MOUSE_BUCKET_COUNT];
        self.arena.read_from_buffer_and_clear(
            &mut self.device,
            &view,
            bytemuck::cast_slice_mut(&mut buckets),
        );
        let picked = decode_mouse_buckets(&buckets);
        self.picking.last_pick = picked;
        self.picking.last_atom = self
            .loaded
            .as_mut()
            .and_then(|loaded| loaded.scene.handle_pick(picked));
        log::debug!("pick resolved to {picked:?}");
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_bucket_wins_and_ids_are_offset() {
        let mut buckets = [0u32; 8];
        assert_eq!(decode_mouse_buckets(&buckets), None);
        buckets[5] = 1;
        assert_eq!(decode_mouse_buckets(&buckets), Some(0));
        buckets[2] = 43;
        assert_eq!(decode_mouse_buckets(&buckets), Some(42));
    }

    #[test]
    fn a_request_arms_exactly_one_frame() {
        let mut picking = PickingSystem::default();
        assert_eq!(picking.take_mouse(), [0.0; 4]);
        picking.request(Vec2::new(3.0, 4.0));
        assert!(picking.is_pending());
        assert_eq!(picking.take_mouse(), [3.0, 4.0, 1.0, 0.0]);
        assert!(!picking.is_pending());
        assert_eq!(picking.take_mouse(), [0.0; 4]);
    }

    #[test]
    fn clearing_results_keeps_the_request() {
        let mut picking = PickingSystem {
            pending: None,
            last_pick: Some(3),
            last_atom: Some(3),
        };
        picking.request(Vec2::ONE);
        picking.clear_results();
        assert_eq!(picking.last_pick(), None);
        assert_eq!(picking.last_atom(), None);
        assert!(picking.is_pending());
    }
}
