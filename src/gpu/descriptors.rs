//! Descriptor-set layout cache and growable pool allocator.
//!
//! Layouts are deduplicated structurally: bindings are sorted by index before
//! lookup, so two call sites describing the same set in different orders get
//! the same [`RawSetLayout`]. Sets come from fixed-size pools; when the current
//! pool runs dry the allocator grabs another (recycled or new) and retries
//! exactly once. Sets are never freed individually, only in bulk by
//! [`DescriptorAllocator::reset_pools`].

use std::fmt;

use rustc_hash::FxHashMap;

use super::arena::{BufferArena, BufferView};
use super::device::{
    DescriptorKind, DescriptorWrite, DeviceError, GpuDevice, LayoutBinding,
    PoolAllocError, RawPool, RawSet, RawSetLayout,
};

/// Sets each pool is sized for unless configured otherwise.
pub const DEFAULT_SETS_PER_POOL: u32 = 1000;

/// Descriptors reserved per set, by kind.
const POOL_WEIGHTS: [(DescriptorKind, f32); 11] = [
    (DescriptorKind::Sampler, 0.5),
    (DescriptorKind::CombinedImageSampler, 4.0),
    (DescriptorKind::SampledImage, 4.0),
    (DescriptorKind::StorageImage, 1.0),
    (DescriptorKind::UniformTexelBuffer, 1.0),
    (DescriptorKind::StorageTexelBuffer, 1.0),
    (DescriptorKind::UniformBuffer, 2.0),
    (DescriptorKind::StorageBuffer, 2.0),
    (DescriptorKind::UniformBufferDynamic, 1.0),
    (DescriptorKind::StorageBufferDynamic, 1.0),
    (DescriptorKind::InputAttachment, 0.5),
];

/// Per-kind descriptor quotas of a pool sized for `sets_per_pool` sets.
#[must_use]
pub fn pool_sizes(sets_per_pool: u32) -> Vec<(DescriptorKind, u32)> {
    POOL_WEIGHTS
        .iter()
        .map(|&(kind, weight)| (kind, (weight * sets_per_pool as f32) as u32))
        .collect()
}

/// Descriptor layout or set creation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// The device failed to create a layout or pool, or to write a set.
    Device(DeviceError),
    /// Set allocation failed, after the single retry when it was a pool
    /// exhaustion.
    Allocation(PoolAllocError),
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(e) => write!(f, "descriptor setup failed: {e}"),
            Self::Allocation(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DescriptorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Device(e) => Some(e),
            Self::Allocation(e) => Some(e),
        }
    }
}

impl From<DeviceError> for DescriptorError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl From<PoolAllocError> for DescriptorError {
    fn from(e: PoolAllocError) -> Self {
        Self::Allocation(e)
    }
}

/// Structural cache of descriptor-set layouts.
#[derive(Debug, Default)]
pub struct DescriptorLayoutCache {
    layouts: FxHashMap<Vec<LayoutBinding>, RawSetLayout>,
}

impl DescriptorLayoutCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the layout for `bindings`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if the device cannot create the layout.
    ///
    /// # Panics
    ///
    /// Panics if two bindings share a binding index.
    pub fn create_layout<D: GpuDevice>(
        &mut self,
        device: &mut D,
        bindings: &[LayoutBinding],
    ) -> Result<RawSetLayout, DeviceError> {
        let mut key = bindings.to_vec();
        if !key.is_sorted_by_key(|b| b.binding) {
            key.sort_by_key(|b| b.binding);
        }
        assert!(
            key.windows(2).all(|w| w[0].binding != w[1].binding),
            "duplicate binding index in descriptor layout {key:?}"
        );

        if let Some(&layout) = self.layouts.get(&key) {
            return Ok(layout);
        }
        let layout = device.create_set_layout(&key)?;
        log::debug!(
            "created descriptor layout {} ({} bindings)",
            layout.id(),
            key.len()
        );
        let _ = self.layouts.insert(key, layout);
        Ok(layout)
    }

    /// Distinct layouts created so far.
    #[must_use]
    pub fn cached_layout_count(&self) -> usize {
        self.layouts.len()
    }

    /// Destroy every cached layout.
    pub fn cleanup<D: GpuDevice>(&mut self, device: &mut D) {
        for (_, layout) in self.layouts.drain() {
            device.destroy_set_layout(layout);
        }
    }
}

/// Hands out descriptor sets from a growing set of pools.
///
/// Every pool is in exactly one of current, used or free.
#[derive(Debug)]
pub struct DescriptorAllocator {
    sets_per_pool: u32,
    current: Option<RawPool>,
    used: Vec<RawPool>,
    free: Vec<RawPool>,
}

impl Default for DescriptorAllocator {
    fn default() -> Self {
        Self::with_sets_per_pool(DEFAULT_SETS_PER_POOL)
    }
}

impl DescriptorAllocator {
    /// Allocator sizing pools for [`DEFAULT_SETS_PER_POOL`] sets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator sizing pools for `sets_per_pool` sets.
    #[must_use]
    pub fn with_sets_per_pool(sets_per_pool: u32) -> Self {
        Self {
            sets_per_pool: sets_per_pool.max(1),
            current: None,
            used: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Pool allocations are currently served from.
    #[must_use]
    pub fn current_pool(&self) -> Option<RawPool> {
        self.current
    }

    /// Exhausted or superseded pools awaiting a reset.
    #[must_use]
    pub fn used_pools(&self) -> &[RawPool] {
        &self.used
    }

    /// Reset pools ready for reuse.
    #[must_use]
    pub fn free_pools(&self) -> &[RawPool] {
        &self.free
    }

    /// Make a recycled or freshly created pool current, retiring the old
    /// current pool to the used list.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if a new pool cannot be created.
    pub fn grab_pool<D: GpuDevice>(
        &mut self,
        device: &mut D,
    ) -> Result<RawPool, DeviceError> {
        let pool = match self.free.pop() {
            Some(pool) => pool,
            None => {
                let pool = device.create_descriptor_pool(
                    self.sets_per_pool,
                    &pool_sizes(self.sets_per_pool),
                )?;
                log::debug!(
                    "created descriptor pool {} ({} sets)",
                    pool.id(),
                    self.sets_per_pool
                );
                pool
            }
        };
        if let Some(previous) = self.current.replace(pool) {
            self.used.push(previous);
        }
        Ok(pool)
    }

    /// Allocate one set with `layout`.
    ///
    /// On a fragmented or exhausted pool the allocator grabs another pool and
    /// retries once. Other failures are returned without retry.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] if both attempts fail, the first failure
    /// is not a pool exhaustion, or a new pool cannot be created.
    pub fn allocate<D: GpuDevice>(
        &mut self,
        device: &mut D,
        layout: RawSetLayout,
    ) -> Result<RawSet, DescriptorError> {
        let pool = match self.current {
            Some(pool) => pool,
            None => self.grab_pool(device)?,
        };
        match device.allocate_set(pool, layout) {
            Ok(set) => Ok(set),
            Err(e) if e.is_pool_exhaustion() => {
                log::debug!("descriptor pool {} full ({e}), growing", pool.id());
                let pool = self.grab_pool(device)?;
                device.allocate_set(pool, layout).map_err(|e| {
                    log::warn!("descriptor allocation failed after retry: {e}");
                    DescriptorError::Allocation(e)
                })
            }
            Err(e) => Err(DescriptorError::Allocation(e)),
        }
    }

    /// Bulk-free every set: reset all used pools and the current one and move
    /// them to the free list.
    pub fn reset_pools<D: GpuDevice>(&mut self, device: &mut D) {
        let pools = self.used.drain(..).chain(self.current.take());
        for pool in pools {
            device.reset_descriptor_pool(pool);
            self.free.push(pool);
        }
    }

    /// Destroy every pool.
    pub fn cleanup<D: GpuDevice>(&mut self, device: &mut D) {
        let pools = self
            .free
            .drain(..)
            .chain(self.used.drain(..))
            .chain(self.current.take());
        for pool in pools {
            device.destroy_descriptor_pool(pool);
        }
    }
}

/// Fluent construction of a buffer-only descriptor set.
#[derive(Debug, Default)]
pub struct DescriptorBuilder {
    bindings: Vec<LayoutBinding>,
    views: Vec<(u32, BufferView)>,
}

impl DescriptorBuilder {
    /// Start an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `view` at `binding`, visible to `stages`. The descriptor kind is
    /// taken from the view.
    #[must_use]
    pub fn bind_buffer(
        mut self,
        binding: u32,
        view: BufferView,
        stages: wgpu::ShaderStages,
    ) -> Self {
        self.bindings.push(LayoutBinding::new(binding, view.kind, stages));
        self.views.push((binding, view));
        self
    }

    /// Resolve the layout, allocate the set and write every binding.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] if layout creation, allocation or the
    /// set update fails.
    pub fn build<D: GpuDevice>(
        self,
        device: &mut D,
        arena: &BufferArena,
        cache: &mut DescriptorLayoutCache,
        allocator: &mut DescriptorAllocator,
    ) -> Result<(RawSet, RawSetLayout), DescriptorError> {
        let layout = cache.create_layout(device, &self.bindings)?;
        let set = allocator.allocate(device, layout)?;
        let writes: Vec<DescriptorWrite> = self
            .views
            .iter()
            .map(|(binding, view)| DescriptorWrite {
                binding: *binding,
                kind: view.kind,
                buffer: arena.raw(view.handle),
                offset: view.offset,
                range: view.range,
            })
            .collect();
        device.update_set(set, &writes)?;
        Ok((set, layout))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::gpu::arena::BufferRange;
    use crate::gpu::device::MemoryClass;
    use crate::gpu::soft::SoftDevice;

    fn bindings() -> Vec<LayoutBinding> {
        vec![
            LayoutBinding::new(
                0,
                DescriptorKind::UniformBuffer,
                wgpu::ShaderStages::VERTEX,
            ),
            LayoutBinding::new(
                1,
                DescriptorKind::UniformBufferDynamic,
                wgpu::ShaderStages::VERTEX_FRAGMENT,
            ),
            LayoutBinding::new(
                2,
                DescriptorKind::StorageBuffer,
                wgpu::ShaderStages::COMPUTE,
            ),
            LayoutBinding::new(
                3,
                DescriptorKind::StorageBuffer,
                wgpu::ShaderStages::VERTEX,
            ),
            LayoutBinding::new(
                7,
                DescriptorKind::StorageBufferDynamic,
                wgpu::ShaderStages::FRAGMENT,
            ),
        ]
    }

    fn permutations(items: &[LayoutBinding]) -> Vec<Vec<LayoutBinding>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    fn storage_layout(
        device: &mut SoftDevice,
        cache: &mut DescriptorLayoutCache,
    ) -> RawSetLayout {
        cache
            .create_layout(
                device,
                &[LayoutBinding::new(
                    0,
                    DescriptorKind::StorageBuffer,
                    wgpu::ShaderStages::COMPUTE,
                )],
            )
            .unwrap()
    }

    #[test]
    fn every_permutation_resolves_to_one_layout() {
        let mut device = SoftDevice::new();
        let mut cache = DescriptorLayoutCache::new();
        let all = permutations(&bindings());
        assert_eq!(all.len(), 120);

        let first = cache.create_layout(&mut device, &all[0]).unwrap();
        for order in &all {
            assert_eq!(cache.create_layout(&mut device, order).unwrap(), first);
        }
        assert_eq!(cache.cached_layout_count(), 1);
        assert_eq!(device.live_layout_count(), 1);
    }

    #[test]
    fn differing_stages_are_distinct_layouts() {
        let mut device = SoftDevice::new();
        let mut cache = DescriptorLayoutCache::new();
        let a = bindings();
        let mut b = bindings();
        b[2].stages = wgpu::ShaderStages::VERTEX;
        let la = cache.create_layout(&mut device, &a).unwrap();
        let lb = cache.create_layout(&mut device, &b).unwrap();
        assert_ne!(la, lb);
        assert_eq!(cache.cached_layout_count(), 2);

        cache.cleanup(&mut device);
        assert_eq!(device.live_layout_count(), 0);
    }

    #[test]
    #[should_panic(expected = "duplicate binding index")]
    fn duplicate_binding_index_panics() {
        let mut device = SoftDevice::new();
        let mut cache = DescriptorLayoutCache::new();
        let mut list = bindings();
        list[4].binding = 1;
        let _ = cache.create_layout(&mut device, &list);
    }

    #[test]
    fn reset_moves_every_pool_to_free_list() {
        let mut device = SoftDevice::new();
        let mut cache = DescriptorLayoutCache::new();
        let mut alloc = DescriptorAllocator::with_sets_per_pool(2);
        let layout = storage_layout(&mut device, &mut cache);

        for _ in 0..5 {
            let _ = alloc.allocate(&mut device, layout).unwrap();
        }
        let mut before: Vec<RawPool> = alloc.used_pools().to_vec();
        before.extend(alloc.current_pool());
        assert_eq!(before.len(), 3);

        alloc.reset_pools(&mut device);
        assert!(alloc.used_pools().is_empty());
        assert!(alloc.current_pool().is_none());

        let mut after = alloc.free_pools().to_vec();
        before.sort();
        after.sort();
        assert_eq!(before, after);
        let unique: HashSet<RawPool> = after.iter().copied().collect();
        assert_eq!(unique.len(), after.len());
    }

    #[test]
    fn reset_pools_are_reused_before_creating_new_ones() {
        let mut device = SoftDevice::new();
        let mut cache = DescriptorLayoutCache::new();
        let mut alloc = DescriptorAllocator::with_sets_per_pool(2);
        let layout = storage_layout(&mut device, &mut cache);

        for _ in 0..4 {
            let _ = alloc.allocate(&mut device, layout).unwrap();
        }
        let created = device.live_pool_count();
        alloc.reset_pools(&mut device);
        for _ in 0..4 {
            let _ = alloc.allocate(&mut device, layout).unwrap();
        }
        assert_eq!(device.live_pool_count(), created);

        alloc.cleanup(&mut device);
        assert_eq!(device.live_pool_count(), 0);
    }

    #[test]
    fn exhaustion_retries_exactly_once() {
        let mut device = SoftDevice::new();
        let mut cache = DescriptorLayoutCache::new();
        let mut alloc = DescriptorAllocator::new();
        let layout = storage_layout(&mut device, &mut cache);

        device.inject_allocation_failure(PoolAllocError::FragmentedPool);
        let _ = alloc.allocate(&mut device, layout).unwrap();
        assert_eq!(device.allocation_attempts(), 2);
        assert_eq!(alloc.used_pools().len(), 1);

        device.inject_allocation_failure(PoolAllocError::OutOfPoolMemory);
        device.inject_allocation_failure(PoolAllocError::FragmentedPool);
        let err = alloc.allocate(&mut device, layout).unwrap_err();
        assert_eq!(
            err,
            DescriptorError::Allocation(PoolAllocError::FragmentedPool)
        );
        assert_eq!(device.allocation_attempts(), 4);
    }

    #[test]
    fn other_failures_are_not_retried() {
        let mut device = SoftDevice::new();
        let mut cache = DescriptorLayoutCache::new();
        let mut alloc = DescriptorAllocator::new();
        let layout = storage_layout(&mut device, &mut cache);

        device.inject_allocation_failure(PoolAllocError::Other(
            DeviceError::OutOfMemory,
        ));
        let err = alloc.allocate(&mut device, layout).unwrap_err();
        assert!(matches!(
            err,
            DescriptorError::Allocation(PoolAllocError::Other(_))
        ));
        assert_eq!(device.allocation_attempts(), 1);
        assert!(alloc.used_pools().is_empty());
    }

    #[test]
    fn pool_sizes_follow_weights() {
        let sizes = pool_sizes(1000);
        let get = |kind| {
            sizes.iter().find(|(k, _)| *k == kind).map(|(_, n)| *n)
        };
        assert_eq!(get(DescriptorKind::Sampler), Some(500));
        assert_eq!(get(DescriptorKind::CombinedImageSampler), Some(4000));
        assert_eq!(get(DescriptorKind::StorageBuffer), Some(2000));
        assert_eq!(get(DescriptorKind::UniformBufferDynamic), Some(1000));
        assert_eq!(sizes.len(), DescriptorKind::ALL.len());
    }

    #[test]
    fn builder_writes_views_into_set() {
        let mut device = SoftDevice::new();
        let mut arena = BufferArena::new();
        let mut cache = DescriptorLayoutCache::new();
        let mut alloc = DescriptorAllocator::new();
        let buffer = arena
            .create_buffer(
                &mut device,
                "objects",
                512,
                wgpu::BufferUsages::STORAGE,
                MemoryClass::HostVisible,
            )
            .unwrap();
        let view = arena.create_buffer_resource(
            buffer,
            256,
            BufferRange::Whole,
            DescriptorKind::StorageBuffer,
        );

        let (set, layout) = DescriptorBuilder::new()
            .bind_buffer(3, view, wgpu::ShaderStages::COMPUTE)
            .build(&mut device, &arena, &mut cache, &mut alloc)
            .unwrap();

        let writes = device.set_writes(set);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].binding, 3);
        assert_eq!(writes[0].offset, 256);
        assert_eq!(writes[0].range, 256);
        assert_eq!(device.set_layout_of(set), Some(layout));
    }
}
