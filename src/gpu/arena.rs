//! Handle-based owner of every device buffer.
//!
//! The arena hands out generational [`BufferHandle`]s into a dense slot
//! array. A destroyed slot is recycled with a bumped generation, so stale
//! handles never alias a new buffer; a slot whose generation is exhausted is
//! retired for good. Looking up an unknown or stale handle is a contract
//! violation and panics.
//!
//! Host access goes through [`BufferView`]s: cheap `(handle, offset, range,
//! kind)` tuples that own nothing. Writes require the buffer to be mapped.

use std::fmt;
use std::time::Duration;

use bytemuck::Pod;

use super::command::{BufferCopy, CommandList, SubmitInfo};
use super::device::{
    BufferDesc, DescriptorKind, DeviceError, FenceError, GpuDevice,
    MemoryClass, RawBuffer, RawFence,
};

/// Opaque generational id of an arena-owned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle {
    index: u32,
    generation: u32,
}

impl BufferHandle {
    /// Slot index.
    #[must_use]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at issue time.
    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}v{}", self.index, self.generation)
    }
}

/// Byte range of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRange {
    /// From the offset to the end of the buffer.
    Whole,
    /// Exactly this many bytes.
    Bytes(u64),
}

/// Non-owning slice of an arena buffer.
///
/// Views are not tracked: using one after its buffer is destroyed panics on
/// the stale handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferView {
    /// Buffer the view points into.
    pub handle: BufferHandle,
    /// Byte offset.
    pub offset: u64,
    /// Byte length.
    pub range: u64,
    /// How the view is bound.
    pub kind: DescriptorKind,
}

/// Synchronous transfer path used by [`BufferArena::stage_buffer`].
pub struct UploadContext {
    fence: RawFence,
    commands: CommandList,
    timeout: Duration,
}

impl UploadContext {
    /// Create the upload fence and command list.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if the fence cannot be created.
    pub fn new<D: GpuDevice>(
        device: &mut D,
        timeout: Duration,
    ) -> Result<Self, DeviceError> {
        Ok(Self {
            fence: device.create_fence(false)?,
            commands: CommandList::new(),
            timeout,
        })
    }

    /// Upload fence timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Release the upload fence.
    pub fn destroy<D: GpuDevice>(self, device: &mut D) {
        device.destroy_fence(self.fence);
    }
}

/// Failure of a staged upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// Staging buffer creation, mapping or submission failed.
    Device(DeviceError),
    /// The upload fence did not signal in time.
    Fence(FenceError),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(e) => write!(f, "staged upload failed: {e}"),
            Self::Fence(e) => write!(f, "staged upload stalled: {e}"),
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Device(e) => Some(e),
            Self::Fence(e) => Some(e),
        }
    }
}

impl From<DeviceError> for UploadError {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

#[derive(Debug)]
struct BufferEntry {
    raw: RawBuffer,
    size: u64,
    usage: wgpu::BufferUsages,
    class: MemoryClass,
    mapped: bool,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<BufferEntry>,
}

/// Owner of every device buffer, keyed by [`BufferHandle`].
#[derive(Debug, Default)]
pub struct BufferArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

#[cold]
#[track_caller]
#[allow(clippy::panic)]
fn contract_violation(what: &str) -> ! {
    log::error!("buffer arena contract violation: {what}");
    panic!("buffer arena contract violation: {what}")
}

/// Round `size` up to a multiple of `alignment` (a power of two).
#[must_use]
pub fn padded_uniform_size(size: u64, alignment: u64) -> u64 {
    if alignment > 0 {
        (size + alignment - 1) & !(alignment - 1)
    } else {
        size
    }
}

impl BufferArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live buffers.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Allocate a device buffer and return its fresh handle.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if the device cannot allocate the buffer.
    pub fn create_buffer<D: GpuDevice>(
        &mut self,
        device: &mut D,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
        class: MemoryClass,
    ) -> Result<BufferHandle, DeviceError> {
        let raw = device.create_buffer(&BufferDesc {
            label,
            size,
            usage,
            class,
        })?;

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        if slot.entry.is_some() {
            contract_violation("handle collision on a recycled slot");
        }
        slot.entry = Some(BufferEntry {
            raw,
            size,
            usage,
            class,
            mapped: false,
        });
        self.live += 1;

        let handle = BufferHandle {
            index,
            generation: slot.generation,
        };
        log::debug!("created {handle} '{label}' ({size} bytes, {class:?})");
        Ok(handle)
    }

    #[track_caller]
    fn entry(&self, handle: BufferHandle) -> &BufferEntry {
        match self.slots.get(handle.index as usize) {
            Some(Slot {
                generation,
                entry: Some(entry),
            }) if *generation == handle.generation => entry,
            _ => contract_violation(&format!("unknown handle {handle}")),
        }
    }

    #[track_caller]
    fn entry_mut(&mut self, handle: BufferHandle) -> &mut BufferEntry {
        match self.slots.get_mut(handle.index as usize) {
            Some(Slot {
                generation,
                entry: Some(entry),
            }) if *generation == handle.generation => entry,
            _ => contract_violation(&format!("unknown handle {handle}")),
        }
    }

    /// Whether `handle` names a live buffer.
    #[must_use]
    pub fn contains(&self, handle: BufferHandle) -> bool {
        self.slots.get(handle.index as usize).is_some_and(|slot| {
            slot.generation == handle.generation && slot.entry.is_some()
        })
    }

    /// Device id of the buffer behind `handle`.
    #[must_use]
    #[track_caller]
    pub fn raw(&self, handle: BufferHandle) -> RawBuffer {
        self.entry(handle).raw
    }

    /// Size in bytes of the buffer behind `handle`.
    #[must_use]
    #[track_caller]
    pub fn buffer_size(&self, handle: BufferHandle) -> u64 {
        self.entry(handle).size
    }

    /// Usage flags of the buffer behind `handle`.
    #[must_use]
    #[track_caller]
    pub fn usage(&self, handle: BufferHandle) -> wgpu::BufferUsages {
        self.entry(handle).usage
    }

    /// Residency class of the buffer behind `handle`.
    #[must_use]
    #[track_caller]
    pub fn class(&self, handle: BufferHandle) -> MemoryClass {
        self.entry(handle).class
    }

    /// Whether the buffer behind `handle` is mapped.
    #[must_use]
    #[track_caller]
    pub fn is_mapped(&self, handle: BufferHandle) -> bool {
        self.entry(handle).mapped
    }

    /// Describe `range` bytes of `handle` starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset + range` exceeds the buffer size.
    #[must_use]
    #[track_caller]
    pub fn create_buffer_resource(
        &self,
        handle: BufferHandle,
        offset: u64,
        range: BufferRange,
        kind: DescriptorKind,
    ) -> BufferView {
        let size = self.entry(handle).size;
        if offset > size {
            contract_violation(&format!(
                "view offset {offset} past the end of {handle} ({size} bytes)"
            ));
        }
        let range = match range {
            BufferRange::Whole => size - offset,
            BufferRange::Bytes(bytes) => bytes,
        };
        if offset.checked_add(range).is_none_or(|end| end > size) {
            contract_violation(&format!(
                "view {offset}+{range} exceeds {handle} ({size} bytes)"
            ));
        }
        BufferView {
            handle,
            offset,
            range,
            kind,
        }
    }

    /// Map a host-visible buffer.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if the device refuses the mapping.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is device-local or already mapped.
    #[track_caller]
    pub fn map_buffer<D: GpuDevice>(
        &mut self,
        device: &mut D,
        handle: BufferHandle,
    ) -> Result<(), DeviceError> {
        let entry = self.entry_mut(handle);
        if !entry.class.is_host_visible() {
            contract_violation(&format!("mapping device-local {handle}"));
        }
        if entry.mapped {
            contract_violation(&format!("{handle} mapped twice"));
        }
        device.map_buffer(entry.raw)?;
        entry.mapped = true;
        Ok(())
    }

    /// Unmap a mapped buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not mapped.
    #[track_caller]
    pub fn unmap_buffer<D: GpuDevice>(
        &mut self,
        device: &mut D,
        handle: BufferHandle,
    ) {
        let entry = self.entry_mut(handle);
        if !entry.mapped {
            contract_violation(&format!("{handle} unmapped while not mapped"));
        }
        device.unmap_buffer(entry.raw);
        entry.mapped = false;
    }

    /// Host view of the whole buffer, or `None` while unmapped.
    #[must_use]
    #[track_caller]
    pub fn mapped_data<'d, D: GpuDevice>(
        &self,
        device: &'d D,
        handle: BufferHandle,
    ) -> Option<&'d [u8]> {
        let entry = self.entry(handle);
        if entry.mapped {
            device.mapped_range(entry.raw, 0, entry.size).ok()
        } else {
            None
        }
    }

    #[track_caller]
    fn mapped_raw(&self, view: &BufferView) -> RawBuffer {
        let entry = self.entry(view.handle);
        if !entry.mapped {
            contract_violation(&format!(
                "host access to unmapped {}",
                view.handle
            ));
        }
        entry.raw
    }

    /// Copy `src` into the mapped buffer at `view.offset`.
    ///
    /// `src.len()` is not checked against `view.range`; callers keep writes
    /// inside their view. Writing past the buffer end panics.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not mapped or the write leaves the buffer.
    #[track_caller]
    pub fn write_to_buffer<D: GpuDevice>(
        &self,
        device: &mut D,
        view: &BufferView,
        src: &[u8],
    ) {
        let raw = self.mapped_raw(view);
        match device.mapped_range_mut(raw, view.offset, src.len() as u64) {
            Ok(dst) => dst.copy_from_slice(src),
            Err(e) => contract_violation(&e.to_string()),
        }
    }

    /// Copy `dst.len()` bytes out of the mapped buffer at `view.offset`.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not mapped or the read leaves the buffer.
    #[track_caller]
    pub fn read_from_buffer<D: GpuDevice>(
        &self,
        device: &D,
        view: &BufferView,
        dst: &mut [u8],
    ) {
        let raw = self.mapped_raw(view);
        match device.mapped_range(raw, view.offset, dst.len() as u64) {
            Ok(src) => dst.copy_from_slice(src),
            Err(e) => contract_violation(&e.to_string()),
        }
    }

    /// Read like [`read_from_buffer`](Self::read_from_buffer), then zero the
    /// source range so the next read only sees fresh device writes.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not mapped or the read leaves the buffer.
    #[track_caller]
    pub fn read_from_buffer_and_clear<D: GpuDevice>(
        &self,
        device: &mut D,
        view: &BufferView,
        dst: &mut [u8],
    ) {
        let raw = self.mapped_raw(view);
        match device.mapped_range_mut(raw, view.offset, dst.len() as u64) {
            Ok(src) => {
                dst.copy_from_slice(src);
                src.fill(0);
            }
            Err(e) => contract_violation(&e.to_string()),
        }
    }

    /// Zero the whole view range.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not mapped.
    #[track_caller]
    pub fn clear_buffer<D: GpuDevice>(&self, device: &mut D, view: &BufferView) {
        let raw = self.mapped_raw(view);
        match device.mapped_range_mut(raw, view.offset, view.range) {
            Ok(dst) => dst.fill(0),
            Err(e) => contract_violation(&e.to_string()),
        }
    }

    /// Write a slice of plain-old-data values at `view.offset`.
    #[track_caller]
    pub fn write_pod<D: GpuDevice, T: Pod>(
        &self,
        device: &mut D,
        view: &BufferView,
        values: &[T],
    ) {
        self.write_to_buffer(device, view, bytemuck::cast_slice(values));
    }

    /// Read `count` plain-old-data values from `view.offset`.
    #[must_use]
    #[track_caller]
    pub fn read_pod<D: GpuDevice, T: Pod>(
        &self,
        device: &D,
        view: &BufferView,
        count: usize,
    ) -> Vec<T> {
        let mut bytes = vec![0u8; count * size_of::<T>()];
        self.read_from_buffer(device, view, &mut bytes);
        bytemuck::pod_collect_to_vec(&bytes)
    }

    /// Upload `src` into `dest` through a temporary staging buffer.
    ///
    /// Blocks until the transfer completes or the upload timeout expires.
    /// The staging buffer is destroyed on every path.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError`] if staging fails or the fence times out.
    ///
    /// # Panics
    ///
    /// Panics if `src` is larger than `dest.range`.
    #[track_caller]
    pub fn stage_buffer<D: GpuDevice>(
        &mut self,
        device: &mut D,
        upload: &mut UploadContext,
        src: &[u8],
        dest: &BufferView,
    ) -> Result<(), UploadError> {
        let size = src.len() as u64;
        if size > dest.range {
            contract_violation(&format!(
                "staging {size} bytes into a {}-byte view",
                dest.range
            ));
        }
        if size == 0 {
            return Ok(());
        }
        let dest_raw = self.raw(dest.handle);

        let staging = self.create_buffer(
            device,
            "Staging Buffer",
            size,
            wgpu::BufferUsages::COPY_SRC,
            MemoryClass::HostVisible,
        )?;
        let result =
            self.submit_staged(device, upload, staging, src, dest_raw, dest);
        self.destroy_buffer(device, staging);
        result
    }

    fn submit_staged<D: GpuDevice>(
        &mut self,
        device: &mut D,
        upload: &mut UploadContext,
        staging: BufferHandle,
        src: &[u8],
        dest_raw: RawBuffer,
        dest: &BufferView,
    ) -> Result<(), UploadError> {
        self.map_buffer(device, staging)?;
        let staging_view = self.create_buffer_resource(
            staging,
            0,
            BufferRange::Whole,
            dest.kind,
        );
        self.write_to_buffer(device, &staging_view, src);

        upload.commands.reset();
        upload.commands.copy_buffer(
            self.raw(staging),
            dest_raw,
            BufferCopy {
                src_offset: 0,
                dst_offset: dest.offset,
                size: src.len() as u64,
            },
        );
        device.submit(
            &upload.commands,
            &SubmitInfo {
                fence: Some(upload.fence),
                ..SubmitInfo::default()
            },
        )?;
        let waited = device.wait_fence(upload.fence, upload.timeout);
        device.reset_fence(upload.fence);
        upload.commands.reset();
        waited.map_err(|e| {
            log::error!("staged upload of {} bytes stalled: {e}", src.len());
            UploadError::Fence(e)
        })
    }

    /// Destroy the buffer behind `handle`, unmapping it first if needed.
    /// The handle is never issued again.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is unknown.
    #[track_caller]
    pub fn destroy_buffer<D: GpuDevice>(
        &mut self,
        device: &mut D,
        handle: BufferHandle,
    ) {
        let _ = self.entry(handle);
        let slot = &mut self.slots[handle.index as usize];
        let Some(entry) = slot.entry.take() else {
            contract_violation(&format!("unknown handle {handle}"));
        };
        if entry.mapped {
            device.unmap_buffer(entry.raw);
        }
        device.destroy_buffer(entry.raw);
        self.live -= 1;

        // Retire slots whose generation cannot advance.
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free.push(handle.index);
        } else {
            log::debug!("retiring slot {}", handle.index);
        }
    }

    /// Destroy every live buffer. Used at shutdown.
    pub fn destroy_all<D: GpuDevice>(&mut self, device: &mut D) {
        let handles: Vec<BufferHandle> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.entry.is_some())
            .map(|(index, slot)| BufferHandle {
                index: index as u32,
                generation: slot.generation,
            })
            .collect();
        for handle in handles {
            self.destroy_buffer(device, handle);
        }
    }

    #[cfg(test)]
    fn force_generation(&mut self, index: u32, generation: u32) {
        self.slots[index as usize].generation = generation;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use proptest::prelude::*;

    use super::*;
    use crate::gpu::soft::SoftDevice;

    fn host_buffer(
        arena: &mut BufferArena,
        device: &mut SoftDevice,
        size: u64,
    ) -> BufferHandle {
        arena
            .create_buffer(
                device,
                "test",
                size,
                wgpu::BufferUsages::STORAGE,
                MemoryClass::HostVisible,
            )
            .unwrap()
    }

    #[test]
    fn whole_range_resolves_to_remaining_bytes() {
        let mut device = SoftDevice::new();
        let mut arena = BufferArena::new();
        let h = host_buffer(&mut arena, &mut device, 256);
        let view = arena.create_buffer_resource(
            h,
            64,
            BufferRange::Whole,
            DescriptorKind::StorageBuffer,
        );
        assert_eq!(view.range, 192);
        assert_eq!(view.offset, 64);
    }

    #[test]
    fn write_then_read_through_views() {
        let mut device = SoftDevice::new();
        let mut arena = BufferArena::new();
        let h = host_buffer(&mut arena, &mut device, 64);
        arena.map_buffer(&mut device, h).unwrap();
        let view = arena.create_buffer_resource(
            h,
            16,
            BufferRange::Bytes(16),
            DescriptorKind::StorageBuffer,
        );
        arena.write_pod(&mut device, &view, &[1u32, 2, 3, 4]);
        assert_eq!(arena.read_pod::<_, u32>(&device, &view, 4), vec![1, 2, 3, 4]);

        let whole = arena.mapped_data(&device, h).unwrap();
        assert_eq!(whole.len(), 64);
        assert!(whole[..16].iter().all(|&b| b == 0));
    }

    #[test]
    fn read_and_clear_zeroes_source() {
        let mut device = SoftDevice::new();
        let mut arena = BufferArena::new();
        let h = host_buffer(&mut arena, &mut device, 32);
        arena.map_buffer(&mut device, h).unwrap();
        let view = arena.create_buffer_resource(
            h,
            0,
            BufferRange::Whole,
            DescriptorKind::StorageBuffer,
        );
        arena.write_pod(&mut device, &view, &[7u32; 8]);

        let mut out = [0u8; 32];
        arena.read_from_buffer_and_clear(&mut device, &view, &mut out);
        assert_eq!(bytemuck::cast_slice::<u8, u32>(&out), &[7u32; 8]);
        assert_eq!(arena.read_pod::<_, u32>(&device, &view, 8), vec![0; 8]);
    }

    #[test]
    fn unmapped_buffer_has_no_host_data() {
        let mut device = SoftDevice::new();
        let mut arena = BufferArena::new();
        let h = host_buffer(&mut arena, &mut device, 16);
        assert!(arena.mapped_data(&device, h).is_none());
        arena.map_buffer(&mut device, h).unwrap();
        assert!(arena.mapped_data(&device, h).is_some());
        arena.unmap_buffer(&mut device, h);
        assert!(arena.mapped_data(&device, h).is_none());
    }

    #[test]
    #[should_panic(expected = "unmapped")]
    fn write_to_unmapped_buffer_panics() {
        let mut device = SoftDevice::new();
        let mut arena = BufferArena::new();
        let h = host_buffer(&mut arena, &mut device, 16);
        let view = arena.create_buffer_resource(
            h,
            0,
            BufferRange::Whole,
            DescriptorKind::StorageBuffer,
        );
        arena.write_to_buffer(&mut device, &view, &[0u8; 4]);
    }

    #[test]
    #[should_panic(expected = "unknown handle")]
    fn destroyed_handle_is_rejected() {
        let mut device = SoftDevice::new();
        let mut arena = BufferArena::new();
        let h = host_buffer(&mut arena, &mut device, 16);
        arena.destroy_buffer(&mut device, h);
        let _ = arena.buffer_size(h);
    }

    #[test]
    fn destroy_unmaps_and_releases() {
        let mut device = SoftDevice::new();
        let mut arena = BufferArena::new();
        let h = host_buffer(&mut arena, &mut device, 16);
        arena.map_buffer(&mut device, h).unwrap();
        assert_eq!(device.live_buffer_count(), 1);
        arena.destroy_buffer(&mut device, h);
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(arena.live_count(), 0);
        assert!(!arena.contains(h));
    }

    #[test]
    fn exhausted_generation_retires_slot() {
        let mut device = SoftDevice::new();
        let mut arena = BufferArena::new();
        let first = host_buffer(&mut arena, &mut device, 16);
        arena.destroy_buffer(&mut device, first);
        arena.force_generation(first.index(), u32::MAX);
        let last = host_buffer(&mut arena, &mut device, 16);
        assert_eq!(last.index(), first.index());
        assert_eq!(last.generation(), u32::MAX);

        arena.destroy_buffer(&mut device, last);
        let fresh = host_buffer(&mut arena, &mut device, 16);
        assert_ne!(fresh.index(), last.index());
    }

    #[test]
    fn staged_upload_reaches_device_local_buffer() {
        let mut device = SoftDevice::new();
        let mut arena = BufferArena::new();
        let mut upload =
            UploadContext::new(&mut device, Duration::from_secs(10)).unwrap();
        let dest = arena
            .create_buffer(
                &mut device,
                "dest",
                64,
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                MemoryClass::DeviceLocal,
            )
            .unwrap();
        let view = arena.create_buffer_resource(
            dest,
            32,
            BufferRange::Bytes(32),
            DescriptorKind::StorageBuffer,
        );
        let data: Vec<u32> = (0..8).collect();
        arena
            .stage_buffer(&mut device, &mut upload, bytemuck::cast_slice(&data), &view)
            .unwrap();

        assert_eq!(arena.live_count(), 1, "staging buffer must be released");
        let contents = device.buffer_contents(arena.raw(dest));
        assert_eq!(bytemuck::cast_slice::<u8, u32>(&contents[32..]), &data[..]);
    }

    #[test]
    fn stalled_upload_reports_fence_timeout_and_cleans_up() {
        let mut device = SoftDevice::new();
        device.set_auto_complete(false);
        let mut arena = BufferArena::new();
        let mut upload =
            UploadContext::new(&mut device, Duration::from_millis(5)).unwrap();
        let dest = arena
            .create_buffer(
                &mut device,
                "dest",
                16,
                wgpu::BufferUsages::COPY_DST,
                MemoryClass::DeviceLocal,
            )
            .unwrap();
        let view = arena.create_buffer_resource(
            dest,
            0,
            BufferRange::Whole,
            DescriptorKind::StorageBuffer,
        );
        let err = arena
            .stage_buffer(&mut device, &mut upload, &[1u8; 16], &view)
            .unwrap_err();
        assert!(matches!(err, UploadError::Fence(FenceError::Timeout(_))));
        assert_eq!(arena.live_count(), 1);
    }

    #[test]
    fn padded_size_rounds_to_alignment() {
        assert_eq!(padded_uniform_size(144, 256), 256);
        assert_eq!(padded_uniform_size(256, 256), 256);
        assert_eq!(padded_uniform_size(257, 64), 320);
        assert_eq!(padded_uniform_size(10, 0), 10);
    }

    proptest! {
        #[test]
        fn handles_are_never_reissued(
            ops in prop::collection::vec(
                (any::<bool>(), any::<prop::sample::Index>()),
                1..200,
            )
        ) {
            let mut device = SoftDevice::new();
            let mut arena = BufferArena::new();
            let mut live: Vec<BufferHandle> = Vec::new();
            let mut issued: HashSet<BufferHandle> = HashSet::new();

            for (create, pick) in ops {
                if create || live.is_empty() {
                    let h = host_buffer(&mut arena, &mut device, 16);
                    prop_assert!(issued.insert(h), "handle {h} reissued");
                    prop_assert!(!live.contains(&h));
                    live.push(h);
                } else {
                    let h = live.swap_remove(pick.index(live.len()));
                    arena.destroy_buffer(&mut device, h);
                    prop_assert!(!arena.contains(h));
                }
            }
            prop_assert_eq!(arena.live_count(), live.len());
        }

        #[test]
        fn view_bounds_are_enforced(
            size in 1u64..4096,
            offset in 0u64..8192,
            range in 0u64..8192,
        ) {
            let mut device = SoftDevice::new();
            let mut arena = BufferArena::new();
            let h = host_buffer(&mut arena, &mut device, size);
            let result = catch_unwind(AssertUnwindSafe(|| {
                arena.create_buffer_resource(
                    h,
                    offset,
                    BufferRange::Bytes(range),
                    DescriptorKind::StorageBuffer,
                )
            }));
            prop_assert_eq!(result.is_err(), offset + range > size);
        }
    }
}
