use std::{
  fmt,
  ptr::{self, NonNull},
  slice,
};

use log::{debug, trace, warn};

use crate::{
  align,
  align::checked_align,
  block::{BlockTag, Role, TAG_SIZE},
  config::{BLOCK_MIN_PAYLOAD, HeapConfig},
  error::{AllocError, Result},
  heap::HeapRegion,
  mapper::{Mapper, Mmap},
};

/// Opaque reference to an allocation.
///
/// Small allocations are identified by the offset of their header from the
/// heap base, large ones by the address of their payload. Offsets stay valid
/// when the heap moves, addresses do not; call [`Allocator::access`] every
/// time the memory is needed instead of caching the pointer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

impl Handle {
  /// Rebuilds a handle from [`Handle::into_raw`].
  pub fn from_raw(raw: usize) -> Self {
    Self(raw)
  }

  pub fn into_raw(self) -> usize {
    self.0
  }
}

impl fmt::Debug for Handle {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "Handle({:#x})", self.0)
  }
}

/// Running totals over outstanding small allocations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocStats {
  /// Payload bytes handed out and not yet freed.
  pub bytes: usize,
  /// Number of live small allocations.
  pub count: usize,
}

impl AllocStats {
  /// Mean payload size rounded up to the tag width, if anything is live.
  pub fn average(&self) -> Option<usize> {
    (self.count > 0).then(|| align!(self.bytes / self.count))
  }
}

/// One block as seen by a walk over the heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  pub offset: usize,
  pub payload: usize,
  pub used: bool,
}

/// Boundary tag allocator over one growable mapping.
///
/// Requests below [`HeapConfig::large_threshold`] are carved out of the heap
/// with first fit; anything bigger gets its own mapping. Not thread safe:
/// wrap it in a lock to share it.
pub struct Allocator<M: Mapper = Mmap> {
  heap: HeapRegion,
  mapper: M,
  config: HeapConfig,
  high_water: usize,
  stats: AllocStats,
}

impl Allocator {
  /// Allocator with the default [`HeapConfig`] backed by `mmap`.
  pub fn new() -> Result<Self> {
    Self::with_config(HeapConfig::default())
  }

  pub fn with_config(config: HeapConfig) -> Result<Self> {
    Self::with_mapper(config, Mmap)
  }
}

impl<M: Mapper> Allocator<M> {
  pub fn with_mapper(
    config: HeapConfig,
    mut mapper: M,
  ) -> Result<Self> {
    config.validate()?;

    let heap = HeapRegion::reserve(&mut mapper, config.min_size)?;

    Ok(Self {
      heap,
      mapper,
      config,
      high_water: 0,
      stats: AllocStats::default(),
    })
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  /// Bytes currently mapped for the heap.
  pub fn capacity(&self) -> usize {
    self.heap.capacity()
  }

  /// End of the carved part of the heap.
  pub fn high_water_mark(&self) -> usize {
    self.high_water
  }

  pub fn stats(&self) -> AllocStats {
    self.stats
  }

  /// Walks every block between the heap base and the high-water mark.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    let mut offset = 0;

    std::iter::from_fn(move || {
      if offset >= self.high_water {
        return None;
      }

      let tag = self.heap.tag(offset)?;
      let info = BlockInfo {
        offset,
        payload: tag.payload_size(),
        used: tag.is_used(),
      };
      offset += tag.total_size();

      Some(info)
    })
  }

  /// Allocates at least `bytes` bytes.
  pub fn allocate(
    &mut self,
    bytes: usize,
  ) -> Result<Handle> {
    let rounded = checked_align(bytes)
      .ok_or(AllocError::OutOfMemory { requested: bytes })?
      .max(BLOCK_MIN_PAYLOAD);

    if rounded >= self.config.large_threshold {
      return self.allocate_large(rounded);
    }

    // Nothing worth scanning until at least one block could fit.
    if rounded < self.high_water.saturating_sub(2 * TAG_SIZE) {
      if let Some((offset, granted)) = self.first_fit(rounded) {
        self.stats.bytes += granted;
        self.stats.count += 1;

        trace!("allocate({}) -> reused block at {:#x} ({} bytes)", bytes, offset, granted);

        return Ok(Handle(offset));
      }
    }

    let block_size = rounded + 2 * TAG_SIZE;

    if self.high_water + block_size > self.heap.capacity() {
      self.grow(rounded)?;
    }

    let offset = self.high_water;
    self.carve(offset, rounded, true);
    self.high_water += block_size;

    self.stats.bytes += rounded;
    self.stats.count += 1;

    trace!("allocate({}) -> new block at {:#x}", bytes, offset);

    Ok(Handle(offset))
  }

  /// Current address of the payload behind `handle`.
  ///
  /// The result is only good until the next call that may resize the heap
  /// (`allocate` or `free`).
  pub fn access(
    &self,
    handle: Handle,
  ) -> Result<NonNull<u8>> {
    if !self.is_small(handle) {
      if !self.may_be_large(handle) {
        return Err(AllocError::InvalidHandle(handle));
      }
      return NonNull::new(ptr::with_exposed_provenance_mut(handle.0))
        .ok_or(AllocError::InvalidHandle(handle));
    }

    let header = self.header(handle)?;
    if !header.is_used() {
      return Err(AllocError::InvalidHandle(handle));
    }

    NonNull::new(self.heap.base().as_ptr().wrapping_add(handle.0 + TAG_SIZE))
      .ok_or(AllocError::InvalidHandle(handle))
  }

  /// Whole usable payload of `handle`, rounded up to the tag width.
  ///
  /// # Safety
  ///
  /// Small handles are checked. A large handle must come from
  /// [`Allocator::allocate`] on this allocator and must not have been freed.
  pub unsafe fn payload_mut(
    &mut self,
    handle: Handle,
  ) -> Result<&mut [u8]> {
    if !self.is_small(handle) {
      let (base, length) = unsafe { self.large_region(handle)? };
      let payload = base.as_ptr().wrapping_add(TAG_SIZE);

      return Ok(unsafe { slice::from_raw_parts_mut(payload, length - TAG_SIZE) });
    }

    let header = self.header(handle)?;
    if !header.is_used() {
      return Err(AllocError::InvalidHandle(handle));
    }

    self
      .heap
      .payload_mut(handle.0 + TAG_SIZE, header.payload_size())
      .ok_or(AllocError::InvalidHandle(handle))
  }

  /// Releases `handle`.
  ///
  /// Freeing a small handle twice is detected and reported as
  /// [`AllocError::DoubleFree`] without touching the heap. If the heap
  /// cannot be shrunk afterwards the block is still freed and the OS error
  /// is returned.
  ///
  /// # Safety
  ///
  /// Same contract as [`Allocator::payload_mut`] for large handles.
  pub unsafe fn free(
    &mut self,
    handle: Handle,
  ) -> Result<()> {
    if !self.is_small(handle) {
      let (base, length) = unsafe { self.large_region(handle)? };

      unsafe { self.mapper.release(base, length) }
        .map_err(|source| AllocError::Os { op: "munmap", source })?;

      debug!("free({:?}) -> unmapped large object ({} bytes)", handle, length);

      return Ok(());
    }

    let header = self.header(handle)?;
    let payload = header.payload_size();
    let footer_offset = handle.0 + TAG_SIZE + payload;

    let footer = match self.heap.tag(footer_offset) {
      Some(tag)
        if footer_offset < self.high_water
          && tag.role() == Role::Footer
          && tag.payload_size() == payload =>
      {
        tag
      }
      _ => {
        warn!("free({:?}) -> footer does not match header", handle);
        return Err(AllocError::InvalidHandle(handle));
      }
    };

    if !header.is_used() || !footer.is_used() {
      warn!("free({:?}) -> block is not in use", handle);
      return Err(AllocError::DoubleFree(handle));
    }

    self.carve(handle.0, payload, false);

    self.stats.bytes = self.stats.bytes.saturating_sub(payload);
    self.stats.count = self.stats.count.saturating_sub(1);

    trace!("free({:?}) -> released {} bytes", handle, payload);

    let (start, payload) = self.coalesce(handle.0, payload);

    self.shrink(start, payload)
  }

  /// Unmaps the heap and reports whether the OS accepted it. Large objects
  /// still outstanding are not tracked and stay mapped.
  pub fn teardown(mut self) -> Result<()> {
    self.heap.release(&mut self.mapper)
  }

  fn is_small(
    &self,
    handle: Handle,
  ) -> bool {
    handle.0 < self.high_water
  }

  /// Large objects are only ever placed above `max_size`, so anything
  /// between the high-water mark and there is a stale small handle.
  fn may_be_large(
    &self,
    handle: Handle,
  ) -> bool {
    handle.0 >= self.config.max_size + TAG_SIZE && handle.0 % TAG_SIZE == 0
  }

  /// Header tag of a small handle, checked for plausibility.
  fn header(
    &self,
    handle: Handle,
  ) -> Result<BlockTag> {
    if handle.0 % TAG_SIZE != 0 {
      warn!("{:?} is not tag aligned", handle);
      return Err(AllocError::InvalidHandle(handle));
    }

    match self.heap.tag(handle.0) {
      Some(tag) if tag.role() == Role::Header && tag.payload_size() >= BLOCK_MIN_PAYLOAD => Ok(tag),
      _ => {
        warn!("{:?} does not point at a block header", handle);
        Err(AllocError::InvalidHandle(handle))
      }
    }
  }

  /// Writes a matching header and footer around `payload` bytes at `offset`.
  fn carve(
    &mut self,
    offset: usize,
    payload: usize,
    used: bool,
  ) {
    self.heap.set_tag(offset, BlockTag::new(payload, used, Role::Header));
    self
      .heap
      .set_tag(offset + TAG_SIZE + payload, BlockTag::new(payload, used, Role::Footer));
  }

  fn average(&self) -> usize {
    self.stats.average().unwrap_or(self.config.resize_granularity)
  }

  /// First free block of at least `rounded` bytes, marked used and split
  /// when the leftover can hold another block. Returns the offset and the
  /// payload actually granted.
  fn first_fit(
    &mut self,
    rounded: usize,
  ) -> Option<(usize, usize)> {
    let mut offset = 0;

    while offset < self.high_water {
      let tag = self.heap.tag(offset)?;

      if !tag.is_used() && tag.payload_size() >= rounded {
        let payload = tag.payload_size();
        let leftover = payload - rounded;

        if leftover >= 2 * TAG_SIZE + BLOCK_MIN_PAYLOAD {
          self.carve(offset, rounded, true);
          self.carve(offset + rounded + 2 * TAG_SIZE, leftover - 2 * TAG_SIZE, false);
          return Some((offset, rounded));
        }

        self.carve(offset, payload, true);
        return Some((offset, payload));
      }

      offset += tag.total_size();
    }

    None
  }

  /// Makes room for one more block of `rounded` bytes past the high-water
  /// mark, with a margin so that a burst of small requests does not remap
  /// on every call.
  fn grow(
    &mut self,
    rounded: usize,
  ) -> Result<()> {
    let capacity = self.heap.capacity();
    let needed = self.high_water + rounded + 2 * TAG_SIZE;

    if capacity >= self.config.max_size || needed > self.config.max_size {
      warn!(
        "allocate({}) -> out of memory (capacity = {}, high-water mark = {})",
        rounded, capacity, self.high_water
      );
      return Err(AllocError::OutOfMemory { requested: rounded });
    }

    let margin = align!(rounded + self.config.resize_granularity + self.average());
    let new_capacity = (capacity + margin).max(needed).min(self.config.max_size);

    self.heap.resize(&mut self.mapper, new_capacity)
  }

  /// Merges the free block at `start` with free neighbours on both sides.
  /// Returns the resulting block.
  fn coalesce(
    &mut self,
    mut start: usize,
    mut payload: usize,
  ) -> (usize, usize) {
    if start > 0 {
      if let Some(left) = self.heap.tag(start - TAG_SIZE) {
        if !left.is_used() {
          let left_start = start - left.total_size();
          (start, payload) = self.merge(left_start, left.payload_size(), start, payload);
        }
      }
    }

    let next = start + payload + 2 * TAG_SIZE;
    if next < self.high_water {
      if let Some(right) = self.heap.tag(next) {
        if !right.is_used() {
          (start, payload) = self.merge(start, payload, next, right.payload_size());
        }
      }
    }

    (start, payload)
  }

  /// Joins two adjacent free blocks. The tags between them become payload.
  fn merge(
    &mut self,
    left_start: usize,
    left_payload: usize,
    right_start: usize,
    right_payload: usize,
  ) -> (usize, usize) {
    let merged = left_payload + right_payload + 2 * TAG_SIZE;

    self.heap.set_tag(right_start - TAG_SIZE, BlockTag::EMPTY);
    self.heap.set_tag(right_start, BlockTag::EMPTY);
    self.carve(left_start, merged, false);

    (left_start, merged)
  }

  /// Gives memory back when the free block at `start` is the last one and
  /// is bigger than the growth margin.
  fn shrink(
    &mut self,
    start: usize,
    payload: usize,
  ) -> Result<()> {
    let margin = self.config.resize_granularity + self.average();

    if start + payload + 2 * TAG_SIZE < self.high_water || payload <= margin {
      return Ok(());
    }

    self.high_water = start;
    self.heap.set_tag(self.high_water, BlockTag::EMPTY);

    let capacity = self.heap.capacity();
    let floor = align!(self.high_water + TAG_SIZE).max(self.config.min_size);
    let new_capacity = capacity.saturating_sub(align!(payload - margin)).max(floor);

    if new_capacity < capacity {
      self.heap.resize(&mut self.mapper, new_capacity)?;
    }

    Ok(())
  }

  fn allocate_large(
    &mut self,
    rounded: usize,
  ) -> Result<Handle> {
    let guard = u32::try_from(rounded).map_err(|_| AllocError::OutOfMemory { requested: rounded })?;
    let length = rounded + TAG_SIZE;

    let region = self
      .mapper
      .reserve(length)
      .map_err(|source| AllocError::Os { op: "mmap", source })?;

    let address = region.as_ptr().expose_provenance();

    if address < self.config.max_size {
      // Would be indistinguishable from a heap offset.
      warn!("large object mapped at {:#x}, below the heap ceiling", address);
      unsafe { self.mapper.release(region, length) }
        .map_err(|source| AllocError::Os { op: "munmap", source })?;
      return Err(AllocError::OutOfMemory { requested: rounded });
    }

    // SAFETY: fresh page-aligned mapping of at least `TAG_SIZE` bytes.
    unsafe { region.cast::<u32>().write(guard) };

    debug!("allocate({}) -> mapped large object at {:#x}", rounded, address);

    Ok(Handle(address + TAG_SIZE))
  }

  /// Mapping start and length of a large object, from its guard word.
  unsafe fn large_region(
    &self,
    handle: Handle,
  ) -> Result<(NonNull<u8>, usize)> {
    if !self.may_be_large(handle) {
      warn!("{:?} is neither a live heap block nor a large object", handle);
      return Err(AllocError::InvalidHandle(handle));
    }

    let base: NonNull<u8> = NonNull::new(ptr::with_exposed_provenance_mut(handle.0 - TAG_SIZE))
      .ok_or(AllocError::InvalidHandle(handle))?;

    let guard = unsafe { base.cast::<u32>().read() } as usize;

    Ok((base, guard + TAG_SIZE))
  }
}

impl<M: Mapper> Drop for Allocator<M> {
  fn drop(&mut self) {
    if let Err(err) = self.heap.release(&mut self.mapper) {
      warn!("failed to release heap: {}", err);
    }
  }
}
