use std::{ptr::NonNull, slice};

use log::debug;

use crate::{
  block::{BlockTag, TAG_SIZE},
  error::{AllocError, Result},
  mapper::Mapper,
};

/// The single mapped range backing small allocations.
///
/// ```text
///   base                                     high-water mark      capacity
///   │                                                │                │
///   ▼                                                ▼                ▼
///   ┌───┬─────────┬───┬───┬──────────────┬───┬───────┬────────────────┐
///   │ H │ payload │ F │ H │   payload    │ F │  ...  │   untouched    │
///   └───┴─────────┴───┴───┴──────────────┴───┴───────┴────────────────┘
/// ```
///
/// All reads and writes go through offsets checked against the capacity.
/// The base address is private and may change on every [`HeapRegion::resize`].
pub(crate) struct HeapRegion {
  base: NonNull<u8>,
  capacity: usize,
}

impl HeapRegion {
  pub fn reserve<M: Mapper>(
    mapper: &mut M,
    capacity: usize,
  ) -> Result<Self> {
    let base = mapper
      .reserve(capacity)
      .map_err(|source| AllocError::Os { op: "mmap", source })?;

    debug!("heap mapped at {:p}, capacity = {}", base, capacity);

    Ok(Self { base, capacity })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  fn bytes(&self) -> &[u8] {
    // SAFETY: `base` maps `capacity` read-write bytes owned by `self`.
    unsafe { slice::from_raw_parts(self.base.as_ptr(), self.capacity) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: as in `bytes`, and `&mut self` makes the view unique.
    unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.capacity) }
  }

  /// Tag at `offset`, or `None` if it would run past the capacity.
  pub fn tag(
    &self,
    offset: usize,
  ) -> Option<BlockTag> {
    let end = offset.checked_add(TAG_SIZE)?;
    let bytes = self.bytes().get(offset..end)?;

    bytes.try_into().ok().map(BlockTag::from_bytes)
  }

  /// Writes `tag` at `offset`. Offsets come from walking valid tags, so
  /// running past the capacity is a heap invariant violation and panics.
  pub fn set_tag(
    &mut self,
    offset: usize,
    tag: BlockTag,
  ) {
    self.bytes_mut()[offset..offset + TAG_SIZE].copy_from_slice(&tag.to_bytes());
  }

  pub fn payload_mut(
    &mut self,
    offset: usize,
    length: usize,
  ) -> Option<&mut [u8]> {
    self.bytes_mut().get_mut(offset..offset.checked_add(length)?)
  }

  /// Remaps to `new_capacity` bytes. On failure the region is left as it
  /// was.
  pub fn resize<M: Mapper>(
    &mut self,
    mapper: &mut M,
    new_capacity: usize,
  ) -> Result<()> {
    // SAFETY: `base` and `capacity` describe the mapping this region owns.
    let base = unsafe { mapper.resize(self.base, self.capacity, new_capacity) }
      .map_err(|source| AllocError::Os { op: "mremap", source })?;

    debug!(
      "heap resized {} -> {} bytes, base {:p} -> {:p}",
      self.capacity, new_capacity, self.base, base
    );

    self.base = base;
    self.capacity = new_capacity;

    Ok(())
  }

  /// Unmaps the region. Idempotent: a released region has zero capacity.
  pub fn release<M: Mapper>(
    &mut self,
    mapper: &mut M,
  ) -> Result<()> {
    if self.capacity == 0 {
      return Ok(());
    }

    // SAFETY: see `resize`. The capacity is zeroed so no view survives.
    unsafe { mapper.release(self.base, self.capacity) }
      .map_err(|source| AllocError::Os { op: "munmap", source })?;

    debug!("heap at {:p} released ({} bytes)", self.base, self.capacity);

    self.capacity = 0;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{block::Role, mapper::Mmap};

  #[test]
  fn test_tags_are_bounds_checked() {
    let mut mmap = Mmap;
    let mut heap = HeapRegion::reserve(&mut mmap, 64).unwrap();

    assert_eq!(heap.tag(0), Some(BlockTag::EMPTY));
    assert_eq!(heap.tag(60), Some(BlockTag::EMPTY));
    assert_eq!(heap.tag(61), None);
    assert_eq!(heap.tag(usize::MAX), None);

    let tag = BlockTag::new(56, true, Role::Header);
    heap.set_tag(0, tag);
    assert_eq!(heap.tag(0), Some(tag));

    heap.release(&mut mmap).unwrap();
  }

  #[test]
  fn test_resize_keeps_tags() {
    let mut mmap = Mmap;
    let mut heap = HeapRegion::reserve(&mut mmap, 4096).unwrap();

    let tag = BlockTag::new(12, false, Role::Footer);
    heap.set_tag(4092, tag);

    heap.resize(&mut mmap, 3 * 4096).unwrap();
    assert_eq!(heap.capacity(), 3 * 4096);
    assert_eq!(heap.tag(4092), Some(tag));
    assert_eq!(heap.tag(3 * 4096 - 4), Some(BlockTag::EMPTY));

    heap.release(&mut mmap).unwrap();
    assert_eq!(heap.capacity(), 0);
    assert!(heap.release(&mut mmap).is_ok());
  }

  #[test]
  fn test_payload_views() {
    let mut mmap = Mmap;
    let mut heap = HeapRegion::reserve(&mut mmap, 128).unwrap();

    heap.payload_mut(4, 8).unwrap().copy_from_slice(b"boundary");
    assert_eq!(heap.payload_mut(4, 8).as_deref(), Some(&b"boundary"[..]));
    assert_eq!(heap.tag(4), Some(BlockTag::from_bytes(*b"boun")));
    assert!(heap.payload_mut(124, 8).is_none());

    heap.release(&mut mmap).unwrap();
  }
}
