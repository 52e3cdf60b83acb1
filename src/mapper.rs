use std::{io, ptr::NonNull};

/// Source of raw, zero-initialised, read-write memory.
///
/// The allocator only ever needs three things from the kernel: a fresh
/// region, a resized region (which may move), and a way to give a region
/// back. Anything that can do that can back a heap.
pub trait Mapper {
  /// Requests a region where `length` bytes can be read and written.
  fn reserve(
    &mut self,
    length: usize,
  ) -> io::Result<NonNull<u8>>;

  /// Grows or shrinks a region, possibly relocating it. Content up to
  /// `min(old_length, new_length)` is preserved.
  ///
  /// # Safety
  ///
  /// `address` must come from [`Mapper::reserve`] or [`Mapper::resize`] on
  /// this mapper with `old_length` as its current length.
  unsafe fn resize(
    &mut self,
    address: NonNull<u8>,
    old_length: usize,
    new_length: usize,
  ) -> io::Result<NonNull<u8>>;

  /// Returns a region to the kernel.
  ///
  /// # Safety
  ///
  /// Same requirements as [`Mapper::resize`]. The region must not be used
  /// afterwards.
  unsafe fn release(
    &mut self,
    address: NonNull<u8>,
    length: usize,
  ) -> io::Result<()>;
}

/// Anonymous private mappings through `mmap(2)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mmap;

impl Mapper for Mmap {
  fn reserve(
    &mut self,
    length: usize,
  ) -> io::Result<NonNull<u8>> {
    let protection = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

    let address = unsafe { libc::mmap(std::ptr::null_mut(), length, protection, flags, -1, 0) };

    if address == libc::MAP_FAILED {
      return Err(io::Error::last_os_error());
    }

    NonNull::new(address.cast()).ok_or_else(|| io::Error::other("mmap returned null"))
  }

  #[cfg(target_os = "linux")]
  unsafe fn resize(
    &mut self,
    address: NonNull<u8>,
    old_length: usize,
    new_length: usize,
  ) -> io::Result<NonNull<u8>> {
    let moved = unsafe {
      libc::mremap(
        address.as_ptr().cast(),
        old_length,
        new_length,
        libc::MREMAP_MAYMOVE,
      )
    };

    if moved == libc::MAP_FAILED {
      return Err(io::Error::last_os_error());
    }

    NonNull::new(moved.cast()).ok_or_else(|| io::Error::other("mremap returned null"))
  }

  // No mremap outside Linux: map, copy, unmap.
  #[cfg(not(target_os = "linux"))]
  unsafe fn resize(
    &mut self,
    address: NonNull<u8>,
    old_length: usize,
    new_length: usize,
  ) -> io::Result<NonNull<u8>> {
    let moved = self.reserve(new_length)?;

    unsafe {
      std::ptr::copy_nonoverlapping(
        address.as_ptr(),
        moved.as_ptr(),
        old_length.min(new_length),
      );
      self.release(address, old_length)?;
    }

    Ok(moved)
  }

  unsafe fn release(
    &mut self,
    address: NonNull<u8>,
    length: usize,
  ) -> io::Result<()> {
    if unsafe { libc::munmap(address.as_ptr().cast(), length) } != 0 {
      return Err(io::Error::last_os_error());
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_reserve_is_zeroed_and_writable() {
    let mut mmap = Mmap;

    unsafe {
      let region = mmap.reserve(4096).unwrap();
      let bytes = std::slice::from_raw_parts_mut(region.as_ptr(), 4096);

      assert!(bytes.iter().all(|&b| b == 0));

      bytes[0] = 0xAB;
      bytes[4095] = 0xCD;
      assert_eq!(bytes[0], 0xAB);
      assert_eq!(bytes[4095], 0xCD);

      mmap.release(region, 4096).unwrap();
    }
  }

  #[test]
  fn test_resize_preserves_content() {
    let mut mmap = Mmap;

    unsafe {
      let region = mmap.reserve(4096).unwrap();
      region.as_ptr().write(7);
      region.as_ptr().add(4095).write(9);

      let grown = mmap.resize(region, 4096, 4 * 4096).unwrap();
      assert_eq!(grown.as_ptr().read(), 7);
      assert_eq!(grown.as_ptr().add(4095).read(), 9);
      assert_eq!(grown.as_ptr().add(4 * 4096 - 1).read(), 0);

      let shrunk = mmap.resize(grown, 4 * 4096, 4096).unwrap();
      assert_eq!(shrunk.as_ptr().read(), 7);

      mmap.release(shrunk, 4096).unwrap();
    }
  }

  #[test]
  fn test_reserve_failure_is_reported() {
    let mut mmap = Mmap;

    assert!(mmap.reserve(usize::MAX).is_err());
  }
}
