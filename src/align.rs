/// Rounds a byte count up to the boundary tag width (4 bytes).
///
/// Every payload in the heap is a multiple of the tag width so that the
/// footer of one block and the header of the next always land on aligned
/// offsets.
///
/// # Examples
///
/// ```rust
/// use tagheap::align;
///
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(1), 4);
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::block::TAG_SIZE - 1) & !($crate::block::TAG_SIZE - 1)
  };
}

/// Same as [`align!`] but returns `None` instead of overflowing.
pub(crate) fn checked_align(value: usize) -> Option<usize> {
  value
    .checked_add(crate::block::TAG_SIZE - 1)
    .map(|v| v & !(crate::block::TAG_SIZE - 1))
}

#[cfg(test)]
mod tests {
  use super::checked_align;
  use crate::block::TAG_SIZE;

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (TAG_SIZE * i + 1)..=(TAG_SIZE * (i + 1));

      let expected_alignment = TAG_SIZE * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
      }
    }
  }

  #[test]
  fn test_checked_align_overflow() {
    assert_eq!(checked_align(usize::MAX), None);
    assert_eq!(checked_align(usize::MAX - 3), Some(usize::MAX - 3));
    assert_eq!(checked_align(7), Some(8));
  }
}
