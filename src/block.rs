/// Width in bytes of one boundary tag.
pub const TAG_SIZE: usize = size_of::<BlockTag>();

const USED_BIT: u32 = 0b01;
const ROLE_BIT: u32 = 0b10;
const SIZE_SHIFT: u32 = 4;

/// Largest payload a tag can describe.
pub const TAG_MAX_PAYLOAD: usize = (u32::MAX >> SIZE_SHIFT) as usize;

/// Which end of a block a tag sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
  /// Top of the block, immediately before the payload.
  Header,
  /// Bottom of the block, immediately after the payload.
  Footer,
}

/// Boundary tag placed at both ends of every block.
///
/// ```text
///   31                                 4   3   2   1   0
///   ┌──────────────────────────────────┬───────┬───┬───┐
///   │          payload size            │ rsvd  │ R │ U │
///   └──────────────────────────────────┴───────┴───┴───┘
///                                               │   └── used
///                                               └────── role (1 = header)
/// ```
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BlockTag(u32);

impl BlockTag {
  /// A cleared tag, used to wipe boundaries that stopped being meaningful.
  pub const EMPTY: Self = Self(0);

  /// Builds a tag with size and flags set together.
  pub fn new(
    payload: usize,
    used: bool,
    role: Role,
  ) -> Self {
    let mut tag = Self::EMPTY;
    tag.set_payload_size(payload);
    tag.set_used(used);
    tag.set_role(role);
    tag
  }

  pub fn from_bytes(bytes: [u8; TAG_SIZE]) -> Self {
    Self(u32::from_ne_bytes(bytes))
  }

  pub fn to_bytes(self) -> [u8; TAG_SIZE] {
    self.0.to_ne_bytes()
  }

  pub fn payload_size(self) -> usize {
    (self.0 >> SIZE_SHIFT) as usize
  }

  /// Overwrites the whole tag, flags included. Set flags afterwards.
  pub fn set_payload_size(
    &mut self,
    payload: usize,
  ) {
    debug_assert!(payload <= TAG_MAX_PAYLOAD);
    self.0 = (payload as u32) << SIZE_SHIFT;
  }

  pub fn is_used(self) -> bool {
    self.0 & USED_BIT != 0
  }

  pub fn set_used(
    &mut self,
    used: bool,
  ) {
    if used {
      self.0 |= USED_BIT;
    } else {
      self.0 &= !USED_BIT;
    }
  }

  pub fn role(self) -> Role {
    if self.0 & ROLE_BIT != 0 { Role::Header } else { Role::Footer }
  }

  pub fn set_role(
    &mut self,
    role: Role,
  ) {
    match role {
      Role::Header => self.0 |= ROLE_BIT,
      Role::Footer => self.0 &= !ROLE_BIT,
    }
  }

  /// Bytes the block occupies end to end: header, payload and footer.
  pub fn total_size(self) -> usize {
    self.payload_size() + 2 * TAG_SIZE
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_tag_is_four_bytes() {
    assert_eq!(TAG_SIZE, 4);
  }

  #[test]
  fn test_new_sets_everything() {
    let tag = BlockTag::new(128, true, Role::Header);

    assert_eq!(tag.payload_size(), 128);
    assert!(tag.is_used());
    assert_eq!(tag.role(), Role::Header);
    assert_eq!(tag.total_size(), 128 + 8);

    let footer = BlockTag::new(128, false, Role::Footer);
    assert_eq!(footer.payload_size(), 128);
    assert!(!footer.is_used());
    assert_eq!(footer.role(), Role::Footer);
  }

  #[test]
  fn test_set_payload_clears_flags() {
    let mut tag = BlockTag::new(16, true, Role::Header);

    tag.set_payload_size(32);

    assert_eq!(tag.payload_size(), 32);
    assert!(!tag.is_used());
    assert_eq!(tag.role(), Role::Footer);
  }

  #[test]
  fn test_flags_do_not_touch_size() {
    let mut tag = BlockTag::new(4096, false, Role::Footer);

    tag.set_used(true);
    tag.set_role(Role::Header);
    assert_eq!(tag.payload_size(), 4096);

    tag.set_used(false);
    tag.set_role(Role::Footer);
    assert_eq!(tag.payload_size(), 4096);
    assert_eq!(tag, BlockTag::new(4096, false, Role::Footer));
  }

  #[test]
  fn test_bytes() {
    let tag = BlockTag::new(TAG_MAX_PAYLOAD, true, Role::Header);

    assert_eq!(BlockTag::from_bytes(tag.to_bytes()), tag);
    assert_eq!(BlockTag::from_bytes([0; TAG_SIZE]), BlockTag::EMPTY);
  }
}
