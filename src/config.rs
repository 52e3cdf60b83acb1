//! Heap sizing.
//!
//! Every knob can be set programmatically or through environment variables:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `TAGHEAP_MIN_SIZE` | Initial and smallest heap capacity in bytes | 4096 |
//! | `TAGHEAP_MAX_SIZE` | Largest heap capacity in bytes | 65536 |
//! | `TAGHEAP_RESIZE_GRANULARITY` | Base margin added on growth and kept on shrink | 4096 |
//! | `TAGHEAP_LARGE_THRESHOLD` | Requests of at least this many bytes bypass the heap | 32768 |

use std::env;

use crate::block::{TAG_MAX_PAYLOAD, TAG_SIZE};
use crate::error::ConfigError;

pub const HEAP_MIN_SIZE: usize = 1 << 12;
pub const HEAP_MAX_SIZE: usize = 1 << 16;
pub const HEAP_RESIZE_GRANULARITY: usize = 1 << 12;
pub const BLOCK_MIN_PAYLOAD: usize = 4;
pub const BLOCK_MAX_PAYLOAD: usize = 1 << 15;

/// Sizing policy of one [`crate::Allocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
  /// Capacity mapped at startup. The heap never shrinks below it.
  pub min_size: usize,
  /// Capacity ceiling. Small allocations fail once it is reached.
  pub max_size: usize,
  /// Fixed part of the margin used when growing and shrinking.
  pub resize_granularity: usize,
  /// Rounded requests at or above this go to their own mapping.
  pub large_threshold: usize,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      min_size: HEAP_MIN_SIZE,
      max_size: HEAP_MAX_SIZE,
      resize_granularity: HEAP_RESIZE_GRANULARITY,
      large_threshold: BLOCK_MAX_PAYLOAD,
    }
  }
}

impl HeapConfig {
  /// Defaults overridden by `TAGHEAP_*` environment variables.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|var| env::var(var).ok())
  }

  /// Defaults overridden by whatever `lookup` returns for each `TAGHEAP_*`
  /// variable name.
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();

    let parse = |var: &'static str| -> Result<Option<usize>, ConfigError> {
      match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
          .trim()
          .parse::<usize>()
          .map(Some)
          .map_err(|e| ConfigError::EnvParse {
            var,
            message: e.to_string(),
          }),
      }
    };

    if let Some(val) = parse("TAGHEAP_MIN_SIZE")? {
      config.min_size = val;
    }
    if let Some(val) = parse("TAGHEAP_MAX_SIZE")? {
      config.max_size = val;
    }
    if let Some(val) = parse("TAGHEAP_RESIZE_GRANULARITY")? {
      config.resize_granularity = val;
    }
    if let Some(val) = parse("TAGHEAP_LARGE_THRESHOLD")? {
      config.large_threshold = val;
    }

    config.validate()?;
    Ok(config)
  }

  pub fn with_min_size(
    mut self,
    bytes: usize,
  ) -> Self {
    self.min_size = bytes;
    self
  }

  pub fn with_max_size(
    mut self,
    bytes: usize,
  ) -> Self {
    self.max_size = bytes;
    self
  }

  pub fn with_resize_granularity(
    mut self,
    bytes: usize,
  ) -> Self {
    self.resize_granularity = bytes;
    self
  }

  pub fn with_large_threshold(
    mut self,
    bytes: usize,
  ) -> Self {
    self.large_threshold = bytes;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let aligned = |field: &'static str, value: usize| -> Result<(), ConfigError> {
      if value % TAG_SIZE != 0 {
        return Err(ConfigError::InvalidValue {
          field,
          message: format!("{value} is not a multiple of {TAG_SIZE}"),
        });
      }
      Ok(())
    };

    aligned("min_size", self.min_size)?;
    aligned("max_size", self.max_size)?;
    aligned("resize_granularity", self.resize_granularity)?;
    aligned("large_threshold", self.large_threshold)?;

    if self.min_size < 2 * TAG_SIZE + BLOCK_MIN_PAYLOAD {
      return Err(ConfigError::InvalidValue {
        field: "min_size",
        message: format!("must hold at least one block ({} bytes)", 2 * TAG_SIZE + BLOCK_MIN_PAYLOAD),
      });
    }

    if self.max_size < self.min_size {
      return Err(ConfigError::InvalidValue {
        field: "max_size",
        message: "must be at least min_size".into(),
      });
    }

    if self.max_size > TAG_MAX_PAYLOAD {
      return Err(ConfigError::InvalidValue {
        field: "max_size",
        message: format!("must not exceed {TAG_MAX_PAYLOAD}"),
      });
    }

    if self.large_threshold <= BLOCK_MIN_PAYLOAD || self.large_threshold > TAG_MAX_PAYLOAD {
      return Err(ConfigError::InvalidValue {
        field: "large_threshold",
        message: format!("must be in ({BLOCK_MIN_PAYLOAD}, {TAG_MAX_PAYLOAD}]"),
      });
    }

    if self.large_threshold + 2 * TAG_SIZE > self.max_size {
      return Err(ConfigError::InvalidValue {
        field: "large_threshold",
        message: "largest heap block would not fit in max_size".into(),
      });
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |var: &str| vars.get(var).cloned()
  }

  #[test]
  fn test_default_is_valid() {
    let config = HeapConfig::default();

    assert_eq!(config.validate(), Ok(()));
    assert_eq!(config.min_size, 4096);
    assert_eq!(config.max_size, 65536);
    assert_eq!(config.large_threshold, 32768);
  }

  #[test]
  fn test_from_lookup_overrides() {
    let config = HeapConfig::from_lookup(lookup(&[
      ("TAGHEAP_MAX_SIZE", "131072"),
      ("TAGHEAP_RESIZE_GRANULARITY", " 8192 "),
    ]))
    .unwrap();

    assert_eq!(config.max_size, 131072);
    assert_eq!(config.resize_granularity, 8192);
    assert_eq!(config.min_size, HEAP_MIN_SIZE);
  }

  #[test]
  fn test_from_lookup_rejects_garbage() {
    let err = HeapConfig::from_lookup(lookup(&[("TAGHEAP_MIN_SIZE", "lots")])).unwrap_err();

    assert!(matches!(err, ConfigError::EnvParse { var: "TAGHEAP_MIN_SIZE", .. }));
  }

  #[test]
  fn test_from_lookup_validates() {
    let err = HeapConfig::from_lookup(lookup(&[("TAGHEAP_MAX_SIZE", "1024")])).unwrap_err();

    assert!(matches!(err, ConfigError::InvalidValue { field: "max_size", .. }));
  }

  #[test]
  fn test_validate() {
    let unaligned = HeapConfig::default().with_min_size(4097);
    assert!(matches!(
      unaligned.validate(),
      Err(ConfigError::InvalidValue { field: "min_size", .. })
    ));

    let threshold_too_big = HeapConfig::default().with_large_threshold(65536);
    assert!(matches!(
      threshold_too_big.validate(),
      Err(ConfigError::InvalidValue { field: "large_threshold", .. })
    ));

    let tiny = HeapConfig::default()
      .with_min_size(256)
      .with_max_size(1024)
      .with_resize_granularity(64)
      .with_large_threshold(512);
    assert_eq!(tiny.validate(), Ok(()));
  }
}
