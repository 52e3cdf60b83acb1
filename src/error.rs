use std::io;

use thiserror::Error;

use crate::allocator::Handle;

/// Errors reported by [`crate::Allocator`].
#[derive(Debug, Error)]
pub enum AllocError {
  #[error("out of memory: cannot allocate {requested} bytes")]
  OutOfMemory { requested: usize },

  #[error("invalid or stale handle {0:?}")]
  InvalidHandle(Handle),

  #[error("double free of handle {0:?}")]
  DoubleFree(Handle),

  #[error("{op} failed: {source}")]
  Os {
    op: &'static str,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Config(#[from] ConfigError),
}

/// Errors found while building a [`crate::HeapConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("invalid configuration for '{field}': {message}")]
  InvalidValue {
    field: &'static str,
    message: String,
  },

  #[error("failed to parse environment variable '{var}': {message}")]
  EnvParse { var: &'static str, message: String },
}

pub type Result<T, E = AllocError> = std::result::Result<T, E>;
