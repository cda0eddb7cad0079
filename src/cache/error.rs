//! Error types for the cache layer.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Failure raised by a caller-supplied compute function, shared between every
/// caller attached to the same in-flight computation.
pub type ComputeFailure = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the cache facade.
///
/// `Clone` so that every waiter of a single-flight computation receives the
/// same error value the owner saw.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
  /// Key construction input was malformed (no parts, empty label, unencodable value).
  #[error("invalid cache key: {0}")]
  InvalidKey(String),

  /// The compute function passed to `wrap` failed. Never cached.
  #[error("computing value for `{key}` failed: {source}")]
  Compute {
    key: String,
    #[source]
    source: ComputeFailure,
  },

  /// A value could not be converted to or from the cached representation.
  #[error("value for `{key}` could not be converted: {message}")]
  Serialization { key: String, message: String },

  /// The memory tier could not be used (poisoned lock).
  #[error("cache store unavailable: {0}")]
  StoreUnavailable(String),

  /// Cache configuration could not be turned into a working cache.
  #[error("invalid cache configuration: {0}")]
  Config(String),
}

impl CacheError {
  pub fn compute(key: &str, err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
    Self::Compute {
      key: key.to_string(),
      source: Arc::from(err.into()),
    }
  }

  pub fn serialization(key: &str, err: impl std::fmt::Display) -> Self {
    Self::Serialization {
      key: key.to_string(),
      message: err.to_string(),
    }
  }

  /// True when the error came from the caller's compute function.
  pub fn is_compute(&self) -> bool {
    matches!(self, Self::Compute { .. })
  }
}

/// Transport-level failures of a remote tier backend.
///
/// These never leave the remote tier: `RemoteStore` logs them and degrades to
/// a miss or a no-op.
#[derive(Debug, Error)]
pub enum RemoteError {
  #[error("redis: {0}")]
  Redis(#[from] redis::RedisError),

  #[error("sqlite: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("operation timed out after {0:?}")]
  Timeout(Duration),

  #[error("backend unavailable: {0}")]
  Unavailable(String),
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
