//! Optional shared cache tier.
//!
//! A [`RemoteBackend`] speaks some key-value protocol and reports transport
//! failures as [`RemoteError`]. [`RemoteStore`] sits in front of it and turns
//! every such failure into a miss (reads) or a logged no-op (writes), so an
//! unreachable backend never fails a request.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

use super::clock::Clock;
use super::error::{CacheError, RemoteError};
use super::redis_backend::RedisBackend;
use super::storage::SqliteBackend;

/// Default namespace prefix applied to every remote key.
pub const DEFAULT_REMOTE_PREFIX: &str = "jcache:";

/// Default bound on a single remote operation.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_millis(250);

/// Raw entry read from a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
  pub data: Vec<u8>,
  /// Remaining lifetime in seconds, when the backend knows it.
  pub ttl_secs: Option<u64>,
}

/// Key-value backend for the shared tier.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
  /// Short backend name for logs.
  fn name(&self) -> &'static str;

  async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, RemoteError>;

  async fn set(&self, key: &str, data: &[u8], ttl_secs: u64) -> Result<(), RemoteError>;

  async fn delete(&self, key: &str) -> Result<(), RemoteError>;

  async fn exists(&self, key: &str) -> Result<bool, RemoteError>;

  /// Drop entries whose lifetime has passed. Backends with native expiry
  /// have nothing to do.
  async fn purge_expired(&self) -> Result<usize, RemoteError> {
    Ok(0)
  }
}

/// A value found in the shared tier.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteHit {
  pub value: Value,
  pub ttl_secs: Option<u64>,
}

/// Failure-absorbing front for a [`RemoteBackend`].
#[derive(Clone)]
pub struct RemoteStore {
  backend: Arc<dyn RemoteBackend>,
  prefix: String,
  timeout: Duration,
}

impl RemoteStore {
  pub fn new(backend: Arc<dyn RemoteBackend>) -> Self {
    Self {
      backend,
      prefix: DEFAULT_REMOTE_PREFIX.to_string(),
      timeout: DEFAULT_REMOTE_TIMEOUT,
    }
  }

  pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.prefix = prefix.into();
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Build a store from a connection URL.
  ///
  /// - `redis://host:port[/db]` or `rediss://...` uses Redis with native expiry
  /// - `sqlite://<path>` uses a shared SQLite file with client-side expiry
  ///
  /// `timeout` bounds every operation and, for SQLite, how long a statement
  /// waits on another process' lock. Nothing is contacted here; Redis
  /// connects on first use.
  pub fn connect(url: &str, clock: Arc<dyn Clock>, timeout: Duration) -> Result<Self, CacheError> {
    let parsed = url::Url::parse(url)
      .map_err(|e| CacheError::Config(format!("invalid remote_url `{}`: {}", url, e)))?;

    let backend: Arc<dyn RemoteBackend> = match parsed.scheme() {
      "redis" | "rediss" => Arc::new(
        RedisBackend::new(url)
          .map_err(|e| CacheError::Config(format!("redis client for `{}`: {}", url, e)))?,
      ),
      "sqlite" => {
        let path = sqlite_path(url)
          .ok_or_else(|| CacheError::Config(format!("remote_url `{}` has no path", url)))?;
        Arc::new(
          SqliteBackend::open(&path, clock, timeout)
            .map_err(|e| CacheError::Config(format!("sqlite cache at {}: {}", path.display(), e)))?,
        )
      }
      other => {
        return Err(CacheError::Config(format!(
          "unsupported remote cache scheme `{}`",
          other
        )))
      }
    };

    Ok(Self::new(backend).with_timeout(timeout))
  }

  pub fn backend_name(&self) -> &'static str {
    self.backend.name()
  }

  fn remote_key(&self, key: &str) -> String {
    format!("{}{}", self.prefix, key)
  }

  /// Run one backend call under the timeout; any failure becomes `None`.
  async fn guarded<T, Fut>(&self, op: &'static str, key: &str, fut: Fut) -> Option<T>
  where
    Fut: Future<Output = Result<T, RemoteError>>,
  {
    let result = match tokio::time::timeout(self.timeout, fut).await {
      Ok(result) => result,
      Err(_) => Err(RemoteError::Timeout(self.timeout)),
    };

    match result {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(
          backend = self.backend.name(),
          op,
          key,
          error = %e,
          "remote cache operation failed, continuing without it"
        );
        None
      }
    }
  }

  pub async fn get(&self, key: &str) -> Option<RemoteHit> {
    let remote_key = self.remote_key(key);
    let entry = self
      .guarded("get", key, self.backend.get(&remote_key))
      .await
      .flatten()?;

    match serde_json::from_slice(&entry.data) {
      Ok(value) => {
        trace!(key, "remote hit");
        Some(RemoteHit {
          value,
          ttl_secs: entry.ttl_secs,
        })
      }
      Err(e) => {
        warn!(key, error = %e, "undecodable remote cache entry treated as miss");
        None
      }
    }
  }

  pub async fn set(&self, key: &str, value: &Value, ttl_secs: u64) {
    if ttl_secs == 0 {
      self.delete(key).await;
      return;
    }

    let data = match serde_json::to_vec(value) {
      Ok(data) => data,
      Err(e) => {
        warn!(key, error = %e, "value not encodable for remote cache");
        return;
      }
    };

    let remote_key = self.remote_key(key);
    self
      .guarded("set", key, self.backend.set(&remote_key, &data, ttl_secs))
      .await;
  }

  pub async fn has(&self, key: &str) -> bool {
    let remote_key = self.remote_key(key);
    self
      .guarded("exists", key, self.backend.exists(&remote_key))
      .await
      .unwrap_or(false)
  }

  pub async fn delete(&self, key: &str) {
    let remote_key = self.remote_key(key);
    self
      .guarded("delete", key, self.backend.delete(&remote_key))
      .await;
  }

  /// Reclaim expired entries. Returns how many were removed.
  pub async fn purge_expired(&self) -> usize {
    self
      .guarded("purge", "*", self.backend.purge_expired())
      .await
      .unwrap_or(0)
  }
}

impl std::fmt::Debug for RemoteStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RemoteStore")
      .field("backend", &self.backend.name())
      .field("prefix", &self.prefix)
      .field("timeout", &self.timeout)
      .finish()
  }
}

/// `sqlite:///abs/path.db` -> `/abs/path.db`, `sqlite://rel.db` -> `rel.db`.
fn sqlite_path(url: &str) -> Option<PathBuf> {
  let path = url.strip_prefix("sqlite://")?;
  if path.is_empty() {
    None
  } else {
    Some(PathBuf::from(path))
  }
}
