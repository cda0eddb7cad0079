//! Tiered cache for expensive remote lookups.
//!
//! This module provides a Jira-agnostic caching mechanism that:
//! - Keeps a bounded, TTL-checked memory tier with LRU eviction
//! - Optionally shares entries between processes through Redis or SQLite
//! - Builds deterministic composite keys from `(label, value)` parts
//! - Runs at most one computation per key at a time (`Cache::wrap`)
//!
//! Failures of the shared tier are logged and treated as misses; only the
//! caller's own compute errors ever reach the caller.

mod clock;
mod error;
mod key;
mod layer;
mod memory;
mod redis_backend;
mod remote;
mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, ComputeFailure, RemoteError, Result};
pub use key::{build_key, CacheKey, KeyBuilder, KEY_DELIMITER};
pub use layer::{Cache, CacheBuilder, CacheStats, DEFAULT_MAX_ITEMS, DEFAULT_TTL_SECS};
pub use memory::MemoryStore;
pub use redis_backend::RedisBackend;
pub use remote::{
  RemoteBackend, RemoteEntry, RemoteHit, RemoteStore, DEFAULT_REMOTE_PREFIX,
  DEFAULT_REMOTE_TIMEOUT,
};
pub use storage::SqliteBackend;

/// Value type shared by every tier.
pub type CacheValue = serde_json::Value;
