//! SQLite backend for the shared cache tier.
//!
//! Lets processes on one host share cache state through a single database
//! file. SQLite has no native expiry, so each row carries an explicit
//! `expires_at` and freshness is checked here, the same way the memory tier
//! checks it.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::clock::{expiry_after, Clock};
use super::error::RemoteError;
use super::remote::{RemoteBackend, RemoteEntry};

/// Schema for the shared cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    -- unix epoch milliseconds
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry ON cache_entries(expires_at);
"#;

const PURGE_EXPIRED: &str = "DELETE FROM cache_entries WHERE expires_at <= ?";

/// SQLite shared tier.
///
/// rusqlite is blocking, so every call runs on tokio's blocking pool and the
/// caller's timeout can fire while a statement waits on another process'
/// lock. That wait is itself capped by the busy timeout given to `open`.
pub struct SqliteBackend {
  conn: Arc<Mutex<Connection>>,
  clock: Arc<dyn Clock>,
}

impl SqliteBackend {
  /// Open (or create) the cache database at `path`.
  ///
  /// `busy_timeout` bounds how long a statement waits for a lock held by
  /// another connection.
  pub fn open(path: &Path, clock: Arc<dyn Clock>, busy_timeout: Duration) -> Result<Self, RemoteError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent).map_err(|e| {
        RemoteError::Unavailable(format!(
          "failed to create cache directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(CACHE_SCHEMA)?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
      clock,
    })
  }

  /// Run `f` against the connection on the blocking pool. `f` receives the
  /// current time in epoch milliseconds.
  async fn run<T, F>(&self, f: F) -> Result<T, RemoteError>
  where
    T: Send + 'static,
    F: FnOnce(&Connection, i64) -> Result<T, RemoteError> + Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    let now = self.clock.now().timestamp_millis();

    tokio::task::spawn_blocking(move || {
      let conn = conn
        .lock()
        .map_err(|e| RemoteError::Unavailable(format!("lock poisoned: {}", e)))?;
      f(&conn, now)
    })
    .await
    .map_err(|e| RemoteError::Unavailable(format!("sqlite task failed: {}", e)))?
  }

  #[cfg(test)]
  pub(crate) async fn row_count(&self) -> Result<usize, RemoteError> {
    self
      .run(|conn, _| {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count as usize)
      })
      .await
  }
}

#[async_trait]
impl RemoteBackend for SqliteBackend {
  fn name(&self) -> &'static str {
    "sqlite"
  }

  async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, RemoteError> {
    let key = key.to_string();
    self
      .run(move |conn, now| {
        let row: Option<(Vec<u8>, i64)> = conn
          .query_row(
            "SELECT data, expires_at FROM cache_entries WHERE cache_key = ?",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
          )
          .optional()?;

        match row {
          Some((_, expires_at)) if expires_at <= now => {
            conn.execute(
              "DELETE FROM cache_entries WHERE cache_key = ? AND expires_at <= ?",
              params![key, now],
            )?;
            Ok(None)
          }
          Some((data, expires_at)) => {
            // Round up so a live entry never reports 0 seconds left.
            let remaining_ms = (expires_at - now) as u64;
            Ok(Some(RemoteEntry {
              data,
              ttl_secs: Some(remaining_ms.div_ceil(1000)),
            }))
          }
          None => Ok(None),
        }
      })
      .await
  }

  /// Writes also reclaim rows that expired without being read again.
  async fn set(&self, key: &str, data: &[u8], ttl_secs: u64) -> Result<(), RemoteError> {
    let key = key.to_string();
    let data = data.to_vec();
    let stored_at = self.clock.now();
    let expires_at = expiry_after(stored_at, ttl_secs).timestamp_millis();

    self
      .run(move |conn, now| {
        conn.execute(PURGE_EXPIRED, params![now])?;
        conn.execute(
          "INSERT OR REPLACE INTO cache_entries (cache_key, data, stored_at, expires_at)
           VALUES (?, ?, ?, ?)",
          params![key, data, stored_at.to_rfc3339(), expires_at],
        )?;
        Ok(())
      })
      .await
  }

  async fn delete(&self, key: &str) -> Result<(), RemoteError> {
    let key = key.to_string();
    self
      .run(move |conn, _| {
        conn.execute("DELETE FROM cache_entries WHERE cache_key = ?", params![key])?;
        Ok(())
      })
      .await
  }

  async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
    let key = key.to_string();
    self
      .run(move |conn, now| {
        let found: Option<i64> = conn
          .query_row(
            "SELECT 1 FROM cache_entries WHERE cache_key = ? AND expires_at > ?",
            params![key, now],
            |row| row.get(0),
          )
          .optional()?;
        Ok(found.is_some())
      })
      .await
  }

  async fn purge_expired(&self) -> Result<usize, RemoteError> {
    self
      .run(|conn, now| Ok(conn.execute(PURGE_EXPIRED, params![now])?))
      .await
  }
}

impl std::fmt::Debug for SqliteBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SqliteBackend").finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clock::ManualClock;
  use chrono::Duration as ChronoDuration;

  fn open(dir: &tempfile::TempDir) -> (SqliteBackend, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let backend =
      SqliteBackend::open(&dir.path().join("cache.db"), clock.clone(), Duration::from_millis(250))
        .unwrap();
    (backend, clock)
  }

  #[tokio::test]
  async fn stores_and_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let (backend, _) = open(&dir);

    backend.set("k", b"[1,2]", 60).await.unwrap();
    let entry = backend.get("k").await.unwrap().unwrap();

    assert_eq!(entry.data, b"[1,2]");
    assert_eq!(entry.ttl_secs, Some(60));
    assert!(backend.exists("k").await.unwrap());

    backend.delete("k").await.unwrap();
    assert!(backend.get("k").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn expiry_is_checked_client_side() {
    let dir = tempfile::tempdir().unwrap();
    let (backend, clock) = open(&dir);

    backend.set("k", b"1", 2).await.unwrap();
    clock.advance(ChronoDuration::milliseconds(1500));
    assert_eq!(backend.get("k").await.unwrap().unwrap().ttl_secs, Some(1));

    clock.advance(ChronoDuration::milliseconds(500));
    assert!(!backend.exists("k").await.unwrap());
    assert!(backend.get("k").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn overwrite_resets_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let (backend, clock) = open(&dir);

    backend.set("k", b"1", 5).await.unwrap();
    clock.advance(ChronoDuration::seconds(4));
    backend.set("k", b"2", 5).await.unwrap();
    clock.advance(ChronoDuration::seconds(4));

    assert_eq!(backend.get("k").await.unwrap().unwrap().data, b"2");
  }

  #[tokio::test]
  async fn two_handles_share_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let (writer, _) = open(&dir);
    let (reader, _) = open(&dir);

    writer.set("shared", b"\"yes\"", 60).await.unwrap();
    assert_eq!(reader.get("shared").await.unwrap().unwrap().data, b"\"yes\"");
  }

  #[tokio::test]
  async fn purge_drops_expired_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (backend, clock) = open(&dir);

    backend.set("short", b"1", 1).await.unwrap();
    backend.set("long", b"1", 100).await.unwrap();
    clock.advance(ChronoDuration::seconds(2));

    assert_eq!(backend.purge_expired().await.unwrap(), 1);
    assert!(backend.exists("long").await.unwrap());
  }

  #[tokio::test]
  async fn writes_reclaim_expired_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (backend, clock) = open(&dir);

    for i in 0..100 {
      backend.set(&format!("k{}", i), b"1", 1).await.unwrap();
    }
    assert_eq!(backend.row_count().await.unwrap(), 100);

    clock.advance(ChronoDuration::seconds(10));
    backend.set("fresh", b"1", 60).await.unwrap();

    assert_eq!(backend.row_count().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn lock_held_elsewhere_respects_store_timeout() {
    use crate::cache::remote::RemoteStore;
    use std::time::Instant;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let backend =
      SqliteBackend::open(&path, Arc::new(ManualClock::default()), Duration::from_secs(1)).unwrap();

    let other = Connection::open(&path).unwrap();
    other.execute_batch("BEGIN EXCLUSIVE").unwrap();

    let store = RemoteStore::new(Arc::new(backend)).with_timeout(Duration::from_millis(20));
    let started = Instant::now();
    let hit = store.get("k").await;

    assert!(hit.is_none());
    assert!(started.elapsed() < Duration::from_millis(500));

    other.execute_batch("ROLLBACK").unwrap();
  }
}
