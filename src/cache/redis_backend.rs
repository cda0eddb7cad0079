//! Redis backend for the shared cache tier.
//!
//! TTL uses Redis' native expiry (`SET key value EX ttl`). One
//! [`ConnectionManager`] is created on first use and shared by every caller;
//! it multiplexes concurrent requests and reconnects after failures.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::OnceCell;

use super::error::RemoteError;
use super::remote::{RemoteBackend, RemoteEntry};

pub struct RedisBackend {
  client: Client,
  conn: OnceCell<ConnectionManager>,
}

impl RedisBackend {
  /// Create a backend for `url` (e.g. `redis://localhost:6379`).
  ///
  /// Only validates the URL; the connection is opened lazily.
  pub fn new(url: &str) -> Result<Self, RemoteError> {
    let client = Client::open(url)?;
    Ok(Self {
      client,
      conn: OnceCell::new(),
    })
  }

  async fn connection(&self) -> Result<ConnectionManager, RemoteError> {
    let conn = self
      .conn
      .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
      .await?;
    Ok(conn.clone())
  }
}

#[async_trait]
impl RemoteBackend for RedisBackend {
  fn name(&self) -> &'static str {
    "redis"
  }

  async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, RemoteError> {
    let mut conn = self.connection().await?;

    // GET and TTL in one round trip so the pair is consistent.
    let (data, ttl): (Option<Vec<u8>>, i64) = redis::pipe()
      .get(key)
      .ttl(key)
      .query_async(&mut conn)
      .await?;

    let Some(data) = data else {
      return Ok(None);
    };
    let Some(ttl_secs) = remaining_ttl(ttl) else {
      return Ok(None);
    };
    Ok(Some(RemoteEntry { data, ttl_secs }))
  }

  async fn set(&self, key: &str, data: &[u8], ttl_secs: u64) -> Result<(), RemoteError> {
    let mut conn = self.connection().await?;
    let _: () = conn.set_ex(key, data, ttl_secs).await?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), RemoteError> {
    let mut conn = self.connection().await?;
    let _: () = conn.del(key).await?;
    Ok(())
  }

  async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
    let mut conn = self.connection().await?;
    let exists: bool = conn.exists(key).await?;
    Ok(exists)
  }
}

/// Interpret a `TTL` reply.
///
/// `None` when the key expired between GET and TTL (-2). `Some(None)` when
/// it has no expiry (-1). Sub-second remainders report as 0 and are rounded
/// up to 1 so a live entry is never written back with a zero TTL.
fn remaining_ttl(ttl: i64) -> Option<Option<u64>> {
  match ttl {
    -2 => None,
    t if t < 0 => Some(None),
    0 => Some(Some(1)),
    t => Some(Some(t as u64)),
  }
}

impl std::fmt::Debug for RedisBackend {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RedisBackend")
      .field("connected", &self.conn.initialized())
      .finish()
  }
}
