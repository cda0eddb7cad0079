//! Cache facade: tier composition, TTL policy and single-flight `wrap`.

use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::error::{CacheError, Result};
use super::key::{build_key, CacheKey};
use super::memory::MemoryStore;
use super::remote::RemoteStore;
use crate::config::CacheConfig;

/// Settled result of a computation, shared with every attached caller.
type Outcome = Result<Value>;
type FlightSlot = watch::Receiver<Option<Outcome>>;

pub const DEFAULT_TTL_SECS: u64 = 300;
pub const DEFAULT_MAX_ITEMS: usize = 1000;

/// Snapshot of cache activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  /// Compute functions actually started by `wrap`.
  pub computes: u64,
  pub evictions: u64,
  pub entries: usize,
}

impl CacheStats {
  pub fn hit_rate(&self) -> f64 {
    let total = self.hits + self.misses;
    if total > 0 {
      self.hits as f64 / total as f64
    } else {
      0.0
    }
  }
}

#[derive(Debug, Default)]
struct Counters {
  hits: AtomicU64,
  misses: AtomicU64,
  computes: AtomicU64,
}

struct CacheInner {
  enabled: bool,
  default_ttl_secs: u64,
  memory: MemoryStore,
  remote: Option<RemoteStore>,
  /// Keys with a computation in flight in this process.
  in_flight: Mutex<HashMap<String, FlightSlot>>,
  counters: Counters,
}

/// Tiered cache in front of expensive lookups.
///
/// Cheap to clone; clones share the same tiers. Construct one per process
/// (or service) and pass it to whoever needs it.
#[derive(Clone)]
pub struct Cache {
  inner: Arc<CacheInner>,
}

/// Builder for [`Cache`].
pub struct CacheBuilder {
  enabled: bool,
  default_ttl_secs: u64,
  max_items: usize,
  remote: Option<RemoteStore>,
  clock: Arc<dyn Clock>,
  sweep_interval: Option<Duration>,
}

impl Default for CacheBuilder {
  fn default() -> Self {
    Self {
      enabled: true,
      default_ttl_secs: DEFAULT_TTL_SECS,
      max_items: DEFAULT_MAX_ITEMS,
      remote: None,
      clock: Arc::new(SystemClock),
      sweep_interval: None,
    }
  }
}

impl CacheBuilder {
  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn default_ttl_secs(mut self, ttl_secs: u64) -> Self {
    self.default_ttl_secs = ttl_secs;
    self
  }

  pub fn max_items(mut self, max_items: usize) -> Self {
    self.max_items = max_items;
    self
  }

  /// Add a shared tier behind the memory tier.
  pub fn remote(mut self, remote: RemoteStore) -> Self {
    self.remote = Some(remote);
    self
  }

  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Periodically drop expired entries from the memory tier and any shared
  /// tier that keeps them around. A zero interval disables the sweep.
  pub fn sweep_interval(mut self, every: Duration) -> Self {
    self.sweep_interval = Some(every);
    self
  }

  pub fn build(self) -> Cache {
    let cache = Cache {
      inner: Arc::new(CacheInner {
        enabled: self.enabled,
        default_ttl_secs: self.default_ttl_secs,
        memory: MemoryStore::with_clock(self.max_items, self.clock),
        remote: self.remote,
        in_flight: Mutex::new(HashMap::new()),
        counters: Counters::default(),
      }),
    };

    let sweep = self.sweep_interval.filter(|every| !every.is_zero());
    if let (true, Some(every)) = (cache.inner.enabled, sweep) {
      cache.spawn_sweeper(every);
    }
    cache
  }
}

/// How a `wrap` caller gets its value once the cache missed.
enum Flight<T> {
  /// Another computation finished between the miss and the claim.
  Ready(T),
  /// Wait for the owner (possibly this caller) to publish the outcome.
  Waiting(FlightSlot),
}

impl Cache {
  pub fn builder() -> CacheBuilder {
    CacheBuilder::default()
  }

  /// Memory tier only.
  pub fn memory_only(max_items: usize, default_ttl_secs: u64) -> Self {
    Self::builder()
      .max_items(max_items)
      .default_ttl_secs(default_ttl_secs)
      .build()
  }

  /// A cache that never stores anything; `wrap` always computes.
  pub fn disabled() -> Self {
    Self::builder().enabled(false).max_items(0).build()
  }

  /// Build from configuration. The shared tier is only constructed when
  /// `remote_url` is set.
  pub fn from_config(config: &CacheConfig) -> Result<Self> {
    if !config.enabled {
      debug!("cache disabled by configuration");
      return Ok(Self::disabled());
    }
    if config.default_ttl_secs == 0 {
      return Err(CacheError::Config(
        "default_ttl_secs must be greater than 0".to_string(),
      ));
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut builder = Self::builder()
      .max_items(config.max_items)
      .default_ttl_secs(config.default_ttl_secs)
      .clock(clock.clone());

    if let Some(url) = &config.remote_url {
      let timeout = Duration::from_millis(config.remote_timeout_ms);
      let remote = RemoteStore::connect(url, clock, timeout)?.with_prefix(config.remote_prefix.clone());
      debug!(backend = remote.backend_name(), "shared cache tier configured");
      builder = builder.remote(remote);
    }

    if let Some(secs) = config.sweep_interval_secs.filter(|s| *s > 0) {
      builder = builder.sweep_interval(Duration::from_secs(secs));
    }

    Ok(builder.build())
  }

  pub fn is_enabled(&self) -> bool {
    self.inner.enabled
  }

  pub fn has_remote(&self) -> bool {
    self.inner.remote.is_some()
  }

  pub fn default_ttl_secs(&self) -> u64 {
    self.inner.default_ttl_secs
  }

  /// Build a key from `(label, value)` parts.
  ///
  /// Parts of mixed types go through [`super::KeyBuilder`] instead.
  pub fn key<I, L>(&self, parts: I) -> Result<CacheKey>
  where
    I: IntoIterator<Item = (L, Value)>,
    L: AsRef<str>,
  {
    build_key(parts)
  }

  /// Look a value up: memory first, then the shared tier. A shared-tier hit
  /// is copied into memory for the rest of its lifetime.
  pub async fn get(&self, key: &str) -> Option<Value> {
    if !self.inner.enabled || key.is_empty() {
      return None;
    }

    if let Some(value) = self.inner.memory.get(key) {
      self.record_hit(key, "memory");
      return Some(value);
    }

    if let Some(remote) = &self.inner.remote {
      if let Some(hit) = remote.get(key).await {
        let ttl = hit.ttl_secs.unwrap_or(self.inner.default_ttl_secs);
        if let Err(e) = self.inner.memory.set(key, hit.value.clone(), ttl) {
          warn!(key, error = %e, "could not copy remote hit into memory");
        }
        self.record_hit(key, "remote");
        return Some(hit.value);
      }
    }

    self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
    trace!(key, "cache miss");
    None
  }

  /// Typed `get`. A stored value that doesn't decode as `T` counts as a miss.
  pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let value = self.get(key).await?;
    match serde_json::from_value(value) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(key, error = %e, "cached value has unexpected shape, ignoring");
        None
      }
    }
  }

  /// Store `value` in every active tier. `ttl_secs` defaults to the
  /// configured TTL; 0 removes the key instead.
  pub async fn set<T: Serialize>(&self, key: &str, value: T, ttl_secs: Option<u64>) -> Result<()> {
    validate_key(key)?;
    if !self.inner.enabled {
      return Ok(());
    }

    let value = serde_json::to_value(value).map_err(|e| CacheError::serialization(key, e))?;
    self.store(key, value, ttl_secs).await
  }

  async fn store(&self, key: &str, value: Value, ttl_secs: Option<u64>) -> Result<()> {
    let ttl = ttl_secs.unwrap_or(self.inner.default_ttl_secs);
    self.inner.memory.set(key, value.clone(), ttl)?;
    if let Some(remote) = &self.inner.remote {
      remote.set(key, &value, ttl).await;
    }
    Ok(())
  }

  /// Whether a fresh value exists in any tier. Does not refresh recency.
  pub async fn has(&self, key: &str) -> bool {
    if !self.inner.enabled || key.is_empty() {
      return false;
    }
    if self.inner.memory.has(key) {
      return true;
    }
    match &self.inner.remote {
      Some(remote) => remote.has(key).await,
      None => false,
    }
  }

  /// Remove `key` from every active tier.
  pub async fn delete(&self, key: &str) -> Result<()> {
    validate_key(key)?;
    if !self.inner.enabled {
      return Ok(());
    }

    self.inner.memory.delete(key)?;
    if let Some(remote) = &self.inner.remote {
      remote.delete(key).await;
    }
    Ok(())
  }

  /// Empty the memory tier. The shared tier is left alone since other
  /// processes read from it.
  pub fn clear(&self) -> Result<()> {
    self.inner.memory.clear()
  }

  pub fn stats(&self) -> CacheStats {
    let counters = &self.inner.counters;
    CacheStats {
      hits: counters.hits.load(Ordering::Relaxed),
      misses: counters.misses.load(Ordering::Relaxed),
      computes: counters.computes.load(Ordering::Relaxed),
      evictions: self.inner.memory.evictions(),
      entries: self.inner.memory.size(),
    }
  }

  /// Get-or-populate with the default TTL. See [`Cache::wrap_with_ttl`].
  pub async fn wrap<T, F, Fut, E>(&self, key: &str, compute: F) -> Result<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
  {
    self.wrap_with_ttl(key, None, compute).await
  }

  /// Return the cached value for `key`, or run `compute` and cache its result.
  ///
  /// At most one `compute` per key runs at a time in this process: callers
  /// arriving while one is in flight wait for it and receive the same value
  /// or the same [`CacheError::Compute`]. Failures are never cached.
  ///
  /// `compute` runs on its own task, so it finishes (and populates the cache)
  /// even if every caller waiting on it is dropped.
  pub async fn wrap_with_ttl<T, F, Fut, E>(
    &self,
    key: &str,
    ttl_secs: Option<u64>,
    compute: F,
  ) -> Result<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
  {
    validate_key(key)?;

    if !self.inner.enabled {
      return compute().await.map_err(|e| CacheError::compute(key, e));
    }

    if let Some(value) = self.get_as::<T>(key).await {
      return Ok(value);
    }

    match self.join_flight(key, ttl_secs, compute) {
      Flight::Ready(value) => Ok(value),
      Flight::Waiting(slot) => {
        let value = settle(key, slot).await?;
        serde_json::from_value(value).map_err(|e| CacheError::serialization(key, e))
      }
    }
  }

  fn in_flight(&self) -> MutexGuard<'_, HashMap<String, FlightSlot>> {
    // Critical sections are a single insert/remove, so the map is
    // consistent even if a holder panicked.
    self
      .inner
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Attach to the in-flight computation for `key`, or claim it and start
  /// `compute`. The check and the claim happen under one lock.
  fn join_flight<T, F, Fut, E>(&self, key: &str, ttl_secs: Option<u64>, compute: F) -> Flight<T>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
  {
    let mut in_flight = self.in_flight();

    if let Some(slot) = in_flight.get(key) {
      debug!(key, "waiting on in-flight computation");
      return Flight::Waiting(slot.clone());
    }

    // An owner stores before releasing its claim, so a value that landed
    // after our miss is visible here.
    if let Some(value) = self
      .inner
      .memory
      .get(key)
      .and_then(|value| serde_json::from_value::<T>(value).ok())
    {
      return Flight::Ready(value);
    }

    let (tx, rx) = watch::channel(None);
    in_flight.insert(key.to_string(), rx.clone());
    drop(in_flight);

    self.inner.counters.computes.fetch_add(1, Ordering::Relaxed);
    debug!(key, "computing value");

    let cache = self.clone();
    let key = key.to_string();
    tokio::spawn(async move {
      let outcome = match AssertUnwindSafe(compute()).catch_unwind().await {
        Ok(Ok(value)) => match serde_json::to_value(value) {
          Ok(value) => {
            if let Err(e) = cache.store(&key, value.clone(), ttl_secs).await {
              warn!(key = %key, error = %e, "computed value not cached");
            }
            Ok(value)
          }
          Err(e) => Err(CacheError::serialization(&key, e)),
        },
        Ok(Err(e)) => Err(CacheError::compute(&key, e)),
        Err(_) => Err(CacheError::compute(&key, "compute function panicked")),
      };

      if let Err(e) = &outcome {
        debug!(key = %key, error = %e, "computation failed");
      }

      cache.in_flight().remove(&key);
      // Nobody listening is fine: every caller may have gone away.
      let _ = tx.send(Some(outcome));
    });

    Flight::Waiting(rx)
  }

  fn record_hit(&self, key: &str, tier: &'static str) {
    self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
    trace!(key, tier, "cache hit");
  }

  fn spawn_sweeper(&self, every: Duration) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
      warn!("no async runtime, expiry sweep not started");
      return;
    };

    let cache: Weak<CacheInner> = Arc::downgrade(&self.inner);
    handle.spawn(async move {
      let mut ticker = tokio::time::interval(every);
      // The first tick completes immediately.
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let Some(inner) = cache.upgrade() else {
          break;
        };
        let purged = inner.memory.purge_expired();
        if purged > 0 {
          debug!(purged, "swept expired cache entries");
        }
        if let Some(remote) = &inner.remote {
          let purged = remote.purge_expired().await;
          if purged > 0 {
            debug!(purged, backend = remote.backend_name(), "swept expired remote entries");
          }
        }
      }
    });
  }
}

/// Wait for the owner of a computation to publish its outcome.
async fn settle(key: &str, mut slot: FlightSlot) -> Outcome {
  let settled = match slot.wait_for(Option::is_some).await {
    Ok(outcome) => (*outcome).clone(),
    // Sender dropped without publishing.
    Err(_) => None,
  };
  settled.unwrap_or_else(|| Err(CacheError::compute(key, "computation ended without an outcome")))
}

fn validate_key(key: &str) -> Result<()> {
  if key.is_empty() {
    return Err(CacheError::InvalidKey("key must not be empty".to_string()));
  }
  Ok(())
}

impl std::fmt::Debug for Cache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Cache")
      .field("enabled", &self.inner.enabled)
      .field("default_ttl_secs", &self.inner.default_ttl_secs)
      .field("memory", &self.inner.memory)
      .field("remote", &self.inner.remote)
      .finish()
  }
}
