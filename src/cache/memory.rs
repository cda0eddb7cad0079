//! Bounded in-process cache tier with TTL and LRU eviction.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use super::clock::{expiry_after, Clock, SystemClock};
use super::error::{CacheError, Result};

/// A value held by the memory tier.
#[derive(Debug, Clone)]
struct CacheEntry {
  value: Value,
  stored_at: DateTime<Utc>,
  expires_at: DateTime<Utc>,
  /// Recency tick; bumped on every fresh read.
  access_order: u64,
  /// Insertion tick; identifies the entry in the expiry index.
  seq: u64,
}

impl CacheEntry {
  fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvictReason {
  Expired,
  LeastRecentlyUsed,
}

/// Entry table plus the two orderings eviction needs.
///
/// All three maps always describe the same set of keys.
#[derive(Debug, Default)]
struct Inner {
  entries: HashMap<String, CacheEntry>,
  recency: BTreeMap<u64, String>,
  expiry: BTreeMap<(DateTime<Utc>, u64), String>,
  tick: u64,
  evictions: u64,
}

impl Inner {
  fn next_tick(&mut self) -> u64 {
    self.tick += 1;
    self.tick
  }

  fn insert(&mut self, key: &str, value: Value, now: DateTime<Utc>, ttl_secs: u64) {
    let tick = self.next_tick();
    let entry = CacheEntry {
      value,
      stored_at: now,
      expires_at: expiry_after(now, ttl_secs),
      access_order: tick,
      seq: tick,
    };
    self.recency.insert(tick, key.to_string());
    self.expiry.insert((entry.expires_at, tick), key.to_string());
    self.entries.insert(key.to_string(), entry);
  }

  fn remove(&mut self, key: &str) -> Option<CacheEntry> {
    let entry = self.entries.remove(key)?;
    self.recency.remove(&entry.access_order);
    self.expiry.remove(&(entry.expires_at, entry.seq));
    Some(entry)
  }

  fn touch(&mut self, key: &str) {
    let tick = self.next_tick();
    if let Some(entry) = self.entries.get_mut(key) {
      self.recency.remove(&entry.access_order);
      entry.access_order = tick;
      self.recency.insert(tick, key.to_string());
    }
  }

  /// Evict one entry: the earliest-expiring one if it has already expired,
  /// otherwise the least recently used.
  fn evict_one(&mut self, now: DateTime<Utc>) -> Option<(String, EvictReason)> {
    let expired = self
      .expiry
      .first_key_value()
      .filter(|((expires_at, _), _)| *expires_at <= now)
      .map(|(_, key)| key.clone());

    let (key, reason) = match expired {
      Some(key) => (key, EvictReason::Expired),
      None => (
        self.recency.first_key_value()?.1.clone(),
        EvictReason::LeastRecentlyUsed,
      ),
    };

    self.remove(&key);
    self.evictions += 1;
    Some((key, reason))
  }

  fn check_invariants(&self, max_items: usize) {
    debug_assert!(
      self.entries.len() <= max_items,
      "memory store holds {} entries, capacity {}",
      self.entries.len(),
      max_items
    );
    debug_assert_eq!(self.entries.len(), self.recency.len(), "recency index out of sync");
    debug_assert_eq!(self.entries.len(), self.expiry.len(), "expiry index out of sync");
  }
}

/// In-process cache tier holding at most `max_items` entries.
///
/// Expiry is checked lazily on access. When a new key arrives at capacity, an
/// already-expired entry is dropped if there is one, otherwise the least
/// recently read entry is. A capacity of 0 is valid and stores nothing.
pub struct MemoryStore {
  inner: Mutex<Inner>,
  max_items: usize,
  clock: Arc<dyn Clock>,
}

impl MemoryStore {
  pub fn new(max_items: usize) -> Self {
    Self::with_clock(max_items, Arc::new(SystemClock))
  }

  pub fn with_clock(max_items: usize, clock: Arc<dyn Clock>) -> Self {
    Self {
      inner: Mutex::new(Inner::default()),
      max_items,
      clock,
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
    self
      .inner
      .lock()
      .map_err(|e| CacheError::StoreUnavailable(format!("memory store lock poisoned: {}", e)))
  }

  /// Fresh value for `key`, marking it most recently used.
  pub fn get(&self, key: &str) -> Option<Value> {
    let now = self.clock.now();
    let mut inner = match self.lock() {
      Ok(inner) => inner,
      Err(e) => {
        warn!(error = %e, "memory get treated as miss");
        return None;
      }
    };

    let expired = inner.entries.get(key)?.is_expired(now);
    if expired {
      inner.remove(key);
      trace!(key, "memory entry expired on read");
      return None;
    }

    inner.touch(key);
    inner.entries.get(key).map(|e| e.value.clone())
  }

  /// Store `value` for `ttl_secs`. A TTL of 0 stores nothing and drops any
  /// previous value for the key.
  pub fn set(&self, key: &str, value: Value, ttl_secs: u64) -> Result<()> {
    if self.max_items == 0 {
      return Ok(());
    }

    let now = self.clock.now();
    let mut inner = self.lock()?;

    let overwrite = inner.remove(key).is_some();
    if ttl_secs == 0 {
      return Ok(());
    }

    if !overwrite && inner.entries.len() >= self.max_items {
      if let Some((evicted, reason)) = inner.evict_one(now) {
        debug!(key = %evicted, ?reason, "evicted memory entry");
      }
    }

    inner.insert(key, value, now, ttl_secs);
    inner.check_invariants(self.max_items);
    Ok(())
  }

  /// Like `get` but leaves recency untouched.
  pub fn has(&self, key: &str) -> bool {
    let now = self.clock.now();
    let Ok(mut inner) = self.lock() else {
      return false;
    };

    match inner.entries.get(key).map(|e| e.is_expired(now)) {
      Some(false) => true,
      Some(true) => {
        inner.remove(key);
        false
      }
      None => false,
    }
  }

  /// Remove `key`. Returns whether an entry was present.
  pub fn delete(&self, key: &str) -> Result<bool> {
    let mut inner = self.lock()?;
    Ok(inner.remove(key).is_some())
  }

  pub fn clear(&self) -> Result<()> {
    let mut inner = self.lock()?;
    inner.entries.clear();
    inner.recency.clear();
    inner.expiry.clear();
    Ok(())
  }

  /// Number of held entries, including expired ones not yet reclaimed.
  pub fn size(&self) -> usize {
    self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
  }

  /// Total entries dropped to make room since construction.
  pub fn evictions(&self) -> u64 {
    self.lock().map(|inner| inner.evictions).unwrap_or(0)
  }

  /// Drop every expired entry. Returns how many were removed.
  pub fn purge_expired(&self) -> usize {
    let now = self.clock.now();
    let Ok(mut inner) = self.lock() else {
      return 0;
    };

    let mut purged = 0;
    loop {
      let next = inner
        .expiry
        .first_key_value()
        .filter(|((expires_at, _), _)| *expires_at <= now)
        .map(|(_, key)| key.clone());
      match next {
        Some(key) => {
          inner.remove(&key);
          purged += 1;
        }
        None => break,
      }
    }
    purged
  }

  /// When `key` was stored, if it is held.
  pub fn stored_at(&self, key: &str) -> Option<DateTime<Utc>> {
    self.lock().ok()?.entries.get(key).map(|e| e.stored_at)
  }
}

impl std::fmt::Debug for MemoryStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MemoryStore")
      .field("max_items", &self.max_items)
      .field("size", &self.size())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::clock::ManualClock;
  use chrono::Duration;
  use serde_json::json;

  fn store(max_items: usize) -> (MemoryStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    (MemoryStore::with_clock(max_items, clock.clone()), clock)
  }

  #[test]
  fn get_returns_fresh_value() {
    let (store, _) = store(4);
    store.set("a", json!(1), 60).unwrap();

    assert_eq!(store.get("a"), Some(json!(1)));
    assert!(store.has("a"));
    assert_eq!(store.get("missing"), None);
  }

  #[test]
  fn ttl_expiry_is_a_miss() {
    let (store, clock) = store(4);
    store.set("a", json!("v"), 1).unwrap();
    assert_eq!(store.get("a"), Some(json!("v")));

    clock.advance(Duration::milliseconds(1001));
    assert_eq!(store.get("a"), None);
    // The expired entry was reclaimed by the read.
    assert_eq!(store.size(), 0);
  }

  #[test]
  fn expiry_boundary_is_inclusive() {
    let (store, clock) = store(4);
    store.set("a", json!(1), 10).unwrap();

    clock.advance(Duration::seconds(9));
    assert!(store.has("a"));
    clock.advance(Duration::seconds(1));
    assert!(!store.has("a"));
  }

  #[test]
  fn evicts_least_recently_used() {
    let (store, _) = store(3);
    store.set("a", json!(1), 60).unwrap();
    store.set("b", json!(2), 60).unwrap();
    store.set("c", json!(3), 60).unwrap();

    // Reading `a` makes `b` the oldest.
    store.get("a");
    store.set("d", json!(4), 60).unwrap();

    assert_eq!(store.size(), 3);
    assert!(store.has("a"));
    assert!(!store.has("b"));
    assert!(store.has("c"));
    assert!(store.has("d"));
    assert_eq!(store.evictions(), 1);
  }

  #[test]
  fn has_does_not_refresh_recency() {
    let (store, _) = store(2);
    store.set("a", json!(1), 60).unwrap();
    store.set("b", json!(2), 60).unwrap();

    assert!(store.has("a"));
    store.set("c", json!(3), 60).unwrap();

    assert!(!store.has("a"));
    assert!(store.has("b"));
  }

  #[test]
  fn expired_entry_evicted_before_lru() {
    let (store, clock) = store(3);
    store.set("old", json!(1), 60).unwrap();
    store.set("short", json!(2), 5).unwrap();
    store.set("new", json!(3), 60).unwrap();

    clock.advance(Duration::seconds(10));
    store.set("extra", json!(4), 60).unwrap();

    // `old` is least recently used, but `short` had already expired.
    assert!(store.has("old"));
    assert!(store.has("new"));
    assert!(store.has("extra"));
    assert_eq!(store.size(), 3);
  }

  #[test]
  fn overwrite_never_evicts() {
    let (store, clock) = store(2);
    store.set("a", json!(1), 60).unwrap();
    store.set("b", json!(2), 60).unwrap();

    clock.advance(Duration::seconds(30));
    store.set("a", json!(10), 60).unwrap();

    assert_eq!(store.size(), 2);
    assert_eq!(store.evictions(), 0);
    assert_eq!(store.get("a"), Some(json!(10)));
    assert_eq!(store.stored_at("a"), Some(clock.now()));

    // The overwrite also reset the TTL and made `a` most recent.
    clock.advance(Duration::seconds(45));
    assert!(store.has("a"));
    store.set("c", json!(3), 60).unwrap();
    assert!(store.has("a"));
  }

  #[test]
  fn zero_capacity_is_pass_through() {
    let (store, _) = store(0);
    store.set("a", json!(1), 60).unwrap();

    assert_eq!(store.size(), 0);
    assert_eq!(store.get("a"), None);
    assert!(!store.has("a"));
  }

  #[test]
  fn zero_ttl_drops_existing_value() {
    let (store, _) = store(2);
    store.set("a", json!(1), 60).unwrap();
    store.set("a", json!(2), 0).unwrap();

    assert_eq!(store.get("a"), None);
    assert_eq!(store.size(), 0);
  }

  #[test]
  fn delete_and_clear() {
    let (store, _) = store(4);
    store.set("a", json!(1), 60).unwrap();
    store.set("b", json!(2), 60).unwrap();

    assert!(store.delete("a").unwrap());
    assert!(!store.delete("a").unwrap());
    assert_eq!(store.size(), 1);

    store.clear().unwrap();
    assert_eq!(store.size(), 0);
    assert_eq!(store.get("b"), None);
  }

  #[test]
  fn purge_removes_only_expired() {
    let (store, clock) = store(4);
    store.set("short", json!(1), 5).unwrap();
    store.set("long", json!(2), 500).unwrap();

    clock.advance(Duration::seconds(6));
    assert_eq!(store.purge_expired(), 1);
    assert_eq!(store.size(), 1);
    assert!(store.has("long"));
  }

  #[test]
  fn size_never_exceeds_capacity() {
    let (store, clock) = store(5);
    for i in 0..200u64 {
      store.set(&format!("k{}", i % 17), json!(i), 1 + i % 7).unwrap();
      if i % 3 == 0 {
        store.get(&format!("k{}", i % 11));
      }
      if i % 10 == 0 {
        clock.advance(Duration::seconds(2));
      }
      assert!(store.size() <= 5);
    }
  }

  #[test]
  fn concurrent_writers_keep_bookkeeping_consistent() {
    let store = Arc::new(MemoryStore::new(16));
    let handles: Vec<_> = (0..8)
      .map(|t| {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
          for i in 0..500 {
            let key = format!("t{}-{}", t, i % 40);
            store.set(&key, json!(i), 60).unwrap();
            store.get(&format!("t{}-{}", (t + 1) % 8, i % 40));
          }
        })
      })
      .collect();

    for handle in handles {
      handle.join().unwrap();
    }

    assert_eq!(store.size(), 16);
    let inner = store.inner.lock().unwrap();
    inner.check_invariants(16);
  }
}
