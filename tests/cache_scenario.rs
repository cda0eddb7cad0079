use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use jcache::cache::{Cache, CacheError, KeyBuilder};
use jcache::config::CacheConfig;
use serde_json::json;

#[tokio::test]
async fn set_get_wrap_delete() {
  let cache = Cache::memory_only(100, 300);

  cache.set("a", 1, Some(60)).await.unwrap();
  assert_eq!(cache.get("a").await, Some(json!(1)));

  let b: i64 = cache.wrap("b", || async { Ok::<_, CacheError>(2) }).await.unwrap();
  assert_eq!(b, 2);

  let b: i64 = cache.wrap("b", || async { Ok::<_, CacheError>(3) }).await.unwrap();
  assert_eq!(b, 2);

  cache.delete("b").await.unwrap();
  let b: i64 = cache.wrap("b", || async { Ok::<_, CacheError>(3) }).await.unwrap();
  assert_eq!(b, 3);
}

#[tokio::test]
async fn composite_keys_address_entries() {
  let cache = Cache::memory_only(100, 300);
  let key = KeyBuilder::new()
    .part("project", "PROJ")
    .part("issue", 123)
    .build()
    .unwrap();

  cache.set(key.as_str(), json!({"summary": "x"}), None).await.unwrap();

  let same = KeyBuilder::new()
    .part("project", "PROJ")
    .part("issue", 123)
    .build()
    .unwrap();
  assert_eq!(cache.get(same.as_str()).await, Some(json!({"summary": "x"})));
}

#[tokio::test]
async fn processes_share_through_sqlite_tier() {
  let dir = tempfile::tempdir().unwrap();
  let config = CacheConfig {
    remote_url: Some(format!("sqlite://{}", dir.path().join("shared.db").display())),
    ..CacheConfig::default()
  };

  let first = Cache::from_config(&config).unwrap();
  let second = Cache::from_config(&config).unwrap();
  assert!(first.has_remote());

  let computes = Arc::new(AtomicUsize::new(0));
  let counter = computes.clone();
  let value: String = first
    .wrap("user:abc", move || async move {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok::<_, CacheError>("Ada".to_string())
    })
    .await
    .unwrap();
  assert_eq!(value, "Ada");

  // The second cache has an empty memory tier and finds the value remotely.
  let counter = computes.clone();
  let value: String = second
    .wrap("user:abc", move || async move {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok::<_, CacheError>("someone else".to_string())
    })
    .await
    .unwrap();
  assert_eq!(value, "Ada");
  assert_eq!(computes.load(Ordering::SeqCst), 1);

  second.delete("user:abc").await.unwrap();
  assert!(!second.has("user:abc").await);
}

#[tokio::test]
async fn disabled_cache_always_computes() {
  let config = CacheConfig {
    enabled: false,
    ..CacheConfig::default()
  };
  let cache = Cache::from_config(&config).unwrap();

  let computes = Arc::new(AtomicUsize::new(0));
  for _ in 0..3 {
    let counter = computes.clone();
    let v: u32 = cache
      .wrap("k", move || async move {
        Ok::<_, CacheError>(counter.fetch_add(1, Ordering::SeqCst) as u32)
      })
      .await
      .unwrap();
    assert!(v < 3);
  }
  assert_eq!(computes.load(Ordering::SeqCst), 3);
  assert_eq!(cache.get("k").await, None);
}
