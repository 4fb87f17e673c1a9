//! Cache layer: typed, TTL-aware access with single-flight computation.

use chrono::{Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheKey, Cacheable};
use crate::error::{Error, Result};

type Flight = Shared<BoxFuture<'static, std::result::Result<Arc<Vec<u8>>, Arc<Error>>>>;

/// Cache layer over a storage backend.
///
/// Expiry is checked when reading; expired entries stay in storage and remain
/// reachable through `last_snapshot` until purged.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// In-progress `get_or_compute` calls, by storage key
  in_flight: Arc<Mutex<HashMap<String, Flight>>>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      in_flight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Valid entry for `key`, or `None` if missing or expired.
  pub fn get<K: CacheKey, T: Cacheable>(&self, key: &K) -> Result<Option<CacheEntry<T>>> {
    match self.last_snapshot(key)? {
      Some(entry) if entry.is_valid_at(Utc::now()) => Ok(Some(entry)),
      Some(_) => {
        debug!(key = %key.description(), "cache entry expired");
        Ok(None)
      }
      None => Ok(None),
    }
  }

  /// Entry for `key` regardless of expiry.
  pub fn last_snapshot<K: CacheKey, T: Cacheable>(&self, key: &K) -> Result<Option<CacheEntry<T>>> {
    let raw = self.storage.get(key.namespace(), &key.cache_hash())?;
    match raw {
      Some(entry) => match serde_json::from_slice::<T>(&entry.value) {
        Ok(value) => Ok(Some(entry.map(|_| value))),
        Err(e) => {
          // An unreadable payload (older format) is treated as a miss
          warn!(key = %key.description(), error = %e, "discarding unreadable cache entry");
          Ok(None)
        }
      },
      None => Ok(None),
    }
  }

  /// Store `value` under `key`, replacing any prior entry.
  pub fn put<K: CacheKey, T: Cacheable>(&self, key: &K, value: &T, ttl: Duration) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    self.storage.put(
      key.namespace(),
      &key.cache_hash(),
      &key.description(),
      &payload,
      ttl,
      Utc::now(),
    )
  }

  /// Return the cached value for `key`, computing and storing it on a miss.
  ///
  /// Concurrent callers for the same key share a single invocation of
  /// `compute`. If it fails nothing is stored and every waiter receives
  /// `ComputeFailure`.
  pub async fn get_or_compute<K, T, F, Fut>(&self, key: &K, ttl: Duration, compute: F) -> Result<T>
  where
    K: CacheKey,
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    if let Some(entry) = self.get::<K, T>(key)? {
      return Ok(entry.value);
    }

    let slot = format!("{}/{}", key.namespace(), key.cache_hash());
    let description = key.description();

    let flight = {
      let mut in_flight = self.lock_in_flight()?;
      match in_flight.get(&slot) {
        Some(flight) => flight.clone(),
        None => {
          // A flight may have finished between the first read and taking the lock
          if let Some(entry) = self.get::<K, T>(key)? {
            return Ok(entry.value);
          }
          let flight = self.start_flight(key, ttl, compute());
          in_flight.insert(slot.clone(), flight.clone());
          flight
        }
      }
    };

    let outcome = flight.clone().await;
    self.finish_flight(&slot, &flight);

    match outcome {
      Ok(payload) => Ok(serde_json::from_slice(&payload)?),
      Err(source) => Err(Error::ComputeFailure {
        key: description,
        source,
      }),
    }
  }

  fn start_flight<K, T, Fut>(&self, key: &K, ttl: Duration, computation: Fut) -> Flight
  where
    K: CacheKey,
    T: Cacheable,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    let namespace = key.namespace();
    let hash = key.cache_hash();
    let description = key.description();

    async move {
      debug!(key = %description, "computing cache entry");
      let value = computation.await.map_err(Arc::new)?;
      let payload = serde_json::to_vec(&value).map_err(|e| Arc::new(Error::from(e)))?;
      storage
        .put(namespace, &hash, &description, &payload, ttl, Utc::now())
        .map_err(Arc::new)?;
      Ok(Arc::new(payload))
    }
    .boxed()
    .shared()
  }

  fn finish_flight(&self, slot: &str, flight: &Flight) {
    if let Ok(mut in_flight) = self.in_flight.lock() {
      if in_flight
        .get(slot)
        .map(|current| current.ptr_eq(flight))
        .unwrap_or(false)
      {
        in_flight.remove(slot);
      }
    }
  }

  fn lock_in_flight(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Flight>>> {
    self
      .in_flight
      .lock()
      .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))
  }

  /// Delete expired entries from storage.
  pub fn purge_expired(&self) -> Result<usize> {
    self.storage.purge_expired(Utc::now())
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      in_flight: Arc::clone(&self.in_flight),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration as StdDuration;

  struct TestKey(&'static str);

  impl CacheKey for TestKey {
    fn namespace(&self) -> &'static str {
      "content"
    }

    fn description(&self) -> String {
      self.0.to_string()
    }
  }

  fn layer() -> CacheLayer<SqliteStorage> {
    CacheLayer::new(SqliteStorage::open_in_memory().unwrap())
  }

  #[tokio::test]
  async fn test_get_returns_none_for_expired_entry() {
    let cache = layer();
    let key = TestKey("readme:a/b");

    cache.put(&key, &"hello".to_string(), Duration::seconds(0)).unwrap();

    assert!(cache.get::<_, String>(&key).unwrap().is_none());
    let stale = cache.last_snapshot::<_, String>(&key).unwrap().unwrap();
    assert_eq!(stale.value, "hello");
  }

  #[tokio::test]
  async fn test_valid_entry_skips_compute() {
    let cache = layer();
    let key = TestKey("readme:a/b");
    cache.put(&key, &7u32, Duration::hours(1)).unwrap();

    let calls = AtomicUsize::new(0);

    let value: u32 = cache
      .get_or_compute(&key, Duration::hours(1), || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(0) }
      })
      .await
      .unwrap();

    assert_eq!(value, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_callers_compute_once() {
    let cache = layer();
    let calls = Arc::new(AtomicUsize::new(0));

    let callers = (0..10).map(|_| {
      let cache = cache.clone();
      let calls = Arc::clone(&calls);
      async move {
        cache
          .get_or_compute(&TestKey("readme:x/y"), Duration::hours(1), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(StdDuration::from_millis(50)).await;
            Ok(vec!["shared".to_string()])
          })
          .await
      }
    });

    let results = futures::future::join_all(callers).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
      assert_eq!(result.unwrap(), vec!["shared".to_string()]);
    }
    assert!(cache
      .get::<_, Vec<String>>(&TestKey("readme:x/y"))
      .unwrap()
      .is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_compute_failure_reaches_all_waiters_and_is_not_cached() {
    let cache = layer();
    let calls = Arc::new(AtomicUsize::new(0));

    let callers = (0..3).map(|_| {
      let cache = cache.clone();
      let calls = Arc::clone(&calls);
      async move {
        cache
          .get_or_compute::<_, String, _, _>(
            &TestKey("readme:broken"),
            Duration::hours(1),
            move || async move {
              calls.fetch_add(1, Ordering::SeqCst);
              tokio::time::sleep(StdDuration::from_millis(20)).await;
              Err(Error::Client {
                status: 403,
                message: "forbidden".to_string(),
              })
            },
          )
          .await
      }
    });

    let results = futures::future::join_all(callers).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
      match result {
        Err(Error::ComputeFailure { source, .. }) => {
          assert!(matches!(*source, Error::Client { status: 403, .. }))
        }
        other => panic!("expected ComputeFailure, got {:?}", other),
      }
    }
    assert!(cache
      .last_snapshot::<_, String>(&TestKey("readme:broken"))
      .unwrap()
      .is_none());

    // The next caller computes again
    let value = cache
      .get_or_compute(&TestKey("readme:broken"), Duration::hours(1), || async {
        Ok("recovered".to_string())
      })
      .await
      .unwrap();
    assert_eq!(value, "recovered");
  }

  #[tokio::test]
  async fn test_entries_persist_across_layers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let key = TestKey("records:octocat");

    {
      let cache = CacheLayer::new(SqliteStorage::open(Some(&path)).unwrap());
      cache.put(&key, &vec![1u64, 2, 3], Duration::hours(1)).unwrap();
    }

    let cache = CacheLayer::new(SqliteStorage::open(Some(&path)).unwrap());
    let calls = AtomicUsize::new(0);
    let value: Vec<u64> = cache
      .get_or_compute(&key, Duration::hours(1), || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(vec![]) }
      })
      .await
      .unwrap();

    assert_eq!(value, vec![1, 2, 3]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }
}
