//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::traits::CacheEntry;
use crate::error::{Error, Result};

/// Trait for cache storage backends.
///
/// Backends return entries regardless of expiry; freshness is decided by the
/// caller at read time.
pub trait CacheStorage: Send + Sync + 'static {
  /// Get the raw entry stored under `(namespace, key)`.
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry<Vec<u8>>>>;

  /// Upsert an entry. Overwrites any prior entry unconditionally.
  fn put(
    &self,
    namespace: &str,
    key: &str,
    description: &str,
    payload: &[u8],
    ttl: Duration,
    stored_at: DateTime<Utc>,
  ) -> Result<()>;

  /// Delete entries whose TTL has elapsed at `now`. Returns the number removed.
  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

impl<S: CacheStorage + ?Sized> CacheStorage for Box<S> {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry<Vec<u8>>>> {
    (**self).get(namespace, key)
  }

  fn put(
    &self,
    namespace: &str,
    key: &str,
    description: &str,
    payload: &[u8],
    ttl: Duration,
    stored_at: DateTime<Utc>,
  ) -> Result<()> {
    (**self).put(namespace, key, description, payload, ttl, stored_at)
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    (**self).purge_expired(now)
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _namespace: &str, _key: &str) -> Result<Option<CacheEntry<Vec<u8>>>> {
    Ok(None) // Always miss
  }

  fn put(
    &self,
    _namespace: &str,
    _key: &str,
    _description: &str,
    _payload: &[u8],
    _ttl: Duration,
    _stored_at: DateTime<Utc>,
  ) -> Result<()> {
    Ok(()) // Discard
  }

  fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
    Ok(0)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache at `path`, or at the default location when `None`.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| Error::Storage(format!("Failed to create cache directory: {}", e)))?;
    }

    let conn = Connection::open(&path).map_err(|e| {
      Error::Storage(format!(
        "Failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;
    debug!(path = %path.display(), "opened cache database");

    Self::from_connection(conn)
  }

  /// Open a private in-memory cache (nothing survives the process).
  pub fn open_in_memory() -> Result<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Storage("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("starlist").join("cache.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| Error::Storage(format!("Failed to run cache migrations: {}", e)))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per logical key; payload is serialized JSON
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    description TEXT NOT NULL,
    payload BLOB NOT NULL,
    stored_at INTEGER NOT NULL,  -- unix epoch milliseconds
    ttl_secs INTEGER NOT NULL,
    PRIMARY KEY (namespace, cache_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry
    ON cache_entries(stored_at, ttl_secs);
"#;

impl CacheStorage for SqliteStorage {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry<Vec<u8>>>> {
    let conn = self.conn()?;
    let row: Option<(Vec<u8>, i64, i64)> = conn
      .query_row(
        "SELECT payload, stored_at, ttl_secs FROM cache_entries
         WHERE namespace = ? AND cache_key = ?",
        params![namespace, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()?;

    match row {
      Some((payload, stored_at, ttl_secs)) => Ok(Some(CacheEntry {
        value: payload,
        stored_at: from_millis(stored_at)?,
        ttl: Duration::seconds(ttl_secs),
      })),
      None => Ok(None),
    }
  }

  fn put(
    &self,
    namespace: &str,
    key: &str,
    description: &str,
    payload: &[u8],
    ttl: Duration,
    stored_at: DateTime<Utc>,
  ) -> Result<()> {
    // A single statement keeps the write atomic at key granularity
    self.conn()?.execute(
      "INSERT OR REPLACE INTO cache_entries (namespace, cache_key, description, payload, stored_at, ttl_secs)
       VALUES (?, ?, ?, ?, ?, ?)",
      params![
        namespace,
        key,
        description,
        payload,
        stored_at.timestamp_millis(),
        ttl.num_seconds()
      ],
    )?;
    Ok(())
  }

  fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
    let removed = self.conn()?.execute(
      "DELETE FROM cache_entries WHERE stored_at + ttl_secs * 1000 <= ?",
      params![now.timestamp_millis()],
    )?;
    Ok(removed)
  }
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
  Utc
    .timestamp_millis_opt(millis)
    .single()
    .ok_or_else(|| Error::Storage(format!("Invalid stored_at timestamp {}", millis)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_put_overwrites_previous_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let now = Utc::now();

    storage
      .put("records", "k", "first", b"one", Duration::seconds(60), now)
      .unwrap();
    storage
      .put("records", "k", "second", b"two", Duration::seconds(30), now)
      .unwrap();

    let entry = storage.get("records", "k").unwrap().unwrap();
    assert_eq!(entry.value, b"two");
    assert_eq!(entry.ttl, Duration::seconds(30));
    assert_eq!(entry.stored_at.timestamp_millis(), now.timestamp_millis());
  }

  #[test]
  fn test_namespaces_are_separate() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let now = Utc::now();

    storage
      .put("records", "k", "k", b"records", Duration::seconds(60), now)
      .unwrap();

    assert!(storage.get("content", "k").unwrap().is_none());
  }

  #[test]
  fn test_expired_entries_are_kept_until_purged() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let stored_at = Utc::now() - Duration::seconds(120);

    storage
      .put("records", "old", "old", b"old", Duration::seconds(60), stored_at)
      .unwrap();
    storage
      .put("records", "new", "new", b"new", Duration::seconds(600), Utc::now())
      .unwrap();

    let old = storage.get("records", "old").unwrap().unwrap();
    assert!(!old.is_valid());

    assert_eq!(storage.purge_expired(Utc::now()).unwrap(), 1);
    assert!(storage.get("records", "old").unwrap().is_none());
    assert!(storage.get("records", "new").unwrap().is_some());
  }

  #[test]
  fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(Some(&path)).unwrap();
      storage
        .put("records", "k", "k", b"persisted", Duration::hours(1), Utc::now())
        .unwrap();
    }

    let reopened = SqliteStorage::open(Some(&path)).unwrap();
    let entry = reopened.get("records", "k").unwrap().unwrap();
    assert_eq!(entry.value, b"persisted");
    assert!(entry.is_valid());
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage
      .put("records", "k", "k", b"x", Duration::hours(1), Utc::now())
      .unwrap();

    assert!(storage.get("records", "k").unwrap().is_none());
  }
}
