//! Core traits and types for the caching system.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

/// Trait for request identities that can be cached.
///
/// Identical logical requests must produce identical hashes so that repeated
/// runs hit the same entry.
pub trait CacheKey {
  /// Partition of the store this key lives in (e.g. "records", "content").
  fn namespace(&self) -> &'static str;

  /// Normalized, human-readable form of the request identity.
  fn description(&self) -> String;

  /// Stable, fixed-length key derived from `description`.
  fn cache_hash(&self) -> String {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(self.namespace().as_bytes());
    hasher.update(b":");
    hasher.update(self.description().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Values that can be stored in the cache.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Cacheable for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// A stored payload with its freshness metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<T> {
  pub value: T,
  pub stored_at: DateTime<Utc>,
  pub ttl: Duration,
}

impl<T> CacheEntry<T> {
  /// Valid iff `now - stored_at < ttl`.
  pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
    now - self.stored_at < self.ttl
  }

  pub fn is_valid(&self) -> bool {
    self.is_valid_at(Utc::now())
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
    CacheEntry {
      value: f(self.value),
      stored_at: self.stored_at,
      ttl: self.ttl,
    }
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from valid cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Cached data served because the network fetch failed.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Whatever the network produced before failing.
  pub fn partial(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Partial,
      cached_at: None,
    }
  }

  /// True when the data may not reflect the current upstream state.
  pub fn is_degraded(&self) -> bool {
    matches!(self.source, CacheSource::Offline | CacheSource::Partial)
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still within its TTL
  CacheFresh,
  /// Network failed, serving the last cached snapshot (possibly expired)
  Offline,
  /// Network failed part-way and no snapshot could stand in
  Partial,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      Self::Network => "network",
      Self::CacheFresh => "cache",
      Self::Offline => "stale cache (offline)",
      Self::Partial => "partial",
    };
    f.write_str(label)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Key(&'static str);

  impl CacheKey for Key {
    fn namespace(&self) -> &'static str {
      "test"
    }

    fn description(&self) -> String {
      self.0.to_string()
    }
  }

  #[test]
  fn test_ttl_boundary() {
    let stored_at = Utc::now();
    let entry = CacheEntry {
      value: (),
      stored_at,
      ttl: Duration::seconds(60),
    };

    assert!(entry.is_valid_at(stored_at + Duration::seconds(59)));
    assert!(!entry.is_valid_at(stored_at + Duration::seconds(60)));
    assert!(!entry.is_valid_at(stored_at + Duration::seconds(61)));
  }

  #[test]
  fn test_cache_hash_is_deterministic() {
    assert_eq!(Key("a").cache_hash(), Key("a").cache_hash());
    assert_ne!(Key("a").cache_hash(), Key("b").cache_hash());
    assert_eq!(Key("a").cache_hash().len(), 64);
  }
}
