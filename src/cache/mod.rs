//! Generic caching layer for data persistence and offline support.
//!
//! This module provides a GitHub-agnostic caching mechanism that:
//! - Stores serialized payloads under deterministic, hashed keys
//! - Checks TTL at read time and keeps expired entries for offline fallback
//! - Runs at most one computation per key at a time (`get_or_compute`)
//! - Persists to SQLite so entries survive restarts

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
pub use traits::{CacheEntry, CacheKey, CacheResult, CacheSource, Cacheable};
