//! Error taxonomy for the acquisition core.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
  /// Network or server failure that survived every retry.
  #[error("transient network error after {attempts} attempts: {message}")]
  TransientNetwork { attempts: u32, message: String },

  /// The remote budget stayed exhausted through every rate-limit retry.
  #[error("rate limit exceeded after {attempts} attempts (resets at {})", fmt_reset(.reset_at))]
  RateLimitExceeded {
    attempts: u32,
    reset_at: Option<DateTime<Utc>>,
  },

  /// A page failed after earlier pages had already been delivered.
  #[error("fetch incomplete: {fetched} records obtained before failure: {source}")]
  FetchIncomplete {
    fetched: usize,
    #[source]
    source: Box<Error>,
  },

  /// A single upstream record could not be turned into a repository.
  #[error("invalid record: {reason}")]
  InvalidRecord { reason: String },

  /// A `get_or_compute` callback failed; shared by every waiter on the key.
  #[error("computing cache entry {key} failed: {source}")]
  ComputeFailure {
    key: String,
    #[source]
    source: Arc<Error>,
  },

  /// The request itself was rejected (bad credentials, unknown user, malformed query).
  #[error("request rejected with status {status}: {message}")]
  Client { status: u16, message: String },

  /// Acquisition failed and no cached data could stand in.
  #[error("acquiring starred repositories for {identity} failed during {stage}: {source}")]
  Acquisition {
    identity: String,
    stage: &'static str,
    #[source]
    source: Box<Error>,
  },

  #[error("cache storage error: {0}")]
  Storage(String),

  #[error(transparent)]
  Sqlite(#[from] rusqlite::Error),

  #[error(transparent)]
  Serialization(#[from] serde_json::Error),

  #[error("configuration error: {0}")]
  Config(String),
}

impl Error {
  /// Records obtained before the failure, if this error represents a partial fetch.
  pub fn fetched(&self) -> Option<usize> {
    match self {
      Self::FetchIncomplete { fetched, .. } => Some(*fetched),
      _ => None,
    }
  }
}

fn fmt_reset(reset_at: &Option<DateTime<Utc>>) -> String {
  reset_at
    .map(|t| t.to_rfc3339())
    .unwrap_or_else(|| "an unknown time".to_string())
}
