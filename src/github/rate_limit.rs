//! Shared request budget for the GitHub API.
//!
//! The remote API is the source of truth for the budget. Local accounting only
//! keeps concurrent callers from jointly overspending between responses.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::retry::Backoff;
use crate::error::{Error, Result};

/// Budget as reported by a response's `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSnapshot {
  pub limit: Option<u32>,
  pub remaining: u32,
  pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
  /// Budget assumed before the first response arrives.
  pub initial_budget: u32,
  /// Shortest sleep when waiting for a reset.
  pub min_sleep: Duration,
  /// Rate-limited responses tolerated per request before giving up.
  pub max_retries: u32,
  /// Backoff used when a rate-limited response carries no reset hint.
  pub backoff: Backoff,
}

impl Default for RateLimitSettings {
  fn default() -> Self {
    Self {
      initial_budget: 5_000,
      min_sleep: Duration::from_secs(1),
      max_retries: 3,
      backoff: Backoff::from_millis(1_000, 60_000),
    }
  }
}

#[derive(Debug)]
struct BudgetState {
  remaining: u32,
  limit: u32,
  reset_at: Option<DateTime<Utc>>,
  /// Monotonic deadline matching `reset_at`, so waits follow the runtime clock.
  reset_deadline: Option<Instant>,
  /// End of a rate-limit backoff. Passing it admits one request, not a refill.
  backoff_deadline: Option<Instant>,
  /// Set by a rate-limited response, cleared by the next successful one.
  throttled: bool,
  in_flight: u32,
}

/// Process-wide rate limiter. Share it behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
  state: Mutex<BudgetState>,
  settings: RateLimitSettings,
}

/// Marks `cost` units as in flight until dropped.
#[must_use = "the request counts as in flight only while the permit is held"]
#[derive(Debug)]
pub struct RateLimitPermit<'a> {
  limiter: &'a RateLimiter,
  cost: u32,
}

impl Drop for RateLimitPermit<'_> {
  fn drop(&mut self) {
    if let Ok(mut state) = self.limiter.state.lock() {
      state.in_flight = state.in_flight.saturating_sub(self.cost);
    }
  }
}

impl RateLimiter {
  pub fn new(settings: RateLimitSettings) -> Self {
    let state = BudgetState {
      remaining: settings.initial_budget,
      limit: settings.initial_budget,
      reset_at: None,
      reset_deadline: None,
      backoff_deadline: None,
      throttled: false,
      in_flight: 0,
    };
    Self {
      state: Mutex::new(state),
      settings,
    }
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, BudgetState>> {
    self
      .state
      .lock()
      .map_err(|e| Error::Storage(format!("rate limiter lock poisoned: {}", e)))
  }

  /// Wait until `cost` units are available, then debit them.
  pub async fn acquire(&self, cost: u32) -> Result<RateLimitPermit<'_>> {
    loop {
      let wait = {
        let mut state = self.lock()?;
        let now = Instant::now();

        if state.remaining < cost {
          if let Some(deadline) = state.reset_deadline {
            if now >= deadline {
              debug!(limit = state.limit, "rate limit window reset");
              state.remaining = state.limit;
              state.reset_at = None;
              state.reset_deadline = None;
              state.backoff_deadline = None;
              state.throttled = false;
            }
          }
        }

        if state.remaining < cost {
          if let Some(deadline) = state.backoff_deadline {
            if now >= deadline {
              // The window has not reset: admit a single request
              debug!("rate limit backoff elapsed, admitting one request");
              state.remaining = cost;
              state.backoff_deadline = None;
            }
          }
        }

        if state.remaining >= cost {
          state.remaining -= cost;
          state.in_flight += cost;
          return Ok(RateLimitPermit {
            limiter: self,
            cost,
          });
        }

        let next = state
          .reset_deadline
          .into_iter()
          .chain(state.backoff_deadline)
          .min();
        let until_next = match next {
          Some(deadline) => deadline.saturating_duration_since(now),
          None => {
            // Exhausted with no authoritative reset: wait a minimum window.
            // After a rate-limited response that window only admits one request.
            let deadline = now + self.settings.min_sleep;
            if state.throttled {
              state.backoff_deadline = Some(deadline);
            } else {
              state.reset_deadline = Some(deadline);
            }
            Duration::ZERO
          }
        };
        until_next.max(self.settings.min_sleep)
      };

      debug!(wait_ms = wait.as_millis() as u64, "rate limit budget exhausted, waiting");
      tokio::time::sleep(wait).await;
    }
  }

  /// Reconcile local state with the budget reported by the remote API.
  ///
  /// Units still held by in-flight requests are not yet reflected in the
  /// response, so they are subtracted from the reported value.
  pub fn update_from_response(&self, snapshot: RateLimitSnapshot) -> Result<()> {
    let mut state = self.lock()?;
    state.remaining = snapshot.remaining.saturating_sub(state.in_flight);
    if let Some(limit) = snapshot.limit {
      state.limit = limit;
    }
    state.reset_at = Some(snapshot.reset_at);
    state.reset_deadline = Some(deadline_for(snapshot.reset_at));
    state.backoff_deadline = None;
    state.throttled = false;
    Ok(())
  }

  /// Handle an explicit rate-limited response.
  ///
  /// Forces the budget to zero and returns how long this caller should sleep
  /// before retrying. Fails with `RateLimitExceeded` once `attempt` reaches the
  /// configured retry count.
  pub fn rate_limited(
    &self,
    reset_hint: Option<DateTime<Utc>>,
    attempt: u32,
  ) -> Result<Duration> {
    let mut state = self.lock()?;
    state.remaining = 0;
    state.throttled = true;

    if attempt >= self.settings.max_retries {
      return Err(Error::RateLimitExceeded {
        attempts: attempt + 1,
        reset_at: reset_hint.or(state.reset_at),
      });
    }

    let now = Instant::now();
    let wait = match reset_hint {
      Some(reset_at) => {
        let deadline = deadline_for(reset_at);
        match state.reset_deadline {
          // A hint earlier than the known window reset (e.g. Retry-After on a
          // secondary limit) ends a backoff, not the window.
          Some(window) if window > deadline => state.backoff_deadline = Some(deadline),
          _ => {
            state.reset_at = Some(reset_at);
            state.reset_deadline = Some(deadline);
            state.backoff_deadline = None;
          }
        }
        (reset_at - Utc::now())
          .to_std()
          .unwrap_or_default()
          .max(self.settings.min_sleep)
      }
      None => {
        state.backoff_deadline = Some(now + self.settings.backoff.delay(attempt));
        self.settings.backoff.jittered(attempt)
      }
    };

    warn!(
      attempt = attempt + 1,
      wait_ms = wait.as_millis() as u64,
      "rate limited by remote API"
    );
    Ok(wait)
  }

  pub fn remaining(&self) -> u32 {
    self.state.lock().map(|s| s.remaining).unwrap_or(0)
  }

  pub fn reset_at(&self) -> Option<DateTime<Utc>> {
    self.state.lock().ok().and_then(|s| s.reset_at)
  }

  pub fn in_flight(&self) -> u32 {
    self.state.lock().map(|s| s.in_flight).unwrap_or(0)
  }
}

impl Default for RateLimiter {
  fn default() -> Self {
    Self::new(RateLimitSettings::default())
  }
}

/// Translate a wall-clock reset time into a runtime deadline.
fn deadline_for(reset_at: DateTime<Utc>) -> Instant {
  let until = (reset_at - Utc::now()).to_std().unwrap_or_default();
  Instant::now() + until
}
