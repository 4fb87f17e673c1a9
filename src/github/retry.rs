//! Exponential backoff shared by the fetcher's retry loop and the rate limiter.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff: `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
  base: Duration,
  max: Duration,
}

impl Backoff {
  pub fn new(base: Duration, max: Duration) -> Self {
    Self {
      base,
      max: max.max(base),
    }
  }

  pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
    Self::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
  }

  /// Delay before retry number `attempt` (0-indexed), without jitter.
  pub fn delay(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    self.base.saturating_mul(factor).min(self.max)
  }

  /// Delay with up to 50% random jitter added, still capped at `max`.
  pub fn jittered(&self, attempt: u32) -> Duration {
    let delay = self.delay(attempt);
    let spread = (delay.as_millis() / 2) as u64;
    if spread == 0 {
      return delay;
    }
    let extra = rand::rng().random_range(0..=spread);
    (delay + Duration::from_millis(extra)).min(self.max)
  }
}

impl Default for Backoff {
  fn default() -> Self {
    Self::from_millis(1_000, 60_000)
  }
}
