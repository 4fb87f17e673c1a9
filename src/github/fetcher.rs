//! Paginated fetching over a rate-limited transport.
//!
//! Every request goes through the shared `RateLimiter`. Transient failures are
//! retried here; rate-limit refusals are retried through the limiter; client
//! errors surface immediately.

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::client::{ApiError, ApiResponse, RawPage, Resource, Transport};
use super::rate_limit::{RateLimitSnapshot, RateLimiter};
use super::retry::Backoff;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct FetchSettings {
  pub per_page: u32,
  /// Pages fetched before the listing is truncated.
  pub max_pages: u32,
  /// Total attempts per request for transient failures.
  pub max_attempts: u32,
  pub backoff: Backoff,
}

impl Default for FetchSettings {
  fn default() -> Self {
    Self {
      per_page: 100,
      max_pages: 100,
      max_attempts: 3,
      backoff: Backoff::from_millis(1_000, 30_000),
    }
  }
}

/// One fetched page, in source order.
#[derive(Debug, Clone)]
pub struct Page {
  /// 1-based page number
  pub number: u32,
  pub records: Vec<Value>,
  /// Set on the last page when the page cap stopped pagination early.
  pub truncated: bool,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
  next: Option<u32>,
  fetched: usize,
}

/// Fetches listings and single resources through the shared rate limiter.
pub struct Fetcher<T: Transport> {
  transport: Arc<T>,
  limiter: Arc<RateLimiter>,
  settings: FetchSettings,
}

impl<T: Transport> Clone for Fetcher<T> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      limiter: Arc::clone(&self.limiter),
      settings: self.settings.clone(),
    }
  }
}

impl<T: Transport> Fetcher<T> {
  pub fn new(transport: Arc<T>, limiter: Arc<RateLimiter>, settings: FetchSettings) -> Self {
    Self {
      transport,
      limiter,
      settings,
    }
  }

  pub fn limiter(&self) -> &Arc<RateLimiter> {
    &self.limiter
  }

  pub fn settings(&self) -> &FetchSettings {
    &self.settings
  }

  /// Lazily fetch every raw record of `resource`, in source order.
  ///
  /// Restartable from scratch only: dropping the stream and calling again
  /// begins at page 1.
  pub fn fetch_all<'a>(&'a self, resource: &'a Resource) -> impl Stream<Item = Result<Value>> + 'a {
    self.pages(resource).flat_map(|page| match page {
      Ok(page) => stream::iter(page.records.into_iter().map(Ok).collect::<Vec<_>>()),
      Err(e) => stream::iter(vec![Err(e)]),
    })
  }

  /// Lazily fetch the pages of `resource`.
  ///
  /// Ends after an empty page, a page without a next link, or the page cap.
  /// A failure after at least one record was delivered is reported as
  /// `FetchIncomplete` and ends the stream.
  pub fn pages<'a>(&'a self, resource: &'a Resource) -> impl Stream<Item = Result<Page>> + 'a {
    let start = Cursor {
      next: Some(1),
      fetched: 0,
    };

    stream::unfold(start, move |cursor| async move {
      let number = cursor.next?;

      match self.fetch_page(resource, number).await {
        Ok(raw) => {
          let fetched = cursor.fetched + raw.records.len();
          let more = raw.has_next && !raw.records.is_empty();
          let truncated = more && number >= self.settings.max_pages;
          if truncated {
            warn!(
              resource = %resource.path,
              pages = number,
              records = fetched,
              "page cap reached, listing truncated"
            );
          } else if !more {
            info!(resource = %resource.path, pages = number, records = fetched, "listing complete");
          }

          let next = if more && !truncated {
            Some(number + 1)
          } else {
            None
          };
          let page = Page {
            number,
            records: raw.records,
            truncated,
          };
          Some((Ok(page), Cursor { next, fetched }))
        }
        Err(e) => {
          let error = if cursor.fetched > 0 && !matches!(e, Error::Client { .. }) {
            Error::FetchIncomplete {
              fetched: cursor.fetched,
              source: Box::new(e),
            }
          } else {
            e
          };
          let done = Cursor {
            next: None,
            fetched: cursor.fetched,
          };
          Some((Err(error), done))
        }
      }
    })
  }

  async fn fetch_page(&self, resource: &Resource, number: u32) -> Result<RawPage> {
    debug!(resource = %resource.path, page = number, "fetching page");
    let per_page = self.settings.per_page;
    self
      .execute(|| self.transport.fetch_page(resource, number, per_page))
      .await
  }

  /// Fetch the README of `full_name`.
  pub async fn fetch_readme(&self, full_name: &str) -> Result<Option<String>> {
    debug!(repository = %full_name, "fetching README");
    self.execute(|| self.transport.fetch_readme(full_name)).await
  }

  /// Query the remote budget and reconcile the limiter with it.
  ///
  /// `/rate_limit` is free, so this bypasses the local budget and never waits.
  pub async fn check_rate_limit(&self) -> Result<RateLimitSnapshot> {
    let snapshot = self
      .transport
      .fetch_rate_limit()
      .await
      .map_err(|e| match e {
        ApiError::RateLimited { reset_at } => Error::RateLimitExceeded {
          attempts: 1,
          reset_at,
        },
        ApiError::Transient { message, .. } => Error::TransientNetwork {
          attempts: 1,
          message,
        },
        ApiError::Client { status, message } => Error::Client { status, message },
      })?;
    self.limiter.update_from_response(snapshot)?;
    Ok(snapshot)
  }

  /// Run one logical request with rate limiting and retries.
  async fn execute<R, F, Fut>(&self, mut call: F) -> Result<R>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<ApiResponse<R>, ApiError>>,
  {
    let mut transient_failures = 0u32;
    let mut limited_responses = 0u32;

    loop {
      let permit = self.limiter.acquire(1).await?;
      let outcome = call().await;
      drop(permit);

      let wait = match outcome {
        Ok(response) => {
          if let Some(rate) = response.rate {
            self.limiter.update_from_response(rate)?;
          }
          if transient_failures + limited_responses > 0 {
            debug!(
              retries = transient_failures + limited_responses,
              "request succeeded after retries"
            );
          }
          return Ok(response.body);
        }
        Err(ApiError::RateLimited { reset_at }) => {
          let wait = self.limiter.rate_limited(reset_at, limited_responses)?;
          limited_responses += 1;
          wait
        }
        Err(ApiError::Transient { status, message }) => {
          transient_failures += 1;
          if transient_failures >= self.settings.max_attempts {
            warn!(attempts = transient_failures, "giving up after transient failures");
            return Err(Error::TransientNetwork {
              attempts: transient_failures,
              message: match status {
                Some(status) => format!("status {}: {}", status, message),
                None => message,
              },
            });
          }
          let wait = self.settings.backoff.jittered(transient_failures - 1);
          warn!(
            attempt = transient_failures,
            status = ?status,
            error = %message,
            wait_ms = wait.as_millis() as u64,
            "transient failure, retrying"
          );
          wait
        }
        Err(ApiError::Client { status, message }) => {
          return Err(Error::Client { status, message });
        }
      };

      sleep(wait).await;
    }
  }
}

async fn sleep(wait: Duration) {
  if !wait.is_zero() {
    tokio::time::sleep(wait).await;
  }
}
