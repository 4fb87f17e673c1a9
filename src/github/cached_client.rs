//! Cached GitHub client: the single entry point for starred-repository data.

use chrono::Duration;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{CacheLayer, CacheResult, CacheStorage, NoopStorage, SqliteStorage};
use crate::config::Config;
use crate::error::{Error, Result};

use super::api_types::ApiRepository;
use super::cache::GitHubQueryKey;
use super::client::{GitHubClient, Resource, Transport};
use super::fetcher::{FetchSettings, Fetcher};
use super::rate_limit::{RateLimitSnapshot, RateLimiter};
use super::types::{Readme, Repository};

/// Whether cached data may be served and how failed refreshes are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshPolicy {
  /// Serve a valid snapshot without network calls; fetch otherwise.
  #[default]
  UseCache,
  /// Always fetch; on failure serve the last snapshot, even an expired one.
  PreferCacheOnFailure,
  /// Always fetch; on a partial failure serve what was fetched.
  ForceRefresh,
}

impl FromStr for RefreshPolicy {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "use-cache" => Ok(Self::UseCache),
      "prefer-cache-on-failure" => Ok(Self::PreferCacheOnFailure),
      "force-refresh" => Ok(Self::ForceRefresh),
      other => Err(format!(
        "unknown refresh policy '{}' (expected use-cache, prefer-cache-on-failure or force-refresh)",
        other
      )),
    }
  }
}

#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
  /// TTL of repository snapshots
  pub ttl: Duration,
  /// TTL of README content
  pub content_ttl: Duration,
  /// Maximum simultaneous secondary lookups
  pub max_concurrency: usize,
}

impl Default for AcquisitionSettings {
  fn default() -> Self {
    Self {
      ttl: Duration::hours(1),
      content_ttl: Duration::days(1),
      max_concurrency: 4,
    }
  }
}

/// Starred repositories of one account, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySet {
  pub repositories: Vec<Repository>,
  /// The page cap stopped pagination before the end of the listing
  pub truncated: bool,
  /// Upstream records dropped as invalid
  pub dropped: usize,
}

/// Client with the default transport and a storage chosen by configuration.
pub type DefaultClient = CachedGitHubClient<GitHubClient, Box<dyn CacheStorage>>;

/// GitHub client with transparent caching support.
///
/// Wraps the paginated fetcher and the cache layer, and falls back to cached
/// snapshots when the network fails.
pub struct CachedGitHubClient<T: Transport, S: CacheStorage> {
  fetcher: Fetcher<T>,
  cache: CacheLayer<S>,
  settings: AcquisitionSettings,
}

impl DefaultClient {
  /// Create a new cached GitHub client from configuration.
  pub fn new(config: &Config) -> Result<Self> {
    let transport = GitHubClient::new(&config.github)?;
    let storage: Box<dyn CacheStorage> = if config.cache.enabled {
      Box::new(SqliteStorage::open(config.cache.path.as_deref())?)
    } else {
      Box::new(NoopStorage)
    };
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_settings()));

    Ok(Self::with_parts(
      transport,
      storage,
      limiter,
      config.fetch_settings(),
      config.acquisition_settings(),
    ))
  }
}

impl<T: Transport + 'static, S: CacheStorage> CachedGitHubClient<T, S> {
  pub fn with_parts(
    transport: T,
    storage: S,
    limiter: Arc<RateLimiter>,
    fetch: FetchSettings,
    settings: AcquisitionSettings,
  ) -> Self {
    Self {
      fetcher: Fetcher::new(Arc::new(transport), limiter, fetch),
      cache: CacheLayer::new(storage),
      settings,
    }
  }

  /// Get the repositories starred by `identity`.
  ///
  /// The result's `source` tells whether the data is fresh from the network,
  /// a valid cached snapshot, a stale snapshot served after a failure, or a
  /// partial listing.
  pub async fn get_repositories(
    &self,
    identity: &str,
    policy: RefreshPolicy,
  ) -> Result<CacheResult<RepositorySet>> {
    let resource = Resource::starred(identity);
    let key = GitHubQueryKey::listing(&resource, self.fetcher.settings().per_page);

    if policy == RefreshPolicy::UseCache {
      match self.cache.get::<_, RepositorySet>(&key) {
        Ok(Some(entry)) => {
          info!(
            identity,
            count = entry.value.repositories.len(),
            "serving starred repositories from cache"
          );
          return Ok(CacheResult::from_cache(entry.value, entry.stored_at));
        }
        Ok(None) => {}
        Err(e) => warn!(identity, error = %e, "failed to read cache, fetching instead"),
      }
    }

    match self.fetch_repositories(&resource).await {
      Ok(set) => {
        info!(
          identity,
          count = set.repositories.len(),
          dropped = set.dropped,
          truncated = set.truncated,
          "fetched starred repositories"
        );
        if let Err(e) = self.cache.put(&key, &set, self.settings.ttl) {
          warn!(identity, error = %e, "failed to cache starred repositories");
        }
        Ok(CacheResult::from_network(set))
      }
      Err((error, partial)) => self.recover(identity, &key, policy, error, partial),
    }
  }

  /// Walk every page, converting and deduplicating as records arrive.
  async fn fetch_repositories(
    &self,
    resource: &Resource,
  ) -> std::result::Result<RepositorySet, (Error, RepositorySet)> {
    let mut collector = Collector::default();
    let mut pages = Box::pin(self.fetcher.pages(resource));

    while let Some(page) = pages.next().await {
      match page {
        Ok(page) => {
          collector.truncated |= page.truncated;
          collector.extend(page.records);
        }
        Err(error) => return Err((error, collector.finish())),
      }
    }

    Ok(collector.finish())
  }

  /// Pick what to return after a failed fetch.
  fn recover(
    &self,
    identity: &str,
    key: &GitHubQueryKey,
    policy: RefreshPolicy,
    error: Error,
    partial: RepositorySet,
  ) -> Result<CacheResult<RepositorySet>> {
    let fail = |error: Error| Error::Acquisition {
      identity: identity.to_string(),
      stage: stage_of(&error),
      source: Box::new(error),
    };

    // A rejected request is a caller problem; stale data would hide it
    if matches!(error, Error::Client { .. }) {
      return Err(fail(error));
    }

    let has_partial = error.fetched().is_some() && !partial.repositories.is_empty();

    if policy == RefreshPolicy::ForceRefresh && has_partial {
      warn!(
        identity,
        count = partial.repositories.len(),
        error = %error,
        "returning partial listing"
      );
      return Ok(CacheResult::partial(partial));
    }

    // An unreadable cache must not hide why the fetch failed
    let snapshot = self
      .cache
      .last_snapshot::<_, RepositorySet>(key)
      .unwrap_or_else(|e| {
        warn!(
          identity,
          error = %error,
          cache_error = %e,
          "fetch failed and cache is unreadable"
        );
        None
      });
    match snapshot {
      Some(entry) if !(entry.value.repositories.is_empty() && has_partial) => {
        warn!(
          identity,
          count = entry.value.repositories.len(),
          cached_at = %entry.stored_at,
          error = %error,
          "fetch failed, serving cached snapshot"
        );
        Ok(CacheResult::offline(entry.value, entry.stored_at))
      }
      _ if has_partial => {
        warn!(
          identity,
          count = partial.repositories.len(),
          error = %error,
          "fetch failed and nothing is cached, returning partial listing"
        );
        Ok(CacheResult::partial(partial))
      }
      _ => Err(fail(error)),
    }
  }

  /// README of one repository, through the content cache.
  pub async fn readme(&self, repository: &Repository) -> Result<Readme> {
    if repository.owner_and_name().is_none() {
      return Err(Error::InvalidRecord {
        reason: format!("cannot look up README of '{}'", repository.full_name),
      });
    }
    let key = GitHubQueryKey::readme(&repository.full_name);
    let fetcher = self.fetcher.clone();
    let full_name = repository.full_name.clone();

    let content = self
      .cache
      .get_or_compute(&key, self.settings.content_ttl, move || async move {
        fetcher.fetch_readme(&full_name).await
      })
      .await?;

    Ok(Readme {
      repository_id: repository.id,
      full_name: repository.full_name.clone(),
      content,
    })
  }

  /// READMEs of `repositories`, at most `max_concurrency` requests at a time.
  ///
  /// Results arrive in completion order, keyed by repository id. A failed
  /// lookup does not affect the others.
  pub async fn readmes(&self, repositories: &[Repository]) -> Vec<(u64, Result<Readme>)> {
    stream::iter(repositories)
      .map(|repository| async move { (repository.id, self.readme(repository).await) })
      .buffer_unordered(self.settings.max_concurrency.max(1))
      .collect()
      .await
  }

  /// Query the remote budget and reconcile the shared limiter.
  pub async fn check_rate_limit(&self) -> Result<RateLimitSnapshot> {
    self.fetcher.check_rate_limit().await
  }

  /// Delete expired cache entries.
  pub fn purge_expired(&self) -> Result<usize> {
    self.cache.purge_expired()
  }

  pub fn limiter(&self) -> &Arc<RateLimiter> {
    self.fetcher.limiter()
  }
}

/// Converts raw records and keeps one repository per id.
#[derive(Default)]
struct Collector {
  order: Vec<u64>,
  by_id: HashMap<u64, Repository>,
  dropped: usize,
  truncated: bool,
}

impl Collector {
  fn extend(&mut self, records: Vec<Value>) {
    for raw in records {
      match ApiRepository::parse(raw) {
        Ok(repository) => {
          // Keep the first position, take the latest data
          let id = repository.id;
          if self.by_id.insert(id, repository).is_none() {
            self.order.push(id);
          }
        }
        Err(e) => {
          warn!(error = %e, "dropping invalid record");
          self.dropped += 1;
        }
      }
    }
  }

  fn finish(mut self) -> RepositorySet {
    let repositories = self
      .order
      .iter()
      .filter_map(|id| self.by_id.remove(id))
      .collect();
    RepositorySet {
      repositories,
      truncated: self.truncated,
      dropped: self.dropped,
    }
  }
}

fn stage_of(error: &Error) -> &'static str {
  match error {
    Error::Client { .. } => "request",
    Error::RateLimitExceeded { .. } => "rate limiting",
    Error::TransientNetwork { .. } => "network",
    Error::FetchIncomplete { .. } => "pagination",
    Error::Storage(_) | Error::Sqlite(_) | Error::ComputeFailure { .. } => "cache",
    _ => "acquisition",
  }
}
