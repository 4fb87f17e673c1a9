use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::github::cached_client::{AcquisitionSettings, RefreshPolicy};
use crate::github::fetcher::FetchSettings;
use crate::github::rate_limit::RateLimitSettings;
use crate::github::retry::Backoff;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub github: GitHubConfig,
  pub rate_limit: RateLimitConfig,
  pub cache: CacheConfig,
  pub acquisition: AcquisitionConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
  /// Account whose stars are fetched when none is given on the command line
  pub username: Option<String>,
  /// API root, override for GitHub Enterprise (e.g. "https://ghe.example.com/api/v3")
  pub base_url: String,
  pub per_page: u32,
  pub timeout_secs: u64,
  /// Pages fetched before a listing is reported as truncated
  pub max_pages: u32,
  pub retry: RetryConfig,
}

impl Default for GitHubConfig {
  fn default() -> Self {
    Self {
      username: None,
      base_url: "https://api.github.com".to_string(),
      per_page: 100,
      timeout_secs: 30,
      max_pages: 100,
      retry: RetryConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay_ms: 1_000,
      max_delay_ms: 30_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
  pub initial_budget: u32,
  pub min_sleep_ms: u64,
  pub max_retries: u32,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      initial_budget: 5_000,
      min_sleep_ms: 1_000,
      max_retries: 3,
      base_delay_ms: 1_000,
      max_delay_ms: 60_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// When false every read misses and nothing is written
  pub enabled: bool,
  /// Database file (defaults to the platform data directory)
  pub path: Option<PathBuf>,
  pub ttl_secs: i64,
  pub content_ttl_secs: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      ttl_secs: 3_600,
      content_ttl_secs: 86_400,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
  /// Simultaneous README lookups
  pub max_concurrency: usize,
  pub refresh_policy: RefreshPolicy,
}

impl Default for AcquisitionConfig {
  fn default() -> Self {
    Self {
      max_concurrency: 4,
      refresh_policy: RefreshPolicy::default(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter directive, overridden by RUST_LOG (e.g. "info", "starlist=debug")
  pub level: Option<String>,
  /// Also write logs to this file, rotated daily
  pub file: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./starlist.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/starlist/config.yaml
  ///
  /// Without an explicit path, a missing file yields the defaults.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::Config(format!(
          "Config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => {
        debug!("no configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("starlist.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("starlist").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      Error::Config(format!(
        "Failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;

    let config = Self::from_yaml(&contents).map_err(|e| {
      Error::Config(format!(
        "Failed to parse config file {}: {}",
        path.display(),
        e
      ))
    })?;
    debug!(path = %path.display(), "loaded configuration");

    Ok(config)
  }

  pub fn from_yaml(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty document means "all defaults"
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Get the GitHub API token from environment variables.
  ///
  /// Checks STARLIST_GITHUB_TOKEN first, then GITHUB_TOKEN as fallback.
  /// Requests are unauthenticated (with a much smaller budget) when neither is set.
  pub fn get_api_token() -> Option<String> {
    std::env::var("STARLIST_GITHUB_TOKEN")
      .or_else(|_| std::env::var("GITHUB_TOKEN"))
      .ok()
      .filter(|t| !t.trim().is_empty())
  }

  pub fn rate_limit_settings(&self) -> RateLimitSettings {
    let rl = &self.rate_limit;
    RateLimitSettings {
      initial_budget: rl.initial_budget,
      min_sleep: Duration::from_millis(rl.min_sleep_ms),
      max_retries: rl.max_retries,
      backoff: Backoff::from_millis(rl.base_delay_ms, rl.max_delay_ms),
    }
  }

  pub fn fetch_settings(&self) -> FetchSettings {
    let gh = &self.github;
    FetchSettings {
      // GitHub caps page size at 100
      per_page: gh.per_page.clamp(1, 100),
      max_pages: gh.max_pages.max(1),
      max_attempts: gh.retry.max_attempts.max(1),
      backoff: Backoff::from_millis(gh.retry.base_delay_ms, gh.retry.max_delay_ms),
    }
  }

  pub fn acquisition_settings(&self) -> AcquisitionSettings {
    AcquisitionSettings {
      ttl: ChronoDuration::seconds(self.cache.ttl_secs.max(0)),
      content_ttl: ChronoDuration::seconds(self.cache.content_ttl_secs.max(0)),
      max_concurrency: self.acquisition.max_concurrency.max(1),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
github:
  username: octocat
  per_page: 50
cache:
  ttl_secs: 600
acquisition:
  refresh_policy: prefer-cache-on-failure
"#,
    )
    .unwrap();

    assert_eq!(config.github.username.as_deref(), Some("octocat"));
    assert_eq!(config.github.per_page, 50);
    assert_eq!(config.github.base_url, "https://api.github.com");
    assert_eq!(config.github.retry.max_attempts, 3);
    assert_eq!(config.cache.ttl_secs, 600);
    assert!(config.cache.enabled);
    assert_eq!(
      config.acquisition.refresh_policy,
      RefreshPolicy::PreferCacheOnFailure
    );
  }

  #[test]
  fn test_empty_document_is_default() {
    let config = Config::from_yaml("").unwrap();
    assert_eq!(config.github.per_page, 100);
    assert_eq!(config.acquisition.max_concurrency, 4);
  }

  #[test]
  fn test_unknown_policy_is_rejected() {
    assert!(Config::from_yaml("acquisition:\n  refresh_policy: sometimes\n").is_err());
  }

  #[test]
  fn test_settings_are_clamped() {
    let config = Config::from_yaml(
      r#"
github:
  per_page: 500
  max_pages: 0
cache:
  ttl_secs: -5
acquisition:
  max_concurrency: 0
"#,
    )
    .unwrap();

    assert_eq!(config.fetch_settings().per_page, 100);
    assert_eq!(config.fetch_settings().max_pages, 1);
    let acquisition = config.acquisition_settings();
    assert_eq!(acquisition.ttl, ChronoDuration::zero());
    assert_eq!(acquisition.max_concurrency, 1);
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "rate_limit:\n  max_retries: 7").unwrap();

    let config = Config::load(Some(file.path())).unwrap();

    assert_eq!(config.rate_limit_settings().max_retries, 7);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::load(Some(&dir.path().join("absent.yaml")));

    assert!(matches!(result, Err(Error::Config(_))));
  }
}
