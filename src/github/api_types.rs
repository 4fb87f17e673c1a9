//! Serde-deserializable types matching GitHub API responses.
//!
//! These types are separate from domain types so that every upstream field can
//! be optional here while `Repository` states what a valid record must carry.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::types::{License, Repository};
use crate::error::Error;

// ============================================================================
// Starred repository listing
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ApiRepository {
  pub id: Option<u64>,
  pub name: Option<String>,
  pub full_name: Option<String>,
  pub description: Option<String>,
  #[serde(default)]
  pub html_url: String,
  pub language: Option<String>,
  #[serde(default)]
  pub topics: Vec<String>,
  #[serde(default)]
  pub stargazers_count: u64,
  #[serde(default)]
  pub forks_count: u64,
  #[serde(default)]
  pub open_issues_count: u64,
  #[serde(default)]
  pub watchers_count: u64,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
  pub pushed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub archived: bool,
  #[serde(default)]
  pub disabled: bool,
  #[serde(default)]
  pub private: bool,
  #[serde(default)]
  pub fork: bool,
  #[serde(default)]
  pub size: u64,
  pub license: Option<ApiLicense>,
  pub default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiLicense {
  #[serde(default)]
  pub key: String,
  #[serde(default)]
  pub name: String,
  pub spdx_id: Option<String>,
}

impl ApiRepository {
  /// Parse one raw record from a listing page.
  pub fn parse(raw: Value) -> Result<Repository, Error> {
    let api: ApiRepository = serde_json::from_value(raw).map_err(|e| Error::InvalidRecord {
      reason: format!("malformed repository: {}", e),
    })?;
    api.into_repository()
  }

  pub fn into_repository(self) -> Result<Repository, Error> {
    let id = self.id.ok_or_else(|| Error::InvalidRecord {
      reason: format!(
        "missing id (full_name: {})",
        self.full_name.as_deref().unwrap_or("<unknown>")
      ),
    })?;
    let full_name = self.full_name.ok_or_else(|| Error::InvalidRecord {
      reason: format!("missing full_name for id {}", id),
    })?;
    let name = self.name.unwrap_or_else(|| {
      full_name
        .rsplit('/')
        .next()
        .unwrap_or(full_name.as_str())
        .to_string()
    });

    Ok(Repository {
      id,
      name,
      full_name,
      description: self.description,
      html_url: self.html_url,
      language: self.language,
      topics: self.topics,
      stargazers_count: self.stargazers_count,
      forks_count: self.forks_count,
      open_issues_count: self.open_issues_count,
      watchers_count: self.watchers_count,
      created_at: self.created_at,
      updated_at: self.updated_at,
      pushed_at: self.pushed_at,
      archived: self.archived,
      disabled: self.disabled,
      private: self.private,
      fork: self.fork,
      size: self.size,
      license: self.license.map(License::from),
      default_branch: self.default_branch.unwrap_or_else(|| "main".to_string()),
    })
  }
}

impl From<ApiLicense> for License {
  fn from(api: ApiLicense) -> Self {
    Self {
      key: api.key,
      name: api.name,
      spdx_id: api.spdx_id,
    }
  }
}

// ============================================================================
// Rate limit endpoint response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiRateLimitResponse {
  pub resources: ApiRateLimitResources,
}

#[derive(Debug, Deserialize)]
pub struct ApiRateLimitResources {
  pub core: ApiRateLimitWindow,
}

#[derive(Debug, Deserialize)]
pub struct ApiRateLimitWindow {
  pub limit: u32,
  pub remaining: u32,
  /// Unix epoch seconds
  pub reset: i64,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_full_record() {
    let raw = json!({
      "id": 42,
      "name": "ripgrep",
      "full_name": "BurntSushi/ripgrep",
      "description": "recursively search directories",
      "html_url": "https://github.com/BurntSushi/ripgrep",
      "language": "Rust",
      "topics": ["cli", "search"],
      "stargazers_count": 1000,
      "forks_count": 50,
      "open_issues_count": 7,
      "watchers_count": 1000,
      "created_at": "2016-03-11T02:02:33Z",
      "updated_at": "2024-01-02T03:04:05Z",
      "pushed_at": "2024-01-01T00:00:00Z",
      "archived": false,
      "fork": false,
      "size": 12345,
      "license": { "key": "unlicense", "name": "The Unlicense", "spdx_id": "Unlicense" },
      "default_branch": "master"
    });

    let repo = ApiRepository::parse(raw).unwrap();

    assert_eq!(repo.id, 42);
    assert_eq!(repo.full_name, "BurntSushi/ripgrep");
    assert_eq!(repo.topics, vec!["cli", "search"]);
    assert_eq!(repo.default_branch, "master");
    assert_eq!(repo.license.unwrap().spdx_id.as_deref(), Some("Unlicense"));
    assert_eq!(
      repo.created_at.unwrap().to_rfc3339(),
      "2016-03-11T02:02:33+00:00"
    );
  }

  #[test]
  fn test_missing_id_is_invalid_record() {
    let raw = json!({ "name": "orphan", "full_name": "someone/orphan" });

    let err = ApiRepository::parse(raw).unwrap_err();

    assert!(matches!(err, Error::InvalidRecord { .. }));
    assert!(err.to_string().contains("someone/orphan"));
  }

  #[test]
  fn test_wrong_field_type_is_invalid_record() {
    let raw = json!({ "id": "not-a-number", "full_name": "a/b" });

    assert!(matches!(
      ApiRepository::parse(raw),
      Err(Error::InvalidRecord { .. })
    ));
  }

  #[test]
  fn test_defaults_fill_optional_fields() {
    let raw = json!({ "id": 7, "full_name": "owner/tool", "license": null });

    let repo = ApiRepository::parse(raw).unwrap();

    assert_eq!(repo.name, "tool");
    assert_eq!(repo.default_branch, "main");
    assert!(repo.topics.is_empty());
    assert!(repo.license.is_none());
    assert_eq!(repo.owner_and_name(), Some(("owner", "tool")));
  }
}
