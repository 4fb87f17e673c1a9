use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A starred repository as captured at fetch time.
///
/// `id` is the primary key. `full_name` changes on rename and is only used
/// for display and content lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
  pub id: u64,
  pub name: String,
  pub full_name: String,
  pub description: Option<String>,
  pub html_url: String,
  pub language: Option<String>,
  pub topics: Vec<String>,
  pub stargazers_count: u64,
  pub forks_count: u64,
  pub open_issues_count: u64,
  pub watchers_count: u64,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
  pub pushed_at: Option<DateTime<Utc>>,
  pub archived: bool,
  pub disabled: bool,
  pub private: bool,
  pub fork: bool,
  pub size: u64,
  pub license: Option<License>,
  pub default_branch: String,
}

impl Repository {
  /// Owner and repository name, split from `full_name`.
  pub fn owner_and_name(&self) -> Option<(&str, &str)> {
    self.full_name.split_once('/')
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
  pub key: String,
  pub name: String,
  pub spdx_id: Option<String>,
}

/// README content for one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readme {
  pub repository_id: u64,
  pub full_name: String,
  /// `None` when the repository has no README
  pub content: Option<String>,
}
