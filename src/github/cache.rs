//! Cache keys for GitHub requests.

use crate::cache::CacheKey;

use super::client::Resource;

/// Query key types for GitHub API calls.
#[derive(Clone, Debug)]
pub enum GitHubQueryKey {
  /// A full paginated listing (e.g. one user's starred repositories)
  Listing { resource: Resource, per_page: u32 },
  /// README content of a single repository
  Readme { full_name: String },
}

impl GitHubQueryKey {
  pub fn listing(resource: &Resource, per_page: u32) -> Self {
    Self::Listing {
      resource: resource.clone(),
      per_page,
    }
  }

  pub fn readme(full_name: &str) -> Self {
    Self::Readme {
      full_name: full_name.to_string(),
    }
  }
}

impl CacheKey for GitHubQueryKey {
  fn namespace(&self) -> &'static str {
    match self {
      Self::Listing { .. } => "records",
      Self::Readme { .. } => "content",
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Listing { resource, per_page } => {
        // GitHub logins and repository names are case-insensitive
        let mut description = format!("GET /{}?per_page={}", normalize(&resource.path), per_page);
        for (name, value) in &resource.params {
          description.push('&');
          description.push_str(name);
          description.push('=');
          description.push_str(value);
        }
        description
      }
      Self::Readme { full_name } => format!("GET /repos/{}/readme", normalize(full_name)),
    }
  }
}

fn normalize(path: &str) -> String {
  path.trim().trim_matches('/').to_lowercase()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_listing_key_is_deterministic() {
    let a = GitHubQueryKey::listing(&Resource::starred("Octocat"), 100);
    let b = GitHubQueryKey::listing(&Resource::starred("octocat"), 100);

    assert_eq!(a.cache_hash(), b.cache_hash());
    assert_eq!(
      a.description(),
      "GET /users/octocat/starred?per_page=100&direction=desc&sort=updated"
    );
  }

  #[test]
  fn test_different_parameters_give_different_keys() {
    let resource = Resource::starred("octocat");
    let small = GitHubQueryKey::listing(&resource, 30);
    let large = GitHubQueryKey::listing(&resource, 100);
    let other = GitHubQueryKey::listing(&Resource::starred("hubot"), 100);

    assert_ne!(small.cache_hash(), large.cache_hash());
    assert_ne!(large.cache_hash(), other.cache_hash());
  }

  #[test]
  fn test_readme_key_lives_in_content_namespace() {
    let key = GitHubQueryKey::readme("Rust-Lang/Rust");

    assert_eq!(key.namespace(), "content");
    assert_eq!(key.description(), "GET /repos/rust-lang/rust/readme");
  }
}
