//! GitHub access: transport, pagination, rate limiting and the cached client.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod fetcher;
pub mod rate_limit;
pub mod retry;
#[cfg(test)]
pub mod testing;
pub mod types;

pub use cached_client::{
  AcquisitionSettings, CachedGitHubClient, DefaultClient, RefreshPolicy, RepositorySet,
};
pub use client::{GitHubClient, Resource, Transport};
pub use rate_limit::{RateLimitSnapshot, RateLimiter};
pub use types::{License, Readme, Repository};
