//! Fetch, cache and serve the repositories a GitHub account has starred.
//!
//! [`github::CachedGitHubClient`] is the entry point: it pages through the
//! starred listing under a shared rate limiter, stores snapshots in a SQLite
//! cache and falls back to them when GitHub is unreachable.

pub mod cache;
pub mod config;
pub mod error;
pub mod github;
pub mod logging;

pub use cache::{CacheResult, CacheSource};
pub use config::Config;
pub use error::{Error, Result};
pub use github::{CachedGitHubClient, RefreshPolicy, Repository, RepositorySet};
