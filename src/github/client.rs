use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use super::api_types::ApiRateLimitResponse;
use super::rate_limit::RateLimitSnapshot;
use crate::config::{Config, GitHubConfig};
use crate::error::{Error, Result};

/// A paginated listing endpoint plus its fixed query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
  pub path: String,
  pub params: BTreeMap<String, String>,
}

impl Resource {
  /// Repositories starred by `user`, most recently updated first.
  pub fn starred(user: &str) -> Self {
    let params = [("sort", "updated"), ("direction", "desc")]
      .into_iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    Self {
      path: format!("users/{}/starred", user.trim()),
      params,
    }
  }
}

/// Successful response body plus the budget reported alongside it.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
  pub body: T,
  pub rate: Option<RateLimitSnapshot>,
}

/// One page of raw records.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
  pub records: Vec<Value>,
  pub has_next: bool,
}

/// Transport-level failure classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
  /// The remote API refused the call because the budget is spent.
  RateLimited { reset_at: Option<DateTime<Utc>> },
  /// Connection failure, timeout or server error; worth retrying.
  Transient {
    status: Option<u16>,
    message: String,
  },
  /// The request itself is invalid; retrying cannot help.
  Client { status: u16, message: String },
}

impl std::fmt::Display for ApiError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::RateLimited { .. } => write!(f, "rate limited"),
      Self::Transient {
        status: Some(status),
        message,
      } => write!(f, "server error {}: {}", status, message),
      Self::Transient {
        status: None,
        message,
      } => write!(f, "network error: {}", message),
      Self::Client { status, message } => write!(f, "client error {}: {}", status, message),
    }
  }
}

/// The calls the acquisition core makes against the GitHub API.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Fetch page `page` (1-based) of a listing.
  async fn fetch_page(
    &self,
    resource: &Resource,
    page: u32,
    per_page: u32,
  ) -> std::result::Result<ApiResponse<RawPage>, ApiError>;

  /// Fetch the README of `full_name` as raw text; `None` if it has none.
  async fn fetch_readme(
    &self,
    full_name: &str,
  ) -> std::result::Result<ApiResponse<Option<String>>, ApiError>;

  /// Current core budget. Does not count against the budget itself.
  async fn fetch_rate_limit(&self) -> std::result::Result<RateLimitSnapshot, ApiError>;
}

/// GitHub REST client
#[derive(Clone)]
pub struct GitHubClient {
  http: reqwest::Client,
  base_url: Url,
}

impl GitHubClient {
  pub fn new(config: &GitHubConfig) -> Result<Self> {
    let token = Config::get_api_token();
    Self::with_token(config, token.as_deref())
  }

  pub fn with_token(config: &GitHubConfig, token: Option<&str>) -> Result<Self> {
    let mut headers = HeaderMap::new();
    headers.insert(
      header::ACCEPT,
      HeaderValue::from_static("application/vnd.github+json"),
    );
    headers.insert(
      "x-github-api-version",
      HeaderValue::from_static("2022-11-28"),
    );
    if let Some(token) = token {
      let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| Error::Config(format!("Invalid GitHub token: {}", e)))?;
      value.set_sensitive(true);
      headers.insert(header::AUTHORIZATION, value);
    }

    let http = reqwest::Client::builder()
      .user_agent(concat!("starlist/", env!("CARGO_PKG_VERSION")))
      .default_headers(headers)
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

    // Url::join drops the last path segment unless the base ends with '/'
    let mut base = config.base_url.trim_end_matches('/').to_string();
    base.push('/');
    let base_url = Url::parse(&base)
      .map_err(|e| Error::Config(format!("Invalid base_url {}: {}", config.base_url, e)))?;

    Ok(Self { http, base_url })
  }

  fn url(&self, path: &str) -> std::result::Result<Url, ApiError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| ApiError::Client {
        status: 0,
        message: format!("invalid request path {}: {}", path, e),
      })
  }

  async fn send(&self, request: reqwest::RequestBuilder) -> std::result::Result<Response, ApiError> {
    let response = request.send().await.map_err(|e| ApiError::Transient {
      status: None,
      message: e.to_string(),
    })?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    Err(classify_failure(response).await)
  }
}

#[async_trait]
impl Transport for GitHubClient {
  async fn fetch_page(
    &self,
    resource: &Resource,
    page: u32,
    per_page: u32,
  ) -> std::result::Result<ApiResponse<RawPage>, ApiError> {
    let mut url = self.url(&resource.path)?;
    url
      .query_pairs_mut()
      .extend_pairs(resource.params.iter())
      .append_pair("per_page", &per_page.to_string())
      .append_pair("page", &page.to_string());

    let response = self.send(self.http.get(url)).await?;
    let rate = rate_limit_from_headers(response.headers());
    let link = response
      .headers()
      .get(header::LINK)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    let records: Vec<Value> = response.json().await.map_err(|e| ApiError::Transient {
      status: None,
      message: format!("failed to read page {}: {}", page, e),
    })?;

    // Without a Link header, a full page is the only hint that more follow
    let has_next = match link {
      Some(link) => has_next_link(&link),
      None => records.len() as u32 >= per_page,
    };

    Ok(ApiResponse {
      body: RawPage { records, has_next },
      rate,
    })
  }

  async fn fetch_readme(
    &self,
    full_name: &str,
  ) -> std::result::Result<ApiResponse<Option<String>>, ApiError> {
    let url = self.url(&format!("repos/{}/readme", full_name))?;
    let request = self
      .http
      .get(url)
      .header(header::ACCEPT, "application/vnd.github.raw+json");

    match self.send(request).await {
      Ok(response) => {
        let rate = rate_limit_from_headers(response.headers());
        let body = response.text().await.map_err(|e| ApiError::Transient {
          status: None,
          message: format!("failed to read README of {}: {}", full_name, e),
        })?;
        Ok(ApiResponse {
          body: Some(body),
          rate,
        })
      }
      Err(ApiError::Client { status: 404, .. }) => Ok(ApiResponse {
        body: None,
        rate: None,
      }),
      Err(e) => Err(e),
    }
  }

  async fn fetch_rate_limit(&self) -> std::result::Result<RateLimitSnapshot, ApiError> {
    let response = self.send(self.http.get(self.url("rate_limit")?)).await?;
    let parsed: ApiRateLimitResponse = response.json().await.map_err(|e| ApiError::Transient {
      status: None,
      message: format!("failed to read rate limit: {}", e),
    })?;
    let core = parsed.resources.core;

    Ok(RateLimitSnapshot {
      limit: Some(core.limit),
      remaining: core.remaining,
      reset_at: epoch_to_utc(core.reset).unwrap_or_else(Utc::now),
    })
  }
}

/// Turn a non-success response into an `ApiError`.
async fn classify_failure(response: Response) -> ApiError {
  let status = response.status();
  let headers = response.headers().clone();
  let body = response.text().await.unwrap_or_default();
  let rate = rate_limit_from_headers(&headers);
  let exhausted = rate.map(|r| r.remaining == 0).unwrap_or(false);

  if status == StatusCode::TOO_MANY_REQUESTS
    || (status == StatusCode::FORBIDDEN
      && (exhausted || body.to_lowercase().contains("rate limit")))
  {
    return ApiError::RateLimited {
      reset_at: rate_limit_hint(&headers),
    };
  }

  if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
    return ApiError::Transient {
      status: Some(status.as_u16()),
      message: body,
    };
  }

  ApiError::Client {
    status: status.as_u16(),
    message: match status {
      StatusCode::UNAUTHORIZED => "authentication failed - check your token".to_string(),
      StatusCode::NOT_FOUND => "resource not found".to_string(),
      _ => body,
    },
  }
}

/// Read the `X-RateLimit-*` headers, if present.
pub fn rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimitSnapshot> {
  let number = |name: &str| -> Option<i64> {
    headers
      .get(name)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.trim().parse().ok())
  };

  let remaining = number("x-ratelimit-remaining")?;
  let reset = number("x-ratelimit-reset")?;

  Some(RateLimitSnapshot {
    limit: number("x-ratelimit-limit").and_then(|l| u32::try_from(l).ok()),
    remaining: u32::try_from(remaining.max(0)).unwrap_or(u32::MAX),
    reset_at: epoch_to_utc(reset)?,
  })
}

/// When to retry a rate-limited request, if the response says.
///
/// The primary window's reset only applies when that window is spent. A
/// secondary limit leaves budget in it and gets `None`, so callers back off.
fn rate_limit_hint(headers: &HeaderMap) -> Option<DateTime<Utc>> {
  retry_after(headers).or_else(|| {
    rate_limit_from_headers(headers)
      .filter(|rate| rate.remaining == 0)
      .map(|rate| rate.reset_at)
  })
}

/// `Retry-After` in seconds, as an absolute time.
fn retry_after(headers: &HeaderMap) -> Option<DateTime<Utc>> {
  let secs: i64 = headers
    .get(header::RETRY_AFTER)?
    .to_str()
    .ok()?
    .trim()
    .parse()
    .ok()?;
  Some(Utc::now() + chrono::Duration::seconds(secs))
}

fn epoch_to_utc(secs: i64) -> Option<DateTime<Utc>> {
  Utc.timestamp_opt(secs, 0).single()
}

/// Whether an RFC 8288 `Link` header carries a `rel="next"` target.
pub fn has_next_link(link: &str) -> bool {
  link.split(',').any(|part| {
    part
      .split(';')
      .skip(1)
      .any(|param| matches!(param.trim(), r#"rel="next""# | "rel=next"))
  })
}
