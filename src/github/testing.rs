//! Scripted transport standing in for the GitHub API in tests.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::client::{ApiError, ApiResponse, RawPage, Resource, Transport};
use super::rate_limit::RateLimitSnapshot;

/// Outcome of one scripted page request.
#[derive(Debug, Clone)]
pub enum Step {
  Page,
  Transient(Option<u16>),
  Client(u16),
  RateLimited,
}

#[derive(Debug, Default)]
struct State {
  pages: Vec<Vec<Value>>,
  script: VecDeque<Step>,
  always_has_next: bool,
  remaining: Option<u32>,
  page_calls: usize,
  readmes: HashMap<String, String>,
  failing_readmes: HashSet<String>,
  readme_delay: Duration,
  readme_calls: usize,
  readmes_in_flight: usize,
  max_readmes_in_flight: usize,
}

/// A minimal raw starred-repository record.
pub fn record(id: u64) -> Value {
  record_with_stars(id, id * 10)
}

pub fn record_with_stars(id: u64, stars: u64) -> Value {
  json!({
    "id": id,
    "name": format!("repo-{}", id),
    "full_name": format!("owner/repo-{}", id),
    "html_url": format!("https://github.com/owner/repo-{}", id),
    "stargazers_count": stars,
    "topics": [],
  })
}

#[derive(Clone, Default)]
pub struct ScriptedTransport {
  state: Arc<Mutex<State>>,
}

impl ScriptedTransport {
  pub fn with_pages(pages: Vec<Vec<u64>>) -> Self {
    Self::with_raw_pages(
      pages
        .into_iter()
        .map(|ids| ids.into_iter().map(record).collect())
        .collect(),
    )
  }

  pub fn with_raw_pages(pages: Vec<Vec<Value>>) -> Self {
    let transport = Self::default();
    transport.state.lock().unwrap().pages = pages;
    transport
  }

  pub fn set_raw_pages(&self, pages: Vec<Vec<Value>>) {
    self.state.lock().unwrap().pages = pages;
  }

  /// Queue outcomes for the next page requests; unscripted calls serve pages.
  pub fn script(&self, steps: Vec<Step>) {
    self.state.lock().unwrap().script.extend(steps);
  }

  pub fn set_always_has_next(&self, value: bool) {
    self.state.lock().unwrap().always_has_next = value;
  }

  pub fn set_remaining(&self, remaining: u32) {
    self.state.lock().unwrap().remaining = Some(remaining);
  }

  pub fn set_readme(&self, full_name: &str, content: &str) {
    self
      .state
      .lock()
      .unwrap()
      .readmes
      .insert(full_name.to_string(), content.to_string());
  }

  pub fn fail_readme(&self, full_name: &str) {
    self
      .state
      .lock()
      .unwrap()
      .failing_readmes
      .insert(full_name.to_string());
  }

  pub fn set_readme_delay(&self, delay: Duration) {
    self.state.lock().unwrap().readme_delay = delay;
  }

  pub fn page_calls(&self) -> usize {
    self.state.lock().unwrap().page_calls
  }

  pub fn readme_calls(&self) -> usize {
    self.state.lock().unwrap().readme_calls
  }

  pub fn max_readmes_in_flight(&self) -> usize {
    self.state.lock().unwrap().max_readmes_in_flight
  }

  fn snapshot(&self) -> RateLimitSnapshot {
    let remaining = self.state.lock().unwrap().remaining.unwrap_or(4_999);
    RateLimitSnapshot {
      limit: Some(5_000),
      remaining,
      reset_at: Utc::now() + chrono::Duration::hours(1),
    }
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn fetch_page(
    &self,
    _resource: &Resource,
    page: u32,
    _per_page: u32,
  ) -> Result<ApiResponse<RawPage>, ApiError> {
    let (step, records, has_next) = {
      let mut state = self.state.lock().unwrap();
      state.page_calls += 1;
      let step = state.script.pop_front().unwrap_or(Step::Page);
      let index = page as usize - 1;
      let records = state.pages.get(index).cloned().unwrap_or_default();
      let has_next = state.always_has_next || index + 1 < state.pages.len();
      (step, records, has_next)
    };

    match step {
      Step::Page => Ok(ApiResponse {
        body: RawPage { records, has_next },
        rate: Some(self.snapshot()),
      }),
      Step::Transient(status) => Err(ApiError::Transient {
        status,
        message: "scripted failure".to_string(),
      }),
      Step::Client(status) => Err(ApiError::Client {
        status,
        message: "scripted rejection".to_string(),
      }),
      Step::RateLimited => Err(ApiError::RateLimited { reset_at: None }),
    }
  }

  async fn fetch_readme(&self, full_name: &str) -> Result<ApiResponse<Option<String>>, ApiError> {
    let delay = {
      let mut state = self.state.lock().unwrap();
      state.readme_calls += 1;
      state.readmes_in_flight += 1;
      state.max_readmes_in_flight = state.max_readmes_in_flight.max(state.readmes_in_flight);
      state.readme_delay
    };

    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }

    let mut state = self.state.lock().unwrap();
    state.readmes_in_flight -= 1;
    if state.failing_readmes.contains(full_name) {
      return Err(ApiError::Client {
        status: 403,
        message: "scripted rejection".to_string(),
      });
    }
    Ok(ApiResponse {
      body: state.readmes.get(full_name).cloned(),
      rate: None,
    })
  }

  async fn fetch_rate_limit(&self) -> Result<RateLimitSnapshot, ApiError> {
    Ok(self.snapshot())
  }
}
