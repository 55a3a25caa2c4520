//! Rate-limited JSON fetcher
//!
//! Issues one GET per [`RequestSpec`], spaces consecutive calls to the same provider
//! and classifies failures into [`FetchError`] variants the orchestrator can act on.

use crate::config::HttpSettings;
use crate::error::FetchError;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Parsed JSON body of a successful response
pub type RawPayload = Json;

/// One outbound request: URL template with `{name}` placeholders plus query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub url_template: String,
    pub path_params: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    /// Pagination cursor appended as an extra query parameter
    pub cursor: Option<(String, String)>,
}

impl RequestSpec {
    pub fn get(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            path_params: BTreeMap::new(),
            query: Vec::new(),
            cursor: None,
        }
    }

    pub fn path_param(mut self, name: &str, value: impl ToString) -> Self {
        self.path_params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_cursor(mut self, name: &str, value: impl ToString) -> Self {
        self.cursor = Some((name.to_string(), value.to_string()));
        self
    }

    pub fn url(&self) -> Result<Url, FetchError> {
        let mut rendered = self.url_template.clone();
        for (name, value) in &self.path_params {
            rendered = rendered.replace(&format!("{{{}}}", name), value);
        }
        if let Some(start) = rendered.find('{') {
            return Err(FetchError::InvalidRequest(format!(
                "unresolved placeholder in '{}'",
                &rendered[start..]
            )));
        }

        let mut url = Url::parse(&rendered)
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", rendered, e)))?;
        if !self.query.is_empty() || self.cursor.is_some() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in self.query.iter().chain(self.cursor.iter()) {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    /// URL without query string, safe to log
    pub fn redacted(&self) -> String {
        match self.url() {
            Ok(mut url) => {
                url.set_query(None);
                url.to_string()
            }
            Err(_) => self.url_template.clone(),
        }
    }
}

/// Shared count of HTTP requests issued, including failed and retried ones
#[derive(Debug, Clone, Default)]
pub struct ApiCallCounter(Arc<AtomicU64>);

impl ApiCallCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct RateLimitedFetcher {
    client: Client,
    min_interval: Duration,
    last_call: HashMap<String, Instant>,
    api_calls: ApiCallCounter,
}

impl RateLimitedFetcher {
    pub fn new(http: &HttpSettings, min_interval: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(http.timeout)
            .connect_timeout(http.connect_timeout)
            .user_agent(http.user_agent.clone())
            .build()
            .map_err(|e| FetchError::InvalidRequest(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            min_interval,
            last_call: HashMap::new(),
            api_calls: ApiCallCounter::default(),
        })
    }

    pub fn api_calls(&self) -> ApiCallCounter {
        self.api_calls.clone()
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub async fn fetch(&mut self, request: &RequestSpec) -> Result<RawPayload, FetchError> {
        let url = request.url()?;
        let provider = provider_key(&url);
        self.pace(&provider).await;
        self.api_calls.increment();

        debug!(url = %request.redacted(), "GET");
        let outcome = self.send(url).await;
        self.finished(provider);
        outcome
    }

    async fn send(&self, url: Url) -> Result<RawPayload, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            let body = response.bytes().await.map_err(classify_transport_error)?;
            return serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()));
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::Transient {
                status: Some(status.as_u16()),
                reason: format!("HTTP {}", status),
                retry_after,
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(FetchError::client(status.as_u16(), &body))
    }

    /// Wait until `min_interval` has passed since the previous call to this provider
    /// completed. A slow response does not eat into the gap.
    async fn pace(&self, provider: &str) {
        if let Some(last) = self.last_call.get(provider) {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
    }

    /// Record the end of a call, whatever its outcome
    fn finished(&mut self, provider: String) {
        self.last_call.insert(provider, Instant::now());
    }
}

fn provider_key(url: &Url) -> String {
    match url.port_or_known_default() {
        Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
        None => url.host_str().unwrap_or_default().to_string(),
    }
}

fn classify_transport_error(err: reqwest::Error) -> FetchError {
    if err.is_builder() {
        return FetchError::InvalidRequest(err.without_url().to_string());
    }
    let reason = if err.is_timeout() {
        "timeout".to_string()
    } else if err.is_connect() {
        format!("connection failed: {}", err.without_url())
    } else {
        err.without_url().to_string()
    };
    FetchError::transient(None, reason)
}

/// Pull the record array out of a payload.
///
/// Arrays are returned as-is. Objects are searched, in candidate order, for the first key
/// holding a non-empty array; an empty array only counts if no candidate has data.
/// Anything else is a decode error.
pub fn records_from_payload(payload: RawPayload, candidate_keys: &[&str]) -> Result<Vec<Json>, FetchError> {
    match payload {
        Json::Array(items) => Ok(items),
        Json::Object(mut map) => {
            let holds_array = |map: &serde_json::Map<String, Json>, key: &str, non_empty: bool| {
                matches!(map.get(key), Some(Json::Array(items)) if !non_empty || !items.is_empty())
            };
            let chosen = candidate_keys
                .iter()
                .find(|key| holds_array(&map, key, true))
                .or_else(|| candidate_keys.iter().find(|key| holds_array(&map, key, false)));
            if let Some(Json::Array(items)) = chosen.and_then(|key| map.remove(*key)) {
                return Ok(items);
            }
            let found: Vec<&String> = map.keys().take(10).collect();
            Err(FetchError::Decode(format!(
                "none of {:?} holds a record array (keys present: {:?})",
                candidate_keys, found
            )))
        }
        other => Err(FetchError::Decode(format!(
            "expected a JSON array or object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
