//! Outbound HTTP with bounded retry.
//!
//! [`HttpClient`] wraps an [`HttpTransport`] (one request, no retries) with a
//! fixed backoff schedule: 5xx responses wait `server_error_backoff`, 429 and
//! 408 wait `rate_limit_backoff`, each retry spends one unit of the retry
//! budget. Everything else, 4xx included, is handed back to the caller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jellysync_core::{HttpSettings, SyncError};
use reqwest::Method;
use serde_json::Value;
use url::Url;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// Payload of an outbound request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    /// `application/x-www-form-urlencoded` pairs, in order.
    Form(Vec<(String, String)>),
}

/// One outbound request, as an adapter describes it.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub method: Method,
    pub base_url: String,
    /// Path joined onto `base_url`, or an absolute URL that replaces it.
    pub uri: String,
    /// Header names are stored lowercased.
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl RequestOptions {
    /// A request with no headers, query or body.
    pub fn new(method: Method, base_url: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method,
            base_url: base_url.into(),
            uri: uri.into(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// `GET <base_url>/<uri>`.
    pub fn get(base_url: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::new(Method::GET, base_url, uri)
    }

    /// `POST <base_url>/<uri>`; add a body with [`Self::json`] or [`Self::form`].
    pub fn post(base_url: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::new(Method::POST, base_url, uri)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(pairs);
        self
    }

    /// Set `Authorization: Bearer <token>`, replacing any previous value.
    pub fn set_bearer(&mut self, token: &str) {
        self.headers
            .insert("authorization".to_owned(), format!("Bearer {token}"));
    }

    /// Absolute URL of the request: `uri` joined onto `base_url` unless it is
    /// already absolute, plus the query pairs.
    pub fn url(&self) -> Result<Url, SyncError> {
        let raw = if self.uri.starts_with("http://") || self.uri.starts_with("https://") {
            self.uri.clone()
        } else if self.uri.is_empty() {
            self.base_url.clone()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                self.uri.trim_start_matches('/')
            )
        };
        let mut url = Url::parse(&raw)
            .map_err(|e| SyncError::InvalidRequest(format!("invalid url {raw}: {e}")))?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url)
    }

    /// Display form used in logs and errors.
    pub fn describe(&self) -> String {
        match self.url() {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}{}", self.base_url, self.uri),
        }
    }
}

/// `{code, body}`; the body is parsed JSON, or the raw text when it is not JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub code: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn new(code: u16, body: Value) -> Self {
        Self { code, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    fn body_text(&self) -> Option<String> {
        match &self.body {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

pub(crate) fn parse_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Performs exactly one request.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, options: &RequestOptions) -> Result<HttpResponse, SyncError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, options: &RequestOptions) -> Result<HttpResponse, SyncError> {
        let url = options.url()?;
        let transport_err = |source: reqwest::Error| SyncError::Transport {
            url: url.to_string(),
            source: Box::new(source),
        };

        let mut builder = self.client.request(options.method.clone(), url.clone());
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &options.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(pairs) => builder.form(pairs),
        };

        let response = builder.send().await.map_err(transport_err)?;
        let code = response.status().as_u16();
        let text = response.text().await.map_err(transport_err)?;
        Ok(HttpResponse::new(code, parse_body(text)))
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Status classes that are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    ServerError,
    RateLimit,
}

impl RetryClass {
    pub fn of(status: u16) -> Option<Self> {
        match status {
            500..=u16::MAX => Some(RetryClass::ServerError),
            429 | 408 => Some(RetryClass::RateLimit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retry budget for ordinary API requests.
    pub retries: u32,
    /// Retry budget for OAuth token endpoint calls (5xx only).
    pub oauth_retries: u32,
    pub server_error_backoff: Duration,
    pub rate_limit_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&HttpSettings::default())
    }
}

impl From<&HttpSettings> for RetryPolicy {
    fn from(settings: &HttpSettings) -> Self {
        Self {
            retries: settings.retries,
            oauth_retries: settings.oauth_retries,
            server_error_backoff: Duration::from_millis(settings.server_error_backoff_ms),
            rate_limit_backoff: Duration::from_millis(settings.rate_limit_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Same budgets, no waiting.
    pub fn without_delays(self) -> Self {
        Self {
            server_error_backoff: Duration::ZERO,
            rate_limit_backoff: Duration::ZERO,
            ..self
        }
    }

    pub fn delay(&self, class: RetryClass) -> Duration {
        match class {
            RetryClass::ServerError => self.server_error_backoff,
            RetryClass::RateLimit => self.rate_limit_backoff,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Client over a fresh `reqwest` connection pool.
    pub fn with_reqwest(policy: RetryPolicy) -> Self {
        Self::new(Arc::new(ReqwestTransport::default()), policy)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Request with the default retry budget.
    pub async fn request(&self, options: &RequestOptions) -> Result<HttpResponse, SyncError> {
        self.request_with_retries(options, self.policy.retries).await
    }

    /// Request, retrying 5xx/429/408 responses up to `retries` times.
    ///
    /// Transport failures are returned immediately.
    pub async fn request_with_retries(
        &self,
        options: &RequestOptions,
        retries: u32,
    ) -> Result<HttpResponse, SyncError> {
        match self.retry(options, retries, true).await? {
            (response, None) => Ok(response),
            (response, Some(class)) => Err(exhausted(class, options, &response)),
        }
    }

    /// Request retrying only 5xx responses. 429 and 408 are handed back like
    /// any other status; a 5xx that outlives the budget is `ExternalRequest`.
    pub async fn request_retrying_server_errors(
        &self,
        options: &RequestOptions,
        retries: u32,
    ) -> Result<HttpResponse, SyncError> {
        match self.retry(options, retries, false).await? {
            (response, None) => Ok(response),
            (response, Some(class)) => Err(exhausted(class, options, &response)),
        }
    }

    /// The retry loop. Yields the final response and, when it is still
    /// retryable, its class.
    async fn retry(
        &self,
        options: &RequestOptions,
        retries: u32,
        rate_limits: bool,
    ) -> Result<(HttpResponse, Option<RetryClass>), SyncError> {
        let mut remaining = retries;
        loop {
            let response = self.transport.send(options).await?;
            let class = match RetryClass::of(response.code) {
                Some(RetryClass::RateLimit) if !rate_limits => None,
                class => class,
            };
            let Some(class) = class else {
                return Ok((response, None));
            };
            if remaining == 0 {
                return Ok((response, Some(class)));
            }

            let delay = self.policy.delay(class);
            tracing::warn!(
                status = response.code,
                url = %options.describe(),
                remaining,
                delay_ms = delay.as_millis() as u64,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
            remaining -= 1;
        }
    }
}

fn exhausted(class: RetryClass, options: &RequestOptions, response: &HttpResponse) -> SyncError {
    let url = options.describe();
    match class {
        RetryClass::ServerError => SyncError::ExternalRequest {
            url,
            status: response.code,
            body: response.body_text(),
        },
        RetryClass::RateLimit => SyncError::RateLimit {
            url,
            status: response.code,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
