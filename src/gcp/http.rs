//! HTTP transport
//!
//! Requests go through a chain of independently testable stages:
//!
//! ```text
//! RequestHeaders -> Retry -> ErrorClassifier -> ReqwestSender
//! ```
//!
//! `RequestHeaders` adds credentials, the user agent and the quota project
//! header; `Retry` re-sends idempotent requests on network errors and 5xx;
//! `ErrorClassifier` turns non-success statuses into [`Error`] variants;
//! `ReqwestSender` does the actual I/O.

use super::auth::TokenSource;
use crate::backoff::Backoff;
use crate::config::properties::{QUOTA_PROJECT_CURRENT, QUOTA_PROJECT_LEGACY};
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Header carrying the project billed for quota.
pub const QUOTA_PROJECT_HEADER: &str = "X-Goog-User-Project";

/// Attempts per request, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Sanitize a response body for logging: truncate and drop control characters.
pub fn sanitize_for_log(body: &str) -> String {
    let char_count = body.chars().count();
    let truncated = if char_count > MAX_LOG_BODY_LENGTH {
        let head: String = body.chars().take(MAX_LOG_BODY_LENGTH).collect();
        format!("{}... [truncated, {} bytes total]", head, body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// One outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Whether re-sending the request cannot duplicate a side effect.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.method,
            Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
        )
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

/// Response as seen by the stages above the sender.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON; an empty body is `null`.
    pub fn json(&self) -> Result<Value> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body).map_err(|e| {
            Error::Internal(format!(
                "Failed to parse response JSON: {e}: {}",
                sanitize_for_log(&self.body)
            ))
        })
    }
}

/// One stage of the transport chain.
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

// =========================================================================
// Sender
// =========================================================================

/// Performs requests with `reqwest`. Proxies come from `HTTP(S)_PROXY` / `NO_PROXY`.
#[derive(Clone)]
pub struct ReqwestSender {
    client: reqwest::Client,
    log_http: bool,
}

impl ReqwestSender {
    pub fn new(timeout: Duration, log_http: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, log_http })
    }
}

#[async_trait]
impl HttpSend for ReqwestSender {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        tracing::debug!("{} {}", request.method, request.url);
        if self.log_http {
            tracing::info!("--request-start-- {} {} query={:?}", request.method, request.url, request.query);
        }

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            Error::Network(format!("{} {}: {}", request.method, request.url, e))
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response body: {e}")))?;

        if self.log_http {
            tracing::info!("--response-start-- {} {}", status, sanitize_for_log(&body));
        }
        Ok(HttpResponse { status, body })
    }
}

// =========================================================================
// Error classifier
// =========================================================================

/// Maps non-2xx responses to typed errors.
pub struct ErrorClassifier {
    inner: Arc<dyn HttpSend>,
}

impl ErrorClassifier {
    pub fn new(inner: Arc<dyn HttpSend>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl HttpSend for ErrorClassifier {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        let response = self.inner.send(request).await?;
        if response.is_success() {
            return Ok(response);
        }
        // Only sanitized/truncated bodies reach the log
        tracing::debug!("API error: {} - {}", response.status, sanitize_for_log(&response.body));
        Err(Error::from_http(response.status, &url, &response.body))
    }
}

// =========================================================================
// Retry
// =========================================================================

/// Re-sends idempotent requests that failed with a retryable error.
pub struct Retry {
    inner: Arc<dyn HttpSend>,
    max_attempts: u32,
    backoff: Backoff,
}

impl Retry {
    pub fn new(inner: Arc<dyn HttpSend>) -> Self {
        Self {
            inner,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

#[async_trait]
impl HttpSend for Retry {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut backoff = self.backoff.clone();
        let mut attempt = 1;
        loop {
            match self.inner.send(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && request.is_idempotent() && attempt < self.max_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        "Retrying {} {} in {:?} (attempt {} of {}): {}",
                        request.method,
                        request.url,
                        delay,
                        attempt + 1,
                        self.max_attempts,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// =========================================================================
// Request headers
// =========================================================================

/// Value of `billing/quota_project`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaProject {
    /// Never send the header.
    Legacy,
    /// Bill the project the command operates on (`core/project`).
    CurrentProject,
    /// Bill this project.
    Project(String),
}

impl QuotaProject {
    /// Interpret a raw property value. Values equal to a sentinel are the sentinel.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "" => None,
            QUOTA_PROJECT_LEGACY => Some(Self::Legacy),
            QUOTA_PROJECT_CURRENT => Some(Self::CurrentProject),
            project => Some(Self::Project(project.to_string())),
        }
    }

    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        Ok(config
            .get("billing", "quota_project")?
            .and_then(|value| Self::parse(&value)))
    }

    /// Header value, given the resource project of the invocation.
    pub fn header_value(&self, current_project: Option<&str>) -> Option<String> {
        match self {
            Self::Legacy => None,
            Self::CurrentProject => current_project.map(str::to_string),
            Self::Project(project) => Some(project.clone()),
        }
    }
}

/// Build the `User-Agent` for one invocation.
pub fn user_agent(command_path: &str, invocation_id: &uuid::Uuid) -> String {
    format!(
        "gcmd/{} command/{} invocation-id/{} environment/{}",
        crate::VERSION,
        command_path,
        invocation_id.simple(),
        std::env::consts::OS
    )
}

/// Adds `Authorization`, `User-Agent` and `X-Goog-User-Project`.
pub struct RequestHeaders {
    inner: Arc<dyn HttpSend>,
    tokens: Option<Arc<dyn TokenSource>>,
    user_agent: String,
    quota_project: Option<String>,
}

impl RequestHeaders {
    pub fn new(
        inner: Arc<dyn HttpSend>,
        tokens: Option<Arc<dyn TokenSource>>,
        user_agent: impl Into<String>,
        quota_project: Option<String>,
    ) -> Self {
        Self {
            inner,
            tokens,
            user_agent: user_agent.into(),
            quota_project,
        }
    }

    fn decorate(&self, mut request: HttpRequest, token: Option<&str>) -> HttpRequest {
        if let Some(token) = token {
            request.headers.retain(|(n, _)| !n.eq_ignore_ascii_case("authorization"));
            request
                .headers
                .push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        if !request.has_header("user-agent") {
            request
                .headers
                .push(("User-Agent".to_string(), self.user_agent.clone()));
        }
        if let Some(project) = &self.quota_project {
            if !request.has_header(QUOTA_PROJECT_HEADER) {
                request
                    .headers
                    .push((QUOTA_PROJECT_HEADER.to_string(), project.clone()));
            }
        }
        request
    }
}

#[async_trait]
impl HttpSend for RequestHeaders {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let Some(tokens) = &self.tokens else {
            return self.inner.send(self.decorate(request, None)).await;
        };

        let token = tokens.token().await?;
        match self.inner.send(self.decorate(request.clone(), Some(&token))).await {
            Err(Error::Unauthenticated(message)) => {
                tracing::debug!("Request unauthenticated ({}), refreshing token once", message);
                let token = tokens.refresh().await?;
                self.inner.send(self.decorate(request, Some(&token))).await
            }
            other => other,
        }
    }
}

/// The stages below `RequestHeaders`, shared by every client of one invocation.
pub fn default_transport(timeout: Duration, log_http: bool) -> Result<Arc<dyn HttpSend>> {
    let sender: Arc<dyn HttpSend> = Arc::new(ReqwestSender::new(timeout, log_http)?);
    let classifier: Arc<dyn HttpSend> = Arc::new(ErrorClassifier::new(sender));
    Ok(Arc::new(Retry::new(classifier)))
}
