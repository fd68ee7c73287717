//! Resilient outbound HTTP transport.
//!
//! Every attempt runs under its own timeout, merged with an optional caller
//! cancellation token. Retryable statuses and transient errors are retried
//! with exponential backoff and jitter, honoring `Retry-After` when the
//! upstream sends one.
//!
//! The network itself sits behind the [`Fetch`] trait so providers and tests
//! can swap in their own implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Response bodies quoted in errors are cut to this many characters.
const ERROR_BODY_LIMIT: usize = 200;

/// Retry and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Per-attempt timeout.
    pub timeout_ms: u64,
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub base_delay_ms: u64,
    /// Ceiling for computed backoff and for `Retry-After`.
    pub max_delay_ms: u64,
    /// Uniform jitter added on top of backoff, as a fraction of it.
    pub jitter_ratio: f64,
    /// Statuses that trigger a retry.
    pub retryable_statuses: Vec<u16>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            max_attempts: 3,
            base_delay_ms: 600,
            max_delay_ms: 8_000,
            jitter_ratio: 0.25,
            retryable_statuses: vec![408, 425, 429, 500, 502, 503, 504],
        }
    }
}

impl TransportOptions {
    /// Reject settings that cannot drive a retry loop.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "transport max_attempts must be at least 1".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config(
                "transport timeout_ms must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(Error::Config(format!(
                "transport jitter_ratio must be within [0, 1], got {}",
                self.jitter_ratio
            )));
        }
        Ok(())
    }

    /// Whether a status code should be retried.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }
}

/// HTTP method of a [`FetchRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
}

/// One outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Query string pairs.
    pub query: Vec<(String, String)>,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
}

impl FetchRequest {
    /// GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// POST request with a JSON body.
    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Add a query pair.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A completed response, read fully into memory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchResponse {
    /// HTTP status.
    pub status: u16,
    /// Headers keyed by lowercase name.
    pub headers: HashMap<String, String>,
    /// Body text.
    pub body: String,
}

impl FetchResponse {
    /// Response with a status and body and no headers.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Add a header (name is lowercased).
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into `Error::HttpStatus`.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::HttpStatus {
                status: self.status,
                body: truncate(&self.body),
            })
        }
    }

    /// Deserialize the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Performs a single HTTP exchange.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Send the request and read the whole response.
    ///
    /// Connection-level failures should be `Error::Network`.
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse>;
}

/// [`Fetch`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    /// Build a client with the given user agent.
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("request to {} failed: {}", request.url, e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| {
                Error::Network(format!("reading body from {} failed: {}", request.url, e))
            })?;

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

/// Timeout and retry wrapper around a [`Fetch`].
#[derive(Clone)]
pub struct ResilientTransport {
    fetcher: Arc<dyn Fetch>,
    options: TransportOptions,
}

impl std::fmt::Debug for ResilientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientTransport")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ResilientTransport {
    /// Create a transport over `fetcher` with default options per call.
    pub fn new(fetcher: Arc<dyn Fetch>, options: TransportOptions) -> Self {
        Self { fetcher, options }
    }

    /// Default options.
    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Send with this transport's options.
    pub async fn send<B>(
        &self,
        operation: &str,
        build: B,
        cancel: Option<&CancellationToken>,
    ) -> Result<FetchResponse>
    where
        B: Fn() -> FetchRequest + Send + Sync,
    {
        self.send_with(operation, build, &self.options, cancel).await
    }

    /// Send with explicit options.
    ///
    /// `build` is called once per attempt. Responses with a non-retryable
    /// status are returned as-is; callers decide what a 4xx means.
    pub async fn send_with<B>(
        &self,
        operation: &str,
        build: B,
        options: &TransportOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<FetchResponse>
    where
        B: Fn() -> FetchRequest + Send + Sync,
    {
        let max_attempts = options.max_attempts.max(1);
        let mut last_error: Option<Error> = None;
        let mut last_status: Option<u16> = None;

        for attempt in 1..=max_attempts {
            let retry_hint = match self.attempt(operation, build(), options, cancel).await {
                Ok(response) if options.is_retryable_status(response.status) => {
                    let hint = response
                        .header("retry-after")
                        .and_then(|value| parse_retry_after(value, Utc::now()));
                    last_status = Some(response.status);
                    last_error = Some(Error::HttpStatus {
                        status: response.status,
                        body: truncate(&response.body),
                    });
                    hint
                }
                Ok(response) => return Ok(response),
                Err(err) if is_transient(&err) => {
                    last_status = None;
                    last_error = Some(err);
                    None
                }
                Err(err) => return Err(err),
            };

            if attempt == max_attempts {
                break;
            }

            let max_delay = Duration::from_millis(options.max_delay_ms);
            let delay = match retry_hint {
                Some(hint) => hint.min(max_delay),
                None => backoff_delay(options, attempt, jitter_unit()),
            };
            debug!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last_error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                "retrying after transient failure"
            );
            sleep_or_cancel(delay, cancel).await?;
        }

        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        warn!(operation, attempts = max_attempts, %last_error, "retries exhausted");
        Err(Error::RetriesExhausted {
            operation: operation.to_string(),
            attempts: max_attempts,
            last_error,
            last_status,
        })
    }

    async fn attempt(
        &self,
        operation: &str,
        request: FetchRequest,
        options: &TransportOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<FetchResponse> {
        let timeout = Duration::from_millis(options.timeout_ms);
        let timed = async {
            match tokio::time::timeout(timeout, self.fetcher.fetch(request)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: options.timeout_ms,
                }),
            }
        };

        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Error::Cancelled),
                    result = timed => result,
                }
            }
            None => timed.await,
        }
    }
}

/// Timeouts and network failures are worth another attempt.
fn is_transient(err: &Error) -> bool {
    matches!(err, Error::Timeout { .. } | Error::Network(_))
}

fn jitter_unit() -> f64 {
    rand::thread_rng().gen::<f64>()
}

async fn sleep_or_cancel(delay: Duration, cancel: Option<&CancellationToken>) -> Result<()> {
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

/// Exponential backoff for the retry after `attempt`, plus jitter.
///
/// `unit` is a uniform sample in `[0, 1)` scaling the jitter.
pub fn backoff_delay(options: &TransportOptions, attempt: u32, unit: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32);
    let exponential = options
        .base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(options.max_delay_ms);
    let jitter = exponential as f64 * options.jitter_ratio * unit.clamp(0.0, 1.0);
    Duration::from_millis(exponential) + Duration::from_secs_f64(jitter / 1_000.0)
}

/// Parse a `Retry-After` value: delta seconds or an HTTP-date.
///
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    Some(
        at.with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= ERROR_BODY_LIMIT {
        body.to_string()
    } else {
        let mut cut: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        cut.push_str("...");
        cut
    }
}
