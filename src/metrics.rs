//! Prometheus metrics for the research engine.
//!
//! This module provides metrics collection for monitoring:
//! - HTTP API requests (count, duration, status)
//! - Research requests by outcome
//! - Provider calls (count, latency, health)
//! - Circuit breaker state and trips
//! - Rate limiter and budget rejections
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rfp_research::metrics::{MetricsService, MetricsConfig};
//!
//! let metrics = MetricsService::new(MetricsConfig::default());
//! metrics.provider_call("search", "ok", 0.42);
//! ```
//!
//! ## Exposed Metrics
//!
//! All metrics are prefixed with `rfp_research_`:
//!
//! - `rfp_research_http_requests_total` - Total HTTP requests (counter)
//! - `rfp_research_http_request_duration_seconds` - Request latency (histogram)
//! - `rfp_research_http_requests_in_flight` - Current in-flight requests (gauge)
//! - `rfp_research_research_requests_total` - Research requests by outcome (counter)
//! - `rfp_research_provider_calls_total` - Provider calls by outcome (counter)
//! - `rfp_research_provider_call_duration_seconds` - Provider call latency (histogram)
//! - `rfp_research_provider_health_score` - Provider health score (gauge)
//! - `rfp_research_circuit_breaker_state` - Circuit breaker state (gauge)
//! - `rfp_research_circuit_breaker_trips_total` - Circuit breaker trips (counter)
//! - `rfp_research_rate_limit_rejected_total` - Rate limited requests (counter)
//! - `rfp_research_budget_rejected_total` - Budget rejections (counter)

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Default metric name prefix.
pub const DEFAULT_PREFIX: &str = "rfp_research";

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Prefix for all metric names (default: "rfp_research")
    pub prefix: String,
    /// Enable per-provider metrics (calls, latency, health)
    pub enable_provider_metrics: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            enable_provider_metrics: true,
        }
    }
}

/// Metric names with configurable prefix.
#[derive(Debug, Clone)]
pub struct MetricNames {
    pub http_requests_total: String,
    pub http_request_duration: String,
    pub http_requests_in_flight: String,
    pub research_requests: String,
    pub provider_calls: String,
    pub provider_call_duration: String,
    pub provider_health_score: String,
    pub circuit_breaker_state: String,
    pub circuit_breaker_trips: String,
    pub rate_limit_rejected: String,
    pub budget_rejected: String,
}

impl MetricNames {
    /// Create metric names with the given prefix.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            http_requests_total: format!("{}_http_requests_total", prefix),
            http_request_duration: format!("{}_http_request_duration_seconds", prefix),
            http_requests_in_flight: format!("{}_http_requests_in_flight", prefix),
            research_requests: format!("{}_research_requests_total", prefix),
            provider_calls: format!("{}_provider_calls_total", prefix),
            provider_call_duration: format!("{}_provider_call_duration_seconds", prefix),
            provider_health_score: format!("{}_provider_health_score", prefix),
            circuit_breaker_state: format!("{}_circuit_breaker_state", prefix),
            circuit_breaker_trips: format!("{}_circuit_breaker_trips_total", prefix),
            rate_limit_rejected: format!("{}_rate_limit_rejected_total", prefix),
            budget_rejected: format!("{}_budget_rejected_total", prefix),
        }
    }
}

impl Default for MetricNames {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }
}

/// Prometheus metrics service.
///
/// Provides methods for recording engine metrics and exposes a handle
/// for rendering the Prometheus exposition format.
pub struct MetricsService {
    config: MetricsConfig,
    names: MetricNames,
    handle: Option<PrometheusHandle>,
    /// In-flight request counter (for gauge tracking)
    in_flight: Arc<AtomicU64>,
}

impl std::fmt::Debug for MetricsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsService")
            .field("config", &self.config)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl MetricsService {
    /// Create a new metrics service with the given configuration.
    ///
    /// This installs a global Prometheus recorder. Only one can be installed
    /// per process, so subsequent calls get a service without a handle.
    pub fn new(config: MetricsConfig) -> Self {
        let names = MetricNames::with_prefix(&config.prefix);
        let handle = PrometheusBuilder::new().install_recorder().ok();

        let service = Self {
            config,
            names,
            handle,
            in_flight: Arc::new(AtomicU64::new(0)),
        };
        service.register_descriptions();
        service
    }

    /// Create a metrics service with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(MetricsConfig::default())
    }

    /// Create a disabled metrics service (for testing).
    pub fn disabled() -> Self {
        Self {
            config: MetricsConfig::default(),
            names: MetricNames::default(),
            handle: None,
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Check if metrics recording is enabled.
    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }

    /// Get the Prometheus handle for rendering metrics.
    pub fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render metrics in Prometheus exposition format.
    pub fn render(&self) -> String {
        self.handle.as_ref().map(|h| h.render()).unwrap_or_default()
    }

    /// Get metric names.
    pub fn names(&self) -> &MetricNames {
        &self.names
    }

    fn register_descriptions(&self) {
        describe_counter!(
            self.names.http_requests_total.clone(),
            "Total number of HTTP requests"
        );
        describe_histogram!(
            self.names.http_request_duration.clone(),
            "HTTP request duration in seconds"
        );
        describe_gauge!(
            self.names.http_requests_in_flight.clone(),
            "Number of HTTP requests currently being processed"
        );
        describe_counter!(
            self.names.research_requests.clone(),
            "Research requests by outcome (complete, partial, failed)"
        );
        describe_gauge!(
            self.names.circuit_breaker_state.clone(),
            "Circuit breaker state (0=closed, 1=open, 2=half-open)"
        );
        describe_counter!(
            self.names.circuit_breaker_trips.clone(),
            "Total number of circuit breaker trips"
        );
        describe_counter!(
            self.names.rate_limit_rejected.clone(),
            "Total number of rate-limited requests"
        );
        describe_counter!(
            self.names.budget_rejected.clone(),
            "Total number of requests rejected by budget caps"
        );

        if self.config.enable_provider_metrics {
            describe_counter!(
                self.names.provider_calls.clone(),
                "Provider calls by outcome (ok, error, circuit_open)"
            );
            describe_histogram!(
                self.names.provider_call_duration.clone(),
                "Provider call duration in seconds"
            );
            describe_gauge!(
                self.names.provider_health_score.clone(),
                "Rolling provider health score (0-100)"
            );
        }
    }

    // ========== HTTP Metrics ==========

    /// Record an HTTP request.
    pub fn http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = [
            ("method", method.to_string()),
            ("path", path.to_string()),
            ("status", status.to_string()),
        ];

        counter!(self.names.http_requests_total.clone(), &labels).increment(1);
        histogram!(self.names.http_request_duration.clone(), &labels).record(duration_secs);
    }

    /// Start tracking an in-flight request. Returns a guard that decrements on drop.
    pub fn start_request(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        gauge!(self.names.http_requests_in_flight.clone())
            .set(self.in_flight.load(Ordering::SeqCst) as f64);

        InFlightGuard {
            counter: self.in_flight.clone(),
            metric_name: self.names.http_requests_in_flight.clone(),
        }
    }

    // ========== Research Metrics ==========

    /// Record a finished research request (`complete`, `partial` or an error code).
    pub fn research_request(&self, outcome: &str) {
        let labels = [("outcome", outcome.to_string())];
        counter!(self.names.research_requests.clone(), &labels).increment(1);
    }

    // ========== Provider Metrics ==========

    /// Record one provider call.
    pub fn provider_call(&self, provider: &str, outcome: &str, duration_secs: f64) {
        if !self.config.enable_provider_metrics {
            return;
        }
        let labels = [
            ("provider", provider.to_string()),
            ("outcome", outcome.to_string()),
        ];
        counter!(self.names.provider_calls.clone(), &labels).increment(1);

        let provider_label = [("provider", provider.to_string())];
        histogram!(self.names.provider_call_duration.clone(), &provider_label)
            .record(duration_secs);
    }

    /// Publish a provider's current health score.
    pub fn provider_health(&self, provider: &str, score: f64) {
        if self.config.enable_provider_metrics {
            let labels = [("provider", provider.to_string())];
            gauge!(self.names.provider_health_score.clone(), &labels).set(score);
        }
    }

    // ========== Circuit Breaker Metrics ==========

    /// Record circuit breaker state: 0=closed, 1=open, 2=half-open.
    pub fn circuit_breaker_state(&self, provider: &str, state: u8) {
        let labels = [("provider", provider.to_string())];
        gauge!(self.names.circuit_breaker_state.clone(), &labels).set(state as f64);
    }

    /// Record a circuit breaker trip (transition to open).
    pub fn circuit_breaker_trip(&self, provider: &str) {
        let labels = [("provider", provider.to_string())];
        counter!(self.names.circuit_breaker_trips.clone(), &labels).increment(1);
    }

    // ========== Admission Metrics ==========

    /// Record a rate-limited (rejected) request.
    pub fn rate_limit_rejected(&self, route: &str) {
        let labels = [("route", route.to_string())];
        counter!(self.names.rate_limit_rejected.clone(), &labels).increment(1);
    }

    /// Record a budget rejection for `counter` (`tokens`, `ocr_pages`, `queries`, `daily`).
    pub fn budget_rejected(&self, counter_name: &str) {
        let labels = [("counter", counter_name.to_string())];
        counter!(self.names.budget_rejected.clone(), &labels).increment(1);
    }
}

/// Guard for tracking in-flight requests.
///
/// Automatically decrements the in-flight counter when dropped.
pub struct InFlightGuard {
    counter: Arc<AtomicU64>,
    metric_name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        gauge!(self.metric_name.clone()).set(self.counter.load(Ordering::SeqCst) as f64);
    }
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a new timer starting now.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Get elapsed time in whole milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

// ========== Axum Middleware Integration ==========

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
};

/// Axum middleware for automatic HTTP metrics collection.
pub async fn metrics_middleware(
    matched_path: Option<MatchedPath>,
    req: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let start = Instant::now();
    let method = req.method().clone();
    let path = matched_path
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status.to_string()),
    ];

    counter!("rfp_research_http_requests_total", &labels).increment(1);
    histogram!("rfp_research_http_request_duration_seconds", &labels).record(duration);

    response
}
