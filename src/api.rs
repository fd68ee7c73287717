//! HTTP API for the research engine.
//!
//! This module provides:
//! - The research endpoint
//! - Usage registration and lookup per analysis
//! - Provider health and circuit breaker views
//! - Health check and Prometheus metrics

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::budget::{BurnRateForecast, UsageDelta};
use crate::circuit_breaker::CircuitSnapshot;
use crate::config::ApiConfig;
use crate::engine::{Caller, ResearchEngine, UsageReport};
use crate::error::{Error, Result};
use crate::health::ProviderHealthScore;
use crate::metrics::metrics_middleware;
use crate::orchestrator::ResearchResult;
use crate::providers::ResearchRequest;
use crate::rate_limit::headers::{RETRY_AFTER, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING};

/// Header carrying the caller's API key (rate-limit principal).
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying the user key the daily quota is charged to.
pub const USER_KEY_HEADER: &str = "x-user-key";

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,

    /// Service version.
    pub version: String,

    /// Configured provider names.
    pub providers: Vec<String>,

    /// Uptime in seconds.
    pub uptime: u64,
}

/// Usage lookup response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    /// Usage of the analysis.
    #[serde(flatten)]
    pub report: UsageReport,

    /// Month-end projection across every analysis.
    pub monthly_forecast: BurnRateForecast,
}

/// Shared application state for API handlers.
#[derive(Clone)]
pub struct AppState {
    /// Research engine.
    pub engine: Arc<ResearchEngine>,
    /// Start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Create state around an engine.
    pub fn new(engine: Arc<ResearchEngine>) -> Self {
        Self {
            engine,
            start_time: Instant::now(),
        }
    }
}

/// API error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Whether retrying later may succeed.
    pub retryable: bool,
}

/// An engine error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiFailure {
    error: Error,
    rate_limit: Option<u32>,
}

impl From<Error> for ApiFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            rate_limit: None,
        }
    }
}

/// HTTP status for an engine error.
pub fn http_status(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::BudgetExceeded { .. } | Error::DailyQuotaExceeded { .. } => StatusCode::CONFLICT,
        Error::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = http_status(&self.error);
        let body = Json(ApiError {
            error: self.error.to_string(),
            code: self.error.code().to_string(),
            retryable: self.error.is_retryable(),
        });
        let mut response = (status, body).into_response();

        if let Error::RateLimited {
            retry_after_secs, ..
        } = &self.error
        {
            let headers = response.headers_mut();
            headers.insert(RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            if let Some(limit) = self.rate_limit {
                headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
                headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
            }
        }
        response
    }
}

/// API server.
pub struct ApiServer {
    /// API configuration.
    config: ApiConfig,
    /// Shared application state.
    state: AppState,
}

impl ApiServer {
    /// Create a new API server over an engine.
    pub fn new(config: ApiConfig, engine: Arc<ResearchEngine>) -> Self {
        Self {
            config,
            state: AppState::new(engine),
        }
    }

    /// Create a new API server with custom state.
    pub fn with_state(config: ApiConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/research", post(research_handler))
            .route(
                "/usage/{analysis_id}",
                get(get_usage_handler).post(record_usage_handler),
            )
            .route("/providers/health", get(provider_health_handler))
            .route("/providers/circuits", get(circuits_handler))
            .with_state(self.state.clone())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(TraceLayer::new_for_http());

        if let Some(cors_layer) = build_cors_layer(&self.config) {
            router = router.layer(cors_layer);
        }

        router
    }

    /// Start the API server.
    pub async fn run(&self, listen_addr: &str) -> Result<()> {
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(listen_addr)
            .await
            .map_err(|e| Error::Api(e.to_string()))?;

        tracing::info!("API server listening on {}", listen_addr);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| Error::Api(e.to_string()))?;

        Ok(())
    }
}

fn build_cors_layer(config: &ApiConfig) -> Option<CorsLayer> {
    if !config.cors_enabled {
        return None;
    }

    let mut cors = CorsLayer::new();
    if config.cors_origins.iter().any(|origin| origin == "*") {
        cors = cors.allow_origin(Any);
    } else if !config.cors_origins.is_empty() {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse::<HeaderValue>().ok())
            .collect();
        if !origins.is_empty() {
            cors = cors.allow_origin(AllowOrigin::list(origins));
        }
    }

    cors = cors.allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    cors = cors.allow_headers([
        header::CONTENT_TYPE,
        HeaderName::from_static(API_KEY_HEADER),
        HeaderName::from_static(USER_KEY_HEADER),
    ]);

    Some(cors)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn json_body<T>(
    payload: std::result::Result<Json<T>, JsonRejection>,
) -> std::result::Result<T, ApiFailure> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| Error::Validation(rejection.body_text()).into())
}

/// Health check handler.
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: state.engine.provider_names(),
        uptime: state.start_time.elapsed().as_secs(),
    })
}

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus exposition format for scraping.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.engine.metrics().render(),
    )
}

/// Research handler.
///
/// Dropping the request (client disconnect) cancels outstanding provider calls.
async fn research_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<ResearchRequest>, JsonRejection>,
) -> std::result::Result<Response, ApiFailure> {
    let request = json_body(payload)?;
    let caller = Caller::from_parts(
        header_str(&headers, API_KEY_HEADER),
        header_str(&headers, USER_KEY_HEADER),
    );

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let handled = state
        .engine
        .research(&caller, &request, &cancel)
        .await
        .map_err(|error| ApiFailure {
            error,
            rate_limit: state
                .engine
                .rate_limiter()
                .is_enabled()
                .then(|| state.engine.rate_limiter().capacity()),
        })?;

    let mut response = Json::<ResearchResult>(handled.result).into_response();
    if state.engine.rate_limiter().is_enabled() {
        let headers = response.headers_mut();
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(handled.rate_limit.limit));
        headers.insert(
            X_RATELIMIT_REMAINING,
            HeaderValue::from(handled.rate_limit.remaining),
        );
    }
    Ok(response)
}

/// Register usage for an analysis.
async fn record_usage_handler(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
    payload: std::result::Result<Json<UsageDelta>, JsonRejection>,
) -> std::result::Result<Json<UsageReport>, ApiFailure> {
    let delta = json_body(payload)?;
    Ok(Json(state.engine.record_usage(&analysis_id, delta)?))
}

/// Usage and headroom for an analysis.
async fn get_usage_handler(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
) -> Json<UsageResponse> {
    Json(UsageResponse {
        report: state.engine.usage_report(&analysis_id),
        monthly_forecast: state.engine.monthly_forecast(Utc::now().date_naive()),
    })
}

/// Provider health scores, best first.
async fn provider_health_handler(State(state): State<AppState>) -> Json<Vec<ProviderHealthScore>> {
    Json(state.engine.provider_health())
}

/// Circuit breaker snapshots.
async fn circuits_handler(State(state): State<AppState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.engine.circuit_snapshots())
}
