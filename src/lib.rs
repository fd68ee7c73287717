//! RFP Research Library
//!
//! This crate gathers public evidence about a prospective RFP client from
//! several web research providers, resolves conflicting claims by source
//! trust and freshness, and keeps outbound calls inside rate, budget and
//! circuit-breaker limits.

pub mod api;
pub mod budget;
pub mod circuit_breaker;
pub mod claims;
pub mod config;
pub mod engine;
pub mod error;
pub mod freshness;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod providers;
pub mod rate_limit;
pub mod signals;
pub mod transport;
pub mod trust;

pub use api::{ApiError, ApiServer, AppState, HealthResponse};
pub use budget::{
    forecast_monthly, AnalysisUsage, BudgetConfig, BudgetTracker, BurnRateForecast, UsageDelta,
};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitMetrics,
    CircuitOpenError, CircuitSnapshot, CircuitState,
};
pub use claims::{
    parse_source_date, Claim, ClaimCategory, Evidence, ResolvedClaim, SourceTier, UNKNOWN_VALUE,
};
pub use config::{ApiConfig, EngineConfig, ProvidersConfig};
pub use engine::{Caller, HandledResearch, ResearchEngine, UsageReport};
pub use error::{Error, Result};
pub use freshness::{claim_confidence, tier_base_confidence, FreshnessConfig};
pub use health::{HealthConfig, ProviderHealthRouter, ProviderHealthSample, ProviderHealthScore};
pub use metrics::{
    metrics_middleware, InFlightGuard, MetricNames, MetricsConfig, MetricsService, Timer,
};
pub use orchestrator::{ResearchOrchestrator, ResearchResult};
pub use providers::{
    build_queries, classify_source, Country, Language, ProviderQuery, ProviderSettings,
    ResearchProvider, ResearchRequest, ResearchTopic, ScrapeProvider, SearchApiProvider,
    SourceClass,
};
pub use rate_limit::{
    bucket_key, headers as rate_limit_headers, RateLimitConfig, RateLimitDecision,
    RateLimitService,
};
pub use signals::{derive_signals, BudgetIndicator, DerivedSignals, EntityType, ScriptCounts};
pub use transport::{
    backoff_delay, parse_retry_after, Fetch, FetchRequest, FetchResponse, HttpMethod,
    ReqwestFetch, ResilientTransport, TransportOptions,
};
pub use trust::{overall_confidence, resolve, Resolution, TrustResolver};
