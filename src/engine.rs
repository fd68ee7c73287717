//! The research service object.
//!
//! `ResearchEngine` owns every shared component (breakers, health router,
//! rate limiter, budget tracker, orchestrator, metrics) and implements the
//! research-request handler on top of them. Nothing here is global; tests
//! build as many engines as they like.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::budget::{forecast_monthly, AnalysisUsage, BudgetTracker, BurnRateForecast, UsageDelta};
use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitSnapshot};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::health::{ProviderHealthRouter, ProviderHealthScore};
use crate::metrics::MetricsService;
use crate::orchestrator::{ResearchOrchestrator, ResearchResult};
use crate::providers::{
    scrape, search, ProviderSettings, ResearchProvider, ResearchRequest, ScrapeProvider,
    SearchApiProvider,
};
use crate::rate_limit::{bucket_key, RateLimitDecision, RateLimitService};
use crate::transport::{Fetch, ReqwestFetch, ResilientTransport};
use crate::trust::TrustResolver;

/// Route name used for research rate limiting.
pub const RESEARCH_ROUTE: &str = "/research";

/// Principal used when the caller presents no key.
pub const ANONYMOUS: &str = "anonymous";

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Rate-limit principal (API key or [`ANONYMOUS`]).
    pub principal: String,
    /// Key the daily analysis quota is counted against.
    pub user_key: String,
}

impl Caller {
    /// Build a caller from optional header values.
    ///
    /// Blank values are ignored; the user key defaults to the principal.
    pub fn from_parts(api_key: Option<&str>, user_key: Option<&str>) -> Self {
        let non_blank = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let principal = non_blank(api_key).unwrap_or_else(|| ANONYMOUS.to_string());
        let user_key = non_blank(user_key).unwrap_or_else(|| principal.clone());
        Self {
            principal,
            user_key,
        }
    }
}

/// A research result plus the admission decision that let it through.
#[derive(Debug, Clone)]
pub struct HandledResearch {
    /// Research outcome.
    pub result: ResearchResult,
    /// Rate limiter state after admission.
    pub rate_limit: RateLimitDecision,
}

/// Usage of one analysis with what is left under each cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    /// Analysis id.
    pub analysis_id: String,
    /// Running totals.
    pub usage: AnalysisUsage,
    /// Headroom under each cap.
    pub remaining: AnalysisUsage,
}

/// Research service with all shared state.
pub struct ResearchEngine {
    config: EngineConfig,
    breakers: Arc<CircuitBreakerRegistry>,
    health: Arc<ProviderHealthRouter>,
    rate_limiter: Arc<RateLimitService>,
    budget: Arc<BudgetTracker>,
    orchestrator: ResearchOrchestrator,
    metrics: Arc<MetricsService>,
}

impl std::fmt::Debug for ResearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchEngine")
            .field("providers", &self.orchestrator.provider_names())
            .field("rate_limit_enabled", &self.rate_limiter.is_enabled())
            .finish_non_exhaustive()
    }
}

impl ResearchEngine {
    /// Create an engine over an explicit provider set.
    pub fn new(
        config: EngineConfig,
        providers: Vec<Arc<dyn ResearchProvider>>,
        metrics: Arc<MetricsService>,
    ) -> Result<Self> {
        if providers.is_empty() {
            return Err(Error::Config("at least one provider is required".to_string()));
        }

        let rate_limiter = if config.rate_limit.enabled {
            RateLimitService::new(config.rate_limit.clone())?
        } else {
            RateLimitService::disabled()
        };
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        let health = Arc::new(ProviderHealthRouter::new(config.health.clone()));
        let budget = Arc::new(BudgetTracker::new(config.budget.clone()));
        let orchestrator = ResearchOrchestrator::new(
            providers,
            breakers.clone(),
            health.clone(),
            TrustResolver::new(config.freshness.clone()),
            metrics.clone(),
        );

        Ok(Self {
            config,
            breakers,
            health,
            rate_limiter: Arc::new(rate_limiter),
            budget,
            orchestrator,
            metrics,
        })
    }

    /// Create an engine with the HTTP providers enabled in `config`.
    pub fn from_config(config: EngineConfig, metrics: Arc<MetricsService>) -> Result<Self> {
        config.validate()?;
        let fetcher: Arc<dyn Fetch> = Arc::new(ReqwestFetch::new(&config.api.user_agent)?);
        let providers = build_providers(&config, fetcher);
        Self::new(config, providers, metrics)
    }

    /// Handle one research request end to end.
    ///
    /// Checks run in order: request shape, rate limit, daily quota, query
    /// budget. Only then are providers called.
    pub async fn research(
        &self,
        caller: &Caller,
        request: &ResearchRequest,
        cancel: &CancellationToken,
    ) -> Result<HandledResearch> {
        self.research_on(caller, request, cancel, Utc::now()).await
    }

    /// [`research`](Self::research) with an explicit clock.
    pub async fn research_on(
        &self,
        caller: &Caller,
        request: &ResearchRequest,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> Result<HandledResearch> {
        request.validate()?;

        let key = bucket_key(&caller.principal, RESEARCH_ROUTE);
        let rate_limit = self.rate_limiter.check(&key).inspect_err(|_| {
            self.metrics.rate_limit_rejected(RESEARCH_ROUTE);
            self.metrics.research_request("rate_limited");
        })?;

        self.budget
            .check_daily_quota(&caller.user_key, &request.analysis_id, now)
            .inspect_err(|_| {
                self.metrics.budget_rejected("daily_analyses");
                self.metrics.research_request("budget_exceeded");
            })?;

        let queries = self.orchestrator.queries_per_request();
        self.register_usage(&request.analysis_id, UsageDelta::queries(queries))
            .inspect_err(|_| self.metrics.research_request("budget_exceeded"))?;

        debug!(
            analysis_id = %request.analysis_id,
            principal = %caller.principal,
            queries,
            "research admitted"
        );

        let result = self
            .orchestrator
            .research_on(request, cancel, now.date_naive())
            .await?;

        Ok(HandledResearch { result, rate_limit })
    }

    /// Register token or OCR usage for an analysis.
    pub fn record_usage(&self, analysis_id: &str, delta: UsageDelta) -> Result<UsageReport> {
        let usage = self.register_usage(analysis_id, delta)?;
        info!(
            analysis_id,
            tokens = usage.tokens,
            ocr_pages = usage.ocr_pages,
            queries = usage.queries,
            "usage recorded"
        );
        Ok(self.usage_report(analysis_id))
    }

    fn register_usage(&self, analysis_id: &str, delta: UsageDelta) -> Result<AnalysisUsage> {
        self.budget.register(analysis_id, delta).inspect_err(|err| {
            if let Error::BudgetExceeded { counter, .. } = err {
                self.metrics.budget_rejected(counter);
            }
        })
    }

    /// Current usage and headroom for an analysis.
    pub fn usage_report(&self, analysis_id: &str) -> UsageReport {
        UsageReport {
            analysis_id: analysis_id.to_string(),
            usage: self.budget.usage(analysis_id),
            remaining: self.budget.remaining(analysis_id),
        }
    }

    /// Month-end projection of usage across all analyses.
    pub fn monthly_forecast(&self, today: NaiveDate) -> BurnRateForecast {
        forecast_monthly(self.budget.total_usage(), today)
    }

    /// Health scores for every configured provider, best first.
    pub fn provider_health(&self) -> Vec<ProviderHealthScore> {
        self.health
            .rank(&self.orchestrator.provider_names())
            .iter()
            .map(|name| self.health.score(name))
            .collect()
    }

    /// Breaker state for every configured provider.
    pub fn circuit_snapshots(&self) -> Vec<CircuitSnapshot> {
        self.orchestrator
            .provider_names()
            .iter()
            .map(|name| self.breakers.breaker(name).snapshot())
            .collect()
    }

    /// Names of the configured providers.
    pub fn provider_names(&self) -> Vec<String> {
        self.orchestrator.provider_names()
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Circuit breakers, keyed by provider.
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Provider health router.
    pub fn health(&self) -> &Arc<ProviderHealthRouter> {
        &self.health
    }

    /// Caller rate limiter.
    pub fn rate_limiter(&self) -> &Arc<RateLimitService> {
        &self.rate_limiter
    }

    /// Usage budget tracker.
    pub fn budget(&self) -> &Arc<BudgetTracker> {
        &self.budget
    }

    /// Metrics service.
    pub fn metrics(&self) -> &Arc<MetricsService> {
        &self.metrics
    }
}

/// Build the HTTP providers enabled in `config`, search first.
pub fn build_providers(
    config: &EngineConfig,
    fetcher: Arc<dyn Fetch>,
) -> Vec<Arc<dyn ResearchProvider>> {
    let transport = ResilientTransport::new(fetcher, config.transport.clone());
    let mut providers: Vec<Arc<dyn ResearchProvider>> = Vec::new();

    let search_settings = &config.providers.search;
    if search_settings.enabled {
        warn_missing_key(search::DEFAULT_NAME, search_settings);
        providers.push(Arc::new(SearchApiProvider::new(
            search::DEFAULT_NAME,
            search_settings.clone(),
            transport.clone(),
        )));
    }

    let scrape_settings = &config.providers.scrape;
    if scrape_settings.enabled {
        warn_missing_key(scrape::DEFAULT_NAME, scrape_settings);
        providers.push(Arc::new(ScrapeProvider::new(
            scrape::DEFAULT_NAME,
            scrape_settings.clone(),
            transport,
        )));
    }

    providers
}

fn warn_missing_key(name: &str, settings: &ProviderSettings) {
    if settings.api_key().is_none() {
        warn!(provider = name, "no API key configured, provider will return placeholders");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{Claim, ClaimCategory, SourceTier};
    use crate::providers::{Country, ProviderQuery};
    use crate::transport::{FetchRequest, FetchResponse};
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct StaticProvider {
        name: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl ResearchProvider for StaticProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn query(&self, query: &ProviderQuery) -> Result<Vec<Claim>> {
            if self.fail {
                return Err(Error::Network("connection refused".to_string()));
            }
            Ok(vec![Claim::new(
                "employee_count",
                "1200",
                "https://www.argaam.com/acme",
                SourceTier::ESTABLISHED,
                NaiveDate::from_ymd_opt(2026, 9, 1),
                if query.topic == crate::providers::ResearchTopic::CompanySize {
                    ClaimCategory::Financial
                } else {
                    ClaimCategory::News
                },
            )])
        }
    }

    /// Fetch that must never be reached.
    struct UnreachableFetch;

    #[async_trait]
    impl Fetch for UnreachableFetch {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
            Err(Error::Network(format!("unexpected fetch to {}", request.url)))
        }
    }

    fn engine_with(config: EngineConfig, fail: bool) -> ResearchEngine {
        ResearchEngine::new(
            config,
            vec![Arc::new(StaticProvider { name: "static", fail })],
            Arc::new(MetricsService::disabled()),
        )
        .unwrap()
    }

    fn engine() -> ResearchEngine {
        engine_with(EngineConfig::default(), false)
    }

    fn request(analysis_id: &str) -> ResearchRequest {
        ResearchRequest {
            analysis_id: analysis_id.to_string(),
            client_name: "Acme Trading".to_string(),
            client_name_arabic: Some("أكمي للتجارة".to_string()),
            country: Country::SaudiArabia,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
    }

    fn caller() -> Caller {
        Caller::from_parts(Some("key-1"), Some("user-1"))
    }

    // ========== Caller ==========

    #[test]
    fn test_caller_defaults() {
        let anonymous = Caller::from_parts(None, Some("  "));
        assert_eq!(anonymous.principal, ANONYMOUS);
        assert_eq!(anonymous.user_key, ANONYMOUS);

        let keyed = Caller::from_parts(Some("key-1"), None);
        assert_eq!(keyed.user_key, "key-1");
    }

    // ========== Research handler ==========

    #[tokio::test]
    async fn test_research_charges_queries_to_the_analysis() {
        let engine = engine();

        let handled = engine
            .research_on(&caller(), &request("a-1"), &CancellationToken::new(), now())
            .await
            .unwrap();

        assert_eq!(handled.result.analysis_id, "a-1");
        assert!(!handled.result.partial_result);
        assert_eq!(engine.usage_report("a-1").usage.queries, 6);
        assert_eq!(handled.rate_limit.limit, 20);
        assert_eq!(handled.rate_limit.remaining, 19);
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_admission() {
        let engine = engine();
        let mut bad = request("a-1");
        bad.client_name = String::new();

        let result = engine
            .research_on(&caller(), &bad, &CancellationToken::new(), now())
            .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(engine.usage_report("a-1").usage, AnalysisUsage::default());
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_after_capacity() {
        let mut config = EngineConfig::default();
        config.rate_limit.capacity = 2;
        config.rate_limit.refill_per_second = 0.01;
        let engine = engine_with(config, false);
        let cancel = CancellationToken::new();

        for id in ["a-1", "a-2"] {
            engine.research_on(&caller(), &request(id), &cancel, now()).await.unwrap();
        }
        let third = engine.research_on(&caller(), &request("a-3"), &cancel, now()).await;

        match third {
            Err(Error::RateLimited { key, retry_after_secs }) => {
                assert_eq!(key, "key-1:/research");
                assert!(retry_after_secs >= 1);
            }
            other => panic!("expected rate limit, got {:?}", other.map(|h| h.result.request_id)),
        }
        assert_eq!(engine.usage_report("a-3").usage.queries, 0, "nothing charged");

        let other_caller = Caller::from_parts(Some("key-2"), None);
        assert!(engine
            .research_on(&other_caller, &request("a-4"), &cancel, now())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_daily_quota_counts_distinct_analyses() {
        let mut config = EngineConfig::default();
        config.budget.daily_analyses_per_user = 1;
        let engine = engine_with(config, false);
        let cancel = CancellationToken::new();

        engine.research_on(&caller(), &request("a-1"), &cancel, now()).await.unwrap();
        engine.research_on(&caller(), &request("a-1"), &cancel, now()).await.unwrap();
        let second = engine.research_on(&caller(), &request("a-2"), &cancel, now()).await;

        assert!(matches!(second, Err(Error::DailyQuotaExceeded { cap: 1, .. })));

        let tomorrow = now() + chrono::Duration::days(1);
        assert!(engine
            .research_on(&caller(), &request("a-2"), &cancel, tomorrow)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_query_budget_blocks_repeat_research() {
        let mut config = EngineConfig::default();
        config.budget.queries_per_analysis = 10;
        let engine = engine_with(config, false);
        let cancel = CancellationToken::new();

        engine.research_on(&caller(), &request("a-1"), &cancel, now()).await.unwrap();
        let again = engine.research_on(&caller(), &request("a-1"), &cancel, now()).await;

        match again {
            Err(Error::BudgetExceeded { counter, observed, cap, .. }) => {
                assert_eq!(counter, "queries");
                assert_eq!(observed, 12);
                assert_eq!(cap, 10);
            }
            other => panic!("expected budget error, got {:?}", other.is_ok()),
        }
    }

    #[tokio::test]
    async fn test_all_providers_failing_is_upstream_unavailable() {
        let engine = engine_with(EngineConfig::default(), true);

        let result = engine
            .research_on(&caller(), &request("a-1"), &CancellationToken::new(), now())
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
        assert!(err.is_retryable());
        assert!(!engine.provider_health()[0].health.is_nan());
    }

    // ========== Usage ==========

    #[test]
    fn test_record_usage_reports_remaining() {
        let engine = engine();

        let report = engine
            .record_usage(
                "a-1",
                UsageDelta {
                    tokens: Some(1_000),
                    ocr_pages: Some(10),
                    queries: None,
                },
            )
            .unwrap();

        assert_eq!(report.usage.tokens, 1_000);
        assert_eq!(report.remaining.tokens, 199_000);
        assert_eq!(report.remaining.ocr_pages, 290);
    }

    #[test]
    fn test_monthly_forecast_covers_all_analyses() {
        let engine = engine();
        engine.record_usage("a-1", UsageDelta { tokens: Some(100), ..Default::default() }).unwrap();
        engine.record_usage("a-2", UsageDelta { tokens: Some(200), ..Default::default() }).unwrap();

        let forecast = engine.monthly_forecast(NaiveDate::from_ymd_opt(2026, 4, 15).unwrap());

        assert_eq!(forecast.multiplier, 2.0);
        assert_eq!(forecast.projected_tokens, 600.0);
    }

    // ========== Construction ==========

    #[test]
    fn test_new_requires_a_provider() {
        let result = ResearchEngine::new(
            EngineConfig::default(),
            Vec::new(),
            Arc::new(MetricsService::disabled()),
        );

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_build_providers_skips_disabled() {
        let mut config = EngineConfig::default();
        config.providers.scrape.enabled = false;

        let providers = build_providers(&config, Arc::new(UnreachableFetch));

        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name(), search::DEFAULT_NAME);
    }

    #[tokio::test]
    async fn test_keyless_http_providers_return_placeholders() {
        let config = EngineConfig::default();
        let providers = build_providers(&config, Arc::new(UnreachableFetch));
        let engine =
            ResearchEngine::new(config, providers, Arc::new(MetricsService::disabled())).unwrap();

        let handled = engine
            .research_on(&caller(), &request("a-1"), &CancellationToken::new(), now())
            .await
            .unwrap();

        assert!(handled.result.resolved_claims.iter().all(|r| r.claim.is_unknown()));
        assert!(handled.result.warnings.is_empty());
        assert_eq!(engine.circuit_snapshots().len(), 2);
    }
}
