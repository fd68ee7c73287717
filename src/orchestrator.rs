//! Research orchestration.
//!
//! One research request fans out to every `(provider, query)` pair at once.
//! Each call is gated by its provider's circuit breaker and observed by the
//! health router. All calls are awaited to completion; failures become
//! warnings. Only when no call produced a single claim does the request fail.

use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitState};
use crate::claims::{Claim, Evidence, ResolvedClaim};
use crate::error::{Error, Result};
use crate::health::{ProviderHealthRouter, ProviderHealthSample};
use crate::metrics::{MetricsService, Timer};
use crate::providers::{
    build_queries, ProviderQuery, ResearchProvider, ResearchRequest, ResearchTopic,
};
use crate::signals::{derive_signals, DerivedSignals, ScriptCounts};
use crate::trust::{overall_confidence, TrustResolver};

/// Overall confidence reported when nothing resolved.
pub const DEFAULT_CONFIDENCE: f64 = 0.6;

/// Outcome of one research request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResult {
    /// Analysis the research belongs to.
    pub analysis_id: String,
    /// Unique id of this research run.
    pub request_id: String,
    /// One entry per resolved fact.
    pub evidence: Vec<Evidence>,
    /// Resolved claims with agreement and confidence.
    pub resolved_claims: Vec<ResolvedClaim>,
    /// Mean confidence of resolved claims (0.0 - 1.0).
    pub confidence: f64,
    /// One line per failed or skipped provider call.
    pub warnings: Vec<String>,
    /// Whether any provider call failed.
    pub partial_result: bool,
    /// Derived signals.
    pub signals: DerivedSignals,
    /// Script counts over all returned claims.
    pub source_counts: ScriptCounts,
    /// Providers in the health order used for this run.
    pub providers_ranked: Vec<String>,
}

enum CallOutcome {
    Claims(Vec<Claim>),
    Failed(String),
}

/// Fans research out to providers and reduces the outcomes.
pub struct ResearchOrchestrator {
    providers: Vec<Arc<dyn ResearchProvider>>,
    breakers: Arc<CircuitBreakerRegistry>,
    health: Arc<ProviderHealthRouter>,
    resolver: TrustResolver,
    metrics: Arc<MetricsService>,
}

impl ResearchOrchestrator {
    /// Create an orchestrator over a provider set.
    pub fn new(
        providers: Vec<Arc<dyn ResearchProvider>>,
        breakers: Arc<CircuitBreakerRegistry>,
        health: Arc<ProviderHealthRouter>,
        resolver: TrustResolver,
        metrics: Arc<MetricsService>,
    ) -> Self {
        Self {
            providers,
            breakers,
            health,
            resolver,
            metrics,
        }
    }

    /// Names of the configured providers, in registration order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Provider queries one research request issues.
    pub fn queries_per_request(&self) -> u64 {
        // Two languages per topic.
        (self.providers.len() * ResearchTopic::ALL.len() * 2) as u64
    }

    /// Run research dated today (UTC).
    pub async fn research(
        &self,
        request: &ResearchRequest,
        cancel: &CancellationToken,
    ) -> Result<ResearchResult> {
        self.research_on(request, cancel, Utc::now().date_naive()).await
    }

    /// Run research with freshness measured against `today`.
    pub async fn research_on(
        &self,
        request: &ResearchRequest,
        cancel: &CancellationToken,
        today: NaiveDate,
    ) -> Result<ResearchResult> {
        request.validate()?;

        let ranked = self.health.rank(&self.provider_names());
        let ordered: Vec<Arc<dyn ResearchProvider>> = ranked
            .iter()
            .filter_map(|name| self.providers.iter().find(|p| p.name() == name).cloned())
            .collect();

        let queries = build_queries(request, &cancel.child_token());
        let calls = ordered
            .iter()
            .flat_map(|provider| queries.iter().map(move |query| self.call(provider, query)));
        let outcomes = join_all(calls).await;

        let mut claims = Vec::new();
        let mut warnings = Vec::new();
        for outcome in outcomes {
            match outcome {
                CallOutcome::Claims(found) => claims.extend(found),
                CallOutcome::Failed(warning) => warnings.push(warning),
            }
        }

        if claims.is_empty() {
            if cancel.is_cancelled() {
                self.metrics.research_request("cancelled");
                return Err(Error::Cancelled);
            }
            self.metrics.research_request("upstream_unavailable");
            warn!(
                analysis_id = %request.analysis_id,
                failures = warnings.len(),
                "every provider call failed"
            );
            let detail = if warnings.is_empty() {
                "providers returned no claims".to_string()
            } else {
                warnings.join("; ")
            };
            return Err(Error::UpstreamUnavailable(format!(
                "no provider produced claims: {}",
                detail
            )));
        }

        let resolved_claims = self.resolver.resolve(&claims, today);
        let confidence = overall_confidence(&resolved_claims, DEFAULT_CONFIDENCE);
        let source_counts = ScriptCounts::from_claims(&claims);
        let signals = derive_signals(&request.client_name, &resolved_claims, source_counts);
        let evidence = resolved_claims.iter().map(Evidence::from).collect();
        let partial_result = !warnings.is_empty();

        self.metrics
            .research_request(if partial_result { "partial" } else { "complete" });
        info!(
            analysis_id = %request.analysis_id,
            claims = claims.len(),
            resolved = resolved_claims.len(),
            warnings = warnings.len(),
            confidence,
            "research completed"
        );

        Ok(ResearchResult {
            analysis_id: request.analysis_id.clone(),
            request_id: Uuid::new_v4().to_string(),
            evidence,
            resolved_claims,
            confidence,
            warnings,
            partial_result,
            signals,
            source_counts,
            providers_ranked: ranked,
        })
    }

    async fn call(
        &self,
        provider: &Arc<dyn ResearchProvider>,
        query: &ProviderQuery,
    ) -> CallOutcome {
        let name = provider.name();
        let label = format!("{} {}/{}", name, query.topic.as_str(), query.language.tag());
        let breaker = self.breakers.breaker(name);

        if let Err(open) = breaker.check() {
            debug!(provider = name, retry_after = ?open.retry_after, "skipping call, circuit open");
            self.metrics.provider_call(name, "circuit_open", 0.0);
            return CallOutcome::Failed(format!("{}: circuit open", label));
        }

        let timer = Timer::start();
        let result = tokio::select! {
            biased;
            _ = query.cancel.cancelled() => Err(Error::Cancelled),
            result = provider.query(query) => result,
        };
        let latency_ms = timer.elapsed_ms();

        let outcome = match result {
            Ok(claims) => {
                breaker.record_success();
                self.health
                    .record_outcome(name, ProviderHealthSample::now(true, latency_ms, false, None));
                self.metrics.provider_call(name, "ok", timer.elapsed_secs());
                CallOutcome::Claims(claims)
            }
            // The caller gave up; the provider did nothing wrong.
            Err(Error::Cancelled) => {
                self.metrics.provider_call(name, "cancelled", timer.elapsed_secs());
                CallOutcome::Failed(format!("{}: cancelled", label))
            }
            Err(err) => {
                let was_open = breaker.state() == CircuitState::Open;
                breaker.record_failure();
                if !was_open && breaker.state() == CircuitState::Open {
                    self.metrics.circuit_breaker_trip(name);
                }
                self.health.record_outcome(
                    name,
                    ProviderHealthSample::now(
                        false,
                        latency_ms,
                        err.is_rate_limited(),
                        err.status_code(),
                    ),
                );
                self.metrics.provider_call(name, "error", timer.elapsed_secs());
                warn!(
                    provider = name,
                    topic = query.topic.as_str(),
                    error = %err,
                    "provider call failed"
                );
                CallOutcome::Failed(format!("{}: {}", label, err))
            }
        };

        self.metrics
            .circuit_breaker_state(name, breaker.state().as_gauge());
        self.metrics
            .provider_health(name, self.health.score(name).health);
        outcome
    }
}
