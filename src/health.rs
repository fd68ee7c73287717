//! Rolling provider health scores.
//!
//! Every completed provider call leaves a sample in that provider's ring
//! buffer. Samples are reduced on demand into a 0-100 score used to rank
//! providers. The score never gates a call; that is the circuit breaker's job.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::SystemTime;

/// Health scoring parameters. Coefficients are tunable defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Samples kept per provider.
    pub window_size: usize,
    /// Weight of the success rate.
    pub success_weight: f64,
    /// Penalty per unit of rate-limited fraction.
    pub rate_limit_penalty: f64,
    /// Penalty per unit of error fraction.
    pub error_penalty: f64,
    /// Penalty at (or beyond) the reference latency.
    pub latency_penalty: f64,
    /// p95 latency that earns the full latency penalty, in milliseconds.
    pub latency_reference_ms: f64,
    /// Score reported for a provider with no samples.
    pub neutral_health: f64,
    /// Success rate reported for a provider with no samples.
    pub neutral_success_rate: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_size: 40,
            success_weight: 100.0,
            rate_limit_penalty: 45.0,
            error_penalty: 30.0,
            latency_penalty: 20.0,
            latency_reference_ms: 4_000.0,
            neutral_health: 80.0,
            neutral_success_rate: 0.8,
        }
    }
}

/// Outcome of one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealthSample {
    /// Whether the call succeeded.
    pub ok: bool,
    /// Wall-clock latency of the call.
    pub latency_ms: u64,
    /// Whether the provider throttled us.
    pub rate_limited: bool,
    /// HTTP status, when one was observed.
    pub status_code: Option<u16>,
    /// When the call completed.
    pub at: SystemTime,
}

impl ProviderHealthSample {
    /// Sample stamped with the current time.
    pub fn now(ok: bool, latency_ms: u64, rate_limited: bool, status_code: Option<u16>) -> Self {
        Self {
            ok,
            latency_ms,
            rate_limited,
            status_code,
            at: SystemTime::now(),
        }
    }
}

/// Score breakdown for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealthScore {
    /// Provider name.
    pub provider: String,
    /// Fraction of successful samples.
    pub success_rate: f64,
    /// `1 - success_rate`.
    pub error_rate: f64,
    /// Fraction of rate-limited samples.
    pub rate_limit_rate: f64,
    /// 95th percentile latency.
    pub p95_latency_ms: u64,
    /// Clamped 0-100 score.
    pub health: f64,
    /// Samples the score is based on.
    pub samples: usize,
}

/// Ranks providers by rolling reliability and latency.
#[derive(Debug, Default)]
pub struct ProviderHealthRouter {
    config: HealthConfig,
    samples: RwLock<HashMap<String, VecDeque<ProviderHealthSample>>>,
}

impl ProviderHealthRouter {
    /// Create a router with the given scoring parameters.
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            samples: RwLock::new(HashMap::new()),
        }
    }

    /// Append a sample, evicting the oldest when the buffer is full.
    pub fn record_outcome(&self, provider: &str, sample: ProviderHealthSample) {
        let capacity = self.config.window_size.max(1);
        let mut guard = self.samples.write().unwrap_or_else(|e| e.into_inner());
        let buffer = guard
            .entry(provider.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        while buffer.len() >= capacity {
            buffer.pop_front();
        }
        buffer.push_back(sample);
    }

    /// Current score for a provider.
    pub fn score(&self, provider: &str) -> ProviderHealthScore {
        let guard = self.samples.read().unwrap_or_else(|e| e.into_inner());
        match guard.get(provider) {
            Some(buffer) if !buffer.is_empty() => self.reduce(provider, buffer),
            _ => ProviderHealthScore {
                provider: provider.to_string(),
                success_rate: self.config.neutral_success_rate,
                error_rate: 1.0 - self.config.neutral_success_rate,
                rate_limit_rate: 0.0,
                p95_latency_ms: 0,
                health: self.config.neutral_health,
                samples: 0,
            },
        }
    }

    /// Providers sorted by descending health; ties keep input order.
    pub fn rank<S: AsRef<str>>(&self, providers: &[S]) -> Vec<String> {
        let mut scored: Vec<(String, f64)> = providers
            .iter()
            .map(|p| (p.as_ref().to_string(), self.score(p.as_ref()).health))
            .collect();
        // sort_by is stable.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.into_iter().map(|(name, _)| name).collect()
    }

    /// Scores for every provider with samples, sorted by name.
    pub fn report(&self) -> Vec<ProviderHealthScore> {
        let names: Vec<String> = {
            let guard = self.samples.read().unwrap_or_else(|e| e.into_inner());
            guard.keys().cloned().collect()
        };
        let mut report: Vec<ProviderHealthScore> = names.iter().map(|n| self.score(n)).collect();
        report.sort_by(|a, b| a.provider.cmp(&b.provider));
        report
    }

    /// Forget every sample (tests only).
    pub fn reset(&self) {
        let mut guard = self.samples.write().unwrap_or_else(|e| e.into_inner());
        guard.clear();
    }

    fn reduce(
        &self,
        provider: &str,
        buffer: &VecDeque<ProviderHealthSample>,
    ) -> ProviderHealthScore {
        let total = buffer.len() as f64;
        let successes = buffer.iter().filter(|s| s.ok).count() as f64;
        let rate_limited = buffer.iter().filter(|s| s.rate_limited).count() as f64;

        let success_rate = successes / total;
        let error_rate = 1.0 - success_rate;
        let rate_limit_rate = rate_limited / total;

        let mut latencies: Vec<u64> = buffer.iter().map(|s| s.latency_ms).collect();
        let p95_latency_ms = percentile(&mut latencies, 0.95);

        let c = &self.config;
        let latency_factor = if c.latency_reference_ms > 0.0 {
            (p95_latency_ms as f64 / c.latency_reference_ms).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let health = (c.success_weight * success_rate
            - c.rate_limit_penalty * rate_limit_rate
            - c.error_penalty * error_rate
            - c.latency_penalty * latency_factor)
            .clamp(0.0, 100.0);

        ProviderHealthScore {
            provider: provider.to_string(),
            success_rate,
            error_rate,
            rate_limit_rate,
            p95_latency_ms,
            health,
            samples: buffer.len(),
        }
    }
}

/// Nearest-rank percentile; `values` is sorted in place.
fn percentile(values: &mut [u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.sort_unstable();
    let rank = (p * values.len() as f64).ceil() as usize;
    values[rank.clamp(1, values.len()) - 1]
}
