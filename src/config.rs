//! Engine configuration management.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::budget::BudgetConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{Error, Result};
use crate::freshness::FreshnessConfig;
use crate::health::HealthConfig;
use crate::providers::ProviderSettings;
use crate::rate_limit::RateLimitConfig;
use crate::transport::TransportOptions;

/// Main configuration for the research engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// HTTP API configuration.
    pub api: ApiConfig,

    /// Outbound retry and timeout policy.
    pub transport: TransportOptions,

    /// Per-provider circuit breaker thresholds.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Caller admission control.
    pub rate_limit: RateLimitConfig,

    /// Usage caps.
    pub budget: BudgetConfig,

    /// Provider health scoring.
    pub health: HealthConfig,

    /// Confidence caps by source age.
    pub freshness: FreshnessConfig,

    /// Research providers.
    pub providers: ProvidersConfig,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Listen address for HTTP API.
    pub listen_address: String,

    /// Enable CORS.
    pub cors_enabled: bool,

    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,

    /// User agent sent to providers.
    pub user_agent: String,
}

fn default_user_agent() -> String {
    format!("rfp-research/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
            user_agent: default_user_agent(),
        }
    }
}

/// Configured research providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Web-search API.
    pub search: ProviderSettings,

    /// Page-scrape API.
    pub scrape: ProviderSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            search: ProviderSettings {
                endpoint: "http://localhost:8090/v1/search".to_string(),
                ..Default::default()
            },
            scrape: ProviderSettings {
                endpoint: "http://localhost:8091/v1/page".to_string(),
                max_results: 3,
                ..Default::default()
            },
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.api
            .listen_address
            .parse::<SocketAddr>()
            .map_err(|e| {
                Error::Config(format!(
                    "invalid api.listen_address '{}': {}",
                    self.api.listen_address, e
                ))
            })?;

        self.transport.validate()?;
        if self.rate_limit.enabled {
            self.rate_limit.validate()?;
        }

        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 || breaker.half_open_successes_to_close == 0 {
            return Err(Error::Config(
                "circuit_breaker thresholds must be greater than zero".to_string(),
            ));
        }
        if breaker.failure_window_ms == 0 {
            return Err(Error::Config(
                "circuit_breaker.failure_window_ms must be greater than zero".to_string(),
            ));
        }

        if self.health.window_size == 0 {
            return Err(Error::Config(
                "health.window_size must be greater than zero".to_string(),
            ));
        }

        let budget = &self.budget;
        let caps = [
            ("tokens_per_analysis", budget.tokens_per_analysis),
            ("ocr_pages_per_analysis", budget.ocr_pages_per_analysis),
            ("queries_per_analysis", budget.queries_per_analysis),
            ("daily_analyses_per_user", budget.daily_analyses_per_user),
        ];
        if let Some((name, _)) = caps.iter().find(|(_, cap)| *cap == 0) {
            return Err(Error::Config(format!("budget.{} must be greater than zero", name)));
        }

        for (name, provider) in [
            ("search", &self.providers.search),
            ("scrape", &self.providers.scrape),
        ] {
            if provider.enabled && provider.endpoint.trim().is_empty() {
                return Err(Error::Config(format!(
                    "providers.{}.endpoint is required when the provider is enabled",
                    name
                )));
            }
        }
        if !self.providers.search.enabled && !self.providers.scrape.enabled {
            return Err(Error::Config("at least one provider must be enabled".to_string()));
        }

        Ok(())
    }
}
