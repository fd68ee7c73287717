//! Rate limiting for research requests.
//!
//! This module provides token-bucket admission control keyed by an arbitrary
//! string (usually `principal:route`), using the GCRA algorithm (Generic Cell
//! Rate Algorithm) via the `governor` crate. GCRA with burst `capacity` and
//! emission interval `1 / refill_per_second` admits exactly what a token
//! bucket of that capacity and refill rate admits, refilled lazily on check.
//!
//! Features:
//! - Per-key buckets created on first use and dropped once fully refilled
//! - Misconfiguration is a configuration error, not a rejection
//! - Rejections carry a Retry-After hint

use governor::{
    clock::{Clock, DefaultClock},
    middleware::StateInformationMiddleware,
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Type alias for the keyed limiter to reduce complexity.
type KeyedRateLimiter = RateLimiter<
    String,
    DefaultKeyedStateStore<String>,
    DefaultClock,
    StateInformationMiddleware,
>;

/// Configuration for rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum burst size (bucket capacity)
    pub capacity: u32,

    /// Steady-state admissions per second (bucket refill rate)
    pub refill_per_second: f64,

    /// Whether rate limiting is enabled
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_per_second: 2.0,
            enabled: true,
        }
    }
}

impl RateLimitConfig {
    /// Reject configurations that cannot describe a bucket.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config(
                "rate limit capacity must be greater than zero".to_string(),
            ));
        }
        if !(self.refill_per_second.is_finite() && self.refill_per_second > 0.0) {
            return Err(Error::Config(format!(
                "rate limit refill_per_second must be positive, got {}",
                self.refill_per_second
            )));
        }
        Ok(())
    }
}

/// Successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Tokens left in the bucket after this admission
    pub remaining: u32,
    /// Bucket capacity
    pub limit: u32,
}

/// Checks between sweeps of idle buckets.
pub const PRUNE_INTERVAL: u64 = 1024;

/// Token-bucket rate limiter service.
pub struct RateLimitService {
    config: RateLimitConfig,
    limiter: Option<KeyedRateLimiter>,
    checks: AtomicU64,
}

impl RateLimitService {
    /// Create a new rate limiter with the given configuration.
    ///
    /// Fails with a configuration error when capacity or refill rate is not
    /// positive.
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        let limiter = if config.enabled {
            config.validate()?;
            let period = Duration::from_secs_f64(1.0 / config.refill_per_second);
            let burst = NonZeroU32::new(config.capacity).ok_or_else(|| {
                Error::Config("rate limit capacity must be greater than zero".to_string())
            })?;
            let quota = Quota::with_period(period)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "rate limit refill_per_second {} is too large",
                        config.refill_per_second
                    ))
                })?
                .allow_burst(burst);
            Some(RateLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>())
        } else {
            None
        };

        Ok(Self {
            config,
            limiter,
            checks: AtomicU64::new(0),
        })
    }

    /// Create a disabled rate limiter (for testing or development).
    pub fn disabled() -> Self {
        Self {
            config: RateLimitConfig {
                enabled: false,
                ..Default::default()
            },
            limiter: None,
            checks: AtomicU64::new(0),
        }
    }

    /// Admit or reject one call for `key`.
    ///
    /// Rejections are `Error::RateLimited`, which callers should treat as
    /// retryable after `retry_after_secs`.
    pub fn check(&self, key: &str) -> Result<RateLimitDecision> {
        let Some(limiter) = &self.limiter else {
            return Ok(RateLimitDecision {
                remaining: u32::MAX,
                limit: u32::MAX,
            });
        };

        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_INTERVAL == 0 {
            self.prune();
        }

        match limiter.check_key(&key.to_string()) {
            Ok(snapshot) => Ok(RateLimitDecision {
                remaining: snapshot.remaining_burst_capacity(),
                limit: self.config.capacity,
            }),
            Err(not_until) => {
                let wait_time = not_until.wait_time_from(DefaultClock::default().now());
                let retry_after_secs = wait_time.as_secs_f64().ceil().max(1.0) as u64;
                debug!(key, retry_after_secs, "rate limit rejected");
                Err(Error::RateLimited {
                    key: key.to_string(),
                    retry_after_secs,
                })
            }
        }
    }

    /// Drop buckets that have refilled to capacity; they are
    /// indistinguishable from a bucket created on the next check.
    pub fn prune(&self) {
        if let Some(limiter) = &self.limiter {
            let before = limiter.len();
            limiter.retain_recent();
            limiter.shrink_to_fit();
            let after = limiter.len();
            if after < before {
                debug!(dropped = before - after, held = after, "pruned idle rate limit buckets");
            }
        }
    }

    /// Number of buckets currently held.
    pub fn bucket_count(&self) -> usize {
        self.limiter.as_ref().map_or(0, |limiter| limiter.len())
    }

    /// Check if rate limiting is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.limiter.is_some()
    }

    /// Configured bucket capacity.
    pub fn capacity(&self) -> u32 {
        self.config.capacity
    }

    /// Configured refill rate.
    pub fn refill_per_second(&self) -> f64 {
        self.config.refill_per_second
    }
}

/// Build the bucket key for a caller and route.
pub fn bucket_key(principal: &str, route: &str) -> String {
    format!("{}:{}", principal, route)
}

/// HTTP headers for rate limit information.
pub mod headers {
    /// Bucket capacity
    pub const X_RATELIMIT_LIMIT: &str = "X-RateLimit-Limit";
    /// Tokens left after this request
    pub const X_RATELIMIT_REMAINING: &str = "X-RateLimit-Remaining";
    /// Seconds to wait before retrying (on 429)
    pub const RETRY_AFTER: &str = "Retry-After";
}
