//! Circuit breaker for protecting research provider calls.
//!
//! One breaker runs per provider, independent of the health router: a
//! provider can look healthy in aggregate yet be open because it just failed
//! a burst of calls.
//!
//! ## States
//!
//! - **Closed**: Normal operation. Failures are kept in a sliding window;
//!   reaching the threshold inside the window opens the circuit. A success
//!   clears the window.
//! - **Open**: Calls are rejected until the open period elapses, then the
//!   next check flips the circuit to half-open and lets the caller through.
//! - **HalfOpen**: Probing. One failure reopens immediately; enough
//!   successes close it and clear all failure history.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
//!
//! let result = cb.call(|| async {
//!     provider.query(&input).await
//! }).await;
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    #[default]
    Closed,
    /// Failure threshold reached - requests fail fast
    Open,
    /// Probing recovery - requests pass through, one failure reopens
    HalfOpen,
}

impl CircuitState {
    /// Gauge value: 0=closed, 1=open, 2=half-open.
    pub fn as_gauge(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures inside the window that open the circuit.
    pub failure_threshold: u32,

    /// Trailing window for counting failures, in milliseconds.
    pub failure_window_ms: u64,

    /// How long the circuit stays open before probing, in milliseconds.
    pub open_state_ms: u64,

    /// Successes in half-open needed to close the circuit.
    pub half_open_successes_to_close: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            open_state_ms: 120_000,
            half_open_successes_to_close: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Failure window as a duration.
    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }

    /// Open period as a duration.
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_state_ms)
    }
}

/// Error returned when circuit is open.
#[derive(Debug, Clone)]
pub struct CircuitOpenError {
    /// Provider the breaker guards
    pub name: String,
    /// When the circuit will attempt recovery
    pub retry_after: Duration,
}

impl std::fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Circuit open for '{}', retry after {:?}",
            self.name, self.retry_after
        )
    }
}

impl std::error::Error for CircuitOpenError {}

/// Result of a circuit breaker call.
pub type CircuitResult<T, E> = Result<T, CircuitError<E>>;

/// Error that can occur during a circuit breaker call.
#[derive(Debug)]
pub enum CircuitError<E> {
    /// The circuit is open, request rejected
    Open(CircuitOpenError),
    /// The underlying service returned an error
    Service(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(e) => write!(f, "{}", e),
            Self::Service(e) => write!(f, "Service error: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(e) => Some(e),
            Self::Service(e) => Some(e),
        }
    }
}

/// Counters tracked by the circuit breaker.
#[derive(Debug, Default)]
pub struct CircuitMetrics {
    /// Total successful calls
    pub success_count: AtomicU64,
    /// Total failed calls
    pub failure_count: AtomicU64,
    /// Total rejected calls (circuit open)
    pub rejected_count: AtomicU64,
    /// Number of times circuit opened
    pub open_count: AtomicU64,
}

impl CircuitMetrics {
    /// Get total number of calls that reached the provider.
    pub fn total_calls(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed) + self.failure_count.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.success_count.store(0, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
        self.rejected_count.store(0, Ordering::Relaxed);
        self.open_count.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of a breaker, safe to serialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    /// Provider name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Milliseconds since the circuit last opened, if it is open or probing.
    pub opened_ms_ago: Option<u64>,
    /// Failures currently inside the sliding window.
    pub recent_failures: usize,
    /// Successes recorded since entering half-open.
    pub half_open_successes: u32,
}

/// Internal state for circuit breaker.
struct InternalState {
    state: CircuitState,
    /// When the circuit was opened (for timing recovery)
    opened_at: Option<Instant>,
    /// Failure timestamps inside the trailing window, oldest first
    failures: VecDeque<Instant>,
    /// Successes counted while half-open
    half_open_successes: u32,
}

/// Thread-safe circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<InternalState>,
    metrics: CircuitMetrics,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::named("default", config)
    }

    /// Create a circuit breaker labelled with the provider it guards.
    pub fn named(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(InternalState {
                state: CircuitState::Closed,
                opened_at: None,
                failures: VecDeque::new(),
                half_open_successes: 0,
            }),
            config,
            metrics: CircuitMetrics::default(),
        }
    }

    /// Create a circuit breaker with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Provider name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current circuit state (does not trigger the open -> half-open flip).
    pub fn state(&self) -> CircuitState {
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        guard.state
    }

    /// Get circuit breaker counters.
    pub fn metrics(&self) -> &CircuitMetrics {
        &self.metrics
    }

    /// Whether a call may proceed now.
    pub fn can_execute(&self) -> bool {
        self.check().is_ok()
    }

    /// Check if a call is allowed (without actually making it).
    ///
    /// Returns Ok(()) if allowed, Err with retry info if circuit is open.
    pub fn check(&self) -> Result<(), CircuitOpenError> {
        self.check_at(Instant::now())
    }

    /// Execute a fallible operation through the circuit breaker.
    ///
    /// If the circuit is open, returns `CircuitError::Open` immediately.
    /// If the operation fails, records the failure and may trip the circuit.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> CircuitResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.check().map_err(CircuitError::Open)?;

        let result = f().await;

        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }

        result.map_err(CircuitError::Service)
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        self.metrics.success_count.fetch_add(1, Ordering::Relaxed);

        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        match guard.state {
            CircuitState::Closed => guard.failures.clear(),
            CircuitState::HalfOpen => {
                guard.half_open_successes += 1;
                if guard.half_open_successes >= self.config.half_open_successes_to_close {
                    guard.state = CircuitState::Closed;
                    guard.opened_at = None;
                    guard.failures.clear();
                    guard.half_open_successes = 0;
                    info!(provider = %self.name, "circuit closed after recovery");
                }
            }
            // A late success from a call admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// Force the circuit to open (for testing or manual intervention).
    pub fn force_open(&self) {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        if guard.state != CircuitState::Open {
            self.open(&mut guard, Instant::now());
        }
    }

    /// Reset the circuit breaker to initial state.
    pub fn reset(&self) {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        guard.state = CircuitState::Closed;
        guard.opened_at = None;
        guard.failures.clear();
        guard.half_open_successes = 0;
        self.metrics.reset();
    }

    /// Snapshot of the breaker's state.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        let window = self.config.failure_window();
        let recent_failures = guard
            .failures
            .iter()
            .filter(|t| t.elapsed() < window)
            .count();
        CircuitSnapshot {
            name: self.name.clone(),
            state: guard.state,
            opened_ms_ago: guard.opened_at.map(|t| t.elapsed().as_millis() as u64),
            recent_failures,
            half_open_successes: guard.half_open_successes,
        }
    }

    // ========== Internal Methods ==========

    pub(crate) fn check_at(&self, now: Instant) -> Result<(), CircuitOpenError> {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());

        if guard.state != CircuitState::Open {
            return Ok(());
        }

        let open_duration = self.config.open_duration();
        let elapsed = guard
            .opened_at
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or(open_duration);

        if elapsed >= open_duration {
            guard.state = CircuitState::HalfOpen;
            guard.half_open_successes = 0;
            info!(provider = %self.name, "circuit half-open, probing recovery");
            return Ok(());
        }

        self.metrics.rejected_count.fetch_add(1, Ordering::Relaxed);
        Err(CircuitOpenError {
            name: self.name.clone(),
            retry_after: open_duration.saturating_sub(elapsed),
        })
    }

    pub(crate) fn record_failure_at(&self, now: Instant) {
        self.metrics.failure_count.fetch_add(1, Ordering::Relaxed);

        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        match guard.state {
            CircuitState::Closed => {
                guard.failures.push_back(now);
                let window = self.config.failure_window();
                while let Some(oldest) = guard.failures.front() {
                    if now.saturating_duration_since(*oldest) >= window {
                        guard.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if guard.failures.len() >= self.config.failure_threshold as usize {
                    self.open(&mut guard, now);
                }
            }
            CircuitState::HalfOpen => self.open(&mut guard, now),
            CircuitState::Open => {}
        }
    }

    fn open(&self, guard: &mut InternalState, now: Instant) {
        guard.state = CircuitState::Open;
        guard.opened_at = Some(now);
        guard.half_open_successes = 0;
        self.metrics.open_count.fetch_add(1, Ordering::Relaxed);
        warn!(
            provider = %self.name,
            failures = guard.failures.len(),
            "circuit opened"
        );
    }
}

// ========== Per-provider Registry ==========

/// Lazily creates and holds one breaker per provider name.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers share `config`.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Breaker for `provider`, created on first use.
    pub fn breaker(&self, provider: &str) -> Arc<CircuitBreaker> {
        {
            let guard = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(breaker) = guard.get(provider) {
                return breaker.clone();
            }
        }

        let mut guard = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        guard
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::named(provider, self.config.clone()))
            })
            .clone()
    }

    /// Snapshot for one provider, if a breaker exists.
    pub fn snapshot(&self, provider: &str) -> Option<CircuitSnapshot> {
        let guard = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        guard.get(provider).map(|b| b.snapshot())
    }

    /// Snapshots of every breaker, sorted by provider name.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let guard = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        let mut snapshots: Vec<CircuitSnapshot> = guard.values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Drop every breaker (tests only).
    pub fn reset(&self) {
        let mut guard = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        guard.clear();
    }
}
