//! Error types for the research engine.

use thiserror::Error;

/// Result type alias using the engine Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Research engine error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (bad or missing settings).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error (invalid input data).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller exceeded its token bucket.
    #[error("Rate limited: key '{key}' must retry after {retry_after_secs}s")]
    RateLimited {
        /// Bucket key (usually `principal:route`).
        key: String,
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// A per-analysis usage cap was exceeded.
    #[error("Budget exceeded for analysis '{analysis_id}': {counter} {observed} > cap {cap}")]
    BudgetExceeded {
        /// Analysis the usage was registered against.
        analysis_id: String,
        /// Counter that crossed its cap (`tokens`, `ocr_pages`, `queries`).
        counter: &'static str,
        /// Running total after the offending registration.
        observed: u64,
        /// Configured cap.
        cap: u64,
    },

    /// A user exhausted the distinct analyses allowed for one UTC day.
    #[error("Daily quota exceeded for '{user_key}' on {day}: {count} analyses, cap {cap}")]
    DailyQuotaExceeded {
        /// User the quota is tracked for.
        user_key: String,
        /// UTC calendar day (YYYY-MM-DD).
        day: String,
        /// Distinct analyses already counted for the day.
        count: u64,
        /// Configured cap.
        cap: u64,
    },

    /// Every research provider failed.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A single attempt did not finish within its timeout.
    #[error("Request timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout {
        /// Operation name.
        operation: String,
        /// Configured per-attempt timeout.
        timeout_ms: u64,
    },

    /// Network-class failure (connection refused/reset, DNS, generic fetch failure).
    #[error("Network error: {0}")]
    Network(String),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Upstream answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// Response status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// All transport attempts failed.
    #[error("{operation} failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        /// Operation name.
        operation: String,
        /// Attempts made.
        attempts: u32,
        /// Message of the last underlying error.
        last_error: String,
        /// Status of the last response, if the last failure was an HTTP status.
        last_status: Option<u16>,
    },

    /// Provider adapter error (malformed payload and similar).
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        /// Provider name.
        provider: String,
        /// Error detail.
        message: String,
    },

    /// API error.
    #[error("API error: {0}")]
    Api(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (misconfiguration detected at runtime, poisoned state).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::BudgetExceeded { .. } | Self::DailyQuotaExceeded { .. } => "budget_exceeded",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Network(_) => "network_error",
            Self::Cancelled => "cancelled",
            Self::HttpStatus { .. } | Self::RetriesExhausted { .. } | Self::Provider { .. } => {
                "provider_error"
            }
            Self::Config(_)
            | Self::Api(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::UpstreamUnavailable(_)
                | Self::Timeout { .. }
                | Self::Network(_)
        )
    }

    /// HTTP status carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::RetriesExhausted { last_status, .. } => *last_status,
            _ => None,
        }
    }

    /// Whether the error means the upstream throttled us.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. }) || self.status_code() == Some(429)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_taxonomy() {
        assert_eq!(Error::Validation("x".into()).code(), "validation_error");
        assert_eq!(
            Error::RateLimited {
                key: "k".into(),
                retry_after_secs: 1
            }
            .code(),
            "rate_limited"
        );
        assert_eq!(
            Error::UpstreamUnavailable("all".into()).code(),
            "upstream_unavailable"
        );
        assert_eq!(Error::Config("zero".into()).code(), "internal_error");
    }

    #[test]
    fn test_budget_error_is_not_retryable() {
        let err = Error::BudgetExceeded {
            analysis_id: "a-1".into(),
            counter: "tokens",
            observed: 120,
            cap: 100,
        };

        assert!(!err.is_retryable());
        let msg = err.to_string();
        assert!(msg.contains("a-1"));
        assert!(msg.contains("120"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn test_status_code_from_exhausted_retries() {
        let err = Error::RetriesExhausted {
            operation: "search".into(),
            attempts: 3,
            last_error: "HTTP 429: slow down".into(),
            last_status: Some(429),
        };

        assert_eq!(err.status_code(), Some(429));
        assert!(err.is_rate_limited());
        assert!(!Error::Cancelled.is_rate_limited());
    }
}
