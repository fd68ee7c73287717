//! Research claims and their resolved form.
//!
//! A [`Claim`] is one fact reported by one provider call. Claims are
//! immutable once produced; the trust resolver reduces every group of claims
//! sharing a key into a single [`ResolvedClaim`].

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Value a provider reports when it could not establish a fact.
pub const UNKNOWN_VALUE: &str = "UNKNOWN";

/// A-priori trust rank of a source class.
///
/// Tier 1 is the most authoritative (government or stock-exchange
/// registries), tier 4 the least (unverified blogs, social posts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SourceTier(u8);

impl SourceTier {
    /// Government and exchange registries.
    pub const OFFICIAL: SourceTier = SourceTier(1);
    /// Established financial and news outlets.
    pub const ESTABLISHED: SourceTier = SourceTier(2);
    /// General web.
    pub const GENERAL: SourceTier = SourceTier(3);
    /// Blogs, forums and social posts.
    pub const UNVERIFIED: SourceTier = SourceTier(4);

    /// Create a tier, rejecting anything outside 1..=4.
    pub fn new(rank: u8) -> Result<Self> {
        if (1..=4).contains(&rank) {
            Ok(Self(rank))
        } else {
            Err(Error::Validation(format!(
                "source tier must be between 1 and 4, got {}",
                rank
            )))
        }
    }

    /// Numeric rank (1 = most trusted).
    pub fn rank(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for SourceTier {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SourceTier> for u8 {
    fn from(tier: SourceTier) -> u8 {
        tier.0
    }
}

impl fmt::Display for SourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {}", self.0)
    }
}

/// Category of a claim, which decides how quickly it goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimCategory {
    /// Registries, government filings.
    Official,
    /// Revenue, headcount, filings with the exchange.
    Financial,
    /// Press coverage.
    News,
    /// Social media.
    Social,
}

impl ClaimCategory {
    /// Lowercase name used in metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Official => "official",
            Self::Financial => "financial",
            Self::News => "news",
            Self::Social => "social",
        }
    }
}

/// One fact reported by one provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    /// Fact key, e.g. `annual_revenue`.
    pub key: String,
    /// Reported value, compared by exact string equality.
    pub value: String,
    /// Source URL or source label.
    pub source: String,
    /// Trust rank of the source class.
    pub tier: SourceTier,
    /// Publication date of the source; `None` when unknown or unparseable.
    pub source_date: Option<NaiveDate>,
    /// Claim category.
    pub category: ClaimCategory,
}

impl Claim {
    /// Create a claim.
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        source: impl Into<String>,
        tier: SourceTier,
        source_date: Option<NaiveDate>,
        category: ClaimCategory,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            source: source.into(),
            tier,
            source_date,
            category,
        }
    }

    /// Low-confidence stand-in used when a provider cannot run at all.
    pub fn placeholder(key: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(
            key,
            UNKNOWN_VALUE,
            source,
            SourceTier::GENERAL,
            None,
            ClaimCategory::News,
        )
    }

    /// Whether this claim carries no information.
    pub fn is_unknown(&self) -> bool {
        self.value == UNKNOWN_VALUE
    }
}

/// The winning claim for one key after conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedClaim {
    /// The winning claim.
    #[serde(flatten)]
    pub claim: Claim,
    /// Number of input claims sharing the winning value (always >= 1).
    pub agreement_count: usize,
    /// Confidence after tier and freshness caps (0.0 - 1.0).
    pub confidence: f64,
}

/// Evidence entry returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    /// Human-readable `key: value` rendering of the claim.
    pub claim: String,
    /// Source URL or label.
    pub source: String,
    /// Trust tier of the source.
    pub tier: SourceTier,
}

impl From<&ResolvedClaim> for Evidence {
    fn from(resolved: &ResolvedClaim) -> Self {
        Self {
            claim: format!("{}: {}", resolved.claim.key, resolved.claim.value),
            source: resolved.claim.source.clone(),
            tier: resolved.claim.tier,
        }
    }
}

/// Parse a source date from the formats providers commonly return.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps and RFC 2822 dates. Anything
/// else yields `None`, which downstream treats as infinitely old.
pub fn parse_source_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.date_naive());
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
        return Some(ts.date_naive());
    }
    // Some APIs return a bare date-time without offset.
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_rejects_out_of_range() {
        assert!(SourceTier::new(0).is_err());
        assert!(SourceTier::new(5).is_err());
        assert_eq!(SourceTier::new(2).unwrap(), SourceTier::ESTABLISHED);
    }

    #[test]
    fn test_tier_ordering_puts_official_first() {
        assert!(SourceTier::OFFICIAL < SourceTier::UNVERIFIED);
    }

    #[test]
    fn test_tier_deserialize_validates() {
        let ok: SourceTier = serde_json::from_str("3").unwrap();
        assert_eq!(ok.rank(), 3);
        assert!(serde_json::from_str::<SourceTier>("9").is_err());
    }

    #[test]
    fn test_claim_serializes_camel_case() {
        let claim = Claim::new(
            "annual_revenue",
            "SAR 2.1B",
            "https://www.saudiexchange.sa/acme",
            SourceTier::OFFICIAL,
            NaiveDate::from_ymd_opt(2025, 3, 1),
            ClaimCategory::Financial,
        );

        let json = serde_json::to_value(&claim).unwrap();
        assert_eq!(json["sourceDate"], "2025-03-01");
        assert_eq!(json["tier"], 1);
        assert_eq!(json["category"], "financial");
    }

    #[test]
    fn test_placeholder_is_unknown_tier_three() {
        let claim = Claim::placeholder("company_size_signal", "search");
        assert!(claim.is_unknown());
        assert_eq!(claim.tier, SourceTier::GENERAL);
        assert!(claim.source_date.is_none());
    }

    #[test]
    fn test_parse_source_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 11, 5);
        assert_eq!(parse_source_date("2024-11-05"), expected);
        assert_eq!(parse_source_date("2024-11-05T10:00:00Z"), expected);
        assert_eq!(parse_source_date("Tue, 05 Nov 2024 10:00:00 GMT"), expected);
        assert_eq!(parse_source_date("2024-11-05 10:00"), expected);
        assert_eq!(parse_source_date("last week"), None);
        assert_eq!(parse_source_date(""), None);
    }
}
