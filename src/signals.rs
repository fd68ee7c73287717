//! Signals derived from resolved claims.
//!
//! These are simple predicates over claim keys and values. They summarize the
//! research for downstream scoring and never feed back into resolution.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::claims::{Claim, ClaimCategory, ResolvedClaim, SourceTier};
use crate::providers::is_exchange_source;

/// Marketing budget at or above this amount is `high`.
pub const HIGH_BUDGET_THRESHOLD: f64 = 50_000_000.0;
/// Marketing budget at or above this amount is `medium`.
pub const MEDIUM_BUDGET_THRESHOLD: f64 = 5_000_000.0;

static ARABIC_SCRIPT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\p{Arabic}").unwrap());

static LATIN_SCRIPT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\p{Latin}").unwrap());

static GOVERNMENT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:ministry|authority|municipality|government|council|commission|agency)\b",
        r"|وزارة|هيئة|أمانة|بلدية|مجلس"
    ))
    .unwrap()
});

static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([0-9][0-9,]*(?:\.[0-9]+)?)\s?(billion|bn|million|mn|m|k)?\b").unwrap()
});

/// Kind of organisation the client is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Government body.
    Government,
    /// Company listed on a stock exchange.
    ListedCompany,
    /// Anything else.
    Private,
}

/// Coarse size of the client's marketing budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetIndicator {
    /// At or above [`HIGH_BUDGET_THRESHOLD`].
    High,
    /// At or above [`MEDIUM_BUDGET_THRESHOLD`].
    Medium,
    /// Below [`MEDIUM_BUDGET_THRESHOLD`].
    Low,
    /// No usable figure.
    Unknown,
}

/// Number of claims whose value contains each script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptCounts {
    /// Claims with Latin letters.
    pub latin: usize,
    /// Claims with Arabic letters.
    pub arabic: usize,
}

impl ScriptCounts {
    /// Count scripts across claim values, skipping placeholders.
    pub fn from_claims(claims: &[Claim]) -> Self {
        claims
            .iter()
            .filter(|c| !c.is_unknown())
            .fold(Self::default(), |mut counts, claim| {
                if LATIN_SCRIPT.is_match(&claim.value) {
                    counts.latin += 1;
                }
                if ARABIC_SCRIPT.is_match(&claim.value) {
                    counts.arabic += 1;
                }
                counts
            })
    }

    /// Both scripts are present.
    pub fn is_bilingual(&self) -> bool {
        self.latin > 0 && self.arabic > 0
    }
}

/// Category-specific signals for one research result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedSignals {
    /// Organisation kind.
    pub entity_type: EntityType,
    /// Marketing budget bucket.
    pub marketing_budget_indicator: BudgetIndicator,
    /// Digital presence in both Latin and Arabic script.
    pub bilingual: bool,
    /// Confidence that the client advertises actively (0.0 - 1.0).
    pub advertising_activity_confidence: f64,
}

/// Derive signals from resolved claims.
pub fn derive_signals(
    client_name: &str,
    resolved: &[ResolvedClaim],
    scripts: ScriptCounts,
) -> DerivedSignals {
    DerivedSignals {
        entity_type: entity_type(client_name, resolved),
        marketing_budget_indicator: budget_indicator(resolved),
        bilingual: scripts.is_bilingual(),
        advertising_activity_confidence: advertising_confidence(resolved),
    }
}

fn entity_type(client_name: &str, resolved: &[ResolvedClaim]) -> EntityType {
    let official = resolved.iter().any(|r| {
        r.claim.tier == SourceTier::OFFICIAL
            && r.claim.category == ClaimCategory::Official
            && !r.claim.is_unknown()
    });
    if official || GOVERNMENT_NAME.is_match(client_name) {
        return EntityType::Government;
    }
    let listed = resolved.iter().any(|r| {
        r.claim.category == ClaimCategory::Financial && is_exchange_source(&r.claim.source)
    });
    if listed {
        EntityType::ListedCompany
    } else {
        EntityType::Private
    }
}

fn budget_indicator(resolved: &[ResolvedClaim]) -> BudgetIndicator {
    let amount = resolved
        .iter()
        .find(|r| r.claim.key == "marketing_budget" && !r.claim.is_unknown())
        .and_then(|r| parse_amount(&r.claim.value));

    match amount {
        Some(value) if value >= HIGH_BUDGET_THRESHOLD => BudgetIndicator::High,
        Some(value) if value >= MEDIUM_BUDGET_THRESHOLD => BudgetIndicator::Medium,
        Some(_) => BudgetIndicator::Low,
        None => BudgetIndicator::Unknown,
    }
}

fn advertising_confidence(resolved: &[ResolvedClaim]) -> f64 {
    resolved
        .iter()
        .find(|r| r.claim.key == "recent_campaign" && !r.claim.is_unknown())
        .map(|r| r.confidence)
        .unwrap_or(0.0)
}

/// Parse a figure like `SAR 4.2 billion` or `25mn` into a plain number.
///
/// Currency is ignored.
pub fn parse_amount(value: &str) -> Option<f64> {
    let captures = AMOUNT.captures(value)?;
    let number: f64 = captures.get(1)?.as_str().replace(',', "").parse().ok()?;
    let scale = match captures
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .as_deref()
    {
        Some("billion") | Some("bn") => 1_000_000_000.0,
        Some("million") | Some("mn") | Some("m") => 1_000_000.0,
        Some("k") => 1_000.0,
        _ => 1.0,
    };
    Some(number * scale)
}
