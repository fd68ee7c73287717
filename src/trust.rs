//! Trust resolution for conflicting claims.
//!
//! This module handles:
//! - Grouping claims by fact key
//! - Counting agreement between sources on the same value
//! - Picking one winner per key with a deterministic total order
//!
//! The order is, in priority: lower tier first, then higher agreement, then
//! more recent source date (undated last). Remaining ties are broken by value
//! and then source so the outcome never depends on input order.

use chrono::NaiveDate;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, HashMap};

use crate::claims::{Claim, ResolvedClaim};
use crate::freshness::{claim_confidence, FreshnessConfig};

/// Resolution of one fact key before confidence is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The winning claim.
    pub winner: Claim,
    /// Number of claims in the group sharing the winner's value.
    pub agreement_count: usize,
    /// Number of claims in the group.
    pub group_size: usize,
}

/// Resolve claims into one winner per key.
///
/// Output is sorted by key.
pub fn resolve(claims: &[Claim]) -> Vec<Resolution> {
    let mut groups: BTreeMap<&str, Vec<&Claim>> = BTreeMap::new();
    for claim in claims {
        groups.entry(claim.key.as_str()).or_default().push(claim);
    }

    groups
        .into_values()
        .filter_map(|group| resolve_group(&group))
        .collect()
}

fn resolve_group(group: &[&Claim]) -> Option<Resolution> {
    let mut agreement: HashMap<&str, usize> = HashMap::new();
    for claim in group {
        *agreement.entry(claim.value.as_str()).or_insert(0) += 1;
    }

    let winner = group
        .iter()
        .copied()
        .min_by(|a, b| compare_claims(a, b, &agreement))?;

    Some(Resolution {
        winner: winner.clone(),
        agreement_count: agreement[winner.value.as_str()],
        group_size: group.len(),
    })
}

/// Total order used to pick a winner; `Less` wins.
fn compare_claims(a: &Claim, b: &Claim, agreement: &HashMap<&str, usize>) -> Ordering {
    let key = |c: &Claim| {
        (
            c.tier,
            Reverse(agreement[c.value.as_str()]),
            Reverse(date_rank(c.source_date)),
        )
    };

    key(a)
        .cmp(&key(b))
        .then_with(|| a.value.cmp(&b.value))
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.category.as_str().cmp(b.category.as_str()))
}

/// Undated claims rank below every dated one.
fn date_rank(date: Option<NaiveDate>) -> (bool, Option<NaiveDate>) {
    (date.is_some(), date)
}

/// Trust resolver: resolution plus confidence capping.
#[derive(Debug, Clone, Default)]
pub struct TrustResolver {
    freshness: FreshnessConfig,
}

impl TrustResolver {
    /// Create a resolver with the given freshness thresholds.
    pub fn new(freshness: FreshnessConfig) -> Self {
        Self { freshness }
    }

    /// Freshness thresholds in use.
    pub fn freshness(&self) -> &FreshnessConfig {
        &self.freshness
    }

    /// Resolve claims and assign each winner its capped confidence.
    pub fn resolve(&self, claims: &[Claim], today: NaiveDate) -> Vec<ResolvedClaim> {
        resolve(claims)
            .into_iter()
            .map(|resolution| {
                let claim = resolution.winner;
                let confidence = claim_confidence(
                    &self.freshness,
                    claim.tier,
                    claim.category,
                    claim.source_date,
                    today,
                );
                ResolvedClaim {
                    claim,
                    agreement_count: resolution.agreement_count,
                    confidence,
                }
            })
            .collect()
    }
}

/// Mean confidence of resolved claims, `default` when there are none.
pub fn overall_confidence(resolved: &[ResolvedClaim], default: f64) -> f64 {
    if resolved.is_empty() {
        return default;
    }
    resolved.iter().map(|r| r.confidence).sum::<f64>() / resolved.len() as f64
}
