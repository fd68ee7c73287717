//! Freshness caps and tier base confidence.
//!
//! A claim's confidence is bounded by how old its source is. Each category has
//! a "fresh" window; sources older than the window are capped, and sources
//! older than `stale_multiplier` windows are capped harder. The cap is only a
//! ceiling: it never raises a confidence.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::claims::{ClaimCategory, SourceTier};

/// Freshness thresholds. Defaults are tunable, not load-bearing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    /// Max fresh age for official claims, in days.
    pub official_days: i64,
    /// Max fresh age for financial claims, in days.
    pub financial_days: i64,
    /// Max fresh age for news claims, in days.
    pub news_days: i64,
    /// Max fresh age for social claims, in days.
    pub social_days: i64,
    /// Ages up to `max * stale_multiplier` get `stale_cap`.
    pub stale_multiplier: f64,
    /// Cap for sources past the fresh window.
    pub stale_cap: f64,
    /// Cap for sources past the stale window (or undated).
    pub expired_cap: f64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            official_days: 730,
            financial_days: 365,
            news_days: 365,
            social_days: 90,
            stale_multiplier: 1.5,
            stale_cap: 0.75,
            expired_cap: 0.6,
        }
    }
}

impl FreshnessConfig {
    /// Fresh window for a category.
    pub fn max_fresh_days(&self, category: ClaimCategory) -> i64 {
        match category {
            ClaimCategory::Official => self.official_days,
            ClaimCategory::Financial => self.financial_days,
            ClaimCategory::News => self.news_days,
            ClaimCategory::Social => self.social_days,
        }
    }

    /// Confidence ceiling for a claim of `category` dated `source_date`.
    ///
    /// `None` dates are treated as infinitely old.
    pub fn confidence_cap(
        &self,
        category: ClaimCategory,
        source_date: Option<NaiveDate>,
        today: NaiveDate,
    ) -> f64 {
        let Some(date) = source_date else {
            return self.expired_cap;
        };

        // Future-dated sources count as published today.
        let age_days = (today - date).num_days().max(0);
        let max_days = self.max_fresh_days(category);

        if age_days <= max_days {
            1.0
        } else if (age_days as f64) <= max_days as f64 * self.stale_multiplier {
            self.stale_cap
        } else {
            self.expired_cap
        }
    }
}

/// Fixed monotone mapping from source tier to base confidence.
pub fn tier_base_confidence(tier: SourceTier) -> f64 {
    match tier.rank() {
        1 => 0.95,
        2 => 0.85,
        3 => 0.70,
        _ => 0.50,
    }
}

/// Final confidence for a claim: the lower of its tier base and freshness cap.
pub fn claim_confidence(
    config: &FreshnessConfig,
    tier: SourceTier,
    category: ClaimCategory,
    source_date: Option<NaiveDate>,
    today: NaiveDate,
) -> f64 {
    config
        .confidence_cap(category, source_date, today)
        .min(tier_base_confidence(tier))
}
