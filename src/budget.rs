//! Per-analysis usage caps, per-user daily quotas, and burn-rate forecasts.
//!
//! Counters live in memory for the life of the process. They are soft
//! guardrails, not billing records.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::warn;

use crate::error::{Error, Result};

/// Budget caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// `BUDGET_TOKENS_PER_ANALYSIS`
    pub tokens_per_analysis: u64,
    /// `BUDGET_OCR_PAGES_PER_ANALYSIS`
    pub ocr_pages_per_analysis: u64,
    /// `BUDGET_QUERIES_PER_ANALYSIS`
    pub queries_per_analysis: u64,
    /// `BUDGET_DAILY_ANALYSES_PER_USER`
    pub daily_analyses_per_user: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            tokens_per_analysis: 200_000,
            ocr_pages_per_analysis: 300,
            queries_per_analysis: 60,
            daily_analyses_per_user: 50,
        }
    }
}

/// Usage delta for one registration. Negative inputs are floored at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageDelta {
    /// LLM tokens consumed.
    pub tokens: Option<i64>,
    /// OCR pages processed.
    pub ocr_pages: Option<i64>,
    /// Provider queries issued.
    pub queries: Option<i64>,
}

impl UsageDelta {
    /// Delta that only counts provider queries.
    pub fn queries(count: u64) -> Self {
        Self {
            queries: Some(count.min(i64::MAX as u64) as i64),
            ..Default::default()
        }
    }
}

fn floor_at_zero(value: Option<i64>) -> u64 {
    value.unwrap_or(0).max(0) as u64
}

/// Running totals for one analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisUsage {
    /// LLM tokens.
    pub tokens: u64,
    /// OCR pages.
    pub ocr_pages: u64,
    /// Provider queries.
    pub queries: u64,
}

/// Linear month-end projection of usage to date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRateForecast {
    /// `days_in_month / day_of_month`.
    pub multiplier: f64,
    /// Projected month-end tokens.
    pub projected_tokens: f64,
    /// Projected month-end OCR pages.
    pub projected_ocr_pages: f64,
    /// Projected month-end queries.
    pub projected_queries: f64,
}

/// Tracks usage against caps.
#[derive(Debug, Default)]
pub struct BudgetTracker {
    config: BudgetConfig,
    usage: RwLock<HashMap<String, AnalysisUsage>>,
    daily: RwLock<HashMap<(String, NaiveDate), HashSet<String>>>,
}

impl BudgetTracker {
    /// Create a tracker with the given caps.
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            usage: RwLock::new(HashMap::new()),
            daily: RwLock::new(HashMap::new()),
        }
    }

    /// Configured caps.
    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Add usage for `analysis_id`, then check every cap.
    ///
    /// The delta is kept even when a cap is exceeded: totals are monotone and
    /// the error reports what was actually consumed.
    pub fn register(&self, analysis_id: &str, delta: UsageDelta) -> Result<AnalysisUsage> {
        if analysis_id.trim().is_empty() {
            return Err(Error::Validation("analysis id must not be empty".to_string()));
        }

        let totals = {
            let mut guard = self.usage.write().unwrap_or_else(|e| e.into_inner());
            let entry = guard.entry(analysis_id.to_string()).or_default();
            entry.tokens = entry.tokens.saturating_add(floor_at_zero(delta.tokens));
            entry.ocr_pages = entry.ocr_pages.saturating_add(floor_at_zero(delta.ocr_pages));
            entry.queries = entry.queries.saturating_add(floor_at_zero(delta.queries));
            *entry
        };

        let checks = [
            ("tokens", totals.tokens, self.config.tokens_per_analysis),
            ("ocr_pages", totals.ocr_pages, self.config.ocr_pages_per_analysis),
            ("queries", totals.queries, self.config.queries_per_analysis),
        ];
        for (counter, observed, cap) in checks {
            if observed > cap {
                warn!(analysis_id, counter, observed, cap, "analysis budget exceeded");
                return Err(Error::BudgetExceeded {
                    analysis_id: analysis_id.to_string(),
                    counter,
                    observed,
                    cap,
                });
            }
        }

        Ok(totals)
    }

    /// Totals for an analysis (zero when unseen).
    pub fn usage(&self, analysis_id: &str) -> AnalysisUsage {
        let guard = self.usage.read().unwrap_or_else(|e| e.into_inner());
        guard.get(analysis_id).copied().unwrap_or_default()
    }

    /// Headroom left under each cap.
    pub fn remaining(&self, analysis_id: &str) -> AnalysisUsage {
        let used = self.usage(analysis_id);
        AnalysisUsage {
            tokens: self.config.tokens_per_analysis.saturating_sub(used.tokens),
            ocr_pages: self.config.ocr_pages_per_analysis.saturating_sub(used.ocr_pages),
            queries: self.config.queries_per_analysis.saturating_sub(used.queries),
        }
    }

    /// Count `analysis_id` toward `user_key`'s quota for the UTC day of `now`.
    ///
    /// Re-checking an analysis already counted today is free. Returns the
    /// number of distinct analyses counted for the day.
    pub fn check_daily_quota(
        &self,
        user_key: &str,
        analysis_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let day = now.date_naive();
        let cap = self.config.daily_analyses_per_user;

        let mut guard = self.daily.write().unwrap_or_else(|e| e.into_inner());
        // Earlier days can never be charged again.
        guard.retain(|(_, entry_day), _| *entry_day >= day);

        let seen = guard.entry((user_key.to_string(), day)).or_default();
        if seen.contains(analysis_id) {
            return Ok(seen.len() as u64);
        }
        if seen.len() as u64 >= cap {
            warn!(user_key, %day, cap, "daily analysis quota exceeded");
            return Err(Error::DailyQuotaExceeded {
                user_key: user_key.to_string(),
                day: day.to_string(),
                count: seen.len() as u64,
                cap,
            });
        }
        seen.insert(analysis_id.to_string());
        Ok(seen.len() as u64)
    }

    /// Sum of usage across every tracked analysis.
    pub fn total_usage(&self) -> AnalysisUsage {
        let guard = self.usage.read().unwrap_or_else(|e| e.into_inner());
        guard.values().fold(AnalysisUsage::default(), |acc, u| AnalysisUsage {
            tokens: acc.tokens.saturating_add(u.tokens),
            ocr_pages: acc.ocr_pages.saturating_add(u.ocr_pages),
            queries: acc.queries.saturating_add(u.queries),
        })
    }

    /// Clear every counter (tests only).
    pub fn reset(&self) {
        self.usage.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.daily.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Extrapolate month-to-date usage linearly to the whole month of `today`.
pub fn forecast_monthly(usage_to_date: AnalysisUsage, today: NaiveDate) -> BurnRateForecast {
    let multiplier = days_in_month(today) as f64 / today.day() as f64;
    BurnRateForecast {
        multiplier,
        projected_tokens: usage_to_date.tokens as f64 * multiplier,
        projected_ocr_pages: usage_to_date.ocr_pages as f64 * multiplier,
        projected_queries: usage_to_date.queries as f64 * multiplier,
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(30)
}
