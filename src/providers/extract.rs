//! Pattern-based claim extraction from free text.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

use super::{classify_source, ResearchTopic};
use crate::claims::Claim;

/// Longest value kept for headline-style claims.
const HEADLINE_LIMIT: usize = 160;

const AMOUNT: &str = concat!(
    r"((?:SAR|AED|QAR|KWD|BHD|OMR|EGP|JOD|USD|US\$|\$)\s?[0-9][0-9.,]*",
    r"(?:\s?(?:billion|million|bn|mn|m|k)\b)?",
    r"|[0-9][0-9.,]*\s?(?:billion|million|bn|mn)",
    r"(?:\s?(?:SAR|AED|QAR|KWD|BHD|OMR|EGP|JOD|USD|riyals?|dirhams?|dollars))?)"
);

static REVENUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:revenues?|sales|turnover)\b[^0-9$]{{0,40}}?{}",
        AMOUNT
    ))
    .unwrap()
});

static EMPLOYEES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([0-9][0-9,]*)\+?\s+(?:employees|staff|people)\b").unwrap()
});

static MARKETING_BUDGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:marketing|advertising|ad)\s+(?:budget|spend(?:ing)?|expenditure)\b{}{}",
        r"[^0-9$]{0,40}?",
        AMOUNT
    ))
    .unwrap()
});

static CAMPAIGN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:campaign|launch(?:es|ed)?|sponsor(?:s|ed|ship)?|rebrand(?:ed|ing)?)\b",
        r"|حملة|إطلاق|رعاية"
    ))
    .unwrap()
});

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)?
        .get(1)
        .map(|m| normalize_whitespace(m.as_str()))
}

fn normalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn headline(title: &str, text: &str) -> String {
    let base = if title.trim().is_empty() { text } else { title };
    let normalized = normalize_whitespace(base);
    if normalized.chars().count() <= HEADLINE_LIMIT {
        normalized
    } else {
        normalized.chars().take(HEADLINE_LIMIT).collect()
    }
}

/// Extract claims for `topic` from one document.
///
/// Tier and category come from the source URL's class.
pub fn extract_claims(
    topic: ResearchTopic,
    source: &str,
    title: &str,
    text: &str,
    source_date: Option<NaiveDate>,
) -> Vec<Claim> {
    let class = classify_source(source);
    let tier = class.tier();
    let category = class.category(topic);
    let combined = format!("{} {}", title, text);
    let claim =
        |key: &str, value: String| Claim::new(key, value, source, tier, source_date, category);

    let mut claims = Vec::new();
    match topic {
        ResearchTopic::CompanySize => {
            if let Some(revenue) = capture(&REVENUE, &combined) {
                claims.push(claim("annual_revenue", revenue));
            }
            if let Some(employees) = capture(&EMPLOYEES, &combined) {
                claims.push(claim("employee_count", employees.replace(',', "")));
            }
        }
        ResearchTopic::MarketingBudget => {
            if let Some(budget) = capture(&MARKETING_BUDGET, &combined) {
                claims.push(claim("marketing_budget", budget));
            }
        }
        ResearchTopic::RecentCampaigns => {
            if CAMPAIGN.is_match(&combined) {
                claims.push(claim("recent_campaign", headline(title, text)));
            }
        }
    }
    claims
}
