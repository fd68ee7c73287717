//! Web-search API provider.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::extract::extract_claims;
use super::{ProviderQuery, ProviderSettings, ResearchProvider};
use crate::claims::{parse_source_date, Claim};
use crate::error::{Error, Result};
use crate::transport::{FetchRequest, ResilientTransport};

/// Provider name used when none is configured.
pub const DEFAULT_NAME: &str = "search";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    published_date: Option<String>,
}

/// Queries a JSON web-search API and extracts claims from result snippets.
///
/// Expects `GET {endpoint}?q=..&lang=..&country=..&num=..` to answer
/// `{"results": [{"title", "url", "snippet", "published_date"}]}`.
#[derive(Debug, Clone)]
pub struct SearchApiProvider {
    name: String,
    settings: ProviderSettings,
    transport: ResilientTransport,
}

impl SearchApiProvider {
    /// Create a provider.
    pub fn new(
        name: impl Into<String>,
        settings: ProviderSettings,
        transport: ResilientTransport,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            transport,
        }
    }

    fn build_request(&self, query: &ProviderQuery, api_key: &str) -> FetchRequest {
        FetchRequest::get(self.settings.endpoint.clone())
            .query("q", query.text.clone())
            .query("lang", query.language.tag())
            .query("country", query.country.code())
            .query("num", self.settings.max_results.to_string())
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Accept", "application/json")
    }
}

#[async_trait]
impl ResearchProvider for SearchApiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, query: &ProviderQuery) -> Result<Vec<Claim>> {
        let Some(api_key) = self.settings.api_key() else {
            debug!(
                provider = %self.name,
                topic = query.topic.as_str(),
                "no API key, returning placeholder"
            );
            return Ok(vec![Claim::placeholder(query.topic.placeholder_key(), &self.name)]);
        };

        let operation = format!("{}:{}", self.name, query.topic.as_str());
        let response = self
            .transport
            .send(&operation, || self.build_request(query, api_key), Some(&query.cancel))
            .await?
            .error_for_status()?;

        let parsed: SearchResponse = response.json().map_err(|e| Error::Provider {
            provider: self.name.clone(),
            message: format!("malformed search response: {}", e),
        })?;

        let claims: Vec<Claim> = parsed
            .results
            .iter()
            .take(self.settings.max_results)
            .flat_map(|result| {
                extract_claims(
                    query.topic,
                    &result.url,
                    &result.title,
                    &result.snippet,
                    result.published_date.as_deref().and_then(parse_source_date),
                )
            })
            .collect();

        debug!(
            provider = %self.name,
            topic = query.topic.as_str(),
            language = query.language.tag(),
            results = parsed.results.len(),
            claims = claims.len(),
            "search completed"
        );
        Ok(claims)
    }
}
