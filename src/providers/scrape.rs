//! Page-scrape API provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::extract::extract_claims;
use super::{ProviderQuery, ProviderSettings, ResearchProvider};
use crate::claims::{parse_source_date, Claim};
use crate::error::{Error, Result};
use crate::transport::{FetchRequest, ResilientTransport};

/// Provider name used when none is configured.
pub const DEFAULT_NAME: &str = "scrape";

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
}

/// Asks a scraping service for the best page about the client and extracts
/// claims from its content.
///
/// Sends `POST {endpoint}` with `{"query", "language", "country"}` and expects
/// `{"url", "title", "content", "published_at"}` back.
#[derive(Debug, Clone)]
pub struct ScrapeProvider {
    name: String,
    settings: ProviderSettings,
    transport: ResilientTransport,
}

impl ScrapeProvider {
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
}

#[async_trait]
impl ResearchProvider for ScrapeProvider {
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

        let body = json!({
            "query": query.text,
            "language": query.language.tag(),
            "country": query.country.code(),
        });
        let operation = format!("{}:{}", self.name, query.topic.as_str());
        let response = self
            .transport
            .send(
                &operation,
                || {
                    FetchRequest::post_json(self.settings.endpoint.clone(), body.clone())
                        .header("x-api-key", api_key)
                },
                Some(&query.cancel),
            )
            .await?
            .error_for_status()?;

        let page: ScrapeResponse = response.json().map_err(|e| Error::Provider {
            provider: self.name.clone(),
            message: format!("malformed scrape response: {}", e),
        })?;

        let content = page.content.unwrap_or_default();
        let mut claims = extract_claims(
            query.topic,
            &page.url,
            &page.title,
            &content,
            page.published_at.as_deref().and_then(parse_source_date),
        );
        claims.truncate(self.settings.max_results.max(1));

        debug!(
            provider = %self.name,
            topic = query.topic.as_str(),
            url = %page.url,
            claims = claims.len(),
            "scrape completed"
        );
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{ClaimCategory, SourceTier};
    use crate::providers::{build_queries, Country, Language, ResearchRequest, ResearchTopic};
    use crate::transport::{Fetch, FetchResponse, HttpMethod, TransportOptions};
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    struct CannedFetch {
        response: FetchResponse,
        seen: Mutex<Vec<FetchRequest>>,
    }

    #[async_trait]
    impl Fetch for CannedFetch {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    fn provider(
        api_key: Option<&str>,
        response: FetchResponse,
    ) -> (ScrapeProvider, Arc<CannedFetch>) {
        let fetch = Arc::new(CannedFetch {
            response,
            seen: Mutex::new(Vec::new()),
        });
        let settings = ProviderSettings {
            endpoint: "https://scrape.example/v1/page".to_string(),
            api_key: api_key.map(str::to_string),
            ..Default::default()
        };
        let transport = ResilientTransport::new(
            fetch.clone(),
            TransportOptions {
                max_attempts: 1,
                ..Default::default()
            },
        );
        (ScrapeProvider::new("scrape", settings, transport), fetch)
    }

    fn arabic_query(topic: ResearchTopic) -> ProviderQuery {
        let request = ResearchRequest {
            analysis_id: "a-1".to_string(),
            client_name: "Acme".to_string(),
            client_name_arabic: Some("أكمي".to_string()),
            country: Country::UnitedArabEmirates,
        };
        build_queries(&request, &CancellationToken::new())
            .into_iter()
            .find(|q| q.topic == topic && q.language == Language::Arabic)
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_key_yields_placeholder() {
        let (provider, fetch) = provider(Some("  "), FetchResponse::new(200, "{}"));

        let claims = provider
            .query(&arabic_query(ResearchTopic::RecentCampaigns))
            .await
            .unwrap();

        assert_eq!(claims, vec![Claim::placeholder("recent_campaign_signal", "scrape")]);
        assert!(fetch.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registry_page_is_tier_one() {
        let body = r#"{"url":"https://www.adx.ae/company/acme","title":"Acme PJSC",
            "content":"Total revenues AED 900 million; 2,100 employees",
            "published_at":"2026-03-01T10:00:00Z"}"#;
        let (provider, fetch) = provider(Some("k"), FetchResponse::new(200, body));

        let claims = provider
            .query(&arabic_query(ResearchTopic::CompanySize))
            .await
            .unwrap();

        assert_eq!(claims.len(), 2);
        assert!(claims.iter().all(|c| c.tier == SourceTier::OFFICIAL));
        assert!(claims.iter().all(|c| c.category == ClaimCategory::Financial));
        assert_eq!(claims[0].value, "AED 900 million");

        let seen = fetch.seen.lock().unwrap();
        assert_eq!(seen[0].method, HttpMethod::Post);
        let sent = seen[0].body.as_ref().unwrap();
        assert_eq!(sent["language"], "ar");
        assert_eq!(sent["country"], "AE");
    }

    #[tokio::test]
    async fn test_page_without_content_yields_no_claims() {
        let body = r#"{"url":"https://acme.com","title":"Acme"}"#;
        let (provider, _) = provider(Some("k"), FetchResponse::new(200, body));

        let claims = provider
            .query(&arabic_query(ResearchTopic::MarketingBudget))
            .await
            .unwrap();

        assert!(claims.is_empty());
    }
}
