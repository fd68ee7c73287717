//! Research providers.
//!
//! A provider turns one [`ProviderQuery`] into zero or more [`Claim`]s. The
//! orchestrator only sees the [`ResearchProvider`] trait; breakers, health
//! scoring and conflict resolution are layered on top without the provider
//! knowing.
//!
//! This module also builds the bilingual query set for a research request
//! and classifies source domains into trust tiers.

pub mod extract;
pub mod scrape;
pub mod search;

pub use scrape::ScrapeProvider;
pub use search::SearchApiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::claims::{Claim, ClaimCategory, SourceTier};
use crate::error::{Error, Result};

/// A source of research claims.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    /// Stable provider name, used as the breaker and health key.
    fn name(&self) -> &str;

    /// Run one query.
    ///
    /// A provider missing its credentials returns a single placeholder claim
    /// instead of failing.
    async fn query(&self, query: &ProviderQuery) -> Result<Vec<Claim>>;
}

/// Endpoint and credentials for one HTTP provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Whether the provider takes part in research.
    pub enabled: bool,
    /// API endpoint URL.
    pub endpoint: String,
    /// API key; blank or absent degrades the provider to placeholders.
    pub api_key: Option<String>,
    /// Results (or claims) kept per query.
    pub max_results: usize,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: String::new(),
            api_key: None,
            max_results: 5,
        }
    }
}

impl ProviderSettings {
    /// Non-blank API key.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Country of the research subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Country {
    /// Saudi Arabia
    #[serde(rename = "SA")]
    SaudiArabia,
    /// United Arab Emirates
    #[serde(rename = "AE")]
    UnitedArabEmirates,
    /// Qatar
    #[serde(rename = "QA")]
    Qatar,
    /// Kuwait
    #[serde(rename = "KW")]
    Kuwait,
    /// Bahrain
    #[serde(rename = "BH")]
    Bahrain,
    /// Oman
    #[serde(rename = "OM")]
    Oman,
    /// Egypt
    #[serde(rename = "EG")]
    Egypt,
    /// Jordan
    #[serde(rename = "JO")]
    Jordan,
}

impl Country {
    /// Every supported country.
    pub const ALL: [Country; 8] = [
        Country::SaudiArabia,
        Country::UnitedArabEmirates,
        Country::Qatar,
        Country::Kuwait,
        Country::Bahrain,
        Country::Oman,
        Country::Egypt,
        Country::Jordan,
    ];

    /// ISO 3166-1 alpha-2 code.
    pub fn code(self) -> &'static str {
        match self {
            Country::SaudiArabia => "SA",
            Country::UnitedArabEmirates => "AE",
            Country::Qatar => "QA",
            Country::Kuwait => "KW",
            Country::Bahrain => "BH",
            Country::Oman => "OM",
            Country::Egypt => "EG",
            Country::Jordan => "JO",
        }
    }

    /// English name.
    pub fn name_en(self) -> &'static str {
        match self {
            Country::SaudiArabia => "Saudi Arabia",
            Country::UnitedArabEmirates => "United Arab Emirates",
            Country::Qatar => "Qatar",
            Country::Kuwait => "Kuwait",
            Country::Bahrain => "Bahrain",
            Country::Oman => "Oman",
            Country::Egypt => "Egypt",
            Country::Jordan => "Jordan",
        }
    }

    /// Arabic name.
    pub fn name_ar(self) -> &'static str {
        match self {
            Country::SaudiArabia => "السعودية",
            Country::UnitedArabEmirates => "الإمارات",
            Country::Qatar => "قطر",
            Country::Kuwait => "الكويت",
            Country::Bahrain => "البحرين",
            Country::Oman => "عمان",
            Country::Egypt => "مصر",
            Country::Jordan => "الأردن",
        }
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Country {
    type Err = Error;

    /// Accepts the alpha-2 code or the English name, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Country::ALL
            .into_iter()
            .find(|c| {
                c.code().eq_ignore_ascii_case(wanted) || c.name_en().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| Error::Validation(format!("unsupported country '{}'", s)))
    }
}

/// Query language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English
    English,
    /// Arabic
    Arabic,
}

impl Language {
    /// BCP 47 tag.
    pub fn tag(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Arabic => "ar",
        }
    }
}

/// What a query is trying to learn about the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchTopic {
    /// Company size and revenue.
    CompanySize,
    /// Marketing budget and advertising spend.
    MarketingBudget,
    /// Recent campaign news.
    RecentCampaigns,
}

impl ResearchTopic {
    /// Every topic, in query order.
    pub const ALL: [ResearchTopic; 3] = [
        ResearchTopic::CompanySize,
        ResearchTopic::MarketingBudget,
        ResearchTopic::RecentCampaigns,
    ];

    /// Short identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            ResearchTopic::CompanySize => "company_size",
            ResearchTopic::MarketingBudget => "marketing_budget",
            ResearchTopic::RecentCampaigns => "recent_campaign",
        }
    }

    /// Key of the placeholder claim emitted when a provider cannot run.
    pub fn placeholder_key(self) -> String {
        format!("{}_signal", self.as_str())
    }

    /// Category assumed for claims from general sources on this topic.
    pub fn default_category(self) -> ClaimCategory {
        match self {
            ResearchTopic::CompanySize | ResearchTopic::MarketingBudget => {
                ClaimCategory::Financial
            }
            ResearchTopic::RecentCampaigns => ClaimCategory::News,
        }
    }

    fn english_terms(self) -> &'static str {
        match self {
            ResearchTopic::CompanySize => "company size annual revenue employees",
            ResearchTopic::MarketingBudget => "marketing budget advertising spend",
            ResearchTopic::RecentCampaigns => "latest marketing campaign news",
        }
    }

    fn arabic_terms(self) -> &'static str {
        match self {
            ResearchTopic::CompanySize => "حجم الشركة الإيرادات السنوية عدد الموظفين",
            ResearchTopic::MarketingBudget => "ميزانية التسويق الإنفاق الإعلاني",
            ResearchTopic::RecentCampaigns => "أحدث حملة تسويقية أخبار",
        }
    }
}

/// A research request as received from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchRequest {
    /// Analysis this research belongs to.
    pub analysis_id: String,
    /// Client name in Latin script.
    pub client_name: String,
    /// Client name in Arabic script, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name_arabic: Option<String>,
    /// Client country.
    pub country: Country,
}

impl ResearchRequest {
    /// Reject empty identifiers.
    pub fn validate(&self) -> Result<()> {
        if self.analysis_id.trim().is_empty() {
            return Err(Error::Validation("analysisId must not be empty".to_string()));
        }
        if self.client_name.trim().is_empty() {
            return Err(Error::Validation("clientName must not be empty".to_string()));
        }
        Ok(())
    }

    /// Arabic name, falling back to the Latin one.
    pub fn arabic_name(&self) -> &str {
        self.client_name_arabic
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.client_name.trim())
    }
}

/// One provider call's input.
#[derive(Debug, Clone)]
pub struct ProviderQuery {
    /// Analysis the query is charged to.
    pub analysis_id: String,
    /// Client name as used in this query's language.
    pub client_name: String,
    /// Client country.
    pub country: Country,
    /// Topic.
    pub topic: ResearchTopic,
    /// Query language.
    pub language: Language,
    /// Full query text.
    pub text: String,
    /// Cancelled when the enclosing research request is abandoned.
    pub cancel: CancellationToken,
}

/// Build the topic x language query set for a request.
pub fn build_queries(request: &ResearchRequest, cancel: &CancellationToken) -> Vec<ProviderQuery> {
    let latin = request.client_name.trim();
    let arabic = request.arabic_name();

    ResearchTopic::ALL
        .into_iter()
        .flat_map(|topic| {
            [
                (Language::English, latin, request.country.name_en(), topic.english_terms()),
                (Language::Arabic, arabic, request.country.name_ar(), topic.arabic_terms()),
            ]
            .into_iter()
            .map(move |(language, name, country, terms)| (topic, language, name, country, terms))
        })
        .map(|(topic, language, name, country, terms)| ProviderQuery {
            analysis_id: request.analysis_id.clone(),
            client_name: name.to_string(),
            country: request.country,
            topic,
            language,
            text: format!("{} {} {}", name, country, terms),
            cancel: cancel.clone(),
        })
        .collect()
}

/// Trust class of a source domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceClass {
    /// Government portal or stock-exchange registry.
    Registry {
        /// Whether the host is a stock exchange.
        exchange: bool,
    },
    /// Established financial or news outlet.
    Established {
        /// Whether the outlet is primarily financial.
        financial: bool,
    },
    /// Anything not otherwise classified.
    General,
    /// Blogs and social networks.
    Social,
}

const EXCHANGE_HOSTS: &[&str] = &[
    "saudiexchange.sa",
    "tadawul.com.sa",
    "adx.ae",
    "dfm.ae",
    "qe.com.qa",
    "boursakuwait.com.kw",
    "bahrainbourse.com",
    "msx.om",
    "egx.com.eg",
    "ase.com.jo",
];

const FINANCIAL_HOSTS: &[&str] = &[
    "reuters.com",
    "bloomberg.com",
    "ft.com",
    "wsj.com",
    "cnbc.com",
    "forbes.com",
    "forbesmiddleeast.com",
    "zawya.com",
    "argaam.com",
    "aleqt.com",
];

const NEWS_HOSTS: &[&str] = &[
    "arabnews.com",
    "thenationalnews.com",
    "gulfnews.com",
    "khaleejtimes.com",
    "alarabiya.net",
    "aljazeera.net",
    "aljazeera.com",
    "spa.gov.sa",
    "wam.ae",
    "campaignme.com",
];

const SOCIAL_HOSTS: &[&str] = &[
    "linkedin.com",
    "twitter.com",
    "x.com",
    "facebook.com",
    "instagram.com",
    "youtube.com",
    "tiktok.com",
    "reddit.com",
    "medium.com",
    "substack.com",
    "blogspot.com",
    "wordpress.com",
    "tumblr.com",
];

/// Lowercased host of a URL, without `www.`. Scheme-less input is read as `https`.
pub fn host_of(url: &str) -> String {
    let url = url.trim();
    let parsed = match Url::parse(url) {
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{}", url)),
        other => other,
    };
    let host = parsed
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

fn matches_host(host: &str, domains: &[&str]) -> bool {
    domains
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

/// `.gov`, `.mil` or `.gov.<cc>` as the trailing labels of the host.
fn is_government_host(host: &str) -> bool {
    let mut labels = host.rsplit('.');
    match (labels.next(), labels.next()) {
        (Some("gov" | "mil"), Some(_)) => true,
        (Some(cc), Some("gov")) => cc.len() == 2 && cc.bytes().all(|b| b.is_ascii_lowercase()),
        _ => false,
    }
}

/// Classify a source URL.
pub fn classify_source(url: &str) -> SourceClass {
    let host = host_of(url);
    if matches_host(&host, EXCHANGE_HOSTS) {
        SourceClass::Registry { exchange: true }
    } else if matches_host(&host, NEWS_HOSTS) {
        // State news agencies live under .gov domains but report, not register.
        SourceClass::Established { financial: false }
    } else if is_government_host(&host) {
        SourceClass::Registry { exchange: false }
    } else if matches_host(&host, FINANCIAL_HOSTS) {
        SourceClass::Established { financial: true }
    } else if matches_host(&host, SOCIAL_HOSTS) {
        SourceClass::Social
    } else {
        SourceClass::General
    }
}

/// Whether a source URL points at a stock exchange.
pub fn is_exchange_source(url: &str) -> bool {
    matches!(classify_source(url), SourceClass::Registry { exchange: true })
}

impl SourceClass {
    /// Trust tier of the class.
    pub fn tier(self) -> SourceTier {
        match self {
            SourceClass::Registry { .. } => SourceTier::OFFICIAL,
            SourceClass::Established { .. } => SourceTier::ESTABLISHED,
            SourceClass::General => SourceTier::GENERAL,
            SourceClass::Social => SourceTier::UNVERIFIED,
        }
    }

    /// Claim category for a claim from this class on `topic`.
    pub fn category(self, topic: ResearchTopic) -> ClaimCategory {
        match self {
            SourceClass::Registry { exchange: true } => ClaimCategory::Financial,
            SourceClass::Registry { exchange: false } => ClaimCategory::Official,
            SourceClass::Established { financial: true } => ClaimCategory::Financial,
            SourceClass::Established { financial: false } => ClaimCategory::News,
            SourceClass::Social => ClaimCategory::Social,
            SourceClass::General => topic.default_category(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::parse_source_date;

    fn request(arabic: Option<&str>) -> ResearchRequest {
        ResearchRequest {
            analysis_id: "a-1".to_string(),
            client_name: "Acme Trading".to_string(),
            client_name_arabic: arabic.map(str::to_string),
            country: Country::SaudiArabia,
        }
    }

    // ========== Query building ==========

    #[test]
    fn test_build_queries_covers_every_topic_in_both_languages() {
        let queries =
            build_queries(&request(Some("أكمي للتجارة")), &CancellationToken::new());

        assert_eq!(queries.len(), 6);
        for topic in ResearchTopic::ALL {
            for language in [Language::English, Language::Arabic] {
                assert_eq!(
                    queries
                        .iter()
                        .filter(|q| q.topic == topic && q.language == language)
                        .count(),
                    1
                );
            }
        }
        let arabic = queries
            .iter()
            .find(|q| q.language == Language::Arabic)
            .unwrap();
        assert!(arabic.text.starts_with("أكمي للتجارة"));
        assert!(arabic.text.contains("السعودية"));
    }

    #[test]
    fn test_arabic_queries_fall_back_to_latin_name() {
        for arabic in [None, Some("   ")] {
            let queries = build_queries(&request(arabic), &CancellationToken::new());

            assert!(queries
                .iter()
                .filter(|q| q.language == Language::Arabic)
                .all(|q| q.client_name == "Acme Trading"));
        }
    }

    #[test]
    fn test_queries_share_the_request_cancellation() {
        let token = CancellationToken::new();
        let queries = build_queries(&request(None), &token);

        token.cancel();

        assert!(queries.iter().all(|q| q.cancel.is_cancelled()));
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        let mut blank_name = request(None);
        blank_name.client_name = " ".to_string();
        let mut blank_id = request(None);
        blank_id.analysis_id = String::new();

        assert!(matches!(blank_name.validate(), Err(Error::Validation(_))));
        assert!(matches!(blank_id.validate(), Err(Error::Validation(_))));
        assert!(request(None).validate().is_ok());
    }

    #[test]
    fn test_request_wire_format() {
        let json = r#"{"analysisId":"a-9","clientName":"Acme","country":"AE"}"#;

        let parsed: ResearchRequest = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.country, Country::UnitedArabEmirates);
        assert_eq!(parsed.client_name_arabic, None);
    }

    #[test]
    fn test_country_from_str() {
        assert_eq!("sa".parse::<Country>().unwrap(), Country::SaudiArabia);
        assert_eq!("Qatar".parse::<Country>().unwrap(), Country::Qatar);
        assert!("Atlantis".parse::<Country>().is_err());
    }

    // ========== Source classification ==========

    #[test]
    fn test_host_extraction() {
        assert_eq!(host_of("https://www.Reuters.com/markets/x?y=1"), "reuters.com");
        assert_eq!(host_of("http://user@mc.gov.sa:8080/path"), "mc.gov.sa");
        assert_eq!(host_of("argaam.com/en"), "argaam.com");
        assert_eq!(host_of("not a url"), "");
    }

    #[test]
    fn test_backslash_before_userinfo_is_a_path_separator() {
        let url = "https://attacker.example\\@mc.gov.sa/page";

        assert_eq!(host_of(url), "attacker.example");
        assert_eq!(classify_source(url).tier(), SourceTier::GENERAL);
    }

    #[test]
    fn test_gov_label_must_be_a_suffix() {
        for url in [
            "https://finance.gov.example-blog.com/post",
            "https://gov.example.com/",
            "https://mygov.sa.example.net/",
        ] {
            assert_eq!(classify_source(url).tier(), SourceTier::GENERAL, "{}", url);
        }
        for url in ["https://www.gov.uk/x", "https://sec.gov/filing", "https://www.army.mil"] {
            assert_eq!(classify_source(url).tier(), SourceTier::OFFICIAL, "{}", url);
        }
    }

    #[test]
    fn test_lookalike_gov_host_cannot_outrank_established_sources() {
        let claim = |value: &str, source: &str, date: &str| {
            Claim::new(
                "annual_revenue",
                value,
                source,
                classify_source(source).tier(),
                parse_source_date(date),
                ClaimCategory::Financial,
            )
        };
        let claims = vec![
            claim("SAR 9 billion", "https://finance.gov.example-blog.com/post", "2026-09-01"),
            claim("SAR 4.2 billion", "https://www.reuters.com/acme", "2026-08-01"),
            claim("SAR 4.2 billion", "https://www.argaam.com/acme", "2026-07-01"),
        ];

        let resolved = crate::trust::resolve(&claims);

        assert_eq!(resolved[0].winner.value, "SAR 4.2 billion");
        assert_eq!(resolved[0].agreement_count, 2);
    }

    #[test]
    fn test_state_news_agency_is_news_not_registry() {
        let class = classify_source("https://www.spa.gov.sa/news/1");

        assert_eq!(class, SourceClass::Established { financial: false });
        assert_eq!(class.category(ResearchTopic::CompanySize), ClaimCategory::News);
    }

    #[test]
    fn test_categories_follow_class_then_topic() {
        assert_eq!(
            classify_source("https://mc.gov.sa").category(ResearchTopic::RecentCampaigns),
            ClaimCategory::Official
        );
        assert_eq!(
            classify_source("https://acme.com").category(ResearchTopic::RecentCampaigns),
            ClaimCategory::News
        );
        assert_eq!(
            classify_source("https://acme.com").category(ResearchTopic::MarketingBudget),
            ClaimCategory::Financial
        );
        assert!(is_exchange_source("https://www.tadawul.com.sa/company/1010"));
        assert!(!is_exchange_source("https://mc.gov.sa"));
    }

    #[test]
    fn test_placeholder_key() {
        assert_eq!(ResearchTopic::CompanySize.placeholder_key(), "company_size_signal");
    }
}
