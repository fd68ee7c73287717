//! Common test utilities for research engine integration tests.
//!
//! This module provides shared fixtures, helpers, and fake implementations
//! for integration testing: scripted research providers, a local stand-in
//! for the web-search API, and a raw HTTP client for the engine's own API.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rfp_research::{
    ApiConfig, ApiServer, AppState, Claim, ClaimCategory, EngineConfig, Error, MetricsService,
    ProviderQuery, ResearchEngine, ResearchProvider, Result, SourceTier,
};
use serde_json::json;
use tokio::sync::mpsc;

// ========== Test Configuration ==========

/// Default test timeout duration.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// API key the fake search API accepts.
pub const SEARCH_KEY: &str = "test-key";

/// Get a unique port for testing (to avoid conflicts).
static PORT_COUNTER: AtomicU64 = AtomicU64::new(18180);

pub fn get_test_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst) as u16
}

/// Get a test socket address.
pub fn get_test_addr() -> String {
    format!("127.0.0.1:{}", get_test_port())
}

/// Fixed clock used by engine tests.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
}

/// Engine config with short retry delays.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.transport.timeout_ms = 2_000;
    config.transport.base_delay_ms = 5;
    config.transport.max_delay_ms = 20;
    config.rate_limit.capacity = 100;
    config.rate_limit.refill_per_second = 50.0;
    config
}

// ========== Scripted Providers ==========

/// What a [`ScriptedProvider`] does on every call.
#[derive(Clone)]
pub enum Script {
    /// Return the same claims for every query.
    Claims(Vec<Claim>),
    /// Fail every query with an upstream 503.
    Unavailable,
    /// Sleep, then return nothing.
    Slow(Duration),
}

/// In-memory provider following a [`Script`].
pub struct ScriptedProvider {
    name: String,
    script: Script,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResearchProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, _query: &ProviderQuery) -> Result<Vec<Claim>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Claims(claims) => Ok(claims.clone()),
            Script::Unavailable => Err(Error::RetriesExhausted {
                operation: self.name.clone(),
                attempts: 3,
                last_error: "HTTP 503: unavailable".to_string(),
                last_status: Some(503),
            }),
            Script::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Build a claim dated `date` (YYYY-MM-DD).
pub fn claim(key: &str, value: &str, source: &str, tier: u8, date: &str) -> Claim {
    Claim::new(
        key,
        value,
        source,
        SourceTier::new(tier).unwrap(),
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(),
        ClaimCategory::Financial,
    )
}

/// Build an engine over in-memory providers.
pub fn engine_with(
    config: EngineConfig,
    providers: Vec<Arc<dyn ResearchProvider>>,
) -> Arc<ResearchEngine> {
    Arc::new(ResearchEngine::new(config, providers, Arc::new(MetricsService::disabled())).unwrap())
}

// ========== Fake Search API ==========

/// How the fake search API answers.
#[derive(Debug, Clone, Copy)]
pub enum UpstreamMode {
    /// Always answer with canned results.
    Healthy,
    /// Answer 503 to the first `n` hits, then behave.
    FailFirst(u32),
    /// Always answer with this status.
    Always(u16),
}

#[derive(Clone)]
struct UpstreamState {
    mode: UpstreamMode,
    hits: Arc<AtomicU32>,
}

/// A local stand-in for the web-search API.
pub struct FakeSearchApi {
    pub endpoint: String,
    hits: Arc<AtomicU32>,
}

impl FakeSearchApi {
    /// Start the fake on an ephemeral port.
    pub async fn start(mode: UpstreamMode) -> Self {
        let hits = Arc::new(AtomicU32::new(0));
        let state = UpstreamState {
            mode,
            hits: hits.clone(),
        };
        let router = Router::new()
            .route("/v1/search", get(fake_search_handler))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            endpoint: format!("http://{}/v1/search", addr),
            hits,
        }
    }

    /// Requests received so far.
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    /// Engine config pointing the search provider at this fake.
    pub fn config(&self, api_key: &str) -> EngineConfig {
        let mut config = fast_config();
        config.providers.search.endpoint = self.endpoint.clone();
        config.providers.search.api_key = Some(api_key.to_string());
        config.providers.scrape.enabled = false;
        config
    }
}

async fn fake_search_handler(
    State(state): State<UpstreamState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst) + 1;

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", SEARCH_KEY));
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
    }

    match state.mode {
        UpstreamMode::FailFirst(n) if hit <= n => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "warming up"})),
            );
        }
        UpstreamMode::Always(status) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, Json(json!({"error": "down"})));
        }
        _ => {}
    }

    let lang = params.get("lang").cloned().unwrap_or_default();
    (StatusCode::OK, Json(canned_results(&lang)))
}

/// Canned search results; Arabic queries get one extra Arabic headline.
fn canned_results(lang: &str) -> serde_json::Value {
    let mut results = vec![
        json!({
            "title": "Acme Trading annual results",
            "url": "https://www.reuters.com/business/acme-trading",
            "snippet": "Acme Trading reported revenue of SAR 4.2 billion and 1,200 employees. Its marketing budget of SAR 60 million grew again.",
            "published_date": "2026-08-01"
        }),
        json!({
            "title": "Is Acme huge?",
            "url": "https://acme-fan.blogspot.com/post",
            "snippet": "I heard revenue of SAR 9 billion",
            "published_date": "2026-09-01"
        }),
        json!({
            "title": "Acme launches Riyadh Season campaign",
            "url": "https://www.arabnews.com/node/acme",
            "snippet": "The retailer's latest campaign runs across the Kingdom.",
            "published_date": "2026-09-20"
        }),
    ];
    if lang == "ar" {
        results.push(json!({
            "title": "أكمي للتجارة تطلق حملة جديدة",
            "url": "https://www.alarabiya.net/acme",
            "snippet": "حملة تسويقية في الرياض",
            "published_date": "2026-09-21"
        }));
    }
    json!({ "results": results })
}

// ========== Engine API Fixture ==========

/// Test fixture running the engine's HTTP API on a real port.
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl TestServer {
    /// Create a new test server (not started).
    pub fn new(engine: Arc<ResearchEngine>) -> Self {
        Self {
            addr: get_test_addr(),
            state: AppState::new(engine),
            shutdown_tx: None,
        }
    }

    /// Get the full URL for an endpoint.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Start the server in a background task.
    pub async fn start(&mut self) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let api_config = ApiConfig {
            listen_address: self.addr.clone(),
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
            user_agent: "rfp-research-tests".to_string(),
        };

        let server = ApiServer::with_state(api_config, self.state.clone());
        let addr = self.addr.clone();

        tokio::spawn(async move {
            tokio::select! {
                result = server.run(&addr) => {
                    if let Err(e) = result {
                        eprintln!("Test server error: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {}
            }
        });

        wait_for_server(&self.addr).await;
    }

    /// Stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

// ========== HTTP Client Helpers ==========

/// Parsed HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body)
            .unwrap_or_else(|e| panic!("invalid JSON body ({}): {}", e, self.body))
    }
}

/// Send a raw HTTP/1.1 request and read the whole response.
pub async fn http_request(
    method: &str,
    url: &str,
    headers: &[(&str, &str)],
    body: Option<&str>,
) -> std::result::Result<HttpResponse, String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let url = url.trim_start_matches("http://");
    let (host_port, path) = url
        .split_once('/')
        .map(|(h, p)| (h, format!("/{}", p)))
        .unwrap_or((url, "/".to_string()));

    let mut stream = TcpStream::connect(host_port)
        .await
        .map_err(|e| format!("Connection failed: {}", e))?;

    let mut request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n",
        method, path, host_port
    );
    for (name, value) in headers {
        request.push_str(&format!("{}: {}\r\n", name, value));
    }
    if let Some(body) = body {
        request.push_str(&format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ));
    } else {
        request.push_str("\r\n");
    }

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| format!("Write failed: {}", e))?;

    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .map_err(|e| format!("Read failed: {}", e))?;

    parse_response(&String::from_utf8_lossy(&response))
}

fn parse_response(raw: &str) -> std::result::Result<HttpResponse, String> {
    let (head, body) = raw
        .split_once("\r\n\r\n")
        .ok_or_else(|| "Invalid HTTP response".to_string())?;
    let mut lines = head.lines();

    let status: u16 = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| "Invalid status code".to_string())?;

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    Ok(HttpResponse {
        status,
        headers,
        body: body.to_string(),
    })
}

/// Simple HTTP GET request.
pub async fn http_get(url: &str) -> std::result::Result<HttpResponse, String> {
    http_request("GET", url, &[], None).await
}

/// Simple HTTP POST request with JSON body.
pub async fn http_post(
    url: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> std::result::Result<HttpResponse, String> {
    http_request("POST", url, headers, Some(body)).await
}

// ========== Wait Helpers ==========

/// Wait for a server to be ready (up to 5 seconds).
pub async fn wait_for_server(addr: &str) {
    use tokio::net::TcpStream;

    for _ in 0..50 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    panic!("Server at {} failed to start within 5 seconds", addr);
}

/// Wait with timeout helper.
pub async fn with_timeout<F, T>(future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("Test timed out")
}

// ========== Assertion Helpers ==========

/// Assert HTTP status code.
pub fn assert_status(expected: u16, actual: u16) {
    assert_eq!(
        expected, actual,
        "Expected HTTP status {}, got {}",
        expected, actual
    );
}

// ========== Test Data Generators ==========

/// Research request body JSON.
pub fn research_body(analysis_id: &str) -> String {
    json!({
        "analysisId": analysis_id,
        "clientName": "Acme Trading",
        "clientNameArabic": "أكمي للتجارة",
        "country": "SA"
    })
    .to_string()
}
