//! RFP Research CLI
//!
//! Command-line interface for running the research engine.

use clap::{Parser, Subcommand};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rfp_research::{
    ApiServer, Caller, Country, EngineConfig, Error, HealthResponse, MetricsService,
    ResearchEngine, ResearchRequest, Result,
};

const DEFAULT_API_ADDR: &str = "0.0.0.0:8080";

#[derive(Parser)]
#[command(name = "rfp-research")]
#[command(author, version, about = "RFP client research engine", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },

    /// Serve the HTTP API
    Start {
        /// HTTP API listen address
        #[arg(long, default_value = DEFAULT_API_ADDR)]
        api_addr: String,
    },

    /// Research one client and print the result as JSON
    Research {
        /// Client name in Latin script
        #[arg(long)]
        client: String,

        /// Client name in Arabic script
        #[arg(long)]
        arabic: Option<String>,

        /// Country code or English name
        #[arg(long, default_value = "SA")]
        country: String,

        /// Analysis id to charge (random if omitted)
        #[arg(long)]
        analysis_id: Option<String>,
    },

    /// Check a running server's health
    Health {
        /// API endpoint to check
        #[arg(long, default_value = "http://localhost:8080")]
        endpoint: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn parse_env_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let value = env_string(name)?;
    match parse_env_bool(&value) {
        Some(parsed) => Some(parsed),
        None => {
            warn!("Invalid value for {}: {}", name, value);
            None
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    let value = env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let value = env_string(name)?;
    match value.parse::<u64>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Invalid value for {}: {}", name, value);
            None
        }
    }
}

fn env_f64(name: &str) -> Option<f64> {
    let value = env_string(name)?;
    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Some(parsed),
        _ => {
            warn!("Invalid value for {}: {}", name, value);
            None
        }
    }
}

fn env_csv(name: &str) -> Option<Vec<String>> {
    let value = env_string(name)?;
    let values: Vec<String> = value
        .split(',')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| item.to_string())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

fn apply_env_overrides(config: &mut EngineConfig) {
    if let Some(listen) = env_string("RFP_RESEARCH_API_LISTEN") {
        config.api.listen_address = listen;
    }
    if let Some(origins) = env_csv("RFP_RESEARCH_CORS_ORIGINS") {
        config.api.cors_origins = origins;
    }
    if let Some(enabled) = env_bool("RFP_RESEARCH_CORS_ENABLED") {
        config.api.cors_enabled = enabled;
    }

    if let Some(capacity) = env_u64("RFP_RESEARCH_RATE_CAPACITY") {
        config.rate_limit.capacity = u32::try_from(capacity).unwrap_or(u32::MAX);
    }
    if let Some(refill) = env_f64("RFP_RESEARCH_RATE_REFILL_PER_SECOND") {
        config.rate_limit.refill_per_second = refill;
    }
    if let Some(enabled) = env_bool("RFP_RESEARCH_RATE_LIMIT_ENABLED") {
        config.rate_limit.enabled = enabled;
    }

    if let Some(cap) = env_u64("BUDGET_TOKENS_PER_ANALYSIS") {
        config.budget.tokens_per_analysis = cap;
    }
    if let Some(cap) = env_u64("BUDGET_OCR_PAGES_PER_ANALYSIS") {
        config.budget.ocr_pages_per_analysis = cap;
    }
    if let Some(cap) = env_u64("BUDGET_QUERIES_PER_ANALYSIS") {
        config.budget.queries_per_analysis = cap;
    }
    if let Some(cap) = env_u64("BUDGET_DAILY_ANALYSES_PER_USER") {
        config.budget.daily_analyses_per_user = cap;
    }

    if let Some(key) = env_string("SEARCH_API_KEY") {
        config.providers.search.api_key = Some(key);
    }
    if let Some(endpoint) = env_string("SEARCH_API_ENDPOINT") {
        config.providers.search.endpoint = endpoint;
    }
    if let Some(key) = env_string("SCRAPE_API_KEY") {
        config.providers.scrape.api_key = Some(key);
    }
    if let Some(endpoint) = env_string("SCRAPE_API_ENDPOINT") {
        config.providers.scrape.endpoint = endpoint;
    }
}

fn load_config(path: &str) -> Result<EngineConfig> {
    let mut config = if Path::new(path).exists() {
        info!("Loading configuration from: {}", path);
        EngineConfig::load(path)?
    } else {
        info!("Using default configuration");
        EngineConfig::default()
    };
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Init { output } => {
            info!("Writing default configuration to: {}", output);
            EngineConfig::default().save(&output)?;
            info!("Configuration saved successfully");
        }

        Commands::Start { api_addr } => {
            let mut config = load_config(&cli.config)?;
            if api_addr != DEFAULT_API_ADDR {
                config.api.listen_address = api_addr;
            }
            let listen_address = config.api.listen_address.clone();
            let api_config = config.api.clone();

            let engine =
                ResearchEngine::from_config(config, Arc::new(MetricsService::with_defaults()))?;
            info!(providers = ?engine.provider_names(), "Research engine ready");

            let server = ApiServer::new(api_config, Arc::new(engine));
            info!("Press Ctrl+C to stop");

            tokio::select! {
                result = server.run(&listen_address) => {
                    if let Err(e) = result {
                        error!("API server error: {}", e);
                        return Err(e);
                    }
                }
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal");
                }
            }
        }

        Commands::Research {
            client,
            arabic,
            country,
            analysis_id,
        } => {
            let config = load_config(&cli.config)?;
            let engine = ResearchEngine::from_config(config, Arc::new(MetricsService::disabled()))?;

            let request = ResearchRequest {
                analysis_id: analysis_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                client_name: client,
                client_name_arabic: arabic,
                country: country.parse::<Country>()?,
            };

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    warn!("Cancelling research");
                    on_signal.cancel();
                }
            });

            let handled = engine
                .research(&Caller::from_parts(None, None), &request, &cancel)
                .await?;
            println!("{}", serde_json::to_string_pretty(&handled.result)?);
        }

        Commands::Health { endpoint } => {
            let health_url = format!("{}/health", endpoint.trim_end_matches('/'));
            info!("Checking health at: {}", health_url);

            match check_health(&health_url).await {
                Ok(response) => {
                    info!("Status: {}", response.status);
                    info!("Version: {}", response.version);
                    info!("Providers: {}", response.providers.join(", "));
                    info!("Uptime: {} seconds", response.uptime);
                }
                Err(e) => {
                    error!("Health check failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

/// Perform a health check against the API endpoint.
async fn check_health(url: &str) -> Result<HealthResponse> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .map_err(|e| Error::Network(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Network(e.to_string()))?
        .error_for_status()
        .map_err(|e| Error::Api(e.to_string()))?;

    response
        .json::<HealthResponse>()
        .await
        .map_err(|e| Error::Api(format!("JSON parse error: {}", e)))
}
