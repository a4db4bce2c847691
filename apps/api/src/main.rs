mod config;
mod errors;
mod llm_client;
mod optimizer;
mod pdf;
mod progress;
mod results;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_dynamodb::config::Credentials;
use axum::http::HeaderValue;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::llm_client::prompts::PromptStore;
use crate::llm_client::{ChatModel, LlmClient};
use crate::optimizer::{Optimizer, OptimizerSettings};
use crate::pdf::PdfTextExtractor;
use crate::progress::ProgressTracker;
use crate::results::{DynamoResultStore, InMemoryResultStore, ResultStore};
use crate::routes::build_router;
use crate::state::AppState;

/// How often finished jobs are swept from the tracker, and how long they linger.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);
const FINISHED_JOB_RETENTION_HOURS: i64 = 24;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={},tower_http=info",
                env!("CARGO_CRATE_NAME"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Profile Optimizer API v{}", env!("CARGO_PKG_VERSION"));
    config.log_summary();

    // Initialize LLM client
    let llm = LlmClient::new(
        config.openai_base_url.clone(),
        config.openai_model.clone(),
        config.max_tokens,
        config.temperature,
    )
    .context("Failed to build LLM client")?;
    info!("LLM client initialized (model: {})", llm.model());

    // Load prompt templates
    let prompts = match &config.prompts_path {
        Some(path) => {
            info!("Loading prompts from {path}");
            PromptStore::from_file(path)?
        }
        None => PromptStore::builtin()?,
    };

    // Initialize result store (DynamoDB when AWS credentials are configured)
    let results = build_result_store(&config).await;
    info!("Result store: {}", results.backend());

    let progress = ProgressTracker::new();
    spawn_progress_sweeper(progress.clone());

    let optimizer = Optimizer::new(
        Arc::new(llm),
        Arc::new(prompts),
        Arc::new(PdfTextExtractor),
        progress.clone(),
        results.clone(),
        OptimizerSettings::from_config(&config),
    );

    // Build app state
    let state = AppState {
        config: config.clone(),
        optimizer,
        progress,
        results,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.allowed_origins));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs the DynamoDB-backed store, or the in-memory one when AWS is not configured.
async fn build_result_store(config: &Config) -> Arc<dyn ResultStore> {
    let (Some(key_id), Some(secret)) = (&config.aws_access_key_id, &config.aws_secret_access_key)
    else {
        return Arc::new(InMemoryResultStore::new());
    };

    let credentials = Credentials::new(key_id, secret, None, None, "optimizer-static");
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.aws_region.clone()))
        .credentials_provider(credentials);
    if let Some(endpoint) = &config.dynamodb_endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;

    let store = DynamoResultStore::new(
        aws_sdk_dynamodb::Client::new(&sdk_config),
        config.dynamodb_table.clone(),
    );
    if let Err(e) = store.ensure_table().await {
        // Persistence failures never fail a job, so keep serving
        warn!("DynamoDB table check failed: {e}");
    }
    Arc::new(store)
}

fn spawn_progress_sweeper(progress: ProgressTracker) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            let removed = progress
                .prune_finished(chrono::Duration::hours(FINISHED_JOB_RETENTION_HOURS))
                .await;
            if removed > 0 {
                info!("Pruned {removed} finished jobs from the progress tracker");
            }
        }
    });
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{origin}'");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
