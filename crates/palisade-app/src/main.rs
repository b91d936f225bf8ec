//! Palisade - admission layer in front of an LLM fraud classifier.
//!
//! Starts the HTTP API server with a pipeline wired to the configured
//! upstream model endpoint.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use palisade_core::config::{OrchestratorConfig, PipelineConfig};
use palisade_core::model::HttpModelClient;
use palisade_core::pipeline::AnalysisPipeline;
use palisade_server::{Server, ServerConfig};

/// Palisade - fraud-analysis admission layer
#[derive(Parser, Debug)]
#[command(name = "palisade", version, about)]
struct Args {
    /// Host to bind the API server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the API server to
    #[arg(long, default_value_t = palisade_server::DEFAULT_PORT)]
    port: u16,

    /// Upstream chat-completions endpoint
    #[arg(long, default_value = "https://api.openai.com/v1/chat/completions")]
    endpoint: String,

    /// Environment variable holding the upstream API key
    #[arg(long, default_value = "PALISADE_API_KEY")]
    api_key_env: String,

    /// Primary classification model
    #[arg(long)]
    primary_model: Option<String>,

    /// Backup classification model
    #[arg(long)]
    backup_model: Option<String>,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(args: &Args) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("palisade={},warn", args.log_level)));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    tracing::info!("Starting Palisade...");

    let api_key = std::env::var(&args.api_key_env).ok();
    if api_key.is_none() {
        tracing::warn!(
            "No API key found in ${}; upstream calls will be unauthenticated",
            args.api_key_env
        );
    }

    let mut orchestrator = OrchestratorConfig::default();
    if let Some(model) = args.primary_model.clone() {
        orchestrator.primary_model = model;
    }
    if let Some(model) = args.backup_model.clone() {
        orchestrator.backup_model = model;
    }

    let client = HttpModelClient::new(&args.endpoint, api_key, orchestrator.request_timeout)
        .context("failed to build upstream client")?;

    let config = PipelineConfig {
        orchestrator,
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(AnalysisPipeline::new(config, Arc::new(client)));

    tracing::info!(
        primary = pipeline.primary_model(),
        backup = pipeline.backup_model(),
        endpoint = %args.endpoint,
        "Pipeline configured"
    );

    // Background sweep keeps the rate-gate logs bounded even when traffic
    // stops.
    tokio::spawn(pipeline.gate().clone().start_sweeping());

    let server_config = ServerConfig::default()
        .with_host(args.host)
        .with_port(args.port);
    let server = Server::new(server_config, pipeline.clone())?;

    tracing::info!("API server listening on {}", server.addr());
    let result = server.run().await;

    pipeline.dispose();
    tracing::info!("Palisade shutting down");

    result.map_err(Into::into)
}
