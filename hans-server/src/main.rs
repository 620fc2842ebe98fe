//! Hans Server
//!
//! Receives repository webhooks and queues hardware-in-the-loop test runs
//! on the attached board.
//!
//! Architecture:
//! - API: axum routes for the webhook endpoint and liveness checks
//! - Service: event classification and dispatch to the runner
//!
//! Runs execute in detached tasks; the webhook caller only ever sees an
//! acknowledgment string.

pub mod api;
pub mod service;

use anyhow::{Context, Result};
use clap::Parser;
use hans_runner::{Config, PipelineLauncher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::service::EventDispatcher;

#[derive(Parser)]
#[command(name = "hans-server")]
#[command(about = "Hardware-in-the-loop CI webhook server", long_about = None)]
struct Cli {
    /// Path to the YAML settings file
    #[arg(long, env = "HANS_CONFIG", default_value = hans_runner::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to listen on
    #[arg(long, env = "HANS_BIND_ADDR", default_value = "0.0.0.0:4567")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hans_server=info,hans_runner=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting Hans Server...");

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    tracing::info!(
        "Testing on {} as {}, lock marker {}",
        config.board_name,
        config.hostname,
        config.lock_path.display()
    );

    let launcher = PipelineLauncher::from_config(config)?;
    let dispatcher = Arc::new(EventDispatcher::new(launcher));

    // Build router with all endpoints
    let app = api::create_router(dispatcher);

    tracing::info!("Listening on {}", cli.bind);

    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", cli.bind))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
