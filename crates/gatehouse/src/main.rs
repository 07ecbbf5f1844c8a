//! # Gatehouse - portfolio access gate
//!
//! Keeps automated visitors away from the portfolio content. A visitor
//! passes a human-verification challenge (or, in development builds, a
//! password bypass) and is remembered for 24 hours.
//!
//! ## Architecture
//! ```text
//! Browser ──X-Client-Id──▶ Gatehouse ──▶ AccessGate (per client)
//!                              │            ├─ ChallengeFlow
//!                              │            └─ BypassPanel
//!                              ↓
//!                      Redis / memory (State)
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use gatehouse_common::constants::GATE_SWEEP_INTERVAL_SECS;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod attempts;
mod bypass;
mod challenge;
mod clock;
mod config;
mod gate;
mod policy;
mod routes;
mod scope;
mod session;
mod state;
mod store;

use config::AppConfig;
use state::AppState;

/// Gatehouse - portfolio access gate
#[derive(Parser, Debug)]
#[command(name = "gatehouse")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/gatehouse.toml")]
    config: String,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up a local .env before clap reads env-backed args
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!(
        "🚪 Starting Gatehouse v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!("📋 Configuration loaded from {}", args.config);
    info!(
        build_mode = ?config.build_mode,
        challenge = config.challenge.site_key.is_some(),
        bypass = !config.build_mode.is_production() && config.bypass.secret.is_some(),
        "Gate paths"
    );

    // Initialize application state
    let listen_addr = config.listen_addr.clone();
    let state = AppState::new(config).await?;
    info!("✅ Store ready");

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Spawn idle gate sweeper
    tokio::spawn(state::gate_sweeper(
        state.clone(),
        Duration::from_secs(GATE_SWEEP_INTERVAL_SECS),
        shutdown_tx.subscribe(),
    ));

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;
    info!("🚀 Gatehouse listening on {}", listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("🛑 Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("👋 Gatehouse shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
