//! Sluice standalone server

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use sluice_server::{Controller, ServerConfig};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sluice - change-data-capture relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "sluice.toml")]
    config: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("sluice={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting sluice server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config);

    let config = if Path::new(&args.config).exists() {
        ServerConfig::load(&args.config)
            .with_context(|| format!("loading configuration from {}", args.config))?
    } else {
        warn!("Config file not found, using defaults");
        ServerConfig::default()
    };

    let controller = Controller::new(config).context("building server")?;
    controller.start().context("starting destinations")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");
    controller.stop();

    Ok(())
}
