//! keel paper-trading runner - Entry Point
//!
//! Executes one configured trading decision against the paper venue and
//! prints the resulting report as JSON.

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

/// keel paper-trading runner
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via KEEL_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    keel_telemetry::init_logging()?;

    info!("Starting keel v{}", env!("CARGO_PKG_VERSION"));

    // Config path: CLI arg > KEEL_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("KEEL_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = keel_bot::AppConfig::from_file(&config_path)?;
    info!(
        clock = ?config.execution.clock,
        symbol = %config.paper.symbol,
        kind = %config.order.kind,
        side = %config.order.side,
        "Configuration loaded"
    );

    let app = keel_bot::Application::new(config)?;

    let shutdown = app.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, shutting down");
            shutdown.cancel();
        }
    });

    let report = app.run().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
