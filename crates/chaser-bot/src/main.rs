//! Binance USD-M order chaser - Entry Point
//!
//! Watches pending signals, chases triggered entries as post-only maker
//! orders and keeps positions reconciled with the account streams.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Binance USD-M order chaser
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via CHASER_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS crypto provider must be installed before any WS connection
    chaser_ws::init_crypto();

    let args = Args::parse();

    chaser_telemetry::init_logging()?;

    info!("Starting chaser-bot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > CHASER_CONFIG env var > default. Only an explicit path must exist.
    let explicit = args
        .config
        .or_else(|| std::env::var("CHASER_CONFIG").ok());
    let required = explicit.is_some();
    let config_path = explicit.unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, required, "Loading configuration");
    let config = chaser_bot::AppConfig::load(&config_path, required)?;
    info!(
        store_path = %config.store_path.display(),
        poll_interval_ms = config.poll_interval_ms,
        metrics_addr = %config.telemetry.metrics_addr,
        "Configuration loaded"
    );

    let app = chaser_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
