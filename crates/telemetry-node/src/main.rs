//! Vehicle Telemetry Node - Main Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use telemetry_node::{init_logging, install_metrics, run, Cli, Settings};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    init_logging(&settings.log)?;

    info!("=== Telemetry Node v{} ===", env!("CARGO_PKG_VERSION"));
    debug!("Settings: {}", serde_json::to_string(&settings)?);

    if let Some(addr) = &settings.metrics.listen {
        install_metrics(addr)?;
    }

    run(settings).await
}
