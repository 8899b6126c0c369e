//! Wharf - unified peer-to-peer storage workspace

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wharf::{Args, Workspace};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("wharf={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Wharf - P2P Storage Workspace");
    info!("======================================");
    info!("Data dir: {}", args.data_dir.display());
    info!("Auto start: {}", args.auto_start);
    info!("Admin DID: {}", args.admin_did);
    info!("Probe ports: {}", args.probe_ports);
    info!("Discovery interval: {}s", args.discovery_interval_secs);
    info!("======================================");

    let config = args
        .workspace_config()
        .map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;
    let workspace = Workspace::open(config).await?;
    workspace.start().await?;

    let status = workspace.get_status().await;
    info!(
        run_id = %status.run_id,
        networks = status.networks.len(),
        "Workspace running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if let Err(e) = workspace.stop().await {
        error!("Shutdown finished with errors: {}", e);
        std::process::exit(1);
    }
    info!("Workspace stopped");
    Ok(())
}
