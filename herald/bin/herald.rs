use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use herald::{DryRunTransport, Herald, HeraldConfig};
use herald_common::Signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "herald", about = "Bulk-email campaign delivery engine", version)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "herald.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = if args.config.exists() {
        HeraldConfig::from_path(&args.config)?
    } else {
        warn!(path = %args.config.display(), "No configuration file, using defaults");
        HeraldConfig::default()
    };

    let herald = Herald::build(&config, Arc::new(DryRunTransport)).await?;

    let (shutdown, receiver) = broadcast::channel(8);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown.send(Signal::Shutdown);
        }
    });

    herald.serve(receiver).await?;
    info!("Goodbye");
    Ok(())
}
