//! Lumen bridge server binary

use anyhow::{Context, Result};
use clap::Parser;
use lumen_bridge::{BridgeConfig, BridgeServer};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lumen-bridge")]
#[command(about = "Lumen bridge - multiplexes sync clients onto a backend authority", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    bind: Option<String>,

    /// Backend WebSocket URL, overrides the config file
    #[arg(long)]
    backend: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let mut config = BridgeConfig::default();
            config.merge_with_env()?;
            config
        }
    };
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(backend) = cli.backend {
        config.backend_url = Some(backend);
    }

    let server = BridgeServer::new(config).context("invalid bridge configuration")?;
    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }
    Ok(())
}
