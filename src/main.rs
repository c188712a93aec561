//! Risk engine CLI.

use anyhow::Result;
use clap::Parser;
use riskgate::{Config, RiskEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "riskgate")]
#[command(about = "Identity and origin risk controls - ASN reputation, VPN detection, and abuse throttling")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "riskgate.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)?;

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let engine = Arc::new(RiskEngine::new(config)?);
    let maintenance = riskgate::tasks::spawn_maintenance(engine.clone());

    info!("Risk engine running");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    for handle in maintenance {
        handle.abort();
    }

    Ok(())
}
