//! `clearhouse` - reverse-auction clearing and SLA-bonded settlement daemon
//!
//! Loads configuration, opens the file-backed stores, re-arms clearing jobs
//! left by a previous run, and serves until interrupted.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConfigCommand};
use clearhouse_core::clock::SystemClock;
use clearhouse_core::ledger::InMemoryLedger;
use clearhouse_core::notify::TracingNotifier;
use clearhouse_core::store::Stores;
use clearhouse_core::{MarketConfig, Marketplace};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut config = MarketConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = Some(dir.clone());
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config).await,
        Commands::Config(ConfigCommand::Show) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Config(ConfigCommand::Init { output, force }) => {
            if let Some(path) = output.as_deref().filter(|p| p.exists()) {
                if !force {
                    bail!("{} already exists (use --force to overwrite)", path.display());
                }
            }
            config.save(output.as_deref()).context("Failed to write configuration")?;
            println!("configuration written");
            Ok(())
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

async fn serve(config: &MarketConfig) -> Result<()> {
    let data_dir = config.data_dir().context("Failed to resolve data directory")?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    let stores = open_stores(&data_dir)?;

    let clock = Arc::new(SystemClock);
    let ledger = Arc::new(InMemoryLedger::new(clock.clone()));
    let market = Marketplace::new(config, stores, ledger, Arc::new(TracingNotifier), clock);

    let report = market.start().await.context("Failed to start marketplace")?;
    info!(
        data_dir = %data_dir.display(),
        cleared = report.cleared_overdue,
        rearmed = report.rearmed,
        recreated = report.recreated,
        "clearhouse serving; press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("shutdown requested");
    market.shutdown().await;
    Ok(())
}

fn open_stores(dir: &Path) -> Result<Stores> {
    Stores::open(dir).with_context(|| format!("Failed to open stores in {}", dir.display()))
}
