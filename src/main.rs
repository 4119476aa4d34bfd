use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use swapfront::application::{Cli, CommandExecutor, DataService};
use swapfront::infrastructure::StaticWallet;
use swapfront::shared::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Priority: --log-level > RUST_LOG > info
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level).with_context(|| format!("invalid log filter {:?}", level))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Priority: CLI args > config file > defaults
    let mut config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    cli.apply_overrides(&mut config)?;
    debug!("effective configuration: {:?}", config);

    let wallet = Arc::new(StaticWallet::new(cli.wallet_network()));
    let service = DataService::from_config(config, wallet).context("failed to set up HTTP clients")?;

    CommandExecutor::new(Arc::new(service), cli.json)
        .execute(cli.command)
        .await
}
