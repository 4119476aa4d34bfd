//! CLI commands and handlers

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::application::services::DataService;
use crate::domain::balance::AccountLookup;
use crate::domain::cache::QueryResult;
use crate::domain::ledger::TransactionStatus;
use crate::domain::network::NetworkMismatchState;
use crate::domain::swap::{best_route, deadline_after, Slippage, SwapQuoteRequest, SwapRoute, TradeLimits};
use crate::shared::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::shared::tasks::ScheduledTask;
use crate::shared::types::{AccountId, Amount, AssetId, NetworkId, NATIVE_DECIMALS};
use crate::shared::utils::{format_amount, format_usd};

#[derive(Parser, Debug)]
#[command(name = "swapfront")]
#[command(version, about = "Cached data layer for a DEX front end: tokens, prices, balances, quotes")]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log filter (overrides RUST_LOG), e.g. `debug` or `swapfront=trace`
    #[arg(long)]
    pub log_level: Option<String>,

    /// Mirror node base URL (overrides config)
    #[arg(long)]
    pub mirror_url: Option<String>,

    /// Price API base URL (overrides config)
    #[arg(long)]
    pub price_url: Option<String>,

    /// Aggregator base URL (overrides config)
    #[arg(long)]
    pub aggregator_url: Option<String>,

    /// Network the app expects (overrides config)
    #[arg(long)]
    pub network: Option<String>,

    /// Network the wallet is connected to; omit when disconnected
    #[arg(long, env = "WALLET_NETWORK")]
    pub wallet_network: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Applies command-line overrides on top of the file configuration.
    pub fn apply_overrides(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(url) = &self.mirror_url {
            config.mirror_node.base_url = url.clone();
        }
        if let Some(url) = &self.price_url {
            config.price_api.base_url = url.clone();
        }
        if let Some(url) = &self.aggregator_url {
            config.aggregator.base_url = url.clone();
        }
        if let Some(network) = &self.network {
            config.network.expected = NetworkId::new(network);
        }
        config.validate().context("invalid configuration after command-line overrides")?;
        Ok(())
    }

    pub fn wallet_network(&self) -> Option<NetworkId> {
        self.wallet_network.as_deref().map(NetworkId::new)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List tokens known to the price API
    Tokens {
        /// Limit number of tokens to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show USD prices (`HBAR` for the native asset)
    Price {
        #[arg(required = true)]
        assets: Vec<String>,
    },

    /// Show balances and associations of an account
    Balances {
        account: String,

        /// Value holdings in USD
        #[arg(long)]
        usd: bool,

        /// Also list token allowances
        #[arg(long)]
        allowances: bool,
    },

    /// Check whether an account is associated with a token
    Associated { account: String, token: String },

    /// Quote a swap through the aggregator
    Quote {
        from: String,
        to: String,

        /// Amount in whole units, e.g. `1.5`
        amount: String,

        /// Treat the amount as what should be received
        #[arg(long)]
        reverse: bool,

        /// Slippage tolerance in percent
        #[arg(short, long, default_value_t = 0.5)]
        slippage: f64,

        /// Minutes until the swap deadline
        #[arg(long, default_value_t = 20)]
        deadline_minutes: u32,
    },

    /// Show the settlement status of a transaction
    #[command(name = "tx-status")]
    TxStatus {
        transaction_id: String,

        /// Poll until the transaction settles
        #[arg(short, long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Compare the wallet network with the expected network
    Network,

    /// Periodically refresh balances and prices
    Watch {
        /// Account whose balances to follow
        #[arg(short, long)]
        account: Option<String>,

        /// Assets whose prices to follow
        #[arg(short = 'p', long = "asset")]
        assets: Vec<String>,

        /// Refresh interval in seconds
        #[arg(short, long, default_value_t = 10)]
        interval: u64,

        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(short, long)]
        duration: Option<u64>,
    },
}

#[derive(Serialize)]
struct QuoteReport<'a> {
    request: &'a SwapQuoteRequest,
    route: &'a SwapRoute,
    limits: TradeLimits,
    slippage_bps: u16,
    deadline: i64,
}

pub struct CommandExecutor {
    service: Arc<DataService>,
    json: bool,
}

impl CommandExecutor {
    pub fn new(service: Arc<DataService>, json: bool) -> Self {
        Self { service, json }
    }

    /// Execute the selected command
    pub async fn execute(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Tokens { limit } => self.execute_tokens(limit).await,
            Commands::Price { assets } => self.execute_price(&assets).await,
            Commands::Balances { account, usd, allowances } => {
                self.execute_balances(&account, usd, allowances).await
            }
            Commands::Associated { account, token } => self.execute_associated(&account, &token).await,
            Commands::Quote {
                from,
                to,
                amount,
                reverse,
                slippage,
                deadline_minutes,
            } => {
                self.execute_quote(&from, &to, &amount, reverse, slippage, deadline_minutes)
                    .await
            }
            Commands::TxStatus {
                transaction_id,
                wait,
                timeout,
            } => self.execute_tx_status(&transaction_id, wait, timeout).await,
            Commands::Network => self.execute_network().await,
            Commands::Watch {
                account,
                assets,
                interval,
                duration,
            } => self.execute_watch(account, assets, interval, duration).await,
        }
    }

    fn emit<T: Serialize>(&self, value: &T) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        Ok(())
    }

    async fn execute_tokens(&self, limit: usize) -> Result<()> {
        let tokens = required(self.service.token_list().await, "token list")?;
        if self.json {
            return self.emit(&tokens.iter().take(limit).collect::<Vec<_>>());
        }

        info!("Known tokens: {} (showing {})", tokens.len(), limit.min(tokens.len()));
        for (i, token) in tokens.iter().take(limit).enumerate() {
            let price = token.price_usd.map(format_usd).unwrap_or_else(|| "-".to_string());
            info!("   {}. {} ({}) {} decimals={} price={}", i + 1, token.symbol, token.name, token.id, token.decimals, price);
        }
        Ok(())
    }

    async fn execute_price(&self, assets: &[String]) -> Result<()> {
        let assets = assets.iter().map(|a| parse_asset(a)).collect::<Result<Vec<_>>>()?;
        let result = self.service.token_prices(&assets).await;
        if let Some(err) = &result.error {
            warn!("some prices are unavailable: {}", err);
        }
        let prices = required(result, "prices")?;
        if self.json {
            return self.emit(&prices);
        }
        for asset in &assets {
            match prices.get(asset) {
                Some(price) => info!("   {}: {}", asset, format_usd(price.price_usd)),
                None => info!("   {}: unavailable", asset),
            }
        }
        Ok(())
    }

    async fn execute_balances(&self, account: &str, usd: bool, allowances: bool) -> Result<()> {
        let account = parse_account(account)?;
        let lookup = required(self.service.account_balances(&account).await, "balances")?;
        let snapshot = match lookup {
            AccountLookup::Found(snapshot) => snapshot,
            AccountLookup::NotFound(id) => {
                if self.json {
                    return self.emit(&AccountLookup::NotFound(id));
                }
                info!("Account {} does not exist on the mirror node", id);
                return Ok(());
            }
        };

        let tokens = self.service.token_list().await.data.unwrap_or_default();
        let decimals_for = |asset: &AssetId| match asset {
            AssetId::Native => Some(NATIVE_DECIMALS),
            AssetId::Token(id) => tokens.iter().find(|t| &t.id == id).map(|t| t.decimals),
        };

        if self.json {
            self.emit(&snapshot)?;
        } else {
            info!("Balances of {}:", snapshot.account_id);
            for balance in &snapshot.balances {
                let shown = match decimals_for(&balance.asset) {
                    Some(d) => format_amount(balance.amount, d),
                    None => format!("{} (raw)", balance.amount),
                };
                info!("   {}: {}", balance.asset, shown);
            }
            let zero: Vec<_> = snapshot
                .associated_assets
                .iter()
                .filter(|a| snapshot.balance_of(a) == 0)
                .map(|a| a.to_string())
                .collect();
            if !zero.is_empty() {
                info!("   associated with zero balance: {}", zero.join(", "));
            }
        }

        if usd {
            let value = required(self.service.portfolio_value(&account).await, "portfolio value")?;
            if self.json {
                self.emit(&value)?;
            } else {
                info!("   total: {}", format_usd(value.total_usd));
                if !value.unpriced.is_empty() {
                    info!("   unpriced: {}", value.unpriced.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", "));
                }
            }
        }

        if allowances {
            let granted = required(self.service.token_allowances(&account).await, "allowances")?;
            if self.json {
                self.emit(&granted)?;
            } else {
                info!("Token allowances: {}", granted.len());
                for allowance in &granted {
                    info!("   {} -> {}: {}", allowance.token_id, allowance.spender, allowance.amount);
                }
            }
        }
        Ok(())
    }

    async fn execute_associated(&self, account: &str, token: &str) -> Result<()> {
        let account = parse_account(account)?;
        let asset = parse_asset(token)?;
        let associated = self.service.is_associated(&account, &asset).await;
        if self.json {
            return self.emit(&serde_json::json!({ "account": account, "asset": asset, "associated": associated }));
        }
        info!("{} associated with {}: {}", account, asset, associated);
        Ok(())
    }

    async fn execute_quote(
        &self,
        from: &str,
        to: &str,
        amount: &str,
        reverse: bool,
        slippage: f64,
        deadline_minutes: u32,
    ) -> Result<()> {
        let token_from = parse_asset(from)?;
        let token_to = parse_asset(to)?;
        let slippage = Slippage::from_percent(slippage).map_err(|e| anyhow!(e))?;
        let fixed_side = if reverse { &token_to } else { &token_from };
        let decimals = self.decimals_of(fixed_side).await?;
        let raw = Amount::from_units(amount, decimals).map_err(|e| anyhow!(e))?;

        let request = SwapQuoteRequest {
            token_from,
            token_to,
            amount: raw.value,
            is_reverse: reverse,
        };
        let routes = required(self.service.swap_quote(&request).await, "swap quote")?;
        let route = best_route(&routes, reverse).ok_or_else(|| anyhow!("no route for {}", request))?;
        let limits = TradeLimits::for_route(route, reverse, slippage);
        let deadline = deadline_after(Utc::now(), deadline_minutes);

        if self.json {
            return self.emit(&QuoteReport {
                request: &request,
                route,
                limits,
                slippage_bps: slippage.bps(),
                deadline,
            });
        }
        info!("Best of {} routes for {}: {}", routes.len(), request, route.aggregator_id);
        info!("   sell {} / receive {}", route.amount_from, route.amount_to);
        match limits {
            TradeLimits::MinReceived(v) => info!("   minimum received: {}", v),
            TradeLimits::MaxSold(v) => info!("   maximum sold: {}", v),
        }
        info!("   deadline: {}", deadline);
        Ok(())
    }

    async fn decimals_of(&self, asset: &AssetId) -> Result<u8> {
        if asset.is_native() {
            return Ok(NATIVE_DECIMALS);
        }
        let tokens = required(self.service.token_list().await, "token list")?;
        tokens
            .iter()
            .find(|t| t.id == asset.as_str())
            .map(|t| t.decimals)
            .ok_or_else(|| anyhow!("unknown token {}", asset))
    }

    async fn execute_tx_status(&self, transaction_id: &str, wait: bool, timeout: u64) -> Result<()> {
        let result = if wait {
            self.service
                .await_transaction(transaction_id, Duration::from_secs(2), Duration::from_secs(timeout))
                .await
        } else {
            self.service.transaction_status(transaction_id).await
        };
        let status = required(result, "transaction status")?;
        if self.json {
            return self.emit(&status);
        }
        match status {
            TransactionStatus::Pending => info!("{} is pending (not indexed yet)", transaction_id),
            TransactionStatus::Success { consensus_timestamp } => info!(
                "{} succeeded at {}",
                transaction_id,
                consensus_timestamp.as_deref().unwrap_or("unknown time")
            ),
            TransactionStatus::Failed { result } => info!("{} failed: {}", transaction_id, result),
        }
        Ok(())
    }

    async fn execute_network(&self) -> Result<()> {
        let state = self.service.network().on_connect().await;
        if self.json {
            return self.emit(&state);
        }
        if state.mismatch || state.check_failed {
            warn!("{}", describe_network(&state));
        } else {
            info!("{}", describe_network(&state));
        }
        Ok(())
    }

    async fn execute_watch(
        &self,
        account: Option<String>,
        assets: Vec<String>,
        interval: u64,
        duration: Option<u64>,
    ) -> Result<()> {
        let account = account.as_deref().map(parse_account).transpose()?;
        let assets = assets.iter().map(|a| parse_asset(a)).collect::<Result<Vec<_>>>()?;
        if account.is_none() && assets.is_empty() {
            bail!("nothing to watch: pass --account and/or --asset");
        }

        info!("Watching every {}s (Ctrl-C to stop)", interval);
        let sweepers = self.service.spawn_sweepers();
        let service = Arc::clone(&self.service);
        let poller = ScheduledTask::every("watch", Duration::from_secs(interval.max(1)), move || {
            let service = Arc::clone(&service);
            let account = account.clone();
            let assets = assets.clone();
            async move {
                if let Some(account) = &account {
                    let balances = service.account_balances(account).await;
                    match (balances.data.as_ref(), &balances.error) {
                        (Some(AccountLookup::Found(s)), _) => info!("{}: {} balances", account, s.balances.len()),
                        (Some(AccountLookup::NotFound(_)), _) => info!("{}: not found", account),
                        (None, Some(err)) => warn!("{}: {}", account, err),
                        (None, None) => {}
                    }
                }
                if !assets.is_empty() {
                    let prices = service.token_prices(&assets).await;
                    for (asset, price) in prices.data.iter().flatten() {
                        info!("{}: {}", asset, format_usd(price.price_usd));
                    }
                    if let Some(err) = prices.error {
                        warn!("price refresh: {}", err);
                    }
                }
            }
        });

        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?,
        }

        poller.cancel().await;
        for sweeper in sweepers {
            sweeper.cancel().await;
        }
        let metrics = self.service.metrics();
        info!(
            "Stopped. price cache hit rate {:.0}%, balance cache hit rate {:.0}%",
            metrics.token_price.hit_rate() * 100.0,
            metrics.account_balances.hit_rate() * 100.0
        );
        Ok(())
    }
}

/// The data, or the error that kept it from loading.
fn required<T>(result: QueryResult<T>, what: &str) -> Result<T> {
    match result {
        QueryResult { data: Some(data), .. } => Ok(data),
        QueryResult { error: Some(err), .. } => Err(anyhow::Error::new(err).context(format!("failed to load {}", what))),
        _ => Err(anyhow!("{} is not available yet", what)),
    }
}

fn describe_network(state: &NetworkMismatchState) -> String {
    match (&state.connected, state.mismatch) {
        (Some(connected), true) => format!("Wallet is on {} but {} is expected", connected, state.expected),
        (Some(connected), false) => format!("Wallet is on {} as expected", connected),
        (None, _) if state.check_failed => format!(
            "Could not determine the wallet network; assuming {} and continuing",
            state.expected
        ),
        (None, _) => format!("Wallet is not connected (expected {})", state.expected),
    }
}

fn parse_account(raw: &str) -> Result<AccountId> {
    raw.parse().map_err(|e: String| anyhow!(e))
}

fn parse_asset(raw: &str) -> Result<AssetId> {
    raw.parse().map_err(|e: String| anyhow!(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::errors::ApiError;

    #[test]
    fn parses_quote_command() {
        let cli = Cli::try_parse_from([
            "swapfront", "--network", "mainnet", "quote", "HBAR", "0.0.731861", "1.5", "--reverse", "--slippage", "1",
        ])
        .unwrap();
        assert_eq!(cli.network.as_deref(), Some("mainnet"));
        match cli.command {
            Commands::Quote { from, to, amount, reverse, slippage, deadline_minutes } => {
                assert_eq!(from, "HBAR");
                assert_eq!(to, "0.0.731861");
                assert_eq!(amount, "1.5");
                assert!(reverse);
                assert_eq!(slippage, 1.0);
                assert_eq!(deadline_minutes, 20);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn tx_status_uses_kebab_case_name() {
        let cli = Cli::try_parse_from(["swapfront", "tx-status", "0.0.1234@1700000000.000000001", "--wait"]).unwrap();
        assert!(matches!(cli.command, Commands::TxStatus { wait: true, timeout: 30, .. }));
    }

    #[test]
    fn overrides_replace_file_values() {
        let cli = Cli::try_parse_from([
            "swapfront", "--mirror-url", "http://localhost:5551/api/v1", "--network", "Previewnet", "network",
        ])
        .unwrap();
        let mut config = AppConfig::default();
        cli.apply_overrides(&mut config).unwrap();
        assert_eq!(config.mirror_node.base_url, "http://localhost:5551/api/v1");
        assert_eq!(config.network.expected, NetworkId::new("previewnet"));
    }

    #[test]
    fn invalid_override_is_rejected() {
        let cli = Cli::try_parse_from(["swapfront", "--price-url", "localhost", "tokens"]).unwrap();
        assert!(cli.apply_overrides(&mut AppConfig::default()).is_err());
    }

    #[test]
    fn failed_network_check_is_not_reported_as_disconnected() {
        use crate::domain::network::NetworkState;

        let expected = NetworkId::new("testnet");
        let failed = NetworkMismatchState::from_state(&expected, &NetworkState::Matched { connected: None });
        let disconnected = NetworkMismatchState::from_state(&expected, &NetworkState::Disconnected);

        assert!(describe_network(&failed).contains("Could not determine"));
        assert!(describe_network(&disconnected).contains("not connected"));
        assert_ne!(describe_network(&failed), describe_network(&disconnected));
    }

    #[test]
    fn required_surfaces_error_or_pending() {
        let failed: QueryResult<u8> = QueryResult::from_outcome(Err(ApiError::Transport("reset".into())));
        let err = required(failed, "widgets").unwrap_err();
        assert!(err.to_string().contains("failed to load widgets"));
        assert!(required(QueryResult::<u8>::default(), "widgets").is_err());
        assert_eq!(required(QueryResult::from_outcome(Ok(3u8)), "widgets").unwrap(), 3);
    }
}
