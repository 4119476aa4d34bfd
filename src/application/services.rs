//! Application services - the cached data layer callers talk to

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::balance::{association_from, AccountLookup, BalanceResolver, PortfolioValue, PriceTable};
use crate::domain::cache::{CacheKey, CacheMetrics, Clock, QueryCache, QueryOptions, QueryResult, TokioClock};
use crate::domain::ledger::{LedgerIndex, TokenAllowance, TransactionStatus};
use crate::domain::network::{NetworkConnector, NetworkMismatchState, NetworkValidator};
use crate::domain::price::{find_listing, price_from_info, PriceSource};
use crate::domain::swap::{rank_routes, RouteSource, SwapQuoteRequest, SwapRoute};
use crate::domain::throttle::RequestThrottle;
use crate::infrastructure::{AggregatorClient, MirrorNodeClient, PriceApiClient};
use crate::shared::config::AppConfig;
use crate::shared::errors::ApiError;
use crate::shared::tasks::ScheduledTask;
use crate::shared::types::{AccountId, AssetId, TokenInfo, TokenPrice};

const TOKEN_LIST: &str = "token_list";
const TOKEN_PRICE: &str = "token_price";
const ACCOUNT_BALANCES: &str = "account_balances";
const TOKEN_ALLOWANCES: &str = "token_allowances";
const SWAP_QUOTE: &str = "swap_quote";
const TRANSACTION_STATUS: &str = "transaction_status";

/// The native price comes from the listing that carries the native symbol.
async fn fetch_price(prices: &dyn PriceSource, asset: &AssetId) -> Result<TokenPrice, ApiError> {
    match asset {
        AssetId::Native => {
            let tokens = prices.known_tokens().await?;
            let listing =
                find_listing(&tokens, asset).ok_or_else(|| ApiError::NotFound(format!("{} is not listed", asset)))?;
            price_from_info(listing)
        }
        AssetId::Token(id) => price_from_info(&prices.token(id).await?),
    }
}

/// The collaborators behind the data layer
pub struct Collaborators {
    pub prices: Arc<dyn PriceSource>,
    pub ledger: Arc<dyn LedgerIndex>,
    pub routes: Arc<dyn RouteSource>,
    pub connector: Arc<dyn NetworkConnector>,
}

impl Collaborators {
    /// HTTP clients for every collaborator named in `config`.
    pub fn from_config(config: &AppConfig, connector: Arc<dyn NetworkConnector>) -> Result<Self, ApiError> {
        Ok(Self {
            prices: Arc::new(PriceApiClient::new(&config.price_api)?),
            ledger: Arc::new(MirrorNodeClient::new(&config.mirror_node)?),
            routes: Arc::new(AggregatorClient::new(&config.aggregator)?),
            connector,
        })
    }
}

/// Per-entity query settings
#[derive(Debug, Clone)]
struct EntityOptions {
    token_list: QueryOptions,
    token_price: QueryOptions,
    account_balances: QueryOptions,
    swap_quote: QueryOptions,
    transaction_status: QueryOptions,
}

impl EntityOptions {
    fn from_config(config: &AppConfig) -> Self {
        Self {
            token_list: QueryOptions::token_list(&config.cache),
            token_price: QueryOptions::token_price(&config.cache),
            account_balances: QueryOptions::account_balances(&config.cache),
            swap_quote: QueryOptions::swap_quote(&config.cache),
            transaction_status: QueryOptions::transaction_status(&config.cache),
        }
    }
}

/// Cache hit/miss counters per entity
#[derive(Debug, Clone, Default)]
pub struct ServiceMetrics {
    pub token_list: CacheMetrics,
    pub token_price: CacheMetrics,
    pub account_balances: CacheMetrics,
    pub token_allowances: CacheMetrics,
    pub swap_quote: CacheMetrics,
    pub transaction_status: CacheMetrics,
}

/// Typed, cached accessors over the price API, mirror node and aggregator.
///
/// Construct once and share by reference; every cache, the throttle and the
/// network validator live here rather than in globals.
pub struct DataService {
    config: AppConfig,
    options: EntityOptions,
    prices: Arc<dyn PriceSource>,
    routes: Arc<dyn RouteSource>,
    ledger: Arc<dyn LedgerIndex>,
    resolver: Arc<BalanceResolver>,
    throttle: Arc<RequestThrottle>,
    network: NetworkValidator,
    token_lists: QueryCache<Vec<TokenInfo>>,
    token_prices: QueryCache<TokenPrice>,
    balances: QueryCache<AccountLookup>,
    allowances: QueryCache<Vec<TokenAllowance>>,
    quotes: QueryCache<Vec<SwapRoute>>,
    transactions: QueryCache<TransactionStatus>,
    clock: Arc<dyn Clock>,
}

impl DataService {
    pub fn new(config: AppConfig, collaborators: Collaborators, clock: Arc<dyn Clock>) -> Self {
        let throttle = Arc::new(RequestThrottle::from_config(&config.throttle, Arc::clone(&clock)));
        let network = NetworkValidator::new(config.network.expected.clone(), collaborators.connector);
        info!(
            "data service ready: expected network {}, price spacing {:?}",
            config.network.expected,
            throttle.min_interval()
        );

        Self {
            options: EntityOptions::from_config(&config),
            config,
            prices: collaborators.prices,
            routes: collaborators.routes,
            resolver: Arc::new(BalanceResolver::new(Arc::clone(&collaborators.ledger))),
            ledger: collaborators.ledger,
            throttle,
            network,
            token_lists: QueryCache::new(Arc::clone(&clock)),
            token_prices: QueryCache::new(Arc::clone(&clock)),
            balances: QueryCache::new(Arc::clone(&clock)),
            allowances: QueryCache::new(Arc::clone(&clock)),
            quotes: QueryCache::new(Arc::clone(&clock)),
            transactions: QueryCache::new(Arc::clone(&clock)),
            clock,
        }
    }

    /// Wires the HTTP clients from `config` on the tokio clock.
    pub fn from_config(config: AppConfig, connector: Arc<dyn NetworkConnector>) -> Result<Self, ApiError> {
        let collaborators = Collaborators::from_config(&config, connector)?;
        Ok(Self::new(config, collaborators, Arc::new(TokioClock)))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn throttle(&self) -> &RequestThrottle {
        &self.throttle
    }

    pub fn network(&self) -> &NetworkValidator {
        &self.network
    }

    pub async fn token_list(&self) -> QueryResult<Vec<TokenInfo>> {
        let prices = Arc::clone(&self.prices);
        self.token_lists
            .get(
                CacheKey::new(TOKEN_LIST),
                move || {
                    let prices = Arc::clone(&prices);
                    async move { prices.known_tokens().await }
                },
                &self.options.token_list,
            )
            .await
    }

    pub async fn token_price(&self, asset: &AssetId) -> QueryResult<TokenPrice> {
        self.token_prices
            .get(Self::price_key(asset), self.price_fetch(asset), &self.options.token_price)
            .await
    }

    /// Bypasses freshness; the request still honours the price throttle.
    pub async fn refresh_token_price(&self, asset: &AssetId) -> QueryResult<TokenPrice> {
        self.token_prices
            .refetch(Self::price_key(asset), self.price_fetch(asset), &self.options.token_price)
            .await
    }

    fn price_key(asset: &AssetId) -> CacheKey {
        CacheKey::new(TOKEN_PRICE).param(asset)
    }

    /// Every price request passes the per-asset throttle, retries included.
    fn price_fetch(
        &self,
        asset: &AssetId,
    ) -> impl Fn() -> BoxFuture<'static, Result<TokenPrice, ApiError>> + Send + Sync + 'static {
        let prices = Arc::clone(&self.prices);
        let throttle = Arc::clone(&self.throttle);
        let asset = asset.clone();
        move || {
            let prices = Arc::clone(&prices);
            let throttle = Arc::clone(&throttle);
            let asset = asset.clone();
            async move {
                throttle
                    .run(asset.as_str(), fetch_price(&*prices, &asset))
                    .await
            }
            .boxed()
        }
    }

    /// Prices for several assets; failures leave an asset out and surface the first error.
    pub async fn token_prices(&self, assets: &[AssetId]) -> QueryResult<BTreeMap<AssetId, TokenPrice>> {
        let results = join_all(assets.iter().map(|asset| self.token_price(asset))).await;

        let mut combined: QueryResult<BTreeMap<AssetId, TokenPrice>> = QueryResult::default();
        let mut found = BTreeMap::new();
        for (asset, result) in assets.iter().zip(results) {
            combined.is_loading |= result.is_loading;
            combined.is_fetching |= result.is_fetching;
            if combined.error.is_none() {
                combined.error = result.error;
            }
            if let Some(price) = result.data {
                found.insert(asset.clone(), price);
            }
        }
        if !found.is_empty() || combined.error.is_none() {
            combined.data = Some(found);
        }
        combined
    }

    pub async fn account_balances(&self, account_id: &AccountId) -> QueryResult<AccountLookup> {
        let resolver = Arc::clone(&self.resolver);
        let account = account_id.clone();
        self.balances
            .get(
                Self::balance_key(account_id),
                move || {
                    let resolver = Arc::clone(&resolver);
                    let account = account.clone();
                    async move { resolver.resolve(&account).await }
                },
                &self.options.account_balances,
            )
            .await
    }

    fn balance_key(account_id: &AccountId) -> CacheKey {
        CacheKey::new(ACCOUNT_BALANCES).param(account_id)
    }

    /// Native is always associated; an unavailable lookup resolves through the association policy.
    pub async fn is_associated(&self, account_id: &AccountId, asset: &AssetId) -> bool {
        if asset.is_native() {
            return true;
        }
        let balances = self.account_balances(account_id).await;
        association_from(&balances, asset, self.resolver.association_policy())
    }

    pub async fn token_allowances(&self, account_id: &AccountId) -> QueryResult<Vec<TokenAllowance>> {
        let resolver = Arc::clone(&self.resolver);
        let account = account_id.clone();
        self.allowances
            .get(
                CacheKey::new(TOKEN_ALLOWANCES).param(account_id),
                move || {
                    let resolver = Arc::clone(&resolver);
                    let account = account.clone();
                    async move { resolver.token_allowances(&account).await }
                },
                &self.options.account_balances,
            )
            .await
    }

    /// Balances valued against the listed token prices.
    pub async fn portfolio_value(&self, account_id: &AccountId) -> QueryResult<PortfolioValue> {
        let (balances, tokens) = futures::join!(self.account_balances(account_id), self.token_list());
        let table = tokens
            .data
            .as_deref()
            .map(PriceTable::from_tokens)
            .unwrap_or_default();

        QueryResult {
            data: balances
                .data
                .as_ref()
                .and_then(AccountLookup::snapshot)
                .map(|snapshot| PortfolioValue::of(snapshot, &table)),
            is_loading: balances.is_loading || tokens.is_loading,
            is_fetching: balances.is_fetching || tokens.is_fetching,
            error: balances.error.or(tokens.error),
        }
    }

    /// Drops cached balances and allowances, e.g. after a swap settles.
    pub fn invalidate_account(&self, account_id: &AccountId) {
        self.balances.invalidate(&Self::balance_key(account_id));
        self.allowances
            .invalidate(&CacheKey::new(TOKEN_ALLOWANCES).param(account_id));
        debug!("invalidated cached state for {}", account_id);
    }

    /// Routes ranked best first.
    pub async fn swap_quote(&self, request: &SwapQuoteRequest) -> QueryResult<Vec<SwapRoute>> {
        let routes = Arc::clone(&self.routes);
        let key = CacheKey::new(SWAP_QUOTE)
            .param(&request.token_from)
            .param(&request.token_to)
            .param(request.amount)
            .param(request.is_reverse);
        let request = request.clone();
        self.quotes
            .get(
                key,
                move || {
                    let routes = Arc::clone(&routes);
                    let request = request.clone();
                    async move {
                        let offered = routes.rates(&request).await?;
                        Ok(rank_routes(offered, request.is_reverse))
                    }
                },
                &self.options.swap_quote,
            )
            .await
    }

    pub async fn transaction_status(&self, transaction_id: &str) -> QueryResult<TransactionStatus> {
        self.transactions
            .get(
                Self::transaction_key(transaction_id),
                self.transaction_fetch(transaction_id),
                &self.options.transaction_status,
            )
            .await
    }

    fn transaction_key(transaction_id: &str) -> CacheKey {
        CacheKey::new(TRANSACTION_STATUS).param(transaction_id)
    }

    fn transaction_fetch(
        &self,
        transaction_id: &str,
    ) -> impl Fn() -> BoxFuture<'static, Result<TransactionStatus, ApiError>> + Send + Sync + 'static {
        let ledger = Arc::clone(&self.ledger);
        let id = transaction_id.to_string();
        move || {
            let ledger = Arc::clone(&ledger);
            let id = id.clone();
            async move {
                let records = ledger.transaction(&id).await?;
                Ok(TransactionStatus::from_records(&records))
            }
            .boxed()
        }
    }

    /// Polls until the transaction settles or `timeout` passes; the last observed state is returned.
    pub async fn await_transaction(
        &self,
        transaction_id: &str,
        poll: Duration,
        timeout: Duration,
    ) -> QueryResult<TransactionStatus> {
        let deadline = self.clock.now() + timeout;
        let mut result = self.transaction_status(transaction_id).await;
        loop {
            let settled = result.data.as_ref().map_or(false, TransactionStatus::is_final);
            if settled || self.clock.now() + poll > deadline {
                return result;
            }
            tokio::time::sleep(poll).await;
            result = self
                .transactions
                .refetch(
                    Self::transaction_key(transaction_id),
                    self.transaction_fetch(transaction_id),
                    &self.options.transaction_status,
                )
                .await;
        }
    }

    pub fn network_mismatch(&self) -> NetworkMismatchState {
        self.network.mismatch_state()
    }

    /// One eviction sweeper per cache; dropping the handles stops them.
    pub fn spawn_sweepers(&self) -> Vec<ScheduledTask> {
        let period = Duration::from_millis(self.config.cache.sweep_interval_ms);
        vec![
            self.token_lists.spawn_sweeper(TOKEN_LIST, period),
            self.token_prices.spawn_sweeper(TOKEN_PRICE, period),
            self.balances.spawn_sweeper(ACCOUNT_BALANCES, period),
            self.allowances.spawn_sweeper(TOKEN_ALLOWANCES, period),
            self.quotes.spawn_sweeper(SWAP_QUOTE, period),
            self.transactions.spawn_sweeper(TRANSACTION_STATUS, period),
        ]
    }

    pub fn metrics(&self) -> ServiceMetrics {
        ServiceMetrics {
            token_list: self.token_lists.metrics(),
            token_price: self.token_prices.metrics(),
            account_balances: self.balances.metrics(),
            token_allowances: self.allowances.metrics(),
            swap_quote: self.quotes.metrics(),
            transaction_status: self.transactions.metrics(),
        }
    }
}
