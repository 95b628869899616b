//! TradingService - the caller-facing surface of the simulation engine
//!
//! Owns the whole dependency graph: quote cache, key pool, price resolver,
//! trade executor, and portfolio valuator are constructed here and shared
//! by reference. The HTTP layer (and tests) talk only to this facade.

use std::sync::Arc;

use crate::config::SimulatorConfig;
use crate::domain::entities::portfolio::PortfolioSummary;
use crate::domain::entities::quote::PriceResult;
use crate::domain::entities::transaction::Transaction;
use crate::domain::errors::TradeError;
use crate::domain::repositories::document_store::DocumentStore;
use crate::domain::repositories::market_data::{CandleFeed, QuoteFeed, SpotFeed};
use crate::domain::services::key_pool::KeyPool;
use crate::domain::services::portfolio_valuator::PortfolioValuator;
use crate::domain::services::price_resolver::{PriceResolver, ResolveOptions};
use crate::domain::services::quote_cache::QuoteCache;
use crate::domain::services::retry::RetryPolicy;
use crate::domain::services::trade_executor::{
    OrderEstimate, OrderRequest, TradeExecutor, TradeOutcome,
};
use crate::domain::value_objects::symbol::{AssetClass, Symbol};

pub struct TradingService {
    executor: TradeExecutor,
    valuator: PortfolioValuator,
    resolver: Arc<PriceResolver>,
}

impl TradingService {
    pub fn new(
        config: &SimulatorConfig,
        store: Arc<dyn DocumentStore>,
        quote_feed: Arc<dyn QuoteFeed>,
        candle_feed: Arc<dyn CandleFeed>,
        spot_feed: Arc<dyn SpotFeed>,
    ) -> Self {
        let cache = Arc::new(QuoteCache::new(config.cache_capacity, config.cache_ttl));
        let key_pool = Arc::new(KeyPool::new(config.api_keys.clone()));
        let resolver = Arc::new(PriceResolver::new(
            quote_feed,
            candle_feed,
            spot_feed,
            store.clone(),
            cache,
            key_pool,
            config.quote_throttle,
        ));
        let executor = TradeExecutor::new(
            store.clone(),
            resolver.clone(),
            RetryPolicy::new(config.price_retry_attempts, config.price_retry_base_delay),
            config.fee_rate,
            config.max_order_shares,
            config.initial_balance,
        );
        let valuator = PortfolioValuator::new(store, resolver.clone());

        Self {
            executor,
            valuator,
            resolver,
        }
    }

    pub async fn create_user(&self, user_id: &str) -> Result<f64, TradeError> {
        self.executor.create_user(user_id).await
    }

    pub async fn buy(
        &self,
        order: &OrderRequest,
        price_override: Option<f64>,
    ) -> Result<TradeOutcome, TradeError> {
        self.executor.execute_buy(order, price_override).await
    }

    pub async fn sell(&self, order: &OrderRequest) -> Result<TradeOutcome, TradeError> {
        self.executor.execute_sell(order).await
    }

    pub async fn estimate(
        &self,
        symbol: &str,
        shares: f64,
        asset_class: AssetClass,
    ) -> Result<OrderEstimate, TradeError> {
        self.executor.estimate(symbol, shares, asset_class).await
    }

    pub async fn portfolio_summary(&self, user_id: &str) -> Result<PortfolioSummary, TradeError> {
        self.valuator.valuate(user_id).await
    }

    pub async fn recent_orders(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Transaction>, TradeError> {
        self.valuator.recent_transactions(user_id, limit).await
    }

    /// Resolve a symbol's current price for display.
    pub async fn quote(
        &self,
        symbol_raw: &str,
        asset_class: AssetClass,
        force_refresh: bool,
    ) -> Result<PriceResult, TradeError> {
        let symbol = Symbol::parse(symbol_raw)?;
        let options = ResolveOptions {
            force_refresh,
            asset_class,
        };
        Ok(self.resolver.resolve(&symbol, &options).await?)
    }
}
