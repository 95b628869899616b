//! End-to-end trade flow: user creation, buys, sells, and portfolio
//! valuation running against the in-memory store and a scripted quote feed.

use async_trait::async_trait;
use chrono::Utc;
use papertrade::application::services::trading_service::TradingService;
use papertrade::config::SimulatorConfig;
use papertrade::domain::entities::quote::{Quote, QuoteSource};
use papertrade::domain::entities::transaction::TradeSide;
use papertrade::domain::repositories::market_data::{
    CandleFeed, DailyCandle, ProviderError, ProviderResult, QuoteFeed, SpotFeed,
};
use papertrade::domain::services::trade_executor::OrderRequest;
use papertrade::domain::value_objects::symbol::AssetClass;
use papertrade::persistence::memory::MemoryStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

/// Quote feed whose per-symbol prices can be repointed mid-test.
struct ScriptedQuoteFeed {
    prices: Mutex<HashMap<String, (f64, f64)>>,
}

impl ScriptedQuoteFeed {
    fn new(prices: &[(&str, f64, f64)]) -> Self {
        Self {
            prices: Mutex::new(
                prices
                    .iter()
                    .map(|&(s, close, prev)| (s.to_string(), (close, prev)))
                    .collect(),
            ),
        }
    }

    fn set_price(&self, symbol: &str, close: f64, prev_close: f64) {
        self.prices
            .lock()
            .unwrap()
            .insert(symbol.to_string(), (close, prev_close));
    }
}

#[async_trait]
impl QuoteFeed for ScriptedQuoteFeed {
    fn name(&self) -> &str {
        "ScriptedQuoteFeed"
    }

    async fn quote(&self, symbol: &str, _api_key: &str) -> ProviderResult<Quote> {
        let prices = self.prices.lock().unwrap();
        match prices.get(symbol) {
            Some(&(close, prev_close)) => Ok(Quote {
                symbol: symbol.to_string(),
                open: prev_close,
                high: close.max(prev_close),
                low: close.min(prev_close),
                close,
                prev_close,
                source: QuoteSource::Finnhub,
                fetched_at: Utc::now(),
            }),
            None => Err(ProviderError::NoData(symbol.to_string())),
        }
    }
}

struct NoCandles;

#[async_trait]
impl CandleFeed for NoCandles {
    fn name(&self) -> &str {
        "NoCandles"
    }

    async fn daily_candles(
        &self,
        symbol: &str,
        _lookback_days: u32,
        _api_key: &str,
    ) -> ProviderResult<Vec<DailyCandle>> {
        Err(ProviderError::NoData(symbol.to_string()))
    }
}

struct StaticSpot {
    price: f64,
}

#[async_trait]
impl SpotFeed for StaticSpot {
    fn name(&self) -> &str {
        "StaticSpot"
    }

    async fn spot(&self, _symbol: &str) -> ProviderResult<f64> {
        Ok(self.price)
    }
}

fn config() -> SimulatorConfig {
    SimulatorConfig {
        api_keys: vec![Zeroizing::new("e2e-key".to_string())],
        // Keep the per-symbol throttle out of the way; these tests issue
        // several resolutions back to back.
        quote_throttle: std::time::Duration::from_millis(1),
        ..SimulatorConfig::default()
    }
}

fn service_with(feed: Arc<ScriptedQuoteFeed>) -> (TradingService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let service = TradingService::new(
        &config(),
        store.clone(),
        feed,
        Arc::new(NoCandles),
        Arc::new(StaticSpot { price: 61_000.0 }),
    );
    (service, store)
}

fn order(user_id: &str, symbol: &str, shares: f64) -> OrderRequest {
    OrderRequest {
        user_id: user_id.to_string(),
        symbol: symbol.to_string(),
        shares,
        asset_class: AssetClass::Stock,
        idempotency_key: None,
    }
}

#[tokio::test]
async fn test_full_buy_then_sell_lifecycle() {
    let feed = Arc::new(ScriptedQuoteFeed::new(&[("AAPL", 150.0, 148.0)]));
    let (service, _store) = service_with(feed.clone());

    let starting_balance = service.create_user("trader-1").await.unwrap();
    assert_eq!(starting_balance, 10_000.0);

    // Buy 10 AAPL at the live price of 150.
    let buy = service.buy(&order("trader-1", "AAPL", 10.0), None).await.unwrap();
    assert_eq!(buy.side, TradeSide::Buy);
    assert_eq!(buy.price, 150.0);
    assert!((buy.total - 1_501.50).abs() < 1e-9);
    assert!((buy.new_balance - 8_498.50).abs() < 1e-9);
    assert!(!buy.degraded_price);

    // Price moves to 160; sell everything. The cached 150 quote is still
    // fresh, so repoint the feed and force a refresh once the per-symbol
    // throttle window has passed.
    feed.set_price("AAPL", 160.0, 150.0);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let quote = service.quote("AAPL", AssetClass::Stock, true).await.unwrap();
    assert_eq!(quote.quote.close, 160.0);

    let sell = service.sell(&order("trader-1", "AAPL", 10.0)).await.unwrap();
    assert_eq!(sell.price, 160.0);
    assert!((sell.fee - 1.60).abs() < 1e-9);
    assert!((sell.total - 1_598.40).abs() < 1e-9);
    assert!((sell.realized_pnl.unwrap() - 100.0).abs() < 1e-9);
    assert!(sell.position.is_none());
    assert!((sell.new_balance - 10_096.90).abs() < 1e-9);

    // The ledger now carries one winning sell.
    let summary = service.portfolio_summary("trader-1").await.unwrap();
    assert_eq!(summary.win_rate, 1.0);
    assert!(summary.positions.is_empty());
    assert!((summary.total_value - summary.cash_balance).abs() < 1e-9);

    let orders = service.recent_orders("trader-1", 10).await.unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].side, TradeSide::Sell);
    assert_eq!(orders[1].side, TradeSide::Buy);
}

#[tokio::test]
async fn test_portfolio_summary_reprices_positions() {
    let feed = Arc::new(ScriptedQuoteFeed::new(&[
        ("AAPL", 150.0, 148.0),
        ("MSFT", 300.0, 305.0),
    ]));
    let (service, _store) = service_with(feed.clone());

    service.create_user("trader-1").await.unwrap();
    service.buy(&order("trader-1", "AAPL", 10.0), None).await.unwrap();
    service.buy(&order("trader-1", "MSFT", 5.0), None).await.unwrap();

    let summary = service.portfolio_summary("trader-1").await.unwrap();
    assert_eq!(summary.positions.len(), 2);
    // Both positions are worth exactly 1500, so check totals, not order.
    let total_positions: f64 = summary.positions.iter().map(|p| p.market_value).sum();
    assert!((summary.total_value - (summary.cash_balance + total_positions)).abs() < 1e-9);
    // Day changes flow from the quotes: 10*(150-148) + 5*(300-305).
    assert!((summary.day_change - -5.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_buy_rejects_unknown_user_and_bad_input() {
    let feed = Arc::new(ScriptedQuoteFeed::new(&[("AAPL", 150.0, 148.0)]));
    let (service, _store) = service_with(feed);

    let err = service.buy(&order("ghost", "AAPL", 1.0), None).await.unwrap_err();
    assert_eq!(err.reason_code(), "unknown_user");

    service.create_user("trader-1").await.unwrap();
    let err = service
        .buy(&order("trader-1", "not a symbol!", 1.0), None)
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "invalid_symbol");

    let err = service
        .buy(&order("trader-1", "AAPL", -3.0), None)
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "invalid_shares");
}

#[tokio::test]
async fn test_idempotency_token_survives_across_buy_and_sell() {
    let feed = Arc::new(ScriptedQuoteFeed::new(&[("AAPL", 150.0, 148.0)]));
    let (service, _store) = service_with(feed);

    service.create_user("trader-1").await.unwrap();

    let mut buy_order = order("trader-1", "AAPL", 10.0);
    buy_order.idempotency_key = Some("order-abc".to_string());
    service.buy(&buy_order, None).await.unwrap();

    // Replaying the same token is rejected on either side of the book.
    let err = service.buy(&buy_order, None).await.unwrap_err();
    assert_eq!(err.reason_code(), "duplicate_order");

    let mut sell_order = order("trader-1", "AAPL", 10.0);
    sell_order.idempotency_key = Some("order-abc".to_string());
    let err = service.sell(&sell_order).await.unwrap_err();
    assert_eq!(err.reason_code(), "duplicate_order");
}

#[tokio::test]
async fn test_estimate_previews_cost_without_trading() {
    let feed = Arc::new(ScriptedQuoteFeed::new(&[("AAPL", 150.0, 148.0)]));
    let (service, _store) = service_with(feed);

    service.create_user("trader-1").await.unwrap();
    let estimate = service
        .estimate("aapl", 10.0, AssetClass::Stock)
        .await
        .unwrap();

    assert_eq!(estimate.symbol, "AAPL");
    assert_eq!(estimate.price, 150.0);
    assert!((estimate.fee - 1.50).abs() < 1e-9);
    assert!((estimate.total - 1_501.50).abs() < 1e-9);

    // Estimation must leave the account untouched.
    let summary = service.portfolio_summary("trader-1").await.unwrap();
    assert_eq!(summary.cash_balance, 10_000.0);
    assert!(summary.positions.is_empty());
    assert!(service.recent_orders("trader-1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_crypto_order_resolves_through_spot_tier() {
    // No stock feeds at all: quote and candles are dead, spot answers.
    let feed = Arc::new(ScriptedQuoteFeed::new(&[]));
    let (service, _store) = service_with(feed);

    service.create_user("trader-1").await.unwrap();

    let mut btc_order = order("trader-1", "BTC", 0.1);
    btc_order.asset_class = AssetClass::Crypto;
    let buy = service.buy(&btc_order, None).await.unwrap();

    assert_eq!(buy.price, 61_000.0);
    assert!(!buy.degraded_price);
    let position = buy.position.unwrap();
    assert_eq!(position.asset_class, AssetClass::Crypto);
    assert!((position.shares - 0.1).abs() < 1e-12);
}

#[tokio::test]
async fn test_concurrent_buys_never_overspend() {
    let feed = Arc::new(ScriptedQuoteFeed::new(&[("AAPL", 1_000.0, 1_000.0)]));
    let (service, _store) = service_with(feed);
    let service = Arc::new(service);

    service.create_user("trader-1").await.unwrap();

    // Nine concurrent buys of $1001 each against a $10k balance: at most
    // nine can settle, and the balance must never go negative.
    let mut handles = Vec::new();
    for _ in 0..12 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.buy(&order("trader-1", "AAPL", 1.0), None).await
        }));
    }

    let mut settled = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => settled += 1,
            Err(e) => {
                assert_eq!(e.reason_code(), "insufficient_funds");
                rejected += 1;
            }
        }
    }

    assert_eq!(settled + rejected, 12);
    let summary = service.portfolio_summary("trader-1").await.unwrap();
    assert!(summary.cash_balance >= 0.0);
    // Every settled buy cost exactly 1001.
    assert!((summary.cash_balance - (10_000.0 - 1_001.0 * settled as f64)).abs() < 1e-6);
    assert_eq!(summary.positions[0].shares, settled as f64);
}
