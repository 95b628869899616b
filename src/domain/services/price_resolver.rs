//! PriceResolver - ordered fallback across market-data sources
//!
//! Resolution order, cheapest and freshest first: in-memory cache, primary
//! real-time quote API, daily-candle API, crypto spot API (crypto symbols
//! only), then stale/persisted data flagged as degraded. Short-circuits on
//! the first tier that produces a usable quote.

use chrono::Utc;
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::entities::quote::{PriceResult, Quote, QuoteSource};
use crate::domain::errors::ResolveError;
use crate::domain::repositories::document_store::DocumentStore;
use crate::domain::repositories::market_data::{CandleFeed, ProviderError, QuoteFeed, SpotFeed};
use crate::domain::services::key_pool::KeyPool;
use crate::domain::services::quote_cache::QuoteCache;
use crate::domain::value_objects::symbol::{AssetClass, Symbol};

/// Collection holding the last-known-good quote per symbol.
pub const QUOTES_COLLECTION: &str = "quotes";

/// Lookback window for the daily-candle fallback.
const CANDLE_LOOKBACK_DAYS: u32 = 2;

/// Spot prices carry no previous close; it is approximated at 99% of spot.
const SPOT_PREV_CLOSE_RATIO: f64 = 0.99;

type SymbolThrottle = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Options for one resolution call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Skip the fresh-cache check and hit live sources.
    pub force_refresh: bool,
    /// Crypto symbols additionally try the spot tier.
    pub asset_class: AssetClass,
}

pub struct PriceResolver {
    quote_feed: Arc<dyn QuoteFeed>,
    candle_feed: Arc<dyn CandleFeed>,
    spot_feed: Arc<dyn SpotFeed>,
    store: Arc<dyn DocumentStore>,
    cache: Arc<QuoteCache>,
    key_pool: Arc<KeyPool>,
    /// Per-symbol guard on primary-provider calls (default one per 500ms).
    throttle: SymbolThrottle,
}

impl PriceResolver {
    pub fn new(
        quote_feed: Arc<dyn QuoteFeed>,
        candle_feed: Arc<dyn CandleFeed>,
        spot_feed: Arc<dyn SpotFeed>,
        store: Arc<dyn DocumentStore>,
        cache: Arc<QuoteCache>,
        key_pool: Arc<KeyPool>,
        throttle_period: Duration,
    ) -> Self {
        let quota = Quota::with_period(throttle_period).expect("throttle period must be non-zero");
        Self {
            quote_feed,
            candle_feed,
            spot_feed,
            store,
            cache,
            key_pool,
            throttle: RateLimiter::keyed(quota),
        }
    }

    /// Resolve the current price for a symbol, short-circuiting on the
    /// first source that answers. Degraded results come from stale or
    /// persisted data and never refresh the cache.
    pub async fn resolve(
        &self,
        symbol: &Symbol,
        options: &ResolveOptions,
    ) -> Result<PriceResult, ResolveError> {
        if !options.force_refresh {
            if let Some(quote) = self.cache.get(symbol.as_str()) {
                return Ok(PriceResult {
                    quote,
                    degraded: false,
                });
            }
        }

        if let Some(quote) = self.try_primary(symbol).await {
            return Ok(PriceResult {
                quote,
                degraded: false,
            });
        }

        if let Some(quote) = self.try_daily_candles(symbol).await {
            return Ok(PriceResult {
                quote,
                degraded: false,
            });
        }

        if options.asset_class == AssetClass::Crypto {
            if let Some(quote) = self.try_spot(symbol).await {
                return Ok(PriceResult {
                    quote,
                    degraded: false,
                });
            }
        }

        if let Some(quote) = self.cache.get_stale(symbol.as_str()) {
            tracing::warn!("Serving stale cached quote for {}", symbol);
            return Ok(PriceResult {
                quote,
                degraded: true,
            });
        }

        if let Some(quote) = self.read_last_known(symbol).await {
            tracing::warn!("Serving persisted last-known quote for {}", symbol);
            return Ok(PriceResult {
                quote,
                degraded: true,
            });
        }

        tracing::error!("All price sources exhausted for {}", symbol);
        Err(ResolveError {
            symbol: symbol.to_string(),
        })
    }

    /// Tier 2: real-time quote endpoint, keyed and throttled per symbol.
    async fn try_primary(&self, symbol: &Symbol) -> Option<Quote> {
        let key = match self.key_pool.select() {
            Some(key) => key,
            None => {
                tracing::debug!("No quote-API keys available, skipping primary provider");
                return None;
            }
        };

        if self.throttle.check_key(&symbol.as_str().to_string()).is_err() {
            tracing::debug!("Primary provider throttled for {}", symbol);
            return None;
        }

        match self.quote_feed.quote(symbol.as_str(), key.secret()).await {
            Ok(quote) if quote.is_positive() => {
                self.commit(quote.clone()).await;
                Some(quote)
            }
            Ok(quote) => {
                tracing::warn!(
                    "{} returned non-positive prices for {} (close={}, prev_close={})",
                    self.quote_feed.name(),
                    symbol,
                    quote.close,
                    quote.prev_close
                );
                None
            }
            Err(ProviderError::Unauthorized(msg)) => {
                tracing::warn!("{} rejected credential: {}", self.quote_feed.name(), msg);
                self.key_pool.mark_invalid(key.secret());
                None
            }
            Err(e) => {
                tracing::warn!("{} failed for {}: {}", self.quote_feed.name(), symbol, e);
                None
            }
        }
    }

    /// Tier 3: derive a quote from the two most recent daily bars.
    async fn try_daily_candles(&self, symbol: &Symbol) -> Option<Quote> {
        let key = match self.key_pool.select() {
            Some(key) => key,
            None => {
                tracing::debug!("No keys available, skipping candle provider");
                return None;
            }
        };

        let bars = match self
            .candle_feed
            .daily_candles(symbol.as_str(), CANDLE_LOOKBACK_DAYS, key.secret())
            .await
        {
            Ok(bars) => bars,
            Err(ProviderError::Unauthorized(msg)) => {
                tracing::warn!("{} rejected credential: {}", self.candle_feed.name(), msg);
                self.key_pool.mark_invalid(key.secret());
                return None;
            }
            Err(e) => {
                tracing::warn!("{} failed for {}: {}", self.candle_feed.name(), symbol, e);
                return None;
            }
        };

        let latest = bars.last()?;
        let prev_close = if bars.len() >= 2 {
            bars[bars.len() - 2].close
        } else {
            latest.open
        };

        let quote = Quote {
            symbol: symbol.to_string(),
            open: latest.open,
            high: latest.high,
            low: latest.low,
            close: latest.close,
            prev_close,
            source: QuoteSource::FinnhubDaily,
            fetched_at: Utc::now(),
        };

        if !quote.is_positive() {
            tracing::warn!("Candle-derived quote for {} is non-positive", symbol);
            return None;
        }

        self.commit(quote.clone()).await;
        Some(quote)
    }

    /// Tier 4: crypto spot price.
    async fn try_spot(&self, symbol: &Symbol) -> Option<Quote> {
        match self.spot_feed.spot(symbol.as_str()).await {
            Ok(price) if price > 0.0 => {
                let quote = Quote {
                    symbol: symbol.to_string(),
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    prev_close: price * SPOT_PREV_CLOSE_RATIO,
                    source: QuoteSource::CoinbaseSpot,
                    fetched_at: Utc::now(),
                };
                self.commit(quote.clone()).await;
                Some(quote)
            }
            Ok(price) => {
                tracing::warn!(
                    "{} returned non-positive spot {} for {}",
                    self.spot_feed.name(),
                    price,
                    symbol
                );
                None
            }
            Err(e) => {
                tracing::warn!("{} failed for {}: {}", self.spot_feed.name(), symbol, e);
                None
            }
        }
    }

    /// Cache a live quote and persist it as the symbol's last-known price.
    /// Persistence is best-effort; a store failure only loses the fallback.
    async fn commit(&self, quote: Quote) {
        self.cache.put(quote.clone());
        if let Ok(doc) = serde_json::to_value(&quote) {
            if let Err(e) = self.store.put(QUOTES_COLLECTION, &quote.symbol, doc).await {
                tracing::warn!("Failed to persist last-known quote for {}: {}", quote.symbol, e);
            }
        }
    }

    /// Tier 6: last-known persisted quote, if positive.
    async fn read_last_known(&self, symbol: &Symbol) -> Option<Quote> {
        match self.store.get(QUOTES_COLLECTION, symbol.as_str()).await {
            Ok(Some(doc)) => match serde_json::from_value::<Quote>(doc) {
                Ok(mut quote) if quote.close > 0.0 => {
                    quote.source = QuoteSource::LastKnown;
                    Some(quote)
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Persisted quote for {} is corrupt: {}", symbol, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to read persisted quote for {}: {}", symbol, e);
                None
            }
        }
    }
}
