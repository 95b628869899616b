use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which tier of the resolution chain produced a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    /// Real-time quote endpoint (primary provider)
    Finnhub,
    /// Derived from the two most recent daily candles (secondary provider)
    FinnhubDaily,
    /// Crypto spot endpoint; previous close is approximated
    CoinbaseSpot,
    /// Last-known persisted price, served when every live source failed
    LastKnown,
}

/// Immutable point-in-time price snapshot. Built once per successful
/// provider call (or cache hit) and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub prev_close: f64,
    pub source: QuoteSource,
    pub fetched_at: DateTime<Utc>,
}

impl Quote {
    /// A quote is usable for trading only when both the current price and
    /// the previous close are strictly positive.
    pub fn is_positive(&self) -> bool {
        self.close > 0.0 && self.prev_close > 0.0
    }

    /// Day-over-day change as a percentage; 0.0 when no valid previous close.
    pub fn change_percent(&self) -> f64 {
        if self.prev_close <= 0.0 {
            return 0.0;
        }
        (self.close - self.prev_close) / self.prev_close * 100.0
    }
}

/// Outcome of a price resolution: the quote plus whether it came from a
/// stale/persisted fallback rather than a live source.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceResult {
    pub quote: Quote,
    pub degraded: bool,
}
