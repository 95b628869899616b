//! Market Data Provider Traits
//!
//! Ports for the three upstream price sources the resolver falls back
//! across: a keyed real-time quote endpoint, a keyed daily-candle endpoint,
//! and an unauthenticated crypto spot endpoint.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::quote::Quote;

/// Common result type for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur talking to an upstream provider
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    /// The provider rejected the credential; the key must be retired.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider call timed out")]
    Timeout,

    #[error("provider HTTP error: {0}")]
    Http(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// The provider answered but has no data for the symbol.
    #[error("no data for symbol: {0}")]
    NoData(String),
}

impl ProviderError {
    /// Transient failures are worth retrying; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited | ProviderError::Timeout | ProviderError::Http(_)
        )
    }
}

/// One daily OHLC bar from the historical endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyCandle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Bar timestamp, seconds since the epoch.
    pub timestamp: i64,
}

/// Real-time quote endpoint, authenticated with a rotating credential.
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    fn name(&self) -> &str;

    async fn quote(&self, symbol: &str, api_key: &str) -> ProviderResult<Quote>;
}

/// Historical daily-bar endpoint; bars are returned oldest-first.
#[async_trait]
pub trait CandleFeed: Send + Sync {
    fn name(&self) -> &str;

    async fn daily_candles(
        &self,
        symbol: &str,
        lookback_days: u32,
        api_key: &str,
    ) -> ProviderResult<Vec<DailyCandle>>;
}

/// Crypto spot endpoint returning a single USD price.
#[async_trait]
pub trait SpotFeed: Send + Sync {
    fn name(&self) -> &str;

    async fn spot(&self, symbol: &str) -> ProviderResult<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited.is_transient());
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::Http("502".to_string()).is_transient());
        assert!(!ProviderError::Unauthorized("bad key".to_string()).is_transient());
        assert!(!ProviderError::NoData("AAPL".to_string()).is_transient());
        assert!(!ProviderError::InvalidResponse("missing field".to_string()).is_transient());
    }
}
