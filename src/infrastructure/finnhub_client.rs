use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::domain::entities::quote::{Quote, QuoteSource};
use crate::domain::repositories::market_data::{
    CandleFeed, DailyCandle, ProviderError, ProviderResult, QuoteFeed,
};

/// Finnhub API endpoint
const FINNHUB_API_BASE: &str = "https://finnhub.io/api/v1";

/// Finnhub `/quote` response
#[derive(Debug, Deserialize)]
struct FinnhubQuoteResponse {
    /// Current price
    c: f64,
    /// Open price of the day
    o: f64,
    /// High price of the day
    h: f64,
    /// Low price of the day
    l: f64,
    /// Previous close price
    pc: f64,
}

/// Finnhub `/stock/candle` response; parallel arrays, oldest bar first
#[derive(Debug, Deserialize)]
struct FinnhubCandleResponse {
    /// Status: "ok" or "no_data"
    s: String,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    t: Vec<i64>,
}

/// Client for the Finnhub quote and daily-candle endpoints. Authentication
/// is a per-request token supplied by the key pool, so one client serves
/// every credential.
pub struct FinnhubClient {
    client: Client,
    api_base: String,
}

impl FinnhubClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: FINNHUB_API_BASE.to_string(),
        })
    }

    fn map_request_error(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(e.to_string())
        }
    }

    async fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Unauthorized(body))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ProviderError::Http(format!("{} - {}", status, body)))
            }
        }
    }
}

#[async_trait]
impl QuoteFeed for FinnhubClient {
    fn name(&self) -> &str {
        "Finnhub"
    }

    async fn quote(&self, symbol: &str, api_key: &str) -> ProviderResult<Quote> {
        let url = format!("{}/quote", self.api_base);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("token", api_key)])
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let response = Self::check_status(response).await?;
        let body: FinnhubQuoteResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        // Finnhub answers unknown symbols with all-zero fields.
        if body.c == 0.0 && body.pc == 0.0 {
            return Err(ProviderError::NoData(symbol.to_string()));
        }

        Ok(Quote {
            symbol: symbol.to_string(),
            open: body.o,
            high: body.h,
            low: body.l,
            close: body.c,
            prev_close: body.pc,
            source: QuoteSource::Finnhub,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl CandleFeed for FinnhubClient {
    fn name(&self) -> &str {
        "Finnhub"
    }

    async fn daily_candles(
        &self,
        symbol: &str,
        lookback_days: u32,
        api_key: &str,
    ) -> ProviderResult<Vec<DailyCandle>> {
        let to = Utc::now().timestamp();
        let from = to - i64::from(lookback_days) * 86_400;

        let url = format!("{}/stock/candle", self.api_base);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("resolution", "D"),
                ("from", &from.to_string()),
                ("to", &to.to_string()),
                ("token", api_key),
            ])
            .send()
            .await
            .map_err(Self::map_request_error)?;

        let response = Self::check_status(response).await?;
        let body: FinnhubCandleResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if body.s != "ok" {
            return Err(ProviderError::NoData(symbol.to_string()));
        }

        let len = body.c.len();
        if body.o.len() != len || body.h.len() != len || body.l.len() != len || body.t.len() != len
        {
            return Err(ProviderError::InvalidResponse(
                "candle arrays have mismatched lengths".to_string(),
            ));
        }

        let bars = (0..len)
            .map(|i| DailyCandle {
                open: body.o[i],
                high: body.h[i],
                low: body.l[i],
                close: body.c[i],
                timestamp: body.t[i],
            })
            .collect();

        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_response_deserialization() {
        let json = r#"{"c": 150.25, "d": 1.5, "dp": 1.01, "h": 151.0, "l": 148.5, "o": 149.0, "pc": 148.75, "t": 1700000000}"#;
        let body: FinnhubQuoteResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.c, 150.25);
        assert_eq!(body.o, 149.0);
        assert_eq!(body.h, 151.0);
        assert_eq!(body.l, 148.5);
        assert_eq!(body.pc, 148.75);
    }

    #[test]
    fn test_candle_response_deserialization() {
        let json = r#"{
            "s": "ok",
            "o": [148.0, 149.0],
            "h": [150.0, 151.0],
            "l": [147.0, 148.0],
            "c": [149.5, 150.5],
            "t": [1699900000, 1700000000],
            "v": [1000, 1200]
        }"#;
        let body: FinnhubCandleResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.s, "ok");
        assert_eq!(body.c, vec![149.5, 150.5]);
        assert_eq!(body.t.len(), 2);
    }

    #[test]
    fn test_no_data_candle_response_omits_arrays() {
        let json = r#"{"s": "no_data"}"#;
        let body: FinnhubCandleResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.s, "no_data");
        assert!(body.c.is_empty());
    }

    #[tokio::test]
    async fn test_quote_with_unreachable_base_is_http_error() {
        let mut client = FinnhubClient::new(Duration::from_millis(200)).unwrap();
        client.api_base = "http://127.0.0.1:9".to_string();

        let result = client.quote("AAPL", "test-key").await;
        assert!(matches!(
            result,
            Err(ProviderError::Http(_)) | Err(ProviderError::Timeout)
        ));
    }
}
