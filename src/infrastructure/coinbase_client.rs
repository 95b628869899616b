use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::domain::repositories::market_data::{ProviderError, ProviderResult, SpotFeed};

/// Coinbase public API endpoint (no authentication required for spot prices)
const COINBASE_API_BASE: &str = "https://api.coinbase.com";

/// Coinbase spot price response
#[derive(Debug, Deserialize)]
struct SpotPriceResponse {
    data: SpotPriceData,
}

#[derive(Debug, Deserialize)]
struct SpotPriceData {
    /// Price as a decimal string, e.g. "61234.56"
    amount: String,
}

/// Client for the unauthenticated Coinbase spot-price endpoint.
pub struct CoinbaseSpotClient {
    client: Client,
    api_base: String,
}

impl CoinbaseSpotClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: COINBASE_API_BASE.to_string(),
        })
    }
}

#[async_trait]
impl SpotFeed for CoinbaseSpotClient {
    fn name(&self) -> &str {
        "Coinbase"
    }

    async fn spot(&self, symbol: &str) -> ProviderResult<f64> {
        let url = format!("{}/v2/prices/{}-USD/spot", self.api_base, symbol);
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Http(e.to_string())
            }
        })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(ProviderError::NoData(symbol.to_string())),
            StatusCode::TOO_MANY_REQUESTS => return Err(ProviderError::RateLimited),
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::Http(format!("{} - {}", status, body)));
            }
        }

        let body: SpotPriceResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        body.data.amount.parse::<f64>().map_err(|e| {
            ProviderError::InvalidResponse(format!(
                "spot amount '{}' is not a number: {}",
                body.data.amount, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spot_response_deserialization() {
        let json = r#"{"data": {"base": "BTC", "currency": "USD", "amount": "61234.56"}}"#;
        let body: SpotPriceResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.data.amount, "61234.56");
        assert_eq!(body.data.amount.parse::<f64>().unwrap(), 61_234.56);
    }

    #[tokio::test]
    async fn test_spot_with_unreachable_base_is_http_error() {
        let mut client = CoinbaseSpotClient::new(Duration::from_millis(200)).unwrap();
        client.api_base = "http://127.0.0.1:9".to_string();

        let result = client.spot("BTC").await;
        assert!(matches!(
            result,
            Err(ProviderError::Http(_)) | Err(ProviderError::Timeout)
        ));
    }
}
