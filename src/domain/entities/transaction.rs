use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
}

/// Append-only ledger record. Once written with status `completed` it is
/// never mutated or deleted by the trading flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub shares: f64,
    pub price: f64,
    pub fee: f64,
    /// Buy: cost including fee. Sell: net proceeds after fee.
    pub total: f64,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
    /// Realized profit/loss, recorded on sells only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<f64>,
    /// Caller-supplied duplicate-submission guard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl Transaction {
    /// Ledger ids derive from the user and a high-resolution timestamp,
    /// making them effectively unique per user per microsecond.
    pub fn derive_id(user_id: &str, at: DateTime<Utc>) -> String {
        format!("{}-{}", user_id, at.timestamp_micros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_derive_id_uses_high_resolution_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let id = Transaction::derive_id("user-1", at);
        assert_eq!(id, format!("user-1-{}", at.timestamp_micros()));
    }

    #[test]
    fn test_side_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&TradeSide::Buy).unwrap(), "\"BUY\"");
        assert_eq!(serde_json::to_string(&TradeSide::Sell).unwrap(), "\"SELL\"");
    }

    #[test]
    fn test_optional_fields_omitted_for_buys() {
        let txn = Transaction {
            id: "user-1-1".to_string(),
            user_id: "user-1".to_string(),
            symbol: "AAPL".to_string(),
            side: TradeSide::Buy,
            shares: 10.0,
            price: 150.0,
            fee: 1.5,
            total: 1501.5,
            status: TransactionStatus::Completed,
            timestamp: Utc::now(),
            realized_pnl: None,
            idempotency_key: None,
        };
        let value = serde_json::to_value(&txn).unwrap();
        assert!(value.get("realized_pnl").is_none());
        assert!(value.get("idempotency_key").is_none());
        assert_eq!(value["status"], "completed");
    }
}
