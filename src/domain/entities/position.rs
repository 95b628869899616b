use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::symbol::AssetClass;

/// Share counts below this are treated as a fully closed position.
const SHARE_EPSILON: f64 = 1e-9;

/// A user's holding of one symbol. The average purchase price is a
/// shares-weighted mean across buys and is never changed by sells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub user_id: String,
    pub symbol: String,
    #[serde(default)]
    pub asset_class: AssetClass,
    pub shares: f64,
    pub avg_price: f64,
    pub last_price: f64,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Document id for the position of (user, symbol).
    pub fn doc_id(user_id: &str, symbol: &str) -> String {
        format!("{}_{}", user_id, symbol)
    }

    /// Open a fresh position from a first buy.
    pub fn open(
        user_id: &str,
        symbol: &str,
        asset_class: AssetClass,
        shares: f64,
        price: f64,
        at: DateTime<Utc>,
    ) -> Self {
        Position {
            user_id: user_id.to_string(),
            symbol: symbol.to_string(),
            asset_class,
            shares,
            avg_price: price,
            last_price: price,
            updated_at: at,
        }
    }

    /// Fold an additional buy into the position, recomputing the average
    /// price as the shares-weighted mean of the old and new cost bases.
    pub fn apply_buy(&mut self, shares: f64, price: f64, at: DateTime<Utc>) {
        let total_cost = self.shares * self.avg_price + shares * price;
        let total_shares = self.shares + shares;
        self.avg_price = total_cost / total_shares;
        self.shares = total_shares;
        self.last_price = price;
        self.updated_at = at;
    }

    /// Reduce the position by a sale and return the realized profit/loss.
    /// Callers must have validated `shares <= self.shares`.
    pub fn apply_sell(&mut self, shares: f64, price: f64, at: DateTime<Utc>) -> f64 {
        let realized_pnl = (price - self.avg_price) * shares;
        self.shares -= shares;
        self.last_price = price;
        self.updated_at = at;
        realized_pnl
    }

    /// Whether the position holds no shares and should be deleted.
    pub fn is_closed(&self) -> bool {
        self.shares <= SHARE_EPSILON
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.shares * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.avg_price) * self.shares
    }
}
