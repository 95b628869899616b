use serde::{Deserialize, Serialize};

use crate::domain::value_objects::symbol::AssetClass;

/// One re-priced position inside a portfolio summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionValuation {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub shares: f64,
    pub avg_price: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub day_change: f64,
    /// Set when live resolution failed and the stored purchase price was
    /// used instead.
    pub stale: bool,
}

/// Aggregated view of a user's cash and holdings. Produced read-only; the
/// valuator never mutates any persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub user_id: String,
    pub cash_balance: f64,
    pub total_value: f64,
    pub day_change: f64,
    /// Winning sells / total sells; 0.0 when the user has never sold.
    pub win_rate: f64,
    /// Sorted by market value, descending.
    pub positions: Vec<PositionValuation>,
}
