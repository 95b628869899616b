//! PortfolioValuator - read-only aggregation of cash and holdings
//!
//! Re-prices every position through the (cache-backed) resolver. One bad
//! symbol never fails the whole valuation: that position falls back to its
//! stored purchase price and is marked stale.

use serde_json::Value;
use std::sync::Arc;

use crate::domain::entities::portfolio::{PortfolioSummary, PositionValuation};
use crate::domain::entities::position::Position;
use crate::domain::entities::transaction::Transaction;
use crate::domain::errors::TradeError;
use crate::domain::repositories::document_store::{DocumentStore, Filter, OrderBy, StoreError};
use crate::domain::services::price_resolver::{PriceResolver, ResolveOptions};
use crate::domain::services::trade_executor::{
    TRANSACTIONS_COLLECTION, PORTFOLIOS_COLLECTION, USERS_COLLECTION,
};
use crate::domain::value_objects::symbol::Symbol;

pub struct PortfolioValuator {
    store: Arc<dyn DocumentStore>,
    resolver: Arc<PriceResolver>,
}

impl PortfolioValuator {
    pub fn new(store: Arc<dyn DocumentStore>, resolver: Arc<PriceResolver>) -> Self {
        Self { store, resolver }
    }

    /// Build the portfolio summary for a user: cash, re-priced positions
    /// sorted by market value descending, day change, and win rate.
    pub async fn valuate(&self, user_id: &str) -> Result<PortfolioSummary, TradeError> {
        let cash_balance = self.read_balance(user_id).await?;

        let docs = self
            .store
            .query(
                PORTFOLIOS_COLLECTION,
                &[Filter::eq("user_id", user_id.to_string())],
                None,
                None,
            )
            .await?;

        let mut positions = Vec::with_capacity(docs.len());
        let mut total_value = cash_balance;
        let mut day_change = 0.0;

        for doc in docs {
            let position: Position = match serde_json::from_value(doc) {
                Ok(position) => position,
                Err(e) => {
                    tracing::warn!("Skipping corrupt position document for {}: {}", user_id, e);
                    continue;
                }
            };
            if position.shares <= 0.0 {
                continue;
            }

            let row = self.valuate_position(&position).await;
            total_value += row.market_value;
            day_change += row.day_change;
            positions.push(row);
        }

        positions.sort_by(|a, b| {
            b.market_value
                .partial_cmp(&a.market_value)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let win_rate = self.win_rate(user_id).await?;

        Ok(PortfolioSummary {
            user_id: user_id.to_string(),
            cash_balance,
            total_value,
            day_change,
            win_rate,
            positions,
        })
    }

    /// The newest ledger entries for a user, timestamp-descending.
    pub async fn recent_transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Transaction>, TradeError> {
        let docs = self
            .store
            .query(
                TRANSACTIONS_COLLECTION,
                &[Filter::eq("user_id", user_id.to_string())],
                Some(OrderBy::desc("timestamp")),
                Some(limit),
            )
            .await?;

        let mut transactions = Vec::with_capacity(docs.len());
        for doc in docs {
            match serde_json::from_value::<Transaction>(doc) {
                Ok(transaction) => transactions.push(transaction),
                Err(e) => {
                    tracing::warn!("Skipping corrupt ledger document for {}: {}", user_id, e)
                }
            }
        }
        Ok(transactions)
    }

    /// Re-price one position, degrading to the stored purchase price when
    /// resolution fails.
    async fn valuate_position(&self, position: &Position) -> PositionValuation {
        let resolved = match Symbol::parse(&position.symbol) {
            Ok(symbol) => {
                let options = ResolveOptions {
                    force_refresh: false,
                    asset_class: position.asset_class,
                };
                self.resolver.resolve(&symbol, &options).await.ok()
            }
            Err(e) => {
                tracing::warn!("Stored position has invalid symbol: {}", e);
                None
            }
        };

        let (current_price, prev_close, stale) = match resolved {
            Some(result) => (result.quote.close, result.quote.prev_close, result.degraded),
            None => {
                tracing::warn!(
                    "Falling back to purchase price for {} valuation",
                    position.symbol
                );
                (position.avg_price, position.avg_price, true)
            }
        };

        PositionValuation {
            symbol: position.symbol.clone(),
            asset_class: position.asset_class,
            shares: position.shares,
            avg_price: position.avg_price,
            current_price,
            market_value: position.market_value(current_price),
            unrealized_pnl: position.unrealized_pnl(current_price),
            day_change: (current_price - prev_close) * position.shares,
            stale,
        }
    }

    /// Winning sells divided by total sells; 0.0 for users who never sold.
    async fn win_rate(&self, user_id: &str) -> Result<f64, TradeError> {
        let sells = self
            .store
            .query(
                TRANSACTIONS_COLLECTION,
                &[
                    Filter::eq("user_id", user_id.to_string()),
                    Filter::eq("side", "SELL"),
                ],
                None,
                None,
            )
            .await?;

        if sells.is_empty() {
            return Ok(0.0);
        }

        let wins = sells
            .iter()
            .filter(|doc| {
                doc.get("realized_pnl")
                    .and_then(Value::as_f64)
                    .map(|pnl| pnl > 0.0)
                    .unwrap_or(false)
            })
            .count();

        Ok(wins as f64 / sells.len() as f64)
    }

    async fn read_balance(&self, user_id: &str) -> Result<f64, TradeError> {
        let doc = self
            .store
            .get(USERS_COLLECTION, user_id)
            .await?
            .ok_or_else(|| TradeError::UnknownUser(user_id.to_string()))?;

        doc.get("balance").and_then(Value::as_f64).ok_or_else(|| {
            StoreError::Corrupt(format!("user {} has no numeric balance", user_id)).into()
        })
    }
}
