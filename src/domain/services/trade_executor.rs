//! TradeExecutor - validation and the ordered balance/position/ledger
//! mutation sequence
//!
//! The executor is the only component that mutates user balance, positions,
//! or the transaction ledger. All mutations for one user are serialized
//! through a per-user lock; the underlying store offers no multi-document
//! transaction, so the buy path carries a best-effort compensation that
//! restores the balance when a later step fails.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::entities::position::Position;
use crate::domain::entities::quote::PriceResult;
use crate::domain::entities::transaction::{TradeSide, Transaction, TransactionStatus};
use crate::domain::errors::{TradeError, ValidationError};
use crate::domain::repositories::document_store::{DocumentStore, Filter, StoreError};
use crate::domain::services::price_resolver::{PriceResolver, ResolveOptions};
use crate::domain::services::retry::RetryPolicy;
use crate::domain::value_objects::shares::Shares;
use crate::domain::value_objects::symbol::{AssetClass, Symbol};

pub const USERS_COLLECTION: &str = "users";
pub const PORTFOLIOS_COLLECTION: &str = "portfolios";
pub const TRANSACTIONS_COLLECTION: &str = "transactions";

/// Tolerance when checking whether a balance still reflects a deduction.
const BALANCE_EPSILON: f64 = 1e-6;

/// An order as it arrives from the caller-facing layer.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub user_id: String,
    pub symbol: String,
    pub shares: f64,
    pub asset_class: AssetClass,
    /// Caller-supplied duplicate-submission guard.
    pub idempotency_key: Option<String>,
}

/// Result of a settled trade.
#[derive(Debug, Clone, Serialize)]
pub struct TradeOutcome {
    pub transaction_id: String,
    pub side: TradeSide,
    pub symbol: String,
    pub shares: f64,
    pub price: f64,
    pub fee: f64,
    /// Buy: cost including fee. Sell: net proceeds after fee.
    pub total: f64,
    pub new_balance: f64,
    /// `None` when a sale closed the position.
    pub position: Option<Position>,
    /// Recorded on sells only.
    pub realized_pnl: Option<f64>,
    /// The execution price came from a stale/persisted fallback; the
    /// caller-facing layer should warn the user.
    pub degraded_price: bool,
}

/// Cost preview for an order that has not been placed.
#[derive(Debug, Clone, Serialize)]
pub struct OrderEstimate {
    pub symbol: String,
    pub shares: f64,
    pub price: f64,
    pub gross: f64,
    pub fee: f64,
    pub total: f64,
    pub degraded_price: bool,
}

/// Per-user async locks so concurrent trades for one user cannot race the
/// read-modify-write of balance and position.
struct UserLocks {
    inner: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn handle(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(user_id.to_string()).or_default().clone()
    }
}

pub struct TradeExecutor {
    store: Arc<dyn DocumentStore>,
    resolver: Arc<PriceResolver>,
    retry: RetryPolicy,
    fee_rate: f64,
    max_order_shares: f64,
    initial_balance: f64,
    user_locks: UserLocks,
}

impl TradeExecutor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        resolver: Arc<PriceResolver>,
        retry: RetryPolicy,
        fee_rate: f64,
        max_order_shares: f64,
        initial_balance: f64,
    ) -> Self {
        Self {
            store,
            resolver,
            retry,
            fee_rate,
            max_order_shares,
            initial_balance,
            user_locks: UserLocks::new(),
        }
    }

    /// Create a user document seeded with the configured starting balance.
    pub async fn create_user(&self, user_id: &str) -> Result<f64, TradeError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ValidationError::InvalidUser("user id must not be empty".to_string()).into());
        }

        let lock = self.user_locks.handle(user_id);
        let _guard = lock.lock().await;

        if self.store.get(USERS_COLLECTION, user_id).await?.is_some() {
            return Err(TradeError::UserExists(user_id.to_string()));
        }

        self.store
            .put(
                USERS_COLLECTION,
                user_id,
                json!({ "balance": self.initial_balance, "created_at": Utc::now() }),
            )
            .await?;

        tracing::info!(
            "Created user {} with starting balance {:.2}",
            user_id,
            self.initial_balance
        );
        Ok(self.initial_balance)
    }

    /// Execute a buy: validate, resolve the price (unless overridden),
    /// then deduct balance, upsert the position, and append the ledger
    /// record, compensating the deduction if a later step fails.
    pub async fn execute_buy(
        &self,
        order: &OrderRequest,
        price_override: Option<f64>,
    ) -> Result<TradeOutcome, TradeError> {
        let symbol = Symbol::parse(&order.symbol)?;
        let shares = self.validate_shares(order.shares)?;

        let lock = self.user_locks.handle(&order.user_id);
        let _guard = lock.lock().await;

        self.check_idempotency(order).await?;

        let (price, degraded) = match price_override {
            Some(p) if p > 0.0 => (p, false),
            Some(p) => {
                return Err(ValidationError::InvalidPrice(format!(
                    "override price must be positive, got {}",
                    p
                ))
                .into())
            }
            None => {
                let result = self.fetch_price(&symbol, order.asset_class).await?;
                (result.quote.close, result.degraded)
            }
        };

        let gross = shares.value() * price;
        let fee = gross * self.fee_rate;
        let total = gross + fee;

        let balance = self.read_balance(&order.user_id).await?;
        if balance < total {
            return Err(TradeError::InsufficientFunds {
                required: total,
                available: balance,
            });
        }

        let now = Utc::now();
        let transaction_id = Transaction::derive_id(&order.user_id, now);
        let new_balance = balance - total;

        // Step 1: deduct. Nothing else has been touched, so a failure here
        // leaves the account consistent.
        self.write_balance(&order.user_id, new_balance).await?;

        // Step 2: upsert the position.
        let position = match self
            .upsert_position(order, &symbol, shares.value(), price, now)
            .await
        {
            Ok(position) => position,
            Err(e) => {
                return if self.compensate_buy(&order.user_id, balance, new_balance).await {
                    tracing::warn!(
                        "Buy {} rolled back after position write failure: {}",
                        transaction_id,
                        e
                    );
                    Err(TradeError::Store(e))
                } else {
                    tracing::error!(
                        "Buy {} left balance inconsistent after position write failure: {}",
                        transaction_id,
                        e
                    );
                    Err(TradeError::PartialMutation(format!(
                        "buy {}: position write failed and balance could not be restored: {}",
                        transaction_id, e
                    )))
                };
            }
        };

        // Step 3: append the ledger record. The position already holds the
        // new shares, so this failure is partial regardless of whether the
        // balance compensation lands.
        let transaction = Transaction {
            id: transaction_id.clone(),
            user_id: order.user_id.clone(),
            symbol: symbol.to_string(),
            side: TradeSide::Buy,
            shares: shares.value(),
            price,
            fee,
            total,
            status: TransactionStatus::Completed,
            timestamp: now,
            realized_pnl: None,
            idempotency_key: order.idempotency_key.clone(),
        };
        if let Err(e) = self.append_transaction(&transaction).await {
            self.compensate_buy(&order.user_id, balance, new_balance).await;
            tracing::error!(
                "Buy {} partially applied: ledger write failed after position update: {}",
                transaction_id,
                e
            );
            return Err(TradeError::PartialMutation(format!(
                "buy {}: ledger write failed after position update: {}",
                transaction_id, e
            )));
        }

        tracing::info!(
            "Executed BUY {}: {} x {} @ {:.2} (fee {:.2}), balance {:.2} -> {:.2}",
            transaction_id,
            shares.value(),
            symbol,
            price,
            fee,
            balance,
            new_balance
        );

        Ok(TradeOutcome {
            transaction_id,
            side: TradeSide::Buy,
            symbol: symbol.to_string(),
            shares: shares.value(),
            price,
            fee,
            total,
            new_balance,
            position: Some(position),
            realized_pnl: None,
            degraded_price: degraded,
        })
    }

    /// Execute a sell: validate the holding, resolve the price, credit the
    /// proceeds, shrink or delete the position, and append the ledger
    /// record carrying the realized profit/loss.
    pub async fn execute_sell(&self, order: &OrderRequest) -> Result<TradeOutcome, TradeError> {
        let symbol = Symbol::parse(&order.symbol)?;
        let shares = self.validate_shares(order.shares)?;

        let lock = self.user_locks.handle(&order.user_id);
        let _guard = lock.lock().await;

        self.check_idempotency(order).await?;

        let doc_id = Position::doc_id(&order.user_id, symbol.as_str());
        let mut position = match self.store.get(PORTFOLIOS_COLLECTION, &doc_id).await? {
            Some(doc) => decode::<Position>(doc)?,
            None => {
                return Err(TradeError::InsufficientShares {
                    symbol: symbol.to_string(),
                    requested: shares.value(),
                    held: 0.0,
                })
            }
        };
        if position.shares < shares.value() {
            return Err(TradeError::InsufficientShares {
                symbol: symbol.to_string(),
                requested: shares.value(),
                held: position.shares,
            });
        }

        let result = self.fetch_price(&symbol, order.asset_class).await?;
        let price = result.quote.close;

        let gross = shares.value() * price;
        let fee = gross * self.fee_rate;
        let net = gross - fee;

        let balance = self.read_balance(&order.user_id).await?;
        let now = Utc::now();
        let transaction_id = Transaction::derive_id(&order.user_id, now);
        let realized_pnl = position.apply_sell(shares.value(), price, now);
        let new_balance = balance + net;

        // Step 1: credit the proceeds. No deduction precedes this, so a
        // failure here leaves the account untouched.
        self.write_balance(&order.user_id, new_balance).await?;

        // Steps 2-3: position and ledger. A failure past this point is a
        // terminal inconsistency for this order; there is nothing safe to
        // roll back once the proceeds are credited.
        let applied: Result<(), StoreError> = async {
            if position.is_closed() {
                self.store.delete(PORTFOLIOS_COLLECTION, &doc_id).await?;
            } else {
                self.store
                    .put(PORTFOLIOS_COLLECTION, &doc_id, encode(&position)?)
                    .await?;
            }

            let transaction = Transaction {
                id: transaction_id.clone(),
                user_id: order.user_id.clone(),
                symbol: symbol.to_string(),
                side: TradeSide::Sell,
                shares: shares.value(),
                price,
                fee,
                total: net,
                status: TransactionStatus::Completed,
                timestamp: now,
                realized_pnl: Some(realized_pnl),
                idempotency_key: order.idempotency_key.clone(),
            };
            self.append_transaction(&transaction).await
        }
        .await;

        if let Err(e) = applied {
            tracing::error!(
                "Sell {} partially applied after balance credit, manual audit required: {}",
                transaction_id,
                e
            );
            return Err(TradeError::PartialMutation(format!(
                "sell {}: {}",
                transaction_id, e
            )));
        }

        tracing::info!(
            "Executed SELL {}: {} x {} @ {:.2} (fee {:.2}, realized {:.2}), balance {:.2} -> {:.2}",
            transaction_id,
            shares.value(),
            symbol,
            price,
            fee,
            realized_pnl,
            balance,
            new_balance
        );

        Ok(TradeOutcome {
            transaction_id,
            side: TradeSide::Sell,
            symbol: symbol.to_string(),
            shares: shares.value(),
            price,
            fee,
            total: net,
            new_balance,
            position: if position.is_closed() {
                None
            } else {
                Some(position)
            },
            realized_pnl: Some(realized_pnl),
            degraded_price: result.degraded,
        })
    }

    /// Price an order without placing it. Performs no writes beyond the
    /// resolver's own cache/last-known bookkeeping.
    pub async fn estimate(
        &self,
        symbol_raw: &str,
        shares: f64,
        asset_class: AssetClass,
    ) -> Result<OrderEstimate, TradeError> {
        let symbol = Symbol::parse(symbol_raw)?;
        let shares = self.validate_shares(shares)?;

        let result = self.fetch_price(&symbol, asset_class).await?;
        let gross = shares.value() * result.quote.close;
        let fee = gross * self.fee_rate;

        Ok(OrderEstimate {
            symbol: symbol.to_string(),
            shares: shares.value(),
            price: result.quote.close,
            gross,
            fee,
            total: gross + fee,
            degraded_price: result.degraded,
        })
    }

    fn validate_shares(&self, shares: f64) -> Result<Shares, TradeError> {
        let shares = Shares::new(shares)?;
        if shares.value() > self.max_order_shares {
            return Err(ValidationError::InvalidShares(format!(
                "order of {} shares exceeds the maximum of {}",
                shares.value(),
                self.max_order_shares
            ))
            .into());
        }
        Ok(shares)
    }

    /// Reject replays of an order the ledger already settled.
    async fn check_idempotency(&self, order: &OrderRequest) -> Result<(), TradeError> {
        let Some(key) = &order.idempotency_key else {
            return Ok(());
        };

        let filters = [
            Filter::eq("user_id", order.user_id.clone()),
            Filter::eq("idempotency_key", key.clone()),
        ];
        let existing = self
            .store
            .query(TRANSACTIONS_COLLECTION, &filters, None, Some(1))
            .await?;

        if existing.is_empty() {
            Ok(())
        } else {
            Err(TradeError::DuplicateOrder(key.clone()))
        }
    }

    /// Resolve the execution price, retrying only this network-bound step.
    async fn fetch_price(
        &self,
        symbol: &Symbol,
        asset_class: AssetClass,
    ) -> Result<PriceResult, TradeError> {
        let options = ResolveOptions {
            force_refresh: false,
            asset_class,
        };
        let result = self
            .retry
            .run(|| self.resolver.resolve(symbol, &options))
            .await?;

        if result.quote.close <= 0.0 {
            return Err(TradeError::PriceUnavailable {
                symbol: symbol.to_string(),
            });
        }
        Ok(result)
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

    async fn write_balance(&self, user_id: &str, balance: f64) -> Result<(), StoreError> {
        self.store
            .update(USERS_COLLECTION, user_id, json!({ "balance": balance }))
            .await
    }

    async fn upsert_position(
        &self,
        order: &OrderRequest,
        symbol: &Symbol,
        shares: f64,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<Position, StoreError> {
        let doc_id = Position::doc_id(&order.user_id, symbol.as_str());
        let position = match self.store.get(PORTFOLIOS_COLLECTION, &doc_id).await? {
            Some(doc) => {
                let mut position = decode::<Position>(doc)?;
                position.apply_buy(shares, price, now);
                position
            }
            None => Position::open(
                &order.user_id,
                symbol.as_str(),
                order.asset_class,
                shares,
                price,
                now,
            ),
        };

        self.store
            .put(PORTFOLIOS_COLLECTION, &doc_id, encode(&position)?)
            .await?;
        Ok(position)
    }

    async fn append_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        self.store
            .put(TRANSACTIONS_COLLECTION, &transaction.id, encode(transaction)?)
            .await
    }

    /// Best-effort compensation for the buy path: restore the pre-trade
    /// balance if it still reflects the deduction. Returns whether the
    /// restore landed.
    async fn compensate_buy(
        &self,
        user_id: &str,
        pre_trade_balance: f64,
        deducted_balance: f64,
    ) -> bool {
        match self.read_balance(user_id).await {
            Ok(current) if (current - deducted_balance).abs() < BALANCE_EPSILON => {
                match self.write_balance(user_id, pre_trade_balance).await {
                    Ok(()) => {
                        tracing::warn!(
                            "Restored pre-trade balance {:.2} for {}",
                            pre_trade_balance,
                            user_id
                        );
                        true
                    }
                    Err(e) => {
                        tracing::error!("Balance restore failed for {}: {}", user_id, e);
                        false
                    }
                }
            }
            Ok(current) => {
                tracing::error!(
                    "Balance {:.2} for {} no longer reflects the deduction to {:.2}, not restoring",
                    current,
                    user_id,
                    deducted_balance
                );
                false
            }
            Err(e) => {
                tracing::error!("Balance re-read failed for {} during compensation: {}", user_id, e);
                false
            }
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(doc: Value) -> Result<T, StoreError> {
    serde_json::from_value(doc).map_err(|e| StoreError::Corrupt(e.to_string()))
}
