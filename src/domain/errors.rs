use thiserror::Error;

use crate::domain::repositories::document_store::StoreError;

/// Input validation failures. User-correctable, never leave side effects.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("invalid share quantity: {0}")]
    InvalidShares(String),

    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid user id: {0}")]
    InvalidUser(String),
}

/// Price resolution exhausted every source in the fallback chain.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("unable to resolve price for {symbol}")]
pub struct ResolveError {
    pub symbol: String,
}

/// Errors surfaced at the trade-executor boundary. Every variant carries a
/// stable reason code so the caller-facing layer never has to parse messages.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("insufficient funds: required {required:.2}, available {available:.2}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("insufficient shares of {symbol}: requested {requested}, held {held}")]
    InsufficientShares {
        symbol: String,
        requested: f64,
        held: f64,
    },

    #[error("unable to resolve price for {symbol}")]
    PriceUnavailable { symbol: String },

    #[error("duplicate order: idempotency key '{0}' already settled")]
    DuplicateOrder(String),

    #[error("user '{0}' already exists")]
    UserExists(String),

    #[error("trade partially applied: {0}")]
    PartialMutation(String),

    #[error("document store error: {0}")]
    Store(#[from] StoreError),
}

impl TradeError {
    /// Stable machine-readable code for the caller-facing layer.
    pub fn reason_code(&self) -> &'static str {
        match self {
            TradeError::Validation(ValidationError::InvalidSymbol(_)) => "invalid_symbol",
            TradeError::Validation(ValidationError::InvalidShares(_)) => "invalid_shares",
            TradeError::Validation(ValidationError::InvalidPrice(_)) => "invalid_price",
            TradeError::Validation(ValidationError::InvalidUser(_)) => "invalid_user",
            TradeError::UnknownUser(_) => "unknown_user",
            TradeError::InsufficientFunds { .. } => "insufficient_funds",
            TradeError::InsufficientShares { .. } => "insufficient_shares",
            TradeError::PriceUnavailable { .. } => "price_unavailable",
            TradeError::DuplicateOrder(_) => "duplicate_order",
            TradeError::UserExists(_) => "user_exists",
            TradeError::PartialMutation(_) => "partial_mutation",
            TradeError::Store(_) => "store_error",
        }
    }

    /// Whether the failure may have left persisted state inconsistent.
    pub fn has_side_effects(&self) -> bool {
        matches!(self, TradeError::PartialMutation(_))
    }
}

impl From<ResolveError> for TradeError {
    fn from(e: ResolveError) -> Self {
        TradeError::PriceUnavailable { symbol: e.symbol }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_are_stable() {
        let err = TradeError::InsufficientFunds {
            required: 1501.50,
            available: 498.50,
        };
        assert_eq!(err.reason_code(), "insufficient_funds");

        let err: TradeError = ValidationError::InvalidSymbol("``".to_string()).into();
        assert_eq!(err.reason_code(), "invalid_symbol");

        let err: TradeError = ResolveError {
            symbol: "AAPL".to_string(),
        }
        .into();
        assert_eq!(err.reason_code(), "price_unavailable");
    }

    #[test]
    fn test_only_partial_mutation_has_side_effects() {
        assert!(TradeError::PartialMutation("ledger write failed".to_string()).has_side_effects());
        assert!(!TradeError::UnknownUser("u1".to_string()).has_side_effects());
        assert!(!TradeError::DuplicateOrder("tok".to_string()).has_side_effects());
    }

    #[test]
    fn test_messages_carry_amounts() {
        let err = TradeError::InsufficientFunds {
            required: 1501.5,
            available: 498.5,
        };
        assert!(err.to_string().contains("1501.50"));
        assert!(err.to_string().contains("498.50"));
    }
}
