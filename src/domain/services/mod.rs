pub mod key_pool;
pub mod portfolio_valuator;
pub mod price_resolver;
pub mod quote_cache;
pub mod retry;
pub mod trade_executor;
