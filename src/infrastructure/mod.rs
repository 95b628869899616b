pub mod coinbase_client;
pub mod finnhub_client;
