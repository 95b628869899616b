use std::time::Duration;
use zeroize::Zeroizing;

/// Configuration for the simulation engine
#[derive(Clone)]
pub struct SimulatorConfig {
    /// Trading fee as a fraction of gross trade value (0.001 = 0.1%)
    pub fee_rate: f64,
    /// Maximum shares accepted in a single order
    pub max_order_shares: f64,
    /// Cash balance seeded onto newly created users
    pub initial_balance: f64,
    /// How long a cached quote counts as fresh
    pub cache_ttl: Duration,
    /// Maximum number of symbols kept in the quote cache
    pub cache_capacity: usize,
    /// Minimum spacing between primary-provider calls for one symbol
    pub quote_throttle: Duration,
    /// Timeout applied to every upstream provider call
    pub provider_timeout: Duration,
    /// Attempts for the price-fetch retry policy
    pub price_retry_attempts: u32,
    /// Base delay for the price-fetch retry policy (doubles per attempt)
    pub price_retry_base_delay: Duration,
    /// Upstream quote-API credentials, rotated by the key pool
    pub api_keys: Vec<Zeroizing<String>>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            fee_rate: 0.001,
            max_order_shares: 10_000.0,
            initial_balance: 10_000.0,
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 512,
            quote_throttle: Duration::from_millis(500),
            provider_timeout: Duration::from_secs(5),
            price_retry_attempts: 3,
            price_retry_base_delay: Duration::from_millis(250),
            api_keys: Vec::new(),
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or out of range.
    pub fn from_env() -> SimulatorConfig {
        let mut config = SimulatorConfig::default();

        if let Ok(fee) = std::env::var("TRADING_FEE_RATE") {
            match fee.parse::<f64>() {
                Ok(value) if (0.0..=0.1).contains(&value) => {
                    config.fee_rate = value;
                }
                Ok(value) => {
                    tracing::warn!(
                        "Invalid TRADING_FEE_RATE value: {} (must be between 0.0 and 0.1), using default: {}",
                        value,
                        config.fee_rate
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse TRADING_FEE_RATE '{}': {}, using default: {}",
                        fee,
                        e,
                        config.fee_rate
                    );
                }
            }
        }

        if let Ok(max_shares) = std::env::var("MAX_TRADE_QUANTITY") {
            if let Ok(value) = max_shares.parse::<f64>() {
                if value > 0.0 && value.is_finite() {
                    config.max_order_shares = value;
                }
            }
        }

        if let Ok(balance) = std::env::var("INITIAL_BALANCE") {
            if let Ok(value) = balance.parse::<f64>() {
                if value >= 0.0 && value.is_finite() {
                    config.initial_balance = value;
                }
            }
        }

        if let Ok(ttl) = std::env::var("QUOTE_CACHE_TTL_SECONDS") {
            if let Ok(value) = ttl.parse::<u64>() {
                if (10..=3600).contains(&value) {
                    config.cache_ttl = Duration::from_secs(value);
                }
            }
        }

        if let Ok(capacity) = std::env::var("QUOTE_CACHE_CAPACITY") {
            if let Ok(value) = capacity.parse::<usize>() {
                if value > 0 {
                    config.cache_capacity = value;
                }
            }
        }

        if let Ok(throttle) = std::env::var("QUOTE_THROTTLE_MS") {
            if let Ok(value) = throttle.parse::<u64>() {
                if (100..=10_000).contains(&value) {
                    config.quote_throttle = Duration::from_millis(value);
                }
            }
        }

        if let Ok(timeout) = std::env::var("PROVIDER_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse::<u64>() {
                if (1..=30).contains(&value) {
                    config.provider_timeout = Duration::from_secs(value);
                }
            }
        }

        if let Ok(attempts) = std::env::var("PRICE_RETRY_ATTEMPTS") {
            if let Ok(value) = attempts.parse::<u32>() {
                if (1..=10).contains(&value) {
                    config.price_retry_attempts = value;
                }
            }
        }

        if let Ok(delay) = std::env::var("PRICE_RETRY_BASE_DELAY_MS") {
            if let Ok(value) = delay.parse::<u64>() {
                if (10..=10_000).contains(&value) {
                    config.price_retry_base_delay = Duration::from_millis(value);
                }
            }
        }

        if let Ok(keys) = std::env::var("FINNHUB_API_KEYS") {
            config.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(|k| Zeroizing::new(k.to_string()))
                .collect();
            tracing::info!("Loaded {} quote-API keys", config.api_keys.len());
        }

        config
    }
}
