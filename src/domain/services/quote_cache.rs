//! QuoteCache - time-bounded memoization of resolved quotes

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::domain::entities::quote::Quote;

/// Cached quote with its insertion time
#[derive(Debug, Clone)]
struct CacheEntry {
    quote: Quote,
    inserted_at: Instant,
}

/// Keyed, TTL-checked quote cache. Lookups are O(1); staleness is checked
/// at read time, so no eviction task is needed. The LRU capacity only
/// bounds memory. Cache operations never fail; a miss is a normal outcome.
pub struct QuoteCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl QuoteCache {
    /// # Arguments
    /// * `capacity` - maximum symbols retained
    /// * `ttl` - how long an entry counts as fresh (default 300s upstream)
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Get the cached quote for a symbol if it is still fresh.
    pub fn get(&self, symbol: &str) -> Option<Quote> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(symbol)?;
        if entry.inserted_at.elapsed() < self.ttl {
            tracing::debug!(
                "Quote cache hit for {} (age: {:?})",
                symbol,
                entry.inserted_at.elapsed()
            );
            Some(entry.quote.clone())
        } else {
            None
        }
    }

    /// Get the cached quote regardless of age. Only used as a degraded
    /// last resort when every live source has failed; callers must label
    /// the result accordingly.
    pub fn get_stale(&self, symbol: &str) -> Option<Quote> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(symbol).map(|entry| entry.quote.clone())
    }

    /// Insert a quote, overwriting any prior entry for the symbol.
    pub fn put(&self, quote: Quote) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(
            quote.symbol.clone(),
            CacheEntry {
                quote,
                inserted_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::quote::QuoteSource;
    use chrono::Utc;

    fn quote(symbol: &str, close: f64) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            open: close,
            high: close,
            low: close,
            close,
            prev_close: close,
            source: QuoteSource::Finnhub,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_miss_on_empty_cache() {
        let cache = QuoteCache::new(8, Duration::from_secs(300));
        assert!(cache.get("AAPL").is_none());
    }

    #[test]
    fn test_fresh_hit_returns_identical_quote() {
        let cache = QuoteCache::new(8, Duration::from_secs(300));
        let q = quote("AAPL", 150.0);
        cache.put(q.clone());

        let hit = cache.get("AAPL").unwrap();
        assert_eq!(hit, q);
        // Second read inside the TTL window is the same snapshot.
        assert_eq!(cache.get("AAPL").unwrap().fetched_at, q.fetched_at);
    }

    #[test]
    fn test_expired_entry_is_not_fresh_but_readable_stale() {
        let cache = QuoteCache::new(8, Duration::from_secs(0));
        cache.put(quote("AAPL", 150.0));

        assert!(cache.get("AAPL").is_none());
        assert_eq!(cache.get_stale("AAPL").unwrap().close, 150.0);
    }

    #[test]
    fn test_put_overwrites() {
        let cache = QuoteCache::new(8, Duration::from_secs(300));
        cache.put(quote("AAPL", 150.0));
        cache.put(quote("AAPL", 151.0));
        assert_eq!(cache.get("AAPL").unwrap().close, 151.0);
    }

    #[test]
    fn test_capacity_bounds_entries() {
        let cache = QuoteCache::new(2, Duration::from_secs(300));
        cache.put(quote("A", 1.0));
        cache.put(quote("B", 2.0));
        cache.put(quote("C", 3.0));
        // Least-recently-used symbol fell out.
        assert!(cache.get_stale("A").is_none());
        assert!(cache.get_stale("C").is_some());
    }
}
