//! KeyPool - rotation and retirement of upstream API credentials

use rand::Rng;
use std::sync::Mutex;
use std::time::Instant;
use zeroize::Zeroizing;

/// A credential handed out by the pool. The secret is wiped from memory
/// when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct ApiKey {
    secret: Zeroizing<String>,
}

impl ApiKey {
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

#[derive(Debug)]
struct PoolEntry {
    secret: Zeroizing<String>,
    last_used: Option<Instant>,
    disabled: bool,
}

/// Shared pool of interchangeable upstream credentials. Selection prefers
/// the least-recently-used key once every key has usage data, spreading
/// rate-limit exposure; before that it picks uniformly at random. Keys the
/// provider rejects are disabled for the process lifetime; the entry list
/// itself never shrinks, so an exhausted pool reports "none available"
/// rather than deadlocking callers.
pub struct KeyPool {
    entries: Mutex<Vec<PoolEntry>>,
}

impl KeyPool {
    /// Seed the pool from configuration. No persistence; pool state lives
    /// for the process only.
    pub fn new(keys: Vec<Zeroizing<String>>) -> Self {
        let entries = keys
            .into_iter()
            .map(|secret| PoolEntry {
                secret,
                last_used: None,
                disabled: false,
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Select a key and stamp its last-used time. `None` when every key
    /// has been retired (or none were configured) - callers must fall
    /// through to the next provider in the chain.
    pub fn select(&self) -> Option<ApiKey> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let candidates: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.disabled)
            .map(|(i, _)| i)
            .collect();

        if candidates.is_empty() {
            return None;
        }

        let all_stamped = candidates.iter().all(|&i| entries[i].last_used.is_some());
        let chosen = if all_stamped {
            *candidates
                .iter()
                .min_by_key(|&&i| entries[i].last_used)
                .expect("candidates is non-empty")
        } else {
            candidates[rand::thread_rng().gen_range(0..candidates.len())]
        };

        entries[chosen].last_used = Some(Instant::now());
        Some(ApiKey {
            secret: entries[chosen].secret.clone(),
        })
    }

    /// Permanently retire a key the provider reported as invalid.
    pub fn mark_invalid(&self, secret: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(entry) = entries
            .iter_mut()
            .find(|e| !e.disabled && e.secret.as_str() == secret)
        {
            entry.disabled = true;
            let remaining = entries.iter().filter(|e| !e.disabled).count();
            tracing::warn!("Retired invalid quote-API key; {} remaining", remaining);
        }
    }

    /// Number of keys still selectable.
    pub fn available(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().filter(|e| !e.disabled).count()
    }
}
