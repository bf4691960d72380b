//! In-memory TTL cache.
//!
//! Entries expire purely by age. Expired entries are invisible to readers and
//! are removed lazily by the read that notices them; there is no background
//! eviction and no size bound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use regex::Regex;
use tokio::time::Instant;

use tasksync_core::cache::{Cache, CacheEntry, CacheStats, EntryStats, DEFAULT_TTL};

/// Thread-safe in-memory cache with per-entry TTL.
///
/// Cloning shares the underlying store.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    store: Arc<RwLock<HashMap<String, CacheEntry<Vec<u8>>>>>,
    default_ttl: Duration,
}

impl MemoryCache {
    /// Creates an empty cache using `default_ttl` when `set` omits a TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
        }
    }

    /// TTL applied when `set` is called without one.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        {
            let store = self.store.read();
            match store.get(key) {
                None => {
                    tracing::trace!(key, "Cache miss");
                    return None;
                }
                Some(entry) if entry.is_valid(now) => {
                    tracing::trace!(key, "Cache hit");
                    return Some(entry.data.clone());
                }
                Some(_) => {}
            }
        }

        // Re-check under the write lock: a concurrent set may have refreshed it.
        let mut store = self.store.write();
        match store.get(key) {
            Some(entry) if entry.is_valid(now) => Some(entry.data.clone()),
            Some(_) => {
                store.remove(key);
                tracing::trace!(key, "Evicted expired cache entry");
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl), Instant::now());
        self.store.write().insert(key.to_string(), entry);
    }

    fn invalidate(&self, key: &str) -> bool {
        self.store.write().remove(key).is_some()
    }

    fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let mut store = self.store.write();
        let before = store.len();
        store.retain(|key, _| !pattern.is_match(key));
        let removed = before - store.len();
        tracing::debug!(pattern = %pattern, count = removed, "Invalidated cache entries");
        removed
    }

    fn clear(&self) {
        self.store.write().clear();
    }

    fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let store = self.store.read();
        let mut entries: Vec<EntryStats> = store
            .iter()
            .map(|(key, entry)| EntryStats {
                key: key.clone(),
                age: entry.age(now),
                ttl: entry.ttl,
                expired: entry.is_expired(now),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            size: store.len(),
            entries,
        }
    }
}
