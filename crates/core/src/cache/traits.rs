use std::time::Duration;

use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};

use super::{deserialize_value, serialize_value, CacheError, CacheStats, Result};

/// Trait for time-based key/value caches.
///
/// All operations are synchronous: a reader never waits on another reader,
/// and a write is visible to the very next `get` on any thread.
pub trait Cache: Send + Sync {
    /// Gets a value if present and unexpired. Expired entries are removed.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores a value. `None` applies the cache's default TTL.
    fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>);

    /// Returns true if `get` would return a value.
    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Removes a single entry. Returns true if it existed.
    fn invalidate(&self, key: &str) -> bool;

    /// Removes every entry whose key matches `pattern`, returning the count.
    fn invalidate_pattern(&self, pattern: &Regex) -> usize;

    /// Drops every entry.
    fn clear(&self);

    /// Returns entry count and per-entry age/ttl/expiry.
    fn stats(&self) -> CacheStats;
}

/// Typed JSON helpers layered over any [`Cache`].
pub trait CacheExt: Cache {
    /// Reads and deserializes a value, treating undecodable bytes as a miss.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key)?;
        match deserialize_value(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "Cache entry deserialization failed");
                self.invalidate(key);
                None
            }
        }
    }

    /// Serializes and stores a value.
    fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let bytes = serialize_value(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set(key, bytes, ttl);
        Ok(())
    }

    /// Compiles `pattern` and invalidates every matching key.
    fn invalidate_matching(&self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern).map_err(|e| CacheError::InvalidPattern(e.to_string()))?;
        Ok(self.invalidate_pattern(&regex))
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}
