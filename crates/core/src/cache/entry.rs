use std::time::Duration;

use tokio::time::Instant;

/// Default time-to-live applied when a caller does not pass one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// A cached value stamped with its insertion time and lifetime.
///
/// An entry is valid while `now - timestamp <= ttl`. Validity is always
/// evaluated against an explicit `now` so callers decide the clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: Instant,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    /// Creates an entry stamped at `now`.
    pub fn new(data: T, ttl: Duration, now: Instant) -> Self {
        Self {
            data,
            timestamp: now,
            ttl,
        }
    }

    /// Time elapsed since the entry was stored.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }

    /// Returns true while the entry has not outlived its TTL.
    pub fn is_valid(&self, now: Instant) -> bool {
        self.age(now) <= self.ttl
    }

    /// Returns true once the entry has outlived its TTL.
    pub fn is_expired(&self, now: Instant) -> bool {
        !self.is_valid(now)
    }
}

/// Diagnostic view of a single cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStats {
    pub key: String,
    pub age: Duration,
    pub ttl: Duration,
    pub expired: bool,
}

/// Diagnostic view of the whole cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub entries: Vec<EntryStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_valid_at_exact_ttl() {
        let now = Instant::now();
        let entry = CacheEntry::new("value", Duration::from_secs(10), now);

        assert!(entry.is_valid(now));
        assert!(entry.is_valid(now + Duration::from_secs(10)));
        assert!(entry.is_expired(now + Duration::from_secs(11)));
    }

    #[test]
    fn test_age_never_negative() {
        let now = Instant::now();
        let entry = CacheEntry::new(1u8, DEFAULT_TTL, now + Duration::from_secs(5));

        assert_eq!(entry.age(now), Duration::ZERO);
        assert!(entry.is_valid(now));
    }
}
