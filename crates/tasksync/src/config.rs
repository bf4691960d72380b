use std::{env, time::Duration};

use crate::realtime::PoolConfig;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cache TTL in seconds (default: 300)
    pub cache_ttl_seconds: u64,
    /// Maximum number of physical realtime channels (default: 50)
    pub pool_max_channels: usize,
    /// Seconds an unreferenced channel may idle before teardown (default: 300)
    pub pool_idle_timeout_seconds: u64,
    /// Seconds between idle channel sweeps (default: 60)
    pub pool_sweep_interval_seconds: u64,
    /// Upper bound on one full board fetch, in seconds (default: 30)
    pub fetch_timeout_seconds: u64,
    /// Channel monitored for connection status (default: "system")
    pub system_channel: String,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CACHE_TTL_SECONDS` - Cache TTL in seconds (default: 300)
    /// - `POOL_MAX_CHANNELS` - Channel cap (default: 50)
    /// - `POOL_IDLE_TIMEOUT_SECONDS` - Idle channel timeout (default: 300)
    /// - `POOL_SWEEP_INTERVAL_SECONDS` - Sweep interval (default: 60)
    /// - `FETCH_TIMEOUT_SECONDS` - Fetch timeout (default: 30)
    /// - `SYSTEM_CHANNEL` - Connection status channel (default: "system")
    pub fn from_env() -> Self {
        Self {
            cache_ttl_seconds: env_or("CACHE_TTL_SECONDS", 300),
            pool_max_channels: env_or("POOL_MAX_CHANNELS", 50),
            pool_idle_timeout_seconds: env_or("POOL_IDLE_TIMEOUT_SECONDS", 300),
            pool_sweep_interval_seconds: env_or("POOL_SWEEP_INTERVAL_SECONDS", 60),
            fetch_timeout_seconds: env_or("FETCH_TIMEOUT_SECONDS", 30),
            system_channel: env::var("SYSTEM_CHANNEL").unwrap_or_else(|_| "system".to_string()),
        }
    }

    /// Get cache TTL as a Duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Get fetch timeout as a Duration.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    /// Channel pool settings.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_channels: self.pool_max_channels,
            idle_timeout: Duration::from_secs(self.pool_idle_timeout_seconds),
            sweep_interval: Duration::from_secs(self.pool_sweep_interval_seconds),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
