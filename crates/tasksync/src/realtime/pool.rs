//! Reference-counted pool of physical realtime channels.
//!
//! Many logical subscriptions share one physical channel per name. Channels
//! outlive their last subscriber until the periodic sweep finds them idle
//! past the timeout, so a quick unsubscribe/resubscribe reuses the channel.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use tasksync_core::realtime::{RealtimeChannel, RealtimeClient};

/// Channel pool limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Hard cap on concurrently open physical channels.
    pub max_channels: usize,
    /// How long a channel with no subscribers is kept before teardown.
    pub idle_timeout: Duration,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_channels: 50,
            idle_timeout: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Per-channel entry in [`PoolStats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PooledChannelStats {
    pub name: String,
    pub subscribers: usize,
    pub idle: Duration,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub channel_count: usize,
    pub total_subscribers: usize,
    pub channels: Vec<PooledChannelStats>,
}

struct PooledChannel {
    channel: Arc<dyn RealtimeChannel>,
    subscribers: HashSet<Uuid>,
    last_activity: Instant,
}

impl PooledChannel {
    fn is_reclaimable(&self, now: Instant, idle_timeout: Duration) -> bool {
        self.subscribers.is_empty()
            && now.saturating_duration_since(self.last_activity) > idle_timeout
    }
}

/// Multiplexes logical subscriptions onto a bounded set of channels.
pub struct ChannelPool {
    client: Arc<dyn RealtimeClient>,
    config: PoolConfig,
    channels: Mutex<HashMap<String, PooledChannel>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("config", &self.config)
            .field("channels", &self.channels.lock().len())
            .finish()
    }
}

impl ChannelPool {
    /// Creates an empty pool. Call [`ChannelPool::start`] to run the sweep.
    pub fn new(client: Arc<dyn RealtimeClient>, config: PoolConfig) -> Self {
        Self {
            client,
            config,
            channels: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Spawns the periodic sweep. Does nothing if already running.
    ///
    /// The task holds only a weak reference, so dropping the pool ends it.
    pub fn start(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() || self.destroyed.load(Ordering::SeqCst) {
            return;
        }

        let pool: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                pool.sweep();
            }
        }));
        tracing::debug!(interval = ?period, "Started channel pool sweep");
    }

    /// Returns the channel named `name`, registering `subscriber_id` on it.
    ///
    /// Opens the channel if absent. At capacity a sweep runs first; if the
    /// pool is still full `None` is returned and the caller should degrade.
    pub fn get_channel(&self, name: &str, subscriber_id: Uuid) -> Option<Arc<dyn RealtimeChannel>> {
        if self.destroyed.load(Ordering::SeqCst) {
            tracing::warn!(channel = %name, "Channel requested from destroyed pool");
            return None;
        }

        let now = Instant::now();
        let mut reclaimed = Vec::new();
        let channel = {
            let mut channels = self.channels.lock();

            if let Some(pooled) = channels.get_mut(name) {
                pooled.subscribers.insert(subscriber_id);
                pooled.last_activity = now;
                return Some(Arc::clone(&pooled.channel));
            }

            if channels.len() >= self.config.max_channels {
                reclaimed = Self::take_reclaimable(&mut channels, now, self.config.idle_timeout);
            }

            if channels.len() >= self.config.max_channels {
                None
            } else {
                let channel = self.client.channel(name);
                channels.insert(
                    name.to_string(),
                    PooledChannel {
                        channel: Arc::clone(&channel),
                        subscribers: HashSet::from([subscriber_id]),
                        last_activity: now,
                    },
                );
                Some(channel)
            }
        };

        self.teardown(reclaimed);
        match &channel {
            Some(_) => tracing::debug!(channel = %name, "Opened pooled channel"),
            None => tracing::warn!(
                channel = %name,
                max_channels = self.config.max_channels,
                "Channel pool at capacity"
            ),
        }
        channel
    }

    /// Removes `subscriber_id` from channel `name` without tearing it down.
    ///
    /// Returns true if the subscriber was registered.
    pub fn release_channel(&self, name: &str, subscriber_id: Uuid) -> bool {
        let mut channels = self.channels.lock();
        let Some(pooled) = channels.get_mut(name) else {
            return false;
        };
        pooled.last_activity = Instant::now();
        let removed = pooled.subscribers.remove(&subscriber_id);
        if removed {
            tracing::trace!(
                channel = %name,
                remaining = pooled.subscribers.len(),
                "Released pooled channel"
            );
        }
        removed
    }

    /// Tears down unreferenced channels idle past the timeout.
    ///
    /// Returns the number of channels removed.
    pub fn sweep(&self) -> usize {
        let reclaimed = {
            let mut channels = self.channels.lock();
            Self::take_reclaimable(&mut channels, Instant::now(), self.config.idle_timeout)
        };
        let count = reclaimed.len();
        self.teardown(reclaimed);
        if count > 0 {
            tracing::debug!(count, "Swept idle channels");
        }
        count
    }

    pub fn stats(&self) -> PoolStats {
        let now = Instant::now();
        let channels = self.channels.lock();
        let mut entries: Vec<PooledChannelStats> = channels
            .iter()
            .map(|(name, pooled)| PooledChannelStats {
                name: name.clone(),
                subscribers: pooled.subscribers.len(),
                idle: now.saturating_duration_since(pooled.last_activity),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        PoolStats {
            channel_count: channels.len(),
            total_subscribers: entries.iter().map(|c| c.subscribers).sum(),
            channels: entries,
        }
    }

    /// Tears down every channel and stops the sweep. Safe to call repeatedly.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        let all: Vec<(String, PooledChannel)> = self.channels.lock().drain().collect();
        let count = all.len();
        self.teardown(all);
        tracing::debug!(count, "Destroyed channel pool");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn take_reclaimable(
        channels: &mut HashMap<String, PooledChannel>,
        now: Instant,
        idle_timeout: Duration,
    ) -> Vec<(String, PooledChannel)> {
        let names: Vec<String> = channels
            .iter()
            .filter(|(_, pooled)| pooled.is_reclaimable(now, idle_timeout))
            .map(|(name, _)| name.clone())
            .collect();
        names
            .into_iter()
            .filter_map(|name| channels.remove(&name).map(|pooled| (name, pooled)))
            .collect()
    }

    fn teardown(&self, channels: Vec<(String, PooledChannel)>) {
        for (name, pooled) in channels {
            tracing::trace!(channel = %name, "Tearing down channel");
            self.client.remove_channel(&pooled.channel);
        }
    }
}

impl Drop for ChannelPool {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}
