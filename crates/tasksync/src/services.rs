//! Shared service graph.
//!
//! Builds the cache, channel pool and dispatcher once, and hands out
//! [`TaskSyncService`]s that share them.

use std::sync::Arc;

use tasksync_core::backend::QueryBackend;
use tasksync_core::cache::{task_board_pattern, Cache, CacheExt};
use tasksync_core::realtime::RealtimeClient;
use tasksync_core::tasks::TaskScope;

use crate::cache::MemoryCache;
use crate::config::Config;
use crate::realtime::{ChannelPool, RealtimeDispatcher};
use crate::sync::{SyncSettings, TaskSyncService};

/// Process-wide services, cloned cheaply into each consumer.
#[derive(Clone)]
pub struct Services {
    config: Config,
    cache: Arc<MemoryCache>,
    pool: Arc<ChannelPool>,
    dispatcher: RealtimeDispatcher,
    backend: Arc<dyn QueryBackend>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl Services {
    /// Wires every service over `backend` and starts the background work:
    /// the pool's idle sweeper and the dispatcher's connection monitor.
    pub async fn init<B>(config: Config, backend: Arc<B>) -> Self
    where
        B: QueryBackend + RealtimeClient + 'static,
    {
        let cache = Arc::new(MemoryCache::new(config.cache_ttl()));

        let client: Arc<dyn RealtimeClient> = backend.clone();
        let pool = Arc::new(ChannelPool::new(client, config.pool_config()));
        pool.start();

        let dispatcher = RealtimeDispatcher::new(Arc::clone(&pool), config.system_channel.clone());
        dispatcher.start().await;

        tracing::info!(
            max_channels = config.pool_max_channels,
            cache_ttl = ?config.cache_ttl(),
            "Services initialized"
        );

        Self {
            config,
            cache,
            pool,
            dispatcher,
            backend,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    pub fn dispatcher(&self) -> &RealtimeDispatcher {
        &self.dispatcher
    }

    pub fn backend(&self) -> &Arc<dyn QueryBackend> {
        &self.backend
    }

    /// Creates a sync service for `scope` over the shared services.
    pub fn task_sync(&self, scope: TaskScope) -> TaskSyncService {
        let cache: Arc<dyn Cache> = self.cache.clone();
        TaskSyncService::new(
            scope,
            cache,
            Arc::clone(&self.backend),
            self.dispatcher.clone(),
            SyncSettings {
                ttl: self.config.cache_ttl(),
                fetch_timeout: self.config.fetch_timeout(),
            },
        )
    }

    /// Replays every realtime subscription and drops cached boards, which
    /// may have missed changes while disconnected.
    ///
    /// Returns how many subscriptions are active afterwards.
    pub async fn reconnect(&self) -> usize {
        let active = self.dispatcher.reconnect().await;
        match self.cache.invalidate_matching(task_board_pattern()) {
            Ok(dropped) => tracing::debug!(dropped, "Invalidated task boards after reconnect"),
            Err(err) => tracing::warn!(error = %err, "Failed to invalidate task boards"),
        }
        active
    }

    /// Stops background work and releases every channel. Idempotent.
    pub fn destroy(&self) {
        self.dispatcher.destroy();
        self.cache.clear();
        tracing::info!("Services destroyed");
    }
}
