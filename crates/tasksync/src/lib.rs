//! Realtime sync and caching layer for a task board backend.
//!
//! The imperative shell around `tasksync_core`:
//! - [`cache::MemoryCache`]: TTL cache with lazy expiry and pattern invalidation
//! - [`backend::InMemoryBackend`]: reference backend serving queries and change feeds
//! - [`realtime::ChannelPool`] and [`realtime::RealtimeDispatcher`]: shared
//!   channels, typed change subscriptions, and connection tracking
//! - [`sync::TaskSyncService`]: auto-refreshing board per scope
//! - [`services::Services`]: wires everything together

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod realtime;
pub mod services;
pub mod sync;

pub use config::Config;
pub use error::{Result, SyncError};
pub use services::Services;
pub use sync::{QueryState, SyncNotification, SyncSettings, SyncState, TaskSyncService};
