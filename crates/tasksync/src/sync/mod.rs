//! Auto-refreshing task board: cached reads, realtime patches, and writes.

mod service;
mod state;

pub use service::{SyncSettings, TaskSyncService, Unsubscriber};
pub use state::{QueryState, SyncNotification, SyncState};
