use serde::Serialize;
use uuid::Uuid;

use tasksync_core::realtime::ChangeEvent;
use tasksync_core::tasks::{Project, Task, TaskBoard};

use crate::error::SyncError;

/// Lifecycle of a sync service's view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Nothing fetched yet.
    #[default]
    Cold,
    Loading,
    /// Cached data is valid and subscriptions are in place.
    Live,
    /// The cached board expired; the next read refetches.
    Stale,
    /// The last fetch failed; the next read retries.
    Error,
}

/// Point-in-time view for consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryState {
    pub data: Option<TaskBoard>,
    pub is_loading: bool,
    pub is_error: bool,
    pub error: Option<SyncError>,
}

/// Delivered to local subscribers whenever the cached board changes.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotification {
    Task(ChangeEvent<Task>),
    Project(ChangeEvent<Project>),
    SubmissionCount { task_id: Uuid, count: usize },
    /// A full fetch replaced the board.
    Refreshed,
}
