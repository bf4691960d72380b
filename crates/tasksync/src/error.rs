use std::time::Duration;

use thiserror::Error;

use tasksync_core::backend::BackendError;
use tasksync_core::tasks::TaskError;

/// Errors surfaced by a task sync service.
///
/// Clone so one failed fetch can be handed to every caller awaiting it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Validation(#[from] TaskError),
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("Backend returned malformed data: {0}")]
    InvalidData(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::InvalidData(err.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
