use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::RowFilter;

/// Kind of change carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

/// A normalized change to one row of a watched table.
///
/// `before` is absent for inserts, `after` is absent for deletes. Updates
/// carry `before` only when the backend sent the previous row image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent<T> {
    pub kind: ChangeKind,
    pub before: Option<T>,
    pub after: Option<T>,
    pub source_table: String,
    pub timestamp: DateTime<Utc>,
}

impl<T> ChangeEvent<T> {
    /// Builds an insert event.
    pub fn inserted(table: impl Into<String>, row: T, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: ChangeKind::Inserted,
            before: None,
            after: Some(row),
            source_table: table.into(),
            timestamp,
        }
    }

    /// Builds an update event.
    pub fn updated(
        table: impl Into<String>,
        before: Option<T>,
        after: T,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: ChangeKind::Updated,
            before,
            after: Some(after),
            source_table: table.into(),
            timestamp,
        }
    }

    /// Builds a delete event.
    pub fn deleted(table: impl Into<String>, row: T, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            before: Some(row),
            after: None,
            source_table: table.into(),
            timestamp,
        }
    }

    /// The most recent row image: `after` when present, else `before`.
    pub fn row(&self) -> Option<&T> {
        self.after.as_ref().or(self.before.as_ref())
    }
}

/// Event type as emitted by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RawEventType {
    Insert,
    Update,
    Delete,
}

/// A change notification exactly as the backend delivers it.
///
/// `new` and `old` are row objects; an empty object (or null) means the
/// image is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "eventType")]
    pub event_type: RawEventType,
    pub table: String,
    #[serde(default)]
    pub new: Value,
    #[serde(default)]
    pub old: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl RawChange {
    /// Creates a payload with no commit timestamp.
    pub fn new(event_type: RawEventType, table: impl Into<String>, new: Value, old: Value) -> Self {
        Self {
            event_type,
            table: table.into(),
            new,
            old,
            commit_timestamp: None,
        }
    }
}

/// Returns true if a row image carries data.
pub fn has_image(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Scope of a change listener: one table and an optional row filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeBinding {
    pub table: String,
    pub filter: Option<RowFilter>,
}

impl ChangeBinding {
    /// Binds to every change of `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: None,
        }
    }

    /// Narrows the binding with a row filter.
    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Returns true if `change` falls inside this binding.
    ///
    /// A filtered binding matches when either row image passes the filter,
    /// so a row moving out of scope still reaches its old listeners.
    pub fn matches(&self, change: &RawChange) -> bool {
        if change.table != self.table {
            return false;
        }
        match &self.filter {
            None => true,
            Some(filter) => {
                (has_image(&change.new) && filter.matches(&change.new))
                    || (has_image(&change.old) && filter.matches(&change.old))
            }
        }
    }
}

/// Lifecycle state of a physical backend channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Joining,
    Subscribed,
    Closed,
    Errored(String),
    TimedOut,
}

impl ChannelState {
    /// Returns true for states that end a subscription attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChannelState::Closed | ChannelState::Errored(_) | ChannelState::TimedOut
        )
    }
}

/// Connectivity as seen by the dispatcher's system channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reconnecting: bool,
    pub error: Option<String>,
    pub last_connected: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    /// Computes the status after the system channel enters `state`.
    ///
    /// Returns `None` for states that do not change connectivity.
    pub fn transition(&self, state: &ChannelState, now: DateTime<Utc>) -> Option<Self> {
        match state {
            ChannelState::Subscribed => Some(Self {
                connected: true,
                reconnecting: false,
                error: None,
                last_connected: Some(now),
            }),
            ChannelState::Closed => Some(self.disconnected("Channel closed")),
            ChannelState::Errored(reason) => Some(self.disconnected(reason)),
            ChannelState::TimedOut => Some(self.disconnected("Subscription timed out")),
            ChannelState::Idle | ChannelState::Joining => None,
        }
    }

    /// Marks a reconnect attempt in progress.
    pub fn begin_reconnect(&self) -> Self {
        Self {
            reconnecting: true,
            ..self.clone()
        }
    }

    fn disconnected(&self, reason: &str) -> Self {
        Self {
            connected: false,
            reconnecting: false,
            error: Some(reason.to_string()),
            last_connected: self.last_connected,
        }
    }
}
