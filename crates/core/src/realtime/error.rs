use thiserror::Error;

use super::ChangeKind;

/// Errors raised while turning a raw payload into a change event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("{kind:?} payload for {table} carries no row image")]
    MissingRow { table: String, kind: ChangeKind },
    #[error("Row from {table} does not match the expected shape: {reason}")]
    InvalidRow { table: String, reason: String },
}

/// Errors raised by realtime channels.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("Channel {0} is closed")]
    ChannelClosed(String),
    #[error("Channel {channel} failed to subscribe: {reason}")]
    SubscribeFailed { channel: String, reason: String },
    #[error("Channel {0} timed out waiting for subscription")]
    SubscribeTimeout(String),
}

/// Result type for realtime operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;
