//! Translation of raw backend payloads into [`ChangeEvent`]s.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::types::{has_image, ChangeEvent, ChangeKind, RawChange, RawEventType};
use super::NormalizeError;

/// Normalizes a raw payload into a typed change event.
///
/// The event timestamp is the backend commit time when present, otherwise
/// `received_at`.
pub fn normalize<T: DeserializeOwned>(
    raw: &RawChange,
    received_at: DateTime<Utc>,
) -> Result<ChangeEvent<T>, NormalizeError> {
    let kind = match raw.event_type {
        RawEventType::Insert => ChangeKind::Inserted,
        RawEventType::Update => ChangeKind::Updated,
        RawEventType::Delete => ChangeKind::Deleted,
    };

    let (before, after) = match kind {
        ChangeKind::Inserted => (None, Some(required(raw, &raw.new, kind)?)),
        ChangeKind::Updated => (
            optional(raw, &raw.old)?,
            Some(required(raw, &raw.new, kind)?),
        ),
        ChangeKind::Deleted => (Some(required(raw, &raw.old, kind)?), None),
    };

    Ok(ChangeEvent {
        kind,
        before,
        after,
        source_table: raw.table.clone(),
        timestamp: raw.commit_timestamp.unwrap_or(received_at),
    })
}

fn required<T: DeserializeOwned>(
    raw: &RawChange,
    image: &Value,
    kind: ChangeKind,
) -> Result<T, NormalizeError> {
    optional(raw, image)?.ok_or_else(|| NormalizeError::MissingRow {
        table: raw.table.clone(),
        kind,
    })
}

fn optional<T: DeserializeOwned>(raw: &RawChange, image: &Value) -> Result<Option<T>, NormalizeError> {
    if !has_image(image) {
        return Ok(None);
    }
    serde_json::from_value(image.clone())
        .map(Some)
        .map_err(|e| NormalizeError::InvalidRow {
            table: raw.table.clone(),
            reason: e.to_string(),
        })
}
