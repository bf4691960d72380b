//! In-memory backend implementing both the query and realtime interfaces.
//!
//! Tables are vectors of JSON rows keyed by their `id` column. Every write
//! emits a change to the channels currently open, so a single process can
//! exercise the whole sync path without a hosted database.

mod channel;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use uuid::Uuid;

use tasksync_core::backend::{BackendError, Query, QueryBackend, Result};
use tasksync_core::realtime::{
    ChannelState, RawChange, RawEventType, RealtimeChannel, RealtimeClient,
};

pub use channel::InMemoryChannel;
use channel::SubscribeFailures;

struct BackendInner {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    channels: Mutex<Vec<Weak<InMemoryChannel>>>,
    failures: SubscribeFailures,
    fail_next_select: Mutex<Option<BackendError>>,
    select_delay: Mutex<Option<Duration>>,
    select_calls: AtomicUsize,
    count_calls: AtomicUsize,
}

/// Process-local backend for tests and the demo binary.
///
/// Cloning shares the underlying tables and channels.
#[derive(Clone)]
pub struct InMemoryBackend {
    inner: Arc<BackendInner>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

impl InMemoryBackend {
    /// Creates a backend with no tables.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BackendInner {
                tables: RwLock::new(HashMap::new()),
                channels: Mutex::new(Vec::new()),
                failures: Arc::new(Mutex::new(HashMap::new())),
                fail_next_select: Mutex::new(None),
                select_delay: Mutex::new(None),
                select_calls: AtomicUsize::new(0),
                count_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Creates an empty table. Existing tables are left untouched.
    pub fn create_table(&self, table: &str) {
        self.inner
            .tables
            .write()
            .entry(table.to_string())
            .or_default();
    }

    /// Loads rows into a table without emitting changes.
    pub fn seed<I>(&self, table: &str, rows: I)
    where
        I: IntoIterator<Item = Value>,
    {
        let mut tables = self.inner.tables.write();
        tables.entry(table.to_string()).or_default().extend(rows);
    }

    /// Number of `select` calls served so far.
    pub fn select_calls(&self) -> usize {
        self.inner.select_calls.load(Ordering::SeqCst)
    }

    /// Number of `count` calls served so far.
    pub fn count_calls(&self) -> usize {
        self.inner.count_calls.load(Ordering::SeqCst)
    }

    /// Makes the next `select` fail with `error`.
    pub fn fail_next_select(&self, error: BackendError) {
        *self.inner.fail_next_select.lock() = Some(error);
    }

    /// Delays every `select` by `delay`; `None` removes the delay.
    pub fn set_select_delay(&self, delay: Option<Duration>) {
        *self.inner.select_delay.lock() = delay;
    }

    /// Makes the next subscribe on channel `name` end in `state`.
    pub fn fail_next_subscribe(&self, name: &str, state: ChannelState) {
        self.inner.failures.lock().insert(name.to_string(), state);
    }

    /// Forces the state of every open channel named `name`.
    ///
    /// Returns how many channels were affected.
    pub fn set_channel_state(&self, name: &str, state: ChannelState) -> usize {
        let channels = self.open_channels();
        let mut affected = 0;
        for channel in channels.iter().filter(|c| c.name() == name) {
            channel.force_state(state.clone());
            affected += 1;
        }
        affected
    }

    /// Number of channels opened and not yet removed.
    pub fn open_channel_count(&self) -> usize {
        self.open_channels().len()
    }

    fn open_channels(&self) -> Vec<Arc<InMemoryChannel>> {
        let mut channels = self.inner.channels.lock();
        channels.retain(|weak| weak.strong_count() > 0);
        channels.iter().filter_map(Weak::upgrade).collect()
    }

    fn emit(&self, change: RawChange) {
        let delivered: usize = self
            .open_channels()
            .iter()
            .map(|channel| channel.deliver(&change))
            .sum();
        tracing::trace!(
            table = %change.table,
            event = ?change.event_type,
            listeners = delivered,
            "Emitted change"
        );
    }

    fn unknown_table(table: &str) -> BackendError {
        BackendError::UnknownTable(table.to_string())
    }

    fn not_found(table: &str, id: Uuid) -> BackendError {
        BackendError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl QueryBackend for InMemoryBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        self.inner.select_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.inner.select_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.inner.fail_next_select.lock().take() {
            return Err(error);
        }

        let tables = self.inner.tables.read();
        let rows = tables
            .get(&query.table)
            .ok_or_else(|| Self::unknown_table(&query.table))?;
        Ok(query.evaluate(rows))
    }

    async fn count(&self, query: &Query) -> Result<usize> {
        self.inner.count_calls.fetch_add(1, Ordering::SeqCst);

        let tables = self.inner.tables.read();
        let rows = tables
            .get(&query.table)
            .ok_or_else(|| Self::unknown_table(&query.table))?;
        Ok(rows.iter().filter(|row| query.matches(row)).count())
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        let Value::Object(mut object) = row else {
            return Err(BackendError::InvalidRow("row must be a JSON object".to_string()));
        };
        if !object.contains_key("id") {
            object.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        }
        let row = Value::Object(object);

        {
            let mut tables = self.inner.tables.write();
            let rows = tables
                .get_mut(table)
                .ok_or_else(|| Self::unknown_table(table))?;
            if rows.iter().any(|r| row_id(r) == row_id(&row)) {
                return Err(BackendError::QueryFailed(format!(
                    "duplicate key in {}: {}",
                    table,
                    row_id(&row).unwrap_or_default()
                )));
            }
            rows.push(row.clone());
        }

        self.emit(RawChange {
            commit_timestamp: Some(Utc::now()),
            ..RawChange::new(RawEventType::Insert, table, row.clone(), Value::Object(Map::new()))
        });
        Ok(row)
    }

    async fn update(&self, table: &str, id: Uuid, patch: Value) -> Result<Value> {
        let Value::Object(patch) = patch else {
            return Err(BackendError::InvalidRow("patch must be a JSON object".to_string()));
        };
        let id_str = id.to_string();

        let (old, new) = {
            let mut tables = self.inner.tables.write();
            let rows = tables
                .get_mut(table)
                .ok_or_else(|| Self::unknown_table(table))?;
            let row = rows
                .iter_mut()
                .find(|r| row_id(r) == Some(id_str.as_str()))
                .ok_or_else(|| Self::not_found(table, id))?;

            let old = row.clone();
            if let Value::Object(object) = row {
                for (column, value) in patch {
                    if column != "id" {
                        object.insert(column, value);
                    }
                }
            }
            (old, row.clone())
        };

        self.emit(RawChange {
            commit_timestamp: Some(Utc::now()),
            ..RawChange::new(RawEventType::Update, table, new.clone(), old)
        });
        Ok(new)
    }

    async fn delete(&self, table: &str, id: Uuid) -> Result<Value> {
        let id_str = id.to_string();

        let removed = {
            let mut tables = self.inner.tables.write();
            let rows = tables
                .get_mut(table)
                .ok_or_else(|| Self::unknown_table(table))?;
            let position = rows
                .iter()
                .position(|r| row_id(r) == Some(id_str.as_str()))
                .ok_or_else(|| Self::not_found(table, id))?;
            rows.remove(position)
        };

        self.emit(RawChange {
            commit_timestamp: Some(Utc::now()),
            ..RawChange::new(RawEventType::Delete, table, Value::Object(Map::new()), removed.clone())
        });
        Ok(removed)
    }
}

impl RealtimeClient for InMemoryBackend {
    fn channel(&self, name: &str) -> Arc<dyn RealtimeChannel> {
        let channel = Arc::new(InMemoryChannel::new(name, self.inner.failures.clone()));
        self.inner.channels.lock().push(Arc::downgrade(&channel));
        tracing::debug!(channel = %name, "Opened channel");
        channel
    }

    fn remove_channel(&self, channel: &Arc<dyn RealtimeChannel>) {
        let mut channels = self.inner.channels.lock();
        let target = Arc::as_ptr(channel) as *const ();
        channels.retain(|weak| match weak.upgrade() {
            Some(open) => {
                let same = std::ptr::eq(Arc::as_ptr(&open) as *const (), target);
                if same {
                    open.force_state(ChannelState::Closed);
                }
                !same
            }
            None => false,
        });
        tracing::debug!(channel = %channel.name(), "Removed channel");
    }
}
