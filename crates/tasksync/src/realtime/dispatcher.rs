//! Typed change subscriptions over the channel pool.
//!
//! Every subscription is tracked with the full tuple needed to re-create it
//! (channel name, table binding and the type-erased listener), so
//! [`RealtimeDispatcher::reconnect`] can replay all of them, including those
//! that never got a channel because the pool was full.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use tasksync_core::backend::RowFilter;
use tasksync_core::cache::{projects_channel, submissions_channel, task_channel, tasks_channel};
use tasksync_core::observer::{ObserverId, ObserverRegistry};
use tasksync_core::realtime::{
    normalize, ChangeBinding, ChangeEvent, ChangeListener, ChannelState, ConnectionStatus,
    ListenerId, RawChange, RealtimeChannel,
};
use tasksync_core::tasks::{
    Project, Submission, Task, TaskScope, PROJECTS_TABLE, SUBMISSIONS_TABLE, TASKS_TABLE,
};

use super::pool::ChannelPool;
use super::subscription::{Subscription, SubscriptionId};

struct Attachment {
    channel: Arc<dyn RealtimeChannel>,
    listener_id: ListenerId,
}

enum AttachState {
    Detached,
    Attaching,
    Attached(Attachment),
}

struct TrackedSubscription {
    channel_name: String,
    binding: ChangeBinding,
    listener: ChangeListener,
    subscriber_id: Uuid,
    state: AttachState,
}

struct Monitor {
    channel: Arc<dyn RealtimeChannel>,
    subscriber_id: Uuid,
    task: JoinHandle<()>,
}

pub(crate) struct DispatcherInner {
    pool: Arc<ChannelPool>,
    system_channel: String,
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<SubscriptionId, TrackedSubscription>>,
    status: RwLock<ConnectionStatus>,
    status_observers: ObserverRegistry<ConnectionStatus>,
    monitor: Mutex<Option<Monitor>>,
    started: AtomicBool,
    destroyed: AtomicBool,
    shutdown: broadcast::Sender<()>,
}

impl DispatcherInner {
    pub(super) fn is_attached(&self, id: SubscriptionId) -> bool {
        self.subscriptions
            .lock()
            .get(&id)
            .is_some_and(|t| matches!(t.state, AttachState::Attached(_)))
    }

    /// Stops tracking a subscription and detaches it.
    pub(super) fn forget(&self, id: SubscriptionId) {
        let removed = self.subscriptions.lock().remove(&id);
        if let Some(mut tracked) = removed {
            self.detach(&mut tracked);
            tracing::trace!(channel = %tracked.channel_name, "Subscription cleaned up");
        }
    }

    fn detach(&self, tracked: &mut TrackedSubscription) {
        if let AttachState::Attached(attachment) =
            std::mem::replace(&mut tracked.state, AttachState::Detached)
        {
            attachment.channel.unlisten(attachment.listener_id);
            self.pool
                .release_channel(&tracked.channel_name, tracked.subscriber_id);
        }
    }

    fn detach_id(&self, id: SubscriptionId) {
        let mut subscriptions = self.subscriptions.lock();
        if let Some(tracked) = subscriptions.get_mut(&id) {
            if !matches!(tracked.state, AttachState::Attaching) {
                self.detach(tracked);
            }
        }
    }

    /// Attaches a tracked subscription to its pooled channel.
    ///
    /// Returns true if the subscription is attached afterwards.
    async fn attach(&self, id: SubscriptionId) -> bool {
        let (channel_name, binding, listener, subscriber_id) = {
            let mut subscriptions = self.subscriptions.lock();
            let Some(tracked) = subscriptions.get_mut(&id) else {
                return false;
            };
            match tracked.state {
                AttachState::Attached(_) => return true,
                AttachState::Attaching => return false,
                AttachState::Detached => tracked.state = AttachState::Attaching,
            }
            (
                tracked.channel_name.clone(),
                tracked.binding.clone(),
                Arc::clone(&tracked.listener),
                tracked.subscriber_id,
            )
        };

        let Some(channel) = self.pool.get_channel(&channel_name, subscriber_id) else {
            tracing::warn!(channel = %channel_name, "Subscription degraded: no pooled channel");
            self.reset_attaching(id);
            return false;
        };

        let listener_id = channel.listen(binding, listener);
        if let Err(err) = channel.subscribe().await {
            tracing::error!(channel = %channel_name, error = %err, "Channel subscription failed");
            channel.unlisten(listener_id);
            self.pool.release_channel(&channel_name, subscriber_id);
            self.reset_attaching(id);
            return false;
        }

        let attached = {
            let mut subscriptions = self.subscriptions.lock();
            match subscriptions.get_mut(&id) {
                Some(tracked) if matches!(tracked.state, AttachState::Attaching) => {
                    tracked.state = AttachState::Attached(Attachment {
                        channel: Arc::clone(&channel),
                        listener_id,
                    });
                    true
                }
                _ => false,
            }
        };
        if attached {
            tracing::debug!(channel = %channel_name, "Subscription attached");
            return true;
        }

        // Cleaned up while the channel was joining.
        channel.unlisten(listener_id);
        self.pool.release_channel(&channel_name, subscriber_id);
        false
    }

    fn reset_attaching(&self, id: SubscriptionId) {
        if let Some(tracked) = self.subscriptions.lock().get_mut(&id) {
            if matches!(tracked.state, AttachState::Attaching) {
                tracked.state = AttachState::Detached;
            }
        }
    }

    /// Folds a system channel state into the connection status.
    ///
    /// Observers are notified only when the status visibly changes.
    fn apply_channel_state(&self, state: &ChannelState) {
        let next = {
            let mut status = self.status.write();
            let Some(next) = status.transition(state, Utc::now()) else {
                return;
            };
            if next.connected == status.connected
                && next.error == status.error
                && !status.reconnecting
            {
                return;
            }
            *status = next.clone();
            next
        };

        if next.connected {
            tracing::info!("Realtime connection established");
        } else {
            tracing::warn!(error = ?next.error, "Realtime connection lost");
        }
        self.status_observers.notify(&next);
    }

    fn set_status(&self, next: ConnectionStatus) {
        *self.status.write() = next.clone();
        self.status_observers.notify(&next);
    }
}

/// Opens typed change subscriptions and tracks connectivity.
///
/// Cloning shares the same dispatcher.
#[derive(Clone)]
pub struct RealtimeDispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for RealtimeDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeDispatcher")
            .field("system_channel", &self.inner.system_channel)
            .field("subscriptions", &self.subscription_count())
            .field("status", &self.status())
            .finish()
    }
}

impl RealtimeDispatcher {
    pub fn new(pool: Arc<ChannelPool>, system_channel: impl Into<String>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(DispatcherInner {
                pool,
                system_channel: system_channel.into(),
                next_id: AtomicU64::new(1),
                subscriptions: Mutex::new(HashMap::new()),
                status: RwLock::new(ConnectionStatus::default()),
                status_observers: ObserverRegistry::new(),
                monitor: Mutex::new(None),
                started: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.inner.pool
    }

    /// Joins the system channel and starts monitoring its state.
    ///
    /// Does nothing after the first call.
    pub async fn start(&self) {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) || inner.destroyed.load(Ordering::SeqCst) {
            return;
        }

        let subscriber_id = Uuid::new_v4();
        let Some(channel) = inner.pool.get_channel(&inner.system_channel, subscriber_id) else {
            tracing::error!(channel = %inner.system_channel, "No channel available for connection monitor");
            inner.set_status(ConnectionStatus {
                error: Some("Channel pool at capacity".to_string()),
                ..ConnectionStatus::default()
            });
            return;
        };

        let mut state_rx = channel.state();
        let mut shutdown_rx = inner.shutdown.subscribe();
        let weak = Arc::downgrade(inner);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = state_rx.borrow_and_update().clone();
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        inner.apply_channel_state(&state);
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            tracing::debug!("Connection monitor stopped");
        });

        *inner.monitor.lock() = Some(Monitor {
            channel: Arc::clone(&channel),
            subscriber_id,
            task,
        });

        if let Err(err) = channel.subscribe().await {
            tracing::error!(channel = %inner.system_channel, error = %err, "System channel subscription failed");
        }
        let state = channel.state().borrow().clone();
        inner.apply_channel_state(&state);
    }

    /// Opens a subscription to `table` on the pooled channel `channel_name`.
    ///
    /// Payloads are normalized into `ChangeEvent<T>`; payloads that do not
    /// deserialize are logged and dropped. If no channel can be obtained the
    /// subscription is still tracked, degraded, until retried or replayed.
    pub async fn subscribe_to_table<T, F>(
        &self,
        channel_name: &str,
        table: &str,
        filter: Option<RowFilter>,
        callback: F,
    ) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(ChangeEvent<T>) + Send + Sync + 'static,
    {
        let table_name = table.to_string();
        let listener: ChangeListener =
            Arc::new(move |raw: &RawChange| match normalize::<T>(raw, Utc::now()) {
                Ok(event) => callback(event),
                Err(err) => {
                    tracing::warn!(table = %table_name, error = %err, "Dropped malformed change payload")
                }
            });

        let mut binding = ChangeBinding::table(table);
        if let Some(filter) = filter {
            binding = binding.with_filter(filter);
        }

        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.subscriptions.lock().insert(
            id,
            TrackedSubscription {
                channel_name: channel_name.to_string(),
                binding,
                listener,
                subscriber_id: Uuid::new_v4(),
                state: AttachState::Detached,
            },
        );

        let subscription = Subscription::new(id, channel_name, Arc::downgrade(&self.inner));
        self.inner.attach(id).await;
        subscription
    }

    /// Task changes, optionally narrowed to one project.
    pub async fn subscribe_to_tasks<F>(&self, project_id: Option<Uuid>, callback: F) -> Subscription
    where
        F: Fn(ChangeEvent<Task>) + Send + Sync + 'static,
    {
        let scope = project_id.map_or(TaskScope::All, TaskScope::Project);
        self.subscribe_to_table(&tasks_channel(scope), TASKS_TABLE, scope.task_filter(), callback)
            .await
    }

    /// Changes to a single task.
    pub async fn subscribe_to_task<F>(&self, task_id: Uuid, callback: F) -> Subscription
    where
        F: Fn(ChangeEvent<Task>) + Send + Sync + 'static,
    {
        self.subscribe_to_table(
            &task_channel(task_id),
            TASKS_TABLE,
            Some(RowFilter::eq("id", task_id)),
            callback,
        )
        .await
    }

    /// Project changes.
    pub async fn subscribe_to_projects<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ChangeEvent<Project>) + Send + Sync + 'static,
    {
        self.subscribe_to_table(&projects_channel(), PROJECTS_TABLE, None, callback)
            .await
    }

    /// Submission changes, optionally narrowed to one task.
    pub async fn subscribe_to_submissions<F>(&self, task_id: Option<Uuid>, callback: F) -> Subscription
    where
        F: Fn(ChangeEvent<Submission>) + Send + Sync + 'static,
    {
        self.subscribe_to_table(
            &submissions_channel(task_id),
            SUBMISSIONS_TABLE,
            task_id.map(|id| RowFilter::eq("task_id", id)),
            callback,
        )
        .await
    }

    /// Re-attempts a degraded subscription. Returns true if it is active.
    pub async fn retry(&self, subscription: &Subscription) -> bool {
        if subscription.is_cleaned_up() {
            return false;
        }
        self.inner.attach(subscription.id()).await
    }

    /// Rejoins the system channel and replays every tracked subscription.
    ///
    /// Returns how many subscriptions are active afterwards.
    pub async fn reconnect(&self) -> usize {
        let inner = &self.inner;
        let reconnecting = inner.status.read().begin_reconnect();
        inner.set_status(reconnecting);
        tracing::info!("Reconnecting realtime subscriptions");

        let system = inner.monitor.lock().as_ref().map(|m| Arc::clone(&m.channel));
        if let Some(channel) = system {
            if let Err(err) = channel.subscribe().await {
                tracing::error!(channel = %inner.system_channel, error = %err, "System channel subscription failed");
            }
            let state = channel.state().borrow().clone();
            inner.apply_channel_state(&state);
        }

        let mut ids: Vec<SubscriptionId> = inner.subscriptions.lock().keys().copied().collect();
        ids.sort();
        for id in &ids {
            inner.detach_id(*id);
        }

        let mut live = 0;
        for id in &ids {
            if inner.attach(*id).await {
                live += 1;
            }
        }

        let status = inner.status.read().clone();
        if status.reconnecting {
            inner.set_status(ConnectionStatus {
                reconnecting: false,
                ..status
            });
        }

        tracing::info!(live, total = ids.len(), "Replayed subscriptions");
        live
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.read().clone()
    }

    /// Registers a callback for connection status changes.
    pub fn on_status_change<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner.status_observers.subscribe(callback)
    }

    pub fn remove_status_observer(&self, id: ObserverId) -> bool {
        self.inner.status_observers.unsubscribe(id)
    }

    pub fn status_observer_count(&self) -> usize {
        self.inner.status_observers.len()
    }

    /// Number of tracked subscriptions, active or degraded.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    /// Number of tracked subscriptions attached to a channel.
    pub fn active_count(&self) -> usize {
        self.inner
            .subscriptions
            .lock()
            .values()
            .filter(|t| matches!(t.state, AttachState::Attached(_)))
            .count()
    }

    /// Cleans up every subscription, stops the monitor and destroys the pool.
    ///
    /// Safe to call repeatedly.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = inner.shutdown.send(());
        if let Some(monitor) = inner.monitor.lock().take() {
            monitor.task.abort();
            inner
                .pool
                .release_channel(&inner.system_channel, monitor.subscriber_id);
        }

        let tracked: Vec<TrackedSubscription> =
            inner.subscriptions.lock().drain().map(|(_, t)| t).collect();
        let count = tracked.len();
        for mut subscription in tracked {
            inner.detach(&mut subscription);
        }

        inner.status_observers.clear();
        inner.pool.destroy();
        tracing::debug!(subscriptions = count, "Destroyed realtime dispatcher");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tasksync_core::backend::QueryBackend;

    use crate::backend::InMemoryBackend;
    use crate::realtime::PoolConfig;

    fn setup(max_channels: usize) -> (RealtimeDispatcher, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        for table in [TASKS_TABLE, PROJECTS_TABLE, SUBMISSIONS_TABLE] {
            backend.create_table(table);
        }
        let pool = Arc::new(ChannelPool::new(
            Arc::new(backend.clone()),
            PoolConfig {
                max_channels,
                ..PoolConfig::default()
            },
        ));
        (RealtimeDispatcher::new(pool, "system"), backend)
    }

    fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<ChangeEvent<T>>>>, impl Fn(ChangeEvent<T>) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner = seen.clone();
        (seen, move |event: ChangeEvent<T>| inner.lock().push(event))
    }

    async fn insert_task(backend: &InMemoryBackend, task: &Task) {
        backend
            .insert(TASKS_TABLE, serde_json::to_value(task).unwrap())
            .await
            .unwrap();
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_task_events_are_normalized() {
        let (dispatcher, backend) = setup(10);
        let (seen, callback) = recorder::<Task>();
        let subscription = dispatcher.subscribe_to_tasks(None, callback).await;
        let task = Task::new(Uuid::new_v4(), "Write docs");

        insert_task(&backend, &task).await;
        backend.delete(TASKS_TABLE, task.id).await.unwrap();

        assert!(subscription.is_active());
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, tasksync_core::realtime::ChangeKind::Inserted);
        assert_eq!(seen[0].after.as_ref(), Some(&task));
        assert_eq!(seen[1].kind, tasksync_core::realtime::ChangeKind::Deleted);
        assert_eq!(seen[1].before.as_ref().map(|t| t.id), Some(task.id));
        assert_eq!(seen[1].source_table, TASKS_TABLE);
    }

    #[tokio::test]
    async fn test_project_filter() {
        let (dispatcher, backend) = setup(10);
        let project_id = Uuid::new_v4();
        let (seen, callback) = recorder::<Task>();
        dispatcher.subscribe_to_tasks(Some(project_id), callback).await;

        insert_task(&backend, &Task::new(project_id, "Mine")).await;
        insert_task(&backend, &Task::new(Uuid::new_v4(), "Other")).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].after.as_ref().unwrap().title, "Mine");
    }

    #[tokio::test]
    async fn test_single_task_subscription() {
        let (dispatcher, backend) = setup(10);
        let task = Task::new(Uuid::new_v4(), "Watched");
        insert_task(&backend, &task).await;
        insert_task(&backend, &Task::new(task.project_id, "Unwatched")).await;
        let (seen, callback) = recorder::<Task>();
        dispatcher.subscribe_to_task(task.id, callback).await;

        backend
            .update(TASKS_TABLE, task.id, json!({"title": "Renamed"}))
            .await
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].before.as_ref().unwrap().title, "Watched");
        assert_eq!(seen[0].after.as_ref().unwrap().title, "Renamed");
    }

    #[tokio::test]
    async fn test_malformed_payloads_are_dropped() {
        let (dispatcher, backend) = setup(10);
        let (seen, callback) = recorder::<Task>();
        dispatcher.subscribe_to_tasks(None, callback).await;

        backend
            .insert(TASKS_TABLE, json!({"title": "No project, no timestamps"}))
            .await
            .unwrap();
        insert_task(&backend, &Task::new(Uuid::new_v4(), "Valid")).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].after.as_ref().unwrap().title, "Valid");
    }

    #[tokio::test]
    async fn test_subscriptions_share_one_channel() {
        let (dispatcher, backend) = setup(10);
        let (first, callback_a) = recorder::<Project>();
        let (second, callback_b) = recorder::<Project>();
        dispatcher.subscribe_to_projects(callback_a).await;
        dispatcher.subscribe_to_projects(callback_b).await;

        backend
            .insert(PROJECTS_TABLE, serde_json::to_value(Project::new("Shared")).unwrap())
            .await
            .unwrap();

        assert_eq!(backend.open_channel_count(), 1);
        assert_eq!(dispatcher.pool().stats().total_subscribers, 2);
        assert_eq!(first.lock().len(), 1);
        assert_eq!(second.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_releases_without_closing() {
        let (dispatcher, backend) = setup(10);
        let (seen, callback) = recorder::<Task>();
        let subscription = dispatcher.subscribe_to_tasks(None, callback).await;

        subscription.cleanup();
        subscription.cleanup();
        insert_task(&backend, &Task::new(Uuid::new_v4(), "Unheard")).await;

        assert!(!subscription.is_active());
        assert!(seen.lock().is_empty());
        assert_eq!(dispatcher.subscription_count(), 0);
        let stats = dispatcher.pool().stats();
        assert_eq!(stats.channel_count, 1);
        assert_eq!(stats.total_subscribers, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_degrades_then_retry_recovers() {
        let (dispatcher, backend) = setup(1);
        let (_, tasks_callback) = recorder::<Task>();
        let (seen, projects_callback) = recorder::<Project>();

        let tasks = dispatcher.subscribe_to_tasks(None, tasks_callback).await;
        let projects = dispatcher.subscribe_to_projects(projects_callback).await;

        assert!(tasks.is_active());
        assert!(!projects.is_active());
        assert_eq!(dispatcher.subscription_count(), 2);
        assert_eq!(dispatcher.active_count(), 1);

        tasks.cleanup();
        assert!(!dispatcher.retry(&projects).await);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(dispatcher.retry(&projects).await);

        backend
            .insert(PROJECTS_TABLE, serde_json::to_value(Project::new("Late")).unwrap())
            .await
            .unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_subscribe_is_degraded() {
        let (dispatcher, backend) = setup(10);
        backend.fail_next_subscribe("projects", ChannelState::Errored("rejected".to_string()));
        let (_, callback) = recorder::<Project>();

        let subscription = dispatcher.subscribe_to_projects(callback).await;

        assert!(!subscription.is_active());
        assert_eq!(dispatcher.pool().stats().total_subscribers, 0);
        assert!(dispatcher.retry(&subscription).await);
        assert!(subscription.is_active());
    }

    #[tokio::test]
    async fn test_retry_after_cleanup_is_refused() {
        let (dispatcher, _) = setup(10);
        let (_, callback) = recorder::<Project>();
        let subscription = dispatcher.subscribe_to_projects(callback).await;

        subscription.cleanup();

        assert!(!dispatcher.retry(&subscription).await);
    }

    #[tokio::test]
    async fn test_status_tracks_system_channel() {
        let (dispatcher, backend) = setup(10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            dispatcher.on_status_change(move |status| seen.lock().push(status.clone()));
        }

        dispatcher.start().await;
        let status = dispatcher.status();
        assert!(status.connected);
        assert!(status.last_connected.is_some());

        backend.set_channel_state("system", ChannelState::Closed);
        settle().await;

        let status = dispatcher.status();
        assert!(!status.connected);
        assert_eq!(status.error.as_deref(), Some("Channel closed"));
        assert!(status.last_connected.is_some());

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].connected);
        assert!(!seen[1].connected);
    }

    #[tokio::test]
    async fn test_system_subscribe_timeout_reports_error() {
        let (dispatcher, backend) = setup(10);
        backend.fail_next_subscribe("system", ChannelState::TimedOut);

        dispatcher.start().await;

        let status = dispatcher.status();
        assert!(!status.connected);
        assert_eq!(status.error.as_deref(), Some("Subscription timed out"));
        assert!(status.last_connected.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replays_all_tracked() {
        let (dispatcher, backend) = setup(2);
        dispatcher.start().await;
        let (tasks_seen, tasks_callback) = recorder::<Task>();
        let (projects_seen, projects_callback) = recorder::<Project>();

        // System channel plus one more fills the pool.
        let tasks = dispatcher.subscribe_to_tasks(None, tasks_callback).await;
        let projects = dispatcher.subscribe_to_projects(projects_callback).await;
        assert!(!projects.is_active());

        backend.set_channel_state("system", ChannelState::Closed);
        backend.set_channel_state("tasks:all", ChannelState::Closed);
        settle().await;
        assert!(!dispatcher.status().connected);

        // Free a slot so the degraded subscription can be replayed too.
        tasks.cleanup();
        tokio::time::advance(Duration::from_secs(301)).await;

        assert_eq!(dispatcher.reconnect().await, 1);
        assert!(projects.is_active());
        let status = dispatcher.status();
        assert!(status.connected);
        assert!(!status.reconnecting);

        backend
            .insert(PROJECTS_TABLE, serde_json::to_value(Project::new("After")).unwrap())
            .await
            .unwrap();
        assert_eq!(projects_seen.lock().len(), 1);
        assert!(tasks_seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes_closed_channels() {
        let (dispatcher, backend) = setup(10);
        dispatcher.start().await;
        let (seen, callback) = recorder::<Task>();
        let subscription = dispatcher.subscribe_to_tasks(None, callback).await;

        backend.set_channel_state("tasks:all", ChannelState::Closed);
        insert_task(&backend, &Task::new(Uuid::new_v4(), "Missed")).await;
        assert!(seen.lock().is_empty());

        assert_eq!(dispatcher.reconnect().await, 1);
        insert_task(&backend, &Task::new(Uuid::new_v4(), "Heard")).await;

        assert!(subscription.is_active());
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(dispatcher.pool().stats().total_subscribers, 2);
    }

    #[tokio::test]
    async fn test_destroy() {
        let (dispatcher, backend) = setup(10);
        dispatcher.start().await;
        dispatcher.on_status_change(|_| {});
        let (_, callback) = recorder::<Task>();
        let subscription = dispatcher.subscribe_to_tasks(None, callback).await;

        dispatcher.destroy();
        dispatcher.destroy();

        assert!(!subscription.is_active());
        assert_eq!(dispatcher.subscription_count(), 0);
        assert_eq!(dispatcher.status_observer_count(), 0);
        assert!(dispatcher.pool().is_destroyed());
        assert_eq!(backend.open_channel_count(), 0);
        subscription.cleanup();
    }
}
