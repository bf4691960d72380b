//! Task-board sync service.
//!
//! Composes the cache, the backend and the dispatcher into one
//! auto-refreshing view:
//! - **Reads**: serve the cached board while valid, otherwise fetch every
//!   underlying table in parallel and cache the merged board
//! - **Changes**: patch the cached board in place by id and notify
//!   local subscribers
//! - **Writes**: write to the backend first, then patch the cache with the
//!   row the backend returned

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use uuid::Uuid;

use tasksync_core::backend::{Query, QueryBackend, RowFilter};
use tasksync_core::cache::{task_board_key, Cache, CacheExt, DEFAULT_TTL};
use tasksync_core::observer::{ObserverId, ObserverRegistry};
use tasksync_core::realtime::ChangeEvent;
use tasksync_core::tasks::{
    CreateTaskRequest, Project, Submission, Task, TaskBoard, TaskScope, UpdateTaskRequest,
    PROJECTS_TABLE, SUBMISSIONS_TABLE, TASKS_TABLE,
};

use super::state::{QueryState, SyncNotification, SyncState};
use crate::error::{Result, SyncError};
use crate::realtime::{RealtimeDispatcher, Subscription};

type SharedFetch = Shared<BoxFuture<'static, Result<TaskBoard>>>;

/// Tuning for a [`TaskSyncService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// TTL of the cached board.
    pub ttl: Duration,
    /// Upper bound on one full fetch.
    pub fetch_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

struct Status {
    state: SyncState,
    error: Option<SyncError>,
}

struct ServiceInner {
    scope: TaskScope,
    cache_key: String,
    cache: Arc<dyn Cache>,
    backend: Arc<dyn QueryBackend>,
    dispatcher: RealtimeDispatcher,
    settings: SyncSettings,
    status: RwLock<Status>,
    in_flight: Mutex<Option<SharedFetch>>,
    subscriptions: Mutex<Vec<Subscription>>,
    subscribe_gate: tokio::sync::Mutex<()>,
    patch_lock: Mutex<()>,
    observers: ObserverRegistry<SyncNotification>,
    cleaned: AtomicBool,
}

/// Counts submission rows per task, keeping only tasks on the board.
fn count_submissions(tasks: &[Task], submissions: &[Value]) -> HashMap<Uuid, usize> {
    let mut counts: HashMap<Uuid, usize> = tasks.iter().map(|t| (t.id, 0)).collect();
    for row in submissions {
        let task_id = row
            .get("task_id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<Uuid>().ok());
        if let Some(count) = task_id.and_then(|id| counts.get_mut(&id)) {
            *count += 1;
        }
    }
    counts
}

impl ServiceInner {
    fn cached_board(&self) -> Option<TaskBoard> {
        self.cache.get_json(&self.cache_key)
    }

    fn set_status(&self, state: SyncState, error: Option<SyncError>) {
        let mut status = self.status.write();
        status.state = state;
        status.error = error;
    }

    /// Runs a fetch, or joins the one already in flight.
    async fn fetch(self: &Arc<Self>) -> Result<TaskBoard> {
        let fetch = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(fetch) => {
                    tracing::trace!(key = %self.cache_key, "Joining in-flight fetch");
                    fetch.clone()
                }
                None => {
                    let fetch = Arc::clone(self).run_fetch().boxed().shared();
                    *slot = Some(fetch.clone());
                    fetch
                }
            }
        };
        fetch.await
    }

    async fn run_fetch(self: Arc<Self>) -> Result<TaskBoard> {
        self.set_status(SyncState::Loading, None);
        tracing::debug!(key = %self.cache_key, "Fetching task board");

        let timeout = self.settings.fetch_timeout;
        let result = match tokio::time::timeout(timeout, self.load_board()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(timeout)),
        };
        *self.in_flight.lock() = None;

        match result {
            Ok(mut board) => {
                if let Some(previous) = self.cached_board() {
                    board.touch(previous.last_update);
                }
                if let Err(err) = self
                    .cache
                    .set_json(&self.cache_key, &board, Some(self.settings.ttl))
                {
                    tracing::warn!(key = %self.cache_key, error = %err, "Failed to cache task board");
                }
                self.set_status(SyncState::Live, None);
                tracing::debug!(
                    key = %self.cache_key,
                    projects = board.projects.len(),
                    tasks = board.tasks.len(),
                    "Task board refreshed"
                );
                self.observers.notify(&SyncNotification::Refreshed);
                Ok(board)
            }
            Err(err) => {
                tracing::warn!(key = %self.cache_key, error = %err, "Task board fetch failed");
                self.set_status(SyncState::Error, Some(err.clone()));
                Err(err)
            }
        }
    }

    async fn load_board(&self) -> Result<TaskBoard> {
        let mut projects_query = Query::table(PROJECTS_TABLE).order_by("name", true);
        if let Some(project_id) = self.scope.project_id() {
            projects_query = projects_query.filter(RowFilter::eq("id", project_id));
        }
        let mut tasks_query = Query::table(TASKS_TABLE).order_by("created_at", false);
        if let Some(filter) = self.scope.task_filter() {
            tasks_query = tasks_query.filter(filter);
        }
        let submissions_query = Query::table(SUBMISSIONS_TABLE).select(&["task_id"]);

        let (projects, tasks, submissions) = tokio::try_join!(
            self.backend.select(&projects_query),
            self.backend.select(&tasks_query),
            self.backend.select(&submissions_query),
        )?;

        let projects: Vec<Project> = serde_json::from_value(Value::Array(projects))?;
        let tasks: Vec<Task> = serde_json::from_value(Value::Array(tasks))?;
        let counts = count_submissions(&tasks, &submissions);

        Ok(TaskBoard::build(projects, tasks, counts))
    }

    /// Opens the service's subscriptions, or reopens them after a cleanup;
    /// when they are already open, retries any that are degraded.
    async fn ensure_subscriptions(self: &Arc<Self>) {
        let _gate = self.subscribe_gate.lock().await;
        // Set again by a cleanup that lands while subscribing below.
        self.cleaned.store(false, Ordering::SeqCst);

        let existing: Vec<Subscription> = self.subscriptions.lock().clone();
        if !existing.is_empty() {
            for subscription in existing.iter().filter(|s| !s.is_active()) {
                if self.dispatcher.retry(subscription).await {
                    tracing::info!(channel = %subscription.channel_name(), "Degraded subscription recovered");
                }
            }
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let tasks = {
            let weak = weak.clone();
            self.dispatcher
                .subscribe_to_tasks(self.scope.project_id(), move |event| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_task_change(event);
                    }
                })
                .await
        };
        let projects = {
            let weak = weak.clone();
            self.dispatcher
                .subscribe_to_projects(move |event| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_project_change(event);
                    }
                })
                .await
        };
        let submissions = self
            .dispatcher
            .subscribe_to_submissions(None, move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_submission_change(event);
                }
            })
            .await;

        let created = vec![tasks, projects, submissions];
        if self.cleaned.load(Ordering::SeqCst) {
            created.iter().for_each(Subscription::cleanup);
            return;
        }
        let active = created.iter().filter(|s| s.is_active()).count();
        tracing::debug!(key = %self.cache_key, active, total = created.len(), "Subscriptions established");
        self.subscriptions.lock().extend(created);
    }

    /// Applies `patch` to the cached board and writes it back.
    ///
    /// Returns true if the board changed. Without a cached board there is
    /// nothing to patch; the next read fetches fresh data.
    fn patch_board<F>(&self, patch: F) -> bool
    where
        F: FnOnce(&mut TaskBoard) -> bool,
    {
        let _guard = self.patch_lock.lock();
        let Some(mut board) = self.cached_board() else {
            tracing::trace!(key = %self.cache_key, "No cached board to patch");
            return false;
        };
        if !patch(&mut board) {
            return false;
        }
        board.touch(Utc::now());
        if let Err(err) = self
            .cache
            .set_json(&self.cache_key, &board, Some(self.settings.ttl))
        {
            tracing::warn!(key = %self.cache_key, error = %err, "Failed to write patched board");
            return false;
        }
        true
    }

    fn on_task_change(self: &Arc<Self>, event: ChangeEvent<Task>) {
        let scope = self.scope;
        let mut added = None;
        let changed = self.patch_board(|board| {
            let absent = event.row().map(|t| t.id).filter(|id| board.task(*id).is_none());
            let changed = board.apply_task_change(&event, scope);
            added = absent.filter(|id| board.task(*id).is_some());
            changed
        });
        if changed {
            tracing::trace!(kind = ?event.kind, "Applied task change");
            self.observers.notify(&SyncNotification::Task(event));
        }
        // A task new to the board may already have submissions.
        if let Some(task_id) = added {
            self.spawn_recount(task_id);
        }
    }

    fn on_project_change(&self, event: ChangeEvent<Project>) {
        if let Some(project_id) = self.scope.project_id() {
            if event.row().is_some_and(|p| p.id != project_id) {
                return;
            }
        }
        if self.patch_board(|board| board.apply_project_change(&event)) {
            tracing::trace!(kind = ?event.kind, "Applied project change");
            self.observers.notify(&SyncNotification::Project(event));
        }
    }

    fn on_submission_change(self: &Arc<Self>, event: ChangeEvent<Submission>) {
        let Some(task_id) = event.row().map(|s| s.task_id) else {
            return;
        };
        let on_board = self
            .cached_board()
            .is_some_and(|board| board.task(task_id).is_some());
        if on_board {
            self.spawn_recount(task_id);
        }
    }

    fn spawn_recount(self: &Arc<Self>, task_id: Uuid) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                handle.spawn(async move { inner.recount_submissions(task_id).await });
            }
            Err(_) => {
                tracing::warn!(%task_id, "No runtime available to recount submissions");
            }
        }
    }

    async fn recount_submissions(&self, task_id: Uuid) {
        let query = Query::table(SUBMISSIONS_TABLE).filter(RowFilter::eq("task_id", task_id));
        let count = match self.backend.count(&query).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(%task_id, error = %err, "Submission recount failed");
                return;
            }
        };

        let changed = self.patch_board(|board| {
            if board.task(task_id).is_none() || board.submission_count(task_id) == count {
                return false;
            }
            board.set_submission_count(task_id, count);
            true
        });
        if changed {
            tracing::trace!(%task_id, count, "Updated submission count");
            self.observers
                .notify(&SyncNotification::SubmissionCount { task_id, count });
        }
    }
}

/// Auto-refreshing task board over one [`TaskScope`].
///
/// Cloning shares the same service.
#[derive(Clone)]
pub struct TaskSyncService {
    inner: Arc<ServiceInner>,
}

impl std::fmt::Debug for TaskSyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSyncService")
            .field("scope", &self.inner.scope)
            .field("state", &self.state())
            .finish()
    }
}

impl TaskSyncService {
    pub fn new(
        scope: TaskScope,
        cache: Arc<dyn Cache>,
        backend: Arc<dyn QueryBackend>,
        dispatcher: RealtimeDispatcher,
        settings: SyncSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                scope,
                cache_key: task_board_key(scope),
                cache,
                backend,
                dispatcher,
                settings,
                status: RwLock::new(Status {
                    state: SyncState::Cold,
                    error: None,
                }),
                in_flight: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                subscribe_gate: tokio::sync::Mutex::new(()),
                patch_lock: Mutex::new(()),
                observers: ObserverRegistry::new(),
                cleaned: AtomicBool::new(false),
            }),
        }
    }

    pub fn scope(&self) -> TaskScope {
        self.inner.scope
    }

    /// Cache key the board is stored under.
    pub fn cache_key(&self) -> &str {
        &self.inner.cache_key
    }

    /// Returns the board, from cache when valid unless `force_refresh`.
    ///
    /// Concurrent callers share a single in-flight fetch, forced or not.
    pub async fn get_data(&self, force_refresh: bool) -> Result<TaskBoard> {
        if !force_refresh {
            if let Some(board) = self.inner.cached_board() {
                {
                    let mut status = self.inner.status.write();
                    if status.state != SyncState::Loading {
                        status.state = SyncState::Live;
                        status.error = None;
                    }
                }
                self.inner.ensure_subscriptions().await;
                return Ok(board);
            }
        }

        let board = self.inner.fetch().await?;
        self.inner.ensure_subscriptions().await;
        Ok(board)
    }

    /// Cached read, fetching only on a miss.
    pub async fn refetch(&self) -> Result<TaskBoard> {
        self.get_data(false).await
    }

    /// Bypasses the cache.
    pub async fn force_refresh(&self) -> Result<TaskBoard> {
        self.get_data(true).await
    }

    pub fn state(&self) -> SyncState {
        let state = self.inner.status.read().state;
        if state == SyncState::Live && !self.inner.cache.has(&self.inner.cache_key) {
            return SyncState::Stale;
        }
        state
    }

    pub fn snapshot(&self) -> QueryState {
        let state = self.state();
        QueryState {
            data: self.inner.cached_board(),
            is_loading: state == SyncState::Loading,
            is_error: state == SyncState::Error,
            error: self.inner.status.read().error.clone(),
        }
    }

    /// Creates a task and adds it to the board if it is in scope.
    pub async fn create_task(&self, request: CreateTaskRequest) -> Result<Task> {
        request.validate()?;
        let task = request.into_task(Utc::now());

        let row = self
            .inner
            .backend
            .insert(TASKS_TABLE, serde_json::to_value(&task)?)
            .await?;
        let created: Task = serde_json::from_value(row)?;
        tracing::debug!(task_id = %created.id, "Created task");

        self.inner
            .on_task_change(ChangeEvent::inserted(TASKS_TABLE, created.clone(), Utc::now()));
        Ok(created)
    }

    /// Applies a partial update and patches the board with the stored row.
    pub async fn update_task(&self, task_id: Uuid, request: UpdateTaskRequest) -> Result<Task> {
        request.validate()?;
        let now = Utc::now();

        let row = self
            .inner
            .backend
            .update(TASKS_TABLE, task_id, request.into_patch(now))
            .await?;
        let updated: Task = serde_json::from_value(row)?;
        tracing::debug!(%task_id, "Updated task");

        self.inner
            .on_task_change(ChangeEvent::updated(TASKS_TABLE, None, updated.clone(), now));
        Ok(updated)
    }

    /// Deletes a task. Returns the deleted row.
    pub async fn delete_task(&self, task_id: Uuid) -> Result<Task> {
        let row = self.inner.backend.delete(TASKS_TABLE, task_id).await?;
        let deleted: Task = serde_json::from_value(row)?;
        tracing::debug!(%task_id, "Deleted task");

        self.inner
            .on_task_change(ChangeEvent::deleted(TASKS_TABLE, deleted.clone(), Utc::now()));
        Ok(deleted)
    }

    /// Registers a callback for board changes.
    pub fn subscribe<F>(&self, callback: F) -> Unsubscriber
    where
        F: Fn(&SyncNotification) + Send + Sync + 'static,
    {
        Unsubscriber {
            id: self.inner.observers.subscribe(callback),
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Number of owned subscriptions currently receiving events.
    pub fn active_subscriptions(&self) -> usize {
        self.inner
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.is_active())
            .count()
    }

    /// Unsubscribes every owned subscription and drops local subscribers.
    ///
    /// Safe to call repeatedly. The next read subscribes again.
    pub fn cleanup(&self) {
        self.inner.cleaned.store(true, Ordering::SeqCst);
        let subscriptions: Vec<Subscription> = self.inner.subscriptions.lock().drain(..).collect();
        self.inner.observers.clear();
        if subscriptions.is_empty() {
            return;
        }
        for subscription in &subscriptions {
            subscription.cleanup();
        }
        tracing::debug!(
            key = %self.inner.cache_key,
            subscriptions = subscriptions.len(),
            "Sync service cleaned up"
        );
    }
}

/// Removes a callback registered with [`TaskSyncService::subscribe`].
#[must_use = "dropping an Unsubscriber keeps the callback registered"]
pub struct Unsubscriber {
    id: ObserverId,
    inner: Weak<ServiceInner>,
}

impl Unsubscriber {
    /// Returns true if the callback was still registered.
    pub fn unsubscribe(self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.observers.unsubscribe(self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tasksync_core::backend::BackendError;
    use tasksync_core::realtime::ChannelState;
    use tasksync_core::tasks::TaskError;

    use crate::backend::InMemoryBackend;
    use crate::cache::MemoryCache;
    use crate::realtime::{ChannelPool, PoolConfig};

    struct Fixture {
        backend: InMemoryBackend,
        cache: Arc<MemoryCache>,
        dispatcher: RealtimeDispatcher,
        project: Project,
        tasks: Vec<Task>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_pool(PoolConfig::default())
        }

        fn with_pool(config: PoolConfig) -> Self {
            let backend = InMemoryBackend::new();
            let project = Project::new("Launch");
            let tasks = vec![
                Task::new(project.id, "Plan").with_created_at(Utc::now() - chrono::Duration::hours(2)),
                Task::new(project.id, "Build").with_created_at(Utc::now() - chrono::Duration::hours(1)),
            ];
            backend.seed(PROJECTS_TABLE, vec![serde_json::to_value(&project).unwrap()]);
            backend.seed(
                TASKS_TABLE,
                tasks.iter().map(|t| serde_json::to_value(t).unwrap()),
            );
            backend.seed(
                SUBMISSIONS_TABLE,
                vec![serde_json::to_value(Submission::new(tasks[0].id, "ana")).unwrap()],
            );

            let pool = Arc::new(ChannelPool::new(Arc::new(backend.clone()), config));
            Self {
                cache: Arc::new(MemoryCache::new(DEFAULT_TTL)),
                dispatcher: RealtimeDispatcher::new(pool, "system"),
                backend,
                project,
                tasks,
            }
        }

        fn service(&self, scope: TaskScope) -> TaskSyncService {
            self.service_with(scope, SyncSettings::default())
        }

        fn service_with(&self, scope: TaskScope, settings: SyncSettings) -> TaskSyncService {
            TaskSyncService::new(
                scope,
                self.cache.clone(),
                Arc::new(self.backend.clone()),
                self.dispatcher.clone(),
                settings,
            )
        }
    }

    fn record(service: &TaskSyncService) -> Arc<Mutex<Vec<SyncNotification>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner = seen.clone();
        let _ = service.subscribe(move |n: &SyncNotification| inner.lock().push(n.clone()));
        seen
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_cold_fetch_then_cache_hit() {
        let fixture = Fixture::new();
        let service = fixture.service(TaskScope::All);
        assert_eq!(service.state(), SyncState::Cold);

        let board = service.get_data(false).await.unwrap();

        assert_eq!(fixture.backend.select_calls(), 3);
        assert_eq!(board.tasks.len(), 2);
        assert_eq!(board.tasks[0].title, "Build");
        assert_eq!(board.submission_count(fixture.tasks[0].id), 1);
        assert_eq!(board.submission_count(fixture.tasks[1].id), 0);
        assert_eq!(service.state(), SyncState::Live);
        assert_eq!(service.active_subscriptions(), 3);

        let again = service.refetch().await.unwrap();
        assert_eq!(again, board);
        assert_eq!(fixture.backend.select_calls(), 3);
    }

    #[tokio::test]
    async fn test_project_scope_narrows_fetch() {
        let fixture = Fixture::new();
        fixture.backend.seed(
            TASKS_TABLE,
            vec![serde_json::to_value(Task::new(Uuid::new_v4(), "Elsewhere")).unwrap()],
        );
        fixture.backend.seed(
            PROJECTS_TABLE,
            vec![serde_json::to_value(Project::new("Other")).unwrap()],
        );
        let service = fixture.service(TaskScope::Project(fixture.project.id));

        let board = service.get_data(false).await.unwrap();

        assert_eq!(board.tasks.len(), 2);
        assert_eq!(board.projects, vec![fixture.project.clone()]);
        assert!(fixture
            .cache
            .has(&format!("tasks:board:project:{}", fixture.project.id)));
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_cache() {
        let fixture = Fixture::new();
        let service = fixture.service(TaskScope::All);
        service.get_data(false).await.unwrap();
        let seen = record(&service);

        service.force_refresh().await.unwrap();

        assert_eq!(fixture.backend.select_calls(), 6);
        assert_eq!(*seen.lock(), vec![SyncNotification::Refreshed]);
        // Subscriptions survive refreshes.
        assert_eq!(fixture.dispatcher.subscription_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_share_one_fetch() {
        let fixture = Fixture::new();
        fixture.backend.set_select_delay(Some(Duration::from_millis(100)));
        let service = fixture.service(TaskScope::All);

        let (a, b, c) = tokio::join!(
            service.get_data(false),
            service.get_data(false),
            service.force_refresh()
        );

        assert_eq!(fixture.backend.select_calls(), 3);
        assert_eq!(a.unwrap(), b.unwrap());
        assert!(c.is_ok());
        assert_eq!(fixture.dispatcher.subscription_count(), 3);
    }

    #[tokio::test]
    async fn test_fetch_failure_enters_error_then_recovers() {
        let fixture = Fixture::new();
        let service = fixture.service(TaskScope::All);
        fixture
            .backend
            .fail_next_select(BackendError::Unavailable("connection reset".to_string()));

        let err = service.get_data(false).await.unwrap_err();

        assert_eq!(
            err,
            SyncError::Backend(BackendError::Unavailable("connection reset".to_string()))
        );
        let snapshot = service.snapshot();
        assert!(snapshot.is_error);
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.error, Some(err));
        assert!(snapshot.data.is_none());
        assert_eq!(fixture.dispatcher.subscription_count(), 0);

        service.get_data(false).await.unwrap();
        assert_eq!(service.state(), SyncState::Live);
        assert!(service.snapshot().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout() {
        let fixture = Fixture::new();
        fixture.backend.set_select_delay(Some(Duration::from_secs(60)));
        let service = fixture.service_with(
            TaskScope::All,
            SyncSettings {
                fetch_timeout: Duration::from_secs(5),
                ..SyncSettings::default()
            },
        );

        let err = service.get_data(false).await.unwrap_err();

        assert_eq!(err, SyncError::Timeout(Duration::from_secs(5)));
        assert_eq!(service.state(), SyncState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_board_is_stale_and_refetched() {
        let fixture = Fixture::new();
        let service = fixture.service_with(
            TaskScope::All,
            SyncSettings {
                ttl: Duration::from_secs(10),
                ..SyncSettings::default()
            },
        );
        service.get_data(false).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(service.state(), SyncState::Stale);
        service.get_data(false).await.unwrap();
        assert_eq!(fixture.backend.select_calls(), 6);
        assert_eq!(service.state(), SyncState::Live);
    }

    #[tokio::test]
    async fn test_change_events_patch_without_refetch() {
        let fixture = Fixture::new();
        let service = fixture.service(TaskScope::All);
        service.get_data(false).await.unwrap();
        let seen = record(&service);
        let before = service.snapshot().data.unwrap().last_update;

        fixture
            .backend
            .update(TASKS_TABLE, fixture.tasks[0].id, json!({"title": "Plan v2"}))
            .await
            .unwrap();

        let board = service.snapshot().data.unwrap();
        assert_eq!(board.task(fixture.tasks[0].id).unwrap().title, "Plan v2");
        assert!(board.last_update >= before);
        assert_eq!(fixture.backend.select_calls(), 3);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], SyncNotification::Task(e) if e.before.is_some()));
    }

    #[tokio::test]
    async fn test_create_is_visible_once() {
        let fixture = Fixture::new();
        let service = fixture.service(TaskScope::All);
        service.get_data(false).await.unwrap();
        let seen = record(&service);
        // No change event arrives; the write's own response must be applied.
        fixture.backend.set_channel_state("tasks:all", ChannelState::Closed);

        let created = service
            .create_task(CreateTaskRequest::new(fixture.project.id, "Ship").with_points(3))
            .await
            .unwrap();

        let board = service.snapshot().data.unwrap();
        assert_eq!(board.tasks[0].id, created.id);
        assert_eq!(board.tasks.len(), 3);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_create_outside_scope_is_not_added() {
        let fixture = Fixture::new();
        let service = fixture.service(TaskScope::Project(fixture.project.id));
        service.get_data(false).await.unwrap();

        service
            .create_task(CreateTaskRequest::new(Uuid::new_v4(), "Foreign"))
            .await
            .unwrap();

        assert_eq!(service.snapshot().data.unwrap().tasks.len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let fixture = Fixture::new();
        let service = fixture.service(TaskScope::All);
        service.get_data(false).await.unwrap();
        let target = fixture.tasks[1].id;

        let updated = service
            .update_task(
                target,
                UpdateTaskRequest::new().with_status(tasksync_core::tasks::TaskStatus::Done),
            )
            .await
            .unwrap();
        assert_eq!(
            service.snapshot().data.unwrap().task(target),
            Some(&updated)
        );

        let deleted = service.delete_task(target).await.unwrap();
        assert_eq!(deleted.id, target);
        assert!(service.snapshot().data.unwrap().task(target).is_none());
    }

    #[tokio::test]
    async fn test_write_failures_leave_cache_untouched() {
        let fixture = Fixture::new();
        let service = fixture.service(TaskScope::All);
        let board = service.get_data(false).await.unwrap();

        let err = service
            .create_task(CreateTaskRequest::new(fixture.project.id, " "))
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::Validation(TaskError::EmptyTitle));

        let err = service.delete_task(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SyncError::Backend(BackendError::NotFound { .. })));

        assert_eq!(service.snapshot().data.unwrap().tasks, board.tasks);
    }

    #[tokio::test]
    async fn test_submission_event_recounts_only_that_task() {
        let fixture = Fixture::new();
        let service = fixture.service(TaskScope::All);
        service.get_data(false).await.unwrap();
        let seen = record(&service);
        let (first, second) = (fixture.tasks[0].id, fixture.tasks[1].id);

        fixture
            .backend
            .insert(
                SUBMISSIONS_TABLE,
                serde_json::to_value(Submission::new(second, "bo")).unwrap(),
            )
            .await
            .unwrap();
        settle().await;

        let board = service.snapshot().data.unwrap();
        assert_eq!(board.submission_count(second), 1);
        assert_eq!(board.submission_count(first), 1);
        assert_eq!(fixture.backend.count_calls(), 1);
        assert_eq!(
            *seen.lock(),
            vec![SyncNotification::SubmissionCount {
                task_id: second,
                count: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_task_moved_into_scope_gets_submission_count() {
        let fixture = Fixture::new();
        let other = Task::new(Uuid::new_v4(), "Elsewhere");
        fixture
            .backend
            .seed(TASKS_TABLE, vec![serde_json::to_value(&other).unwrap()]);
        fixture.backend.seed(
            SUBMISSIONS_TABLE,
            vec![
                serde_json::to_value(Submission::new(other.id, "ana")).unwrap(),
                serde_json::to_value(Submission::new(other.id, "bo")).unwrap(),
            ],
        );
        let service = fixture.service(TaskScope::Project(fixture.project.id));
        service.get_data(false).await.unwrap();
        assert!(service.snapshot().data.unwrap().task(other.id).is_none());

        fixture
            .backend
            .update(TASKS_TABLE, other.id, json!({"project_id": fixture.project.id}))
            .await
            .unwrap();
        settle().await;

        let patched = service.snapshot().data.unwrap();
        assert!(patched.task(other.id).is_some());
        assert_eq!(patched.submission_count(other.id), 2);

        let refetched = service.force_refresh().await.unwrap();
        assert_eq!(refetched.submission_count(other.id), 2);
    }

    #[tokio::test]
    async fn test_submission_for_unknown_task_is_ignored() {
        let fixture = Fixture::new();
        let service = fixture.service(TaskScope::All);
        service.get_data(false).await.unwrap();

        fixture
            .backend
            .insert(
                SUBMISSIONS_TABLE,
                serde_json::to_value(Submission::new(Uuid::new_v4(), "bo")).unwrap(),
            )
            .await
            .unwrap();
        settle().await;

        assert_eq!(fixture.backend.count_calls(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let fixture = Fixture::new();
        let service = fixture.service(TaskScope::All);
        let handle = service.subscribe(|_| {});

        assert_eq!(service.subscriber_count(), 1);
        assert!(handle.unsubscribe());
        assert_eq!(service.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent_and_next_read_resubscribes() {
        let fixture = Fixture::new();
        let service = fixture.service(TaskScope::All);
        service.get_data(false).await.unwrap();
        let seen = record(&service);

        service.cleanup();
        service.cleanup();

        assert_eq!(service.active_subscriptions(), 0);
        assert_eq!(service.subscriber_count(), 0);
        assert_eq!(fixture.dispatcher.subscription_count(), 0);
        assert_eq!(fixture.dispatcher.pool().stats().total_subscribers, 0);

        fixture
            .backend
            .update(TASKS_TABLE, fixture.tasks[0].id, json!({"title": "Unheard"}))
            .await
            .unwrap();
        assert!(seen.lock().is_empty());

        // The next read subscribes again and live patches resume.
        service.get_data(false).await.unwrap();
        assert_eq!(service.active_subscriptions(), 3);
        assert_eq!(fixture.dispatcher.subscription_count(), 3);

        fixture
            .backend
            .update(TASKS_TABLE, fixture.tasks[1].id, json!({"title": "Heard"}))
            .await
            .unwrap();
        let board = service.snapshot().data.unwrap();
        assert_eq!(board.task(fixture.tasks[1].id).unwrap().title, "Heard");
        assert_eq!(fixture.backend.select_calls(), 3);
    }

    #[tokio::test]
    async fn test_degraded_subscription_retried_on_read() {
        let fixture = Fixture::new();
        fixture
            .backend
            .fail_next_subscribe("projects", ChannelState::TimedOut);
        let service = fixture.service(TaskScope::All);

        service.get_data(false).await.unwrap();
        assert_eq!(service.active_subscriptions(), 2);

        // Cache hit, but the degraded subscription is re-attempted.
        service.get_data(false).await.unwrap();
        assert_eq!(service.active_subscriptions(), 3);
        assert_eq!(fixture.backend.select_calls(), 3);
    }

    #[test]
    fn test_count_submissions_ignores_unknown_tasks() {
        let task = Task::new(Uuid::new_v4(), "Counted");
        let rows = vec![
            json!({"task_id": task.id}),
            json!({"task_id": task.id}),
            json!({"task_id": Uuid::new_v4()}),
            json!({"task_id": "garbage"}),
        ];

        let counts = count_submissions(std::slice::from_ref(&task), &rows);

        assert_eq!(counts.len(), 1);
        assert_eq!(counts[&task.id], 2);
    }
}
