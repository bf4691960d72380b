use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tasksync::backend::InMemoryBackend;
use tasksync::{Config, Services, SyncNotification};
use tasksync_core::backend::QueryBackend;
use tasksync_core::tasks::{
    CreateTaskRequest, Project, Submission, Task, TaskScope, TaskStatus, UpdateTaskRequest,
    PROJECTS_TABLE, SUBMISSIONS_TABLE, TASKS_TABLE,
};

/// TaskSync - Keep a task board in sync with its backend
#[derive(Parser, Debug)]
#[command(name = "tasksync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Name of the demo project to seed
    #[arg(long, short, default_value = "Launch", env = "TASKSYNC_PROJECT")]
    project: String,

    /// Number of tasks to seed
    #[arg(long, short, default_value = "3", env = "TASKSYNC_TASKS")]
    tasks: usize,
}

/// Seeds a project with `count` tasks, oldest first.
fn seed(backend: &InMemoryBackend, name: &str, count: usize) -> Result<Project> {
    let project = Project::new(name);
    backend.seed(PROJECTS_TABLE, [serde_json::to_value(&project)?]);

    let now = Utc::now();
    let mut rows = Vec::with_capacity(count);
    for i in 0..count {
        let age = chrono::Duration::minutes((count - i) as i64);
        let task = Task::new(project.id, format!("Task {}", i + 1)).with_created_at(now - age);
        rows.push(serde_json::to_value(&task)?);
    }
    backend.seed(TASKS_TABLE, rows);
    backend.create_table(SUBMISSIONS_TABLE);

    Ok(project)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tasksync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let backend = Arc::new(InMemoryBackend::new());
    let project = seed(&backend, &cli.project, cli.tasks)?;

    let services = Services::init(Config::from_env(), backend.clone()).await;
    let sync = services.task_sync(TaskScope::Project(project.id));

    let _notifications = sync.subscribe(|notification| match notification {
        SyncNotification::Task(event) => {
            tracing::info!(kind = ?event.kind, title = ?event.row().map(|t| &t.title), "Task changed")
        }
        SyncNotification::Project(event) => {
            tracing::info!(kind = ?event.kind, "Project changed")
        }
        SyncNotification::SubmissionCount { task_id, count } => {
            tracing::info!(%task_id, count, "Submission count changed")
        }
        SyncNotification::Refreshed => tracing::info!("Board refreshed"),
    });

    let board = sync.get_data(false).await?;
    tracing::info!(tasks = board.tasks.len(), "Initial board loaded");

    let created = sync
        .create_task(CreateTaskRequest::new(project.id, "Write release notes").with_points(2))
        .await?;
    sync.update_task(
        created.id,
        UpdateTaskRequest::new().with_status(TaskStatus::InProgress),
    )
    .await?;

    backend
        .insert(
            SUBMISSIONS_TABLE,
            serde_json::to_value(Submission::new(created.id, "demo"))?,
        )
        .await?;
    backend
        .update(PROJECTS_TABLE, project.id, json!({"description": "Demo project"}))
        .await?;
    // Let the submission recount land.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let board = sync.get_data(false).await?;
    for summary in board.summaries() {
        println!("{}", serde_json::to_string(&summary)?);
    }

    sync.cleanup();
    services.destroy();
    Ok(())
}
