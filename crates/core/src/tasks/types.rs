use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::RowFilter;

/// Table holding [`Project`] rows.
pub const PROJECTS_TABLE: &str = "projects";
/// Table holding [`Task`] rows.
pub const TASKS_TABLE: &str = "tasks";
/// Table holding [`Submission`] rows.
pub const SUBMISSIONS_TABLE: &str = "submissions";

/// A project grouping related tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Creates a new project with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            created_at: Utc::now(),
        }
    }

    /// Sets the description for this project.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets a specific ID for this project (useful for testing).
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Sets the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Progress of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

/// A unit of work belonging to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub points: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a new open task in a project.
    pub fn new(project_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            title: title.into(),
            description: None,
            status: TaskStatus::Todo,
            points: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description for this task.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the status for this task.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the point value for this task.
    pub fn with_points(mut self, points: u32) -> Self {
        self.points = points;
        self
    }

    /// Sets a specific ID for this task (useful for testing).
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Sets both timestamps, as for a freshly created row.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }
}

/// A submission made against a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub task_id: Uuid,
    pub submitted_by: String,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Creates a new submission for a task.
    pub fn new(task_id: Uuid, submitted_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            submitted_by: submitted_by.into(),
            created_at: Utc::now(),
        }
    }
}

/// Which tasks a board covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskScope {
    #[default]
    All,
    Project(Uuid),
}

impl TaskScope {
    /// Returns true if `task` belongs to this scope.
    pub fn contains(&self, task: &Task) -> bool {
        match self {
            TaskScope::All => true,
            TaskScope::Project(project_id) => task.project_id == *project_id,
        }
    }

    /// Row filter selecting this scope's tasks, if any narrowing applies.
    pub fn task_filter(&self) -> Option<RowFilter> {
        match self {
            TaskScope::All => None,
            TaskScope::Project(project_id) => Some(RowFilter::eq("project_id", project_id)),
        }
    }

    /// The project ID when project scoped.
    pub fn project_id(&self) -> Option<Uuid> {
        match self {
            TaskScope::All => None,
            TaskScope::Project(project_id) => Some(*project_id),
        }
    }
}

/// A task joined with its project name and submission total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub task: Task,
    pub project_name: Option<String>,
    pub submission_count: usize,
}
