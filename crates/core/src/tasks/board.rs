//! The task board: the composed view a sync service caches.
//!
//! Every mutation here is a set-by-id operation, so applying the same change
//! twice, or applying a write's response and then its change notification,
//! leaves the board exactly as applying it once would.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::realtime::{ChangeEvent, ChangeKind};

use super::types::{Project, Task, TaskScope, TaskSummary};

/// Projects, tasks, and per-task submission totals for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBoard {
    pub projects: Vec<Project>,
    /// Tasks ordered newest first by `created_at`.
    pub tasks: Vec<Task>,
    pub submission_counts: HashMap<Uuid, usize>,
    pub last_update: DateTime<Utc>,
}

impl TaskBoard {
    /// Merges freshly fetched rows into a board.
    pub fn build(
        mut projects: Vec<Project>,
        mut tasks: Vec<Task>,
        submission_counts: HashMap<Uuid, usize>,
    ) -> Self {
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self {
            projects,
            tasks,
            submission_counts,
            last_update: Utc::now(),
        }
    }

    /// Looks up a task by id.
    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Looks up a project by id.
    pub fn project(&self, id: Uuid) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    /// Submission total for a task, zero when unknown.
    pub fn submission_count(&self, task_id: Uuid) -> usize {
        self.submission_counts.get(&task_id).copied().unwrap_or(0)
    }

    /// Advances `last_update`, never moving it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_update {
            self.last_update = now;
        }
    }

    /// Replaces a task by id, or inserts it keeping newest-first order.
    pub fn upsert_task(&mut self, task: Task) {
        if let Some(existing) = self.tasks.iter_mut().find(|t| t.id == task.id) {
            *existing = task;
            return;
        }
        let position = self
            .tasks
            .iter()
            .position(|t| t.created_at < task.created_at)
            .unwrap_or(self.tasks.len());
        self.tasks.insert(position, task);
    }

    /// Removes a task and its submission total. Returns the removed task.
    pub fn remove_task(&mut self, id: Uuid) -> Option<Task> {
        let position = self.tasks.iter().position(|t| t.id == id)?;
        self.submission_counts.remove(&id);
        Some(self.tasks.remove(position))
    }

    /// Replaces a project by id, or inserts it keeping name order.
    pub fn upsert_project(&mut self, project: Project) {
        if let Some(existing) = self.projects.iter_mut().find(|p| p.id == project.id) {
            *existing = project;
            return;
        }
        let position = self
            .projects
            .iter()
            .position(|p| p.name > project.name)
            .unwrap_or(self.projects.len());
        self.projects.insert(position, project);
    }

    /// Removes a project. Its tasks are left for their own delete events.
    pub fn remove_project(&mut self, id: Uuid) -> Option<Project> {
        let position = self.projects.iter().position(|p| p.id == id)?;
        Some(self.projects.remove(position))
    }

    /// Sets a task's submission total.
    pub fn set_submission_count(&mut self, task_id: Uuid, count: usize) {
        self.submission_counts.insert(task_id, count);
    }

    /// Applies a task change for a board covering `scope`.
    ///
    /// An update that moves a task out of scope removes it; one that moves a
    /// task into scope adds it. Returns true if the board changed.
    pub fn apply_task_change(&mut self, event: &ChangeEvent<Task>, scope: TaskScope) -> bool {
        let before = self.tasks.clone();
        match event.kind {
            ChangeKind::Inserted | ChangeKind::Updated => {
                if let Some(task) = &event.after {
                    if scope.contains(task) {
                        self.upsert_task(task.clone());
                    } else {
                        self.remove_task(task.id);
                    }
                }
            }
            ChangeKind::Deleted => {
                if let Some(task) = &event.before {
                    self.remove_task(task.id);
                }
            }
        }
        self.tasks != before
    }

    /// Applies a project change. Returns true if the board changed.
    pub fn apply_project_change(&mut self, event: &ChangeEvent<Project>) -> bool {
        let before = self.projects.clone();
        match event.kind {
            ChangeKind::Inserted | ChangeKind::Updated => {
                if let Some(project) = &event.after {
                    self.upsert_project(project.clone());
                }
            }
            ChangeKind::Deleted => {
                if let Some(project) = &event.before {
                    self.remove_project(project.id);
                }
            }
        }
        self.projects != before
    }

    /// Joins tasks with their project names and submission totals.
    pub fn summaries(&self) -> Vec<TaskSummary> {
        let names: HashMap<Uuid, &str> = self
            .projects
            .iter()
            .map(|p| (p.id, p.name.as_str()))
            .collect();

        self.tasks
            .iter()
            .map(|task| TaskSummary {
                task: task.clone(),
                project_name: names.get(&task.project_id).map(|n| n.to_string()),
                submission_count: self.submission_count(task.id),
            })
            .collect()
    }
}
