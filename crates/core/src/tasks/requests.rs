//! Write request types for task operations.
//!
//! Pure data types: validation and conversion into backend rows happen here,
//! the actual write happens in the sync service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::TaskError;
use super::types::{Task, TaskStatus};

const MAX_TITLE_LEN: usize = 200;

fn validate_title(title: &str) -> Result<(), TaskError> {
    if title.trim().is_empty() {
        return Err(TaskError::EmptyTitle);
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(TaskError::TitleTooLong);
    }
    Ok(())
}

/// Request payload for creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub project_id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
}

impl CreateTaskRequest {
    /// Create a new request with the required fields.
    pub fn new(project_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            project_id,
            title: title.into(),
            description: None,
            status: None,
            points: None,
        }
    }

    /// Set the task description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the initial status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the point value.
    pub fn with_points(mut self, points: u32) -> Self {
        self.points = Some(points);
        self
    }

    /// Validates the request.
    pub fn validate(&self) -> Result<(), TaskError> {
        validate_title(&self.title)
    }

    /// Convert into a task stamped at `now`.
    pub fn into_task(self, now: DateTime<Utc>) -> Task {
        let mut task = Task::new(self.project_id, self.title).with_created_at(now);
        task.description = self.description;
        task.status = self.status.unwrap_or_default();
        task.points = self.points.unwrap_or(0);
        task
    }
}

/// Request payload for a partial task update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
}

impl UpdateTaskRequest {
    /// Create an empty update request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the task description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the task status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the point value.
    pub fn with_points(mut self, points: u32) -> Self {
        self.points = Some(points);
        self
    }

    /// Validates the request.
    pub fn validate(&self) -> Result<(), TaskError> {
        if *self == Self::default() {
            return Err(TaskError::EmptyUpdate);
        }
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        Ok(())
    }

    /// Convert into a backend patch, stamping `updated_at`.
    pub fn into_patch(self, now: DateTime<Utc>) -> Value {
        let mut patch = serde_json::to_value(&self).unwrap_or_else(|_| Value::Object(Default::default()));
        if let Some(object) = patch.as_object_mut() {
            object.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));
        }
        patch
    }
}
