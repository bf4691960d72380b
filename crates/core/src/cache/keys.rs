use uuid::Uuid;

use crate::tasks::TaskScope;

/// Returns the cache key for the task board of a scope.
pub fn task_board_key(scope: TaskScope) -> String {
    match scope {
        TaskScope::All => "tasks:board:all".to_string(),
        TaskScope::Project(project_id) => format!("tasks:board:project:{}", project_id),
    }
}

/// Returns the regex matching every task board key, whatever its scope.
///
/// Used when a write must drop all derived board views at once.
pub fn task_board_pattern() -> &'static str {
    r"^tasks:board:"
}

/// Returns the realtime channel name carrying task changes for a scope.
pub fn tasks_channel(scope: TaskScope) -> String {
    match scope {
        TaskScope::All => "tasks:all".to_string(),
        TaskScope::Project(project_id) => format!("tasks:project:{}", project_id),
    }
}

/// Returns the realtime channel name for a single task.
pub fn task_channel(task_id: Uuid) -> String {
    format!("task:{}", task_id)
}

/// Returns the realtime channel name carrying project changes.
pub fn projects_channel() -> String {
    "projects".to_string()
}

/// Returns the realtime channel name carrying submission changes.
pub fn submissions_channel(task_id: Option<Uuid>) -> String {
    match task_id {
        Some(task_id) => format!("submissions:task:{}", task_id),
        None => "submissions:all".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn test_uuid() -> Uuid {
        Uuid::nil()
    }

    #[test]
    fn test_task_board_key() {
        assert_eq!(task_board_key(TaskScope::All), "tasks:board:all");
        assert_eq!(
            task_board_key(TaskScope::Project(test_uuid())),
            "tasks:board:project:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_task_board_pattern_matches_every_scope() {
        let pattern = Regex::new(task_board_pattern()).unwrap();

        assert!(pattern.is_match(&task_board_key(TaskScope::All)));
        assert!(pattern.is_match(&task_board_key(TaskScope::Project(test_uuid()))));
        assert!(!pattern.is_match(&tasks_channel(TaskScope::All)));
        assert!(!pattern.is_match("task:board:all"));
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(tasks_channel(TaskScope::All), "tasks:all");
        assert_eq!(
            tasks_channel(TaskScope::Project(test_uuid())),
            "tasks:project:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(projects_channel(), "projects");
        assert_eq!(submissions_channel(None), "submissions:all");
        assert_eq!(
            submissions_channel(Some(test_uuid())),
            "submissions:task:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            task_channel(test_uuid()),
            "task:00000000-0000-0000-0000-000000000000"
        );
    }
}
