mod board;
mod error;
mod requests;
mod types;

pub use board::TaskBoard;
pub use error::TaskError;
pub use requests::{CreateTaskRequest, UpdateTaskRequest};
pub use types::{
    Project, Submission, Task, TaskScope, TaskStatus, TaskSummary, PROJECTS_TABLE,
    SUBMISSIONS_TABLE, TASKS_TABLE,
};
