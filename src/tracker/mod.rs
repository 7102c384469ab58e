//! Task-tracking backends
//!
//! The orchestration core only talks to `TaskBackend`. Each backend maps its
//! own status vocabulary onto `TaskStatus` before handing tasks over.

mod file_backend;

pub use file_backend::{FileTaskBackend, KanbanFile};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Project, Task, TaskCounts, TaskStatus};

#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Tasks of a project, optionally restricted to one status, in board order
    async fn list_tasks(&self, project_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>>;

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<Task>;

    /// Pipeline counters used for maintenance-mode detection.
    ///
    /// Backends without a separate planning queue report `backlog_remaining = 0`.
    async fn count_tasks(&self, project_id: &str) -> Result<TaskCounts> {
        let tasks = self.list_tasks(project_id, None).await?;
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        Ok(TaskCounts {
            backlog_remaining: 0,
            todo: count(TaskStatus::Todo),
            running: count(TaskStatus::InProgress),
            review: count(TaskStatus::InReview),
        })
    }
}
