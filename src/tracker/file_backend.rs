//! JSON kanban stored in `.fleet/tasks.json`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::TaskBackend;
use crate::error::{OrchestratorError, Result};
use crate::file_storage::{read_json_or_default, with_file_lock, write_json};
use crate::models::state_machine::transition_state;
use crate::models::{Project, Task, TaskStatus};

/// A task row as stored on disk. Status is kept as free text so hand-edited
/// boards with other spellings (`In Progress`, `backlog`, ...) still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTask {
    pub id: String,
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub file_paths: Vec<String>,
}

fn default_status() -> String {
    TaskStatus::Todo.as_str().to_string()
}

impl StoredTask {
    fn status(&self) -> Option<TaskStatus> {
        TaskStatus::normalize(&self.status)
    }

    fn to_task(&self) -> Option<Task> {
        let status = match self.status() {
            Some(status) => status,
            None => {
                log::warn!(
                    "[FileTaskBackend] Skipping task {} with unknown status '{}'",
                    self.id,
                    self.status
                );
                return None;
            }
        };
        Some(
            Task {
                id: self.id.clone(),
                title: self.title.clone(),
                description: self.description.clone(),
                status,
                branch_name: self.branch_name.clone(),
                scope: self.scope.clone(),
                file_paths: self.file_paths.clone(),
            }
            .normalized(),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanbanFile {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub tasks: Vec<StoredTask>,
}

pub struct FileTaskBackend {
    path: PathBuf,
}

impl FileTaskBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Board at `<repo>/.fleet/tasks.json`
    pub fn for_repo(repo_root: &Path) -> Self {
        Self::new(crate::utils::fleet_dir(repo_root).join("tasks.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<KanbanFile> {
        read_json_or_default(&self.path).map_err(OrchestratorError::Tracker)
    }

    pub fn save(&self, board: &KanbanFile) -> Result<()> {
        with_file_lock(&self.path, || write_json(&self.path, board))
            .map_err(OrchestratorError::Tracker)
    }
}

#[async_trait]
impl TaskBackend for FileTaskBackend {
    fn name(&self) -> &str {
        "file"
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.load()?.projects)
    }

    async fn list_tasks(&self, project_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let board = self.load()?;
        Ok(board
            .tasks
            .iter()
            .filter(|t| t.project_id == project_id)
            .filter_map(StoredTask::to_task)
            .filter(|t| status.map_or(true, |s| t.status == s))
            .collect())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let task_id = task_id.trim();
        Ok(self
            .load()?
            .tasks
            .iter()
            .find(|t| t.id.trim() == task_id)
            .and_then(StoredTask::to_task))
    }

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<Task> {
        let task_id = task_id.trim();
        let mut transition_error = None;

        let updated = with_file_lock(&self.path, || {
            let mut board: KanbanFile = read_json_or_default(&self.path)?;
            let stored = board
                .tasks
                .iter_mut()
                .find(|t| t.id.trim() == task_id)
                .ok_or_else(|| format!("Task not found: {}", task_id))?;

            let current = stored.status().unwrap_or_default();
            if let Err(e) = transition_state(current, status) {
                let message = e.to_string();
                transition_error = Some(e);
                return Err(message);
            }

            stored.status = status.as_str().to_string();
            let task = stored
                .to_task()
                .ok_or_else(|| format!("Task {} could not be read back", task_id))?;
            write_json(&self.path, &board)?;
            Ok(task)
        });

        match (updated, transition_error) {
            (Ok(task), _) => {
                log::debug!("[FileTaskBackend] {} -> {}", task_id, status);
                Ok(task)
            }
            (Err(_), Some(e)) => Err(e.into()),
            (Err(e), None) => Err(OrchestratorError::Tracker(e)),
        }
    }
}
