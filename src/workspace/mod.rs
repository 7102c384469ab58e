//! Isolated workspaces
//!
//! Every running task gets its own working copy. The executor depends only on
//! `WorkspaceManager`; `GitWorktreeManager` is the bundled implementation.

mod worktree_pool;

pub use worktree_pool::GitWorktreeManager;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Who is acquiring and what the branch should start from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireOptions {
    pub owner: String,
    pub base_branch: String,
}

/// An acquired working copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub path: PathBuf,
    pub branch: String,
}

impl Workspace {
    /// A usable workspace has a non-empty path pointing at a directory
    pub fn is_valid(&self) -> bool {
        !self.path.as_os_str().is_empty() && self.path.is_dir()
    }
}

#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    /// Create (or reuse) the working copy for `task_id` on `branch`
    async fn acquire_worktree(
        &self,
        branch: &str,
        task_id: &str,
        options: &AcquireOptions,
    ) -> Result<Workspace>;

    /// Remove the working copy for `task_id`. Releasing an unknown task is a no-op.
    async fn release_worktree(&self, task_id: &str) -> Result<()>;
}
