//! Worktree pool backing `WorkspaceManager`
//!
//! One git worktree per task under `<repo>/.worktrees/tasks/<task>`.
//! Branches outlive their worktrees: releasing removes the checkout only, so
//! a later attempt on the same task picks up whatever was committed before.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{AcquireOptions, Workspace, WorkspaceManager};
use crate::error::{OrchestratorError, Result};
use crate::git::GitManager;
use crate::utils::{lock_mutex_recover, sanitize_path_component, worktrees_dir};

/// Information about an allocated worktree
#[derive(Debug, Clone)]
struct WorktreeAllocation {
    path: PathBuf,
    branch_name: String,
    owner: String,
}

pub struct GitWorktreeManager {
    /// Path to the main checkout
    project_path: PathBuf,
    /// Currently active worktrees (task_id -> allocation)
    active: Arc<Mutex<HashMap<String, WorktreeAllocation>>>,
}

impl GitWorktreeManager {
    pub fn new(project_path: &Path) -> Self {
        Self {
            project_path: project_path.to_path_buf(),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Where the worktree for `task_id` lives
    pub fn worktree_path(&self, task_id: &str) -> PathBuf {
        worktrees_dir(&self.project_path).join(sanitize_path_component(task_id.trim()))
    }

    pub fn active_count(&self) -> usize {
        lock_mutex_recover(&self.active).len()
    }

    fn create_blocking(
        project_path: &Path,
        worktree_path: &Path,
        branch: &str,
        base_branch: &str,
    ) -> std::result::Result<(), String> {
        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create worktree directory: {}", e))?;
        }

        let git_manager = GitManager::new(project_path)
            .map_err(|e| format!("Failed to open git repository: {}", e))?;

        if let Err(e) = git_manager.prune_orphaned_worktrees() {
            log::warn!("[WorktreePool] Failed to prune orphaned worktrees: {}", e);
        }

        // Left behind by a previous process that did not release it
        if worktree_path.join(".git").exists() {
            log::info!(
                "[WorktreePool] Reusing existing worktree at {:?}",
                worktree_path
            );
            return Ok(());
        }

        if worktree_path.exists() {
            log::warn!(
                "[WorktreePool] Removing invalid worktree at {:?}",
                worktree_path
            );
            if let Err(e) = std::fs::remove_dir_all(worktree_path) {
                log::warn!("[WorktreePool] Failed to remove stale directory: {}", e);
            }
        }

        git_manager
            .create_worktree(branch, worktree_path, base_branch)
            .map_err(|e| format!("Failed to create worktree: {}", e))?;

        Ok(())
    }

    fn remove_blocking(project_path: &Path, worktree_path: &Path) -> std::result::Result<(), String> {
        let git_manager = GitManager::new(project_path)
            .map_err(|e| format!("Failed to open git repository: {}", e))?;

        match git_manager.remove_worktree(worktree_path) {
            Ok(true) => {}
            Ok(false) => log::debug!(
                "[WorktreePool] No registered worktree at {:?}",
                worktree_path
            ),
            Err(e) => log::warn!("[WorktreePool] Failed to remove worktree from git: {}", e),
        }

        if worktree_path.exists() {
            std::fs::remove_dir_all(worktree_path)
                .map_err(|e| format!("Failed to remove worktree directory: {}", e))?;
        }

        Ok(())
    }
}

#[async_trait]
impl WorkspaceManager for GitWorktreeManager {
    async fn acquire_worktree(
        &self,
        branch: &str,
        task_id: &str,
        options: &AcquireOptions,
    ) -> Result<Workspace> {
        if let Some(existing) = lock_mutex_recover(&self.active).get(task_id) {
            return Ok(Workspace {
                path: existing.path.clone(),
                branch: existing.branch_name.clone(),
            });
        }

        let project_path = self.project_path.clone();
        let worktree_path = self.worktree_path(task_id);
        let branch_name = branch.to_string();
        let base_branch = options.base_branch.clone();

        {
            let worktree_path = worktree_path.clone();
            let branch_name = branch_name.clone();
            tokio::task::spawn_blocking(move || {
                Self::create_blocking(&project_path, &worktree_path, &branch_name, &base_branch)
            })
            .await
            .map_err(|e| OrchestratorError::Workspace(format!("worktree creation panicked: {}", e)))?
            .map_err(OrchestratorError::Workspace)?;
        }

        log::info!(
            "[WorktreePool] Created worktree for task {} at {:?} on branch {} (owner {})",
            task_id,
            worktree_path,
            branch_name,
            options.owner
        );

        lock_mutex_recover(&self.active).insert(
            task_id.to_string(),
            WorktreeAllocation {
                path: worktree_path.clone(),
                branch_name: branch_name.clone(),
                owner: options.owner.clone(),
            },
        );

        Ok(Workspace {
            path: worktree_path,
            branch: branch_name,
        })
    }

    async fn release_worktree(&self, task_id: &str) -> Result<()> {
        let allocation = lock_mutex_recover(&self.active).remove(task_id);
        let worktree_path = match &allocation {
            Some(a) => a.path.clone(),
            None => self.worktree_path(task_id),
        };

        if allocation.is_none() && !worktree_path.exists() {
            return Ok(());
        }

        let project_path = self.project_path.clone();
        let path_for_removal = worktree_path.clone();
        tokio::task::spawn_blocking(move || Self::remove_blocking(&project_path, &path_for_removal))
            .await
            .map_err(|e| OrchestratorError::Workspace(format!("worktree removal panicked: {}", e)))?
            .map_err(OrchestratorError::Workspace)?;

        if let Some(a) = allocation {
            log::info!(
                "[WorktreePool] Released worktree for task {} ({}, owner {})",
                task_id,
                a.branch_name,
                a.owner
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature};
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, String) {
        let temp_dir = TempDir::new().unwrap();
        let repo = Repository::init(temp_dir.path()).unwrap();
        let sig = Signature::now("Test User", "test@example.com").unwrap();
        std::fs::write(temp_dir.path().join("README.md"), "# test").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .unwrap();
        let base = GitManager::new(temp_dir.path())
            .unwrap()
            .get_default_branch_name();
        (temp_dir, base)
    }

    fn options(base: &str) -> AcquireOptions {
        AcquireOptions {
            owner: "instance-1".to_string(),
            base_branch: base.to_string(),
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (temp_dir, base) = setup_repo();
        let manager = GitWorktreeManager::new(temp_dir.path());

        let workspace = manager
            .acquire_worktree("task/abc-do-it", "abc", &options(&base))
            .await
            .unwrap();
        assert!(workspace.is_valid());
        assert!(workspace.path.join("README.md").exists());
        assert_eq!(workspace.path, manager.worktree_path("abc"));
        assert_eq!(manager.active_count(), 1);

        // Second acquire returns the same allocation
        let again = manager
            .acquire_worktree("task/abc-do-it", "abc", &options(&base))
            .await
            .unwrap();
        assert_eq!(again, workspace);

        manager.release_worktree("abc").await.unwrap();
        assert!(!workspace.path.exists());
        assert_eq!(manager.active_count(), 0);

        // The branch survives the release
        let git = GitManager::new(temp_dir.path()).unwrap();
        assert!(git.branch_exists("task/abc-do-it"));
    }

    #[tokio::test]
    async fn test_reacquire_after_release() {
        let (temp_dir, base) = setup_repo();
        let manager = GitWorktreeManager::new(temp_dir.path());

        manager
            .acquire_worktree("task/t1", "t1", &options(&base))
            .await
            .unwrap();
        manager.release_worktree("t1").await.unwrap();

        let workspace = manager
            .acquire_worktree("task/t1", "t1", &options(&base))
            .await
            .unwrap();
        assert!(workspace.is_valid());
    }

    #[tokio::test]
    async fn test_release_unknown_task_is_noop() {
        let (temp_dir, _base) = setup_repo();
        let manager = GitWorktreeManager::new(temp_dir.path());
        manager.release_worktree("never-acquired").await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_outside_repository_fails() {
        let temp_dir = TempDir::new().unwrap();
        let manager = GitWorktreeManager::new(temp_dir.path());
        let err = manager
            .acquire_worktree("task/x", "x", &options("main"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Workspace(_)));
    }
}
