//! Worktree management for GitManager
//!
//! Contains methods for creating, listing, and removing worktrees

use git2::{BranchType, Error as GitError, Repository, Worktree, WorktreeAddOptions, WorktreePruneOptions};
use std::path::Path;

use crate::git::types::WorktreeInfo;
use crate::git::GitManager;

/// Name under `.git/worktrees/` for a branch. Slashes would create nested
/// directories there, which libgit2 refuses.
pub(crate) fn worktree_name_for(branch: &str) -> String {
    branch.replace('/', "-")
}

impl GitManager {
    /// Create a worktree at `path` checked out on `branch`.
    ///
    /// The branch is created from `base_branch` when it does not exist yet.
    pub fn create_worktree(
        &self,
        branch: &str,
        path: &Path,
        base_branch: &str,
    ) -> Result<WorktreeInfo, GitError> {
        if !self.branch_exists(branch) {
            self.create_branch_from(branch, base_branch)?;
        }

        let branch_ref = self.repo.find_branch(branch, BranchType::Local)?;

        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(branch_ref.get()));

        let worktree_name = worktree_name_for(branch);

        // A stale registration with the same name blocks `worktree add`
        if let Ok(stale) = self.repo.find_worktree(&worktree_name) {
            if !stale.path().exists() {
                stale.prune(None)?;
            }
        }

        let worktree = self.repo.worktree(&worktree_name, path, Some(&opts))?;

        self.worktree_to_info(&worktree)
    }

    /// List all worktrees
    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, GitError> {
        let worktrees = self.repo.worktrees()?;

        let mut result = Vec::new();
        for name in worktrees.iter().flatten() {
            if let Ok(worktree) = self.repo.find_worktree(name) {
                result.push(self.worktree_to_info(&worktree)?);
            }
        }

        Ok(result)
    }

    /// Remove the worktree registered at `path`, deleting its working tree.
    ///
    /// Returns `Ok(false)` when no worktree is registered at that path.
    pub fn remove_worktree(&self, path: &Path) -> Result<bool, GitError> {
        let wanted = path.to_string_lossy();
        let wanted = wanted.trim_end_matches('/');

        let worktrees = self.repo.worktrees()?;
        for name in worktrees.iter().flatten() {
            let worktree = match self.repo.find_worktree(name) {
                Ok(wt) => wt,
                Err(_) => continue,
            };
            let wt_path = worktree.path().to_string_lossy().to_string();
            if wt_path.trim_end_matches('/') != wanted {
                continue;
            }

            let mut opts = WorktreePruneOptions::new();
            opts.valid(true).locked(false).working_tree(true);
            worktree.prune(Some(&mut opts))?;
            return Ok(true);
        }

        Ok(false)
    }

    /// Prune orphaned worktrees (where the physical directory no longer exists)
    /// This cleans up stale entries in .git/worktrees/
    pub fn prune_orphaned_worktrees(&self) -> Result<u32, GitError> {
        let worktrees = self.repo.worktrees()?;
        let mut pruned_count = 0;

        for name in worktrees.iter().flatten() {
            if let Ok(worktree) = self.repo.find_worktree(name) {
                if worktree.path().exists() {
                    continue;
                }
                log::info!(
                    "[Git] Pruning orphaned worktree '{}' (path {:?} no longer exists)",
                    name,
                    worktree.path()
                );
                match worktree.prune(None) {
                    Ok(()) => pruned_count += 1,
                    Err(e) => log::warn!("[Git] Failed to prune worktree '{}': {}", name, e),
                }
            }
        }

        Ok(pruned_count)
    }

    /// Convert a Worktree to WorktreeInfo
    pub(crate) fn worktree_to_info(&self, worktree: &Worktree) -> Result<WorktreeInfo, GitError> {
        let name = worktree.name().unwrap_or("").to_string();
        let path = worktree.path().to_string_lossy().to_string();
        let is_locked = worktree
            .is_locked()
            .map(|status| !matches!(status, git2::WorktreeLockStatus::Unlocked))
            .unwrap_or(false);

        let branch = Repository::open(worktree.path())
            .ok()
            .and_then(|wt_repo| {
                let head = wt_repo.head().ok()?;
                if head.is_branch() {
                    head.shorthand().map(|s| s.to_string())
                } else {
                    None
                }
            });

        Ok(WorktreeInfo {
            name,
            path,
            branch,
            is_locked,
        })
    }
}
