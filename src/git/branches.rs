//! Branch operations for GitManager
//!
//! Task branches are created from the base branch and never deleted here

use git2::{Branch, BranchType, Error as GitError, Signature};

use crate::git::types::BranchInfo;
use crate::git::GitManager;

impl GitManager {
    /// Create a new branch from the current HEAD
    pub fn create_branch(&self, name: &str, force: bool) -> Result<BranchInfo, GitError> {
        // Try to get HEAD, handle unborn branch case
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => {
                log::info!("[GitManager] No commits found, creating initial commit");
                self.create_initial_commit()?;
                self.repo.head()?
            }
            Err(e) => return Err(e),
        };

        let head_commit = head.peel_to_commit()?;
        let branch = self.repo.branch(name, &head_commit, force)?;

        self.branch_to_info(&branch)
    }

    /// Create a new branch starting at `base`.
    ///
    /// `base` is resolved as a local branch first, then as `origin/<base>`,
    /// and finally falls back to HEAD.
    pub fn create_branch_from(&self, name: &str, base: &str) -> Result<BranchInfo, GitError> {
        let base_commit = self
            .repo
            .find_branch(base, BranchType::Local)
            .or_else(|_| {
                self.repo
                    .find_branch(&format!("origin/{}", base), BranchType::Remote)
            })
            .and_then(|b| b.get().peel_to_commit());

        match base_commit {
            Ok(commit) => {
                let branch = self.repo.branch(name, &commit, false)?;
                self.branch_to_info(&branch)
            }
            Err(e) => {
                log::debug!(
                    "[GitManager] Base branch '{}' not found ({}), branching from HEAD",
                    base,
                    e
                );
                self.create_branch(name, false)
            }
        }
    }

    /// Create an initial empty commit for a new repository
    pub(crate) fn create_initial_commit(&self) -> Result<(), GitError> {
        let tree_id = self.repo.index()?.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let signature = self
            .repo
            .signature()
            .or_else(|_| Signature::now("Fleet Orchestrator", "fleet@example.com"))?;

        self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            "Initial commit (created by fleet-orchestrator)",
            &tree,
            &[],
        )?;

        log::info!("[GitManager] Created initial commit");
        Ok(())
    }

    /// Check whether a local branch exists
    pub fn branch_exists(&self, name: &str) -> bool {
        self.repo.find_branch(name, BranchType::Local).is_ok()
    }

    /// Convert a Branch to BranchInfo
    pub(crate) fn branch_to_info(&self, branch: &Branch) -> Result<BranchInfo, GitError> {
        let name = branch.name()?.unwrap_or("").to_string();
        let is_head = branch.is_head();
        let upstream = branch
            .upstream()
            .ok()
            .and_then(|b| b.name().ok().flatten().map(|s| s.to_string()));

        let commit = branch.get().peel_to_commit()?;
        let commit_id = commit.id().to_string();

        Ok(BranchInfo {
            name,
            is_head,
            upstream,
            commit_id,
        })
    }

    /// Get the default branch name for this repository.
    ///
    /// Resolution order:
    /// 1. Current HEAD branch (if HEAD points to a branch)
    /// 2. First existing common default branch ("main", "master")
    /// 3. Fallback to "main"
    pub fn get_default_branch_name(&self) -> String {
        if let Ok(head) = self.repo.head() {
            if head.is_branch() {
                if let Some(name) = head.shorthand() {
                    return name.to_string();
                }
            }
        }

        for name in &["main", "master"] {
            if self.repo.find_branch(name, BranchType::Local).is_ok() {
                return (*name).to_string();
            }
        }

        "main".to_string()
    }
}
