//! Shell-driven forge operations (push, pull requests, auto-merge)
//!
//! Everything here is best-effort from the executor's point of view: a failed
//! push or PR creation is logged and never blocks the `inreview` transition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{OrchestratorError, Result};
use crate::git::GitManager;

/// How a push went
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PushOutcome {
    /// Mainline merged cleanly (or was already contained) and the branch was pushed
    Pushed,
    /// Merging mainline conflicted; the merge was aborted and the branch pushed as-is
    PushedWithConflicts,
}

/// Pull request to open for a finished task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestSpec {
    pub branch: String,
    pub base_branch: String,
    pub title: String,
    pub body: String,
}

/// Version-control operations the executor consumes
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Whether the workspace has commits that are not present upstream
    async fn has_new_commits(&self, workspace: &Path, base_branch: &str) -> Result<bool>;

    /// Merge the latest mainline into `branch` and push it
    async fn push_branch(&self, workspace: &Path, branch: &str, base_branch: &str)
        -> Result<PushOutcome>;

    /// Open a pull request, returning its URL
    async fn create_pull_request(&self, workspace: &Path, pr: &PullRequestSpec) -> Result<String>;

    /// Enable merge-when-green on the pull request for `branch`
    async fn enable_auto_merge(&self, workspace: &Path, branch: &str) -> Result<()>;
}

/// `VersionControl` backed by git2 for inspection and the `git`/`gh` CLIs
/// for anything that talks to the remote.
pub struct GitCliForge {
    gh_path: Option<PathBuf>,
}

impl GitCliForge {
    pub fn new() -> Self {
        let gh_path = which::which("gh").ok();
        if gh_path.is_none() {
            log::warn!("[GitForge] `gh` not found on PATH, pull requests will be skipped");
        }
        Self { gh_path }
    }

    fn gh(&self) -> Result<&Path> {
        self.gh_path
            .as_deref()
            .ok_or_else(|| OrchestratorError::Forge("GitHub CLI (gh) is not installed".to_string()))
    }
}

impl Default for GitCliForge {
    fn default() -> Self {
        Self::new()
    }
}

/// Output of a finished CLI invocation
struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

async fn run_command(program: &Path, args: &[&str], cwd: &Path) -> Result<CommandOutput> {
    log::debug!("[GitForge] Running {:?} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| OrchestratorError::Forge(format!("Failed to run {:?}: {}", program, e)))?;

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

async fn run_checked(program: &Path, args: &[&str], cwd: &Path) -> Result<String> {
    let out = run_command(program, args, cwd).await?;
    if out.success {
        Ok(out.stdout)
    } else {
        Err(OrchestratorError::Forge(format!(
            "{} {} failed: {}",
            program.display(),
            args.join(" "),
            out.stderr
        )))
    }
}

#[async_trait]
impl VersionControl for GitCliForge {
    async fn has_new_commits(&self, workspace: &Path, base_branch: &str) -> Result<bool> {
        let workspace = workspace.to_path_buf();
        let base_branch = base_branch.to_string();

        let check = tokio::task::spawn_blocking(move || {
            let manager = GitManager::new(&workspace)?;
            manager.commits_ahead(&base_branch)
        })
        .await
        .map_err(|e| OrchestratorError::Other(format!("ahead check panicked: {}", e)))??;

        match check {
            Some(check) => {
                log::debug!(
                    "[GitForge] {} commit(s) ahead of {:?}",
                    check.ahead,
                    check.reference
                );
                Ok(check.has_commits())
            }
            None => Ok(false),
        }
    }

    async fn push_branch(
        &self,
        workspace: &Path,
        branch: &str,
        base_branch: &str,
    ) -> Result<PushOutcome> {
        let git = Path::new("git");
        let mut outcome = PushOutcome::Pushed;

        match run_command(git, &["fetch", "origin", base_branch], workspace).await {
            Ok(out) if out.success => {
                let upstream = format!("origin/{}", base_branch);
                let merge = run_command(git, &["merge", "--no-edit", &upstream], workspace).await?;
                if !merge.success {
                    log::warn!(
                        "[GitForge] Merging {} into {} conflicted, pushing as-is",
                        upstream,
                        branch
                    );
                    let _ = run_command(git, &["merge", "--abort"], workspace).await;
                    outcome = PushOutcome::PushedWithConflicts;
                }
            }
            Ok(out) => log::warn!("[GitForge] Fetch of {} failed: {}", base_branch, out.stderr),
            Err(e) => log::warn!("[GitForge] Fetch of {} failed: {}", base_branch, e),
        }

        run_checked(git, &["push", "-u", "origin", branch], workspace).await?;
        log::info!("[GitForge] Pushed branch {}", branch);
        Ok(outcome)
    }

    async fn create_pull_request(&self, workspace: &Path, pr: &PullRequestSpec) -> Result<String> {
        let gh = self.gh()?;
        let url = run_checked(
            gh,
            &[
                "pr",
                "create",
                "--head",
                &pr.branch,
                "--base",
                &pr.base_branch,
                "--title",
                &pr.title,
                "--body",
                &pr.body,
            ],
            workspace,
        )
        .await?;

        log::info!("[GitForge] Opened pull request {}", url);
        Ok(url)
    }

    async fn enable_auto_merge(&self, workspace: &Path, branch: &str) -> Result<()> {
        let gh = self.gh()?;
        run_checked(gh, &["pr", "merge", branch, "--auto", "--squash"], workspace).await?;
        log::info!("[GitForge] Auto-merge enabled for {}", branch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature};
    use tempfile::TempDir;

    fn init_repo_with_commit(path: &Path) {
        let repo = Repository::init(path).unwrap();
        let sig = Signature::now("Test User", "test@example.com").unwrap();
        std::fs::write(path.join("README.md"), "# test").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .unwrap();
    }

    #[tokio::test]
    async fn test_has_new_commits_false_on_base() {
        let temp_dir = TempDir::new().unwrap();
        init_repo_with_commit(temp_dir.path());
        let base = GitManager::new(temp_dir.path())
            .unwrap()
            .get_default_branch_name();

        let forge = GitCliForge { gh_path: None };
        assert!(!forge.has_new_commits(temp_dir.path(), &base).await.unwrap());
    }

    #[tokio::test]
    async fn test_has_new_commits_errors_outside_repository() {
        let temp_dir = TempDir::new().unwrap();
        let forge = GitCliForge { gh_path: None };
        let result = forge.has_new_commits(temp_dir.path(), "main").await;
        assert!(matches!(result, Err(OrchestratorError::Git(_))));
    }

    #[tokio::test]
    async fn test_pull_request_without_gh_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let forge = GitCliForge { gh_path: None };
        let pr = PullRequestSpec {
            branch: "task/1".to_string(),
            base_branch: "main".to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
        };
        let err = forge
            .create_pull_request(temp_dir.path(), &pr)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gh"));
    }
}
