//! Core GitManager implementation
//!
//! Contains the GitManager struct and the repository-level lookups used for
//! repository fingerprinting.

use git2::{Error as GitError, Repository, Sort};
use std::path::{Path, PathBuf};

/// Git manager for repository operations
pub struct GitManager {
    pub(crate) repo: Repository,
}

impl GitManager {
    /// Create a new GitManager for the given repository path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, GitError> {
        let repo = Repository::open(path)?;
        Ok(Self { repo })
    }

    /// Get the repository path (the `.git` directory)
    pub fn repo_path(&self) -> PathBuf {
        self.repo.path().to_path_buf()
    }

    /// Get the working directory of the repository, if it has one
    pub fn workdir(&self) -> Option<PathBuf> {
        self.repo.workdir().map(|p| p.to_path_buf())
    }

    /// URL of the configured `origin` remote, if any
    pub fn remote_origin_url(&self) -> Option<String> {
        let remote = self.repo.find_remote("origin").ok()?;
        remote
            .url()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
    }

    /// Hash of the repository's root commit (the oldest ancestor of HEAD
    /// without parents). Returns `Ok(None)` for repositories without commits.
    pub fn root_commit(&self) -> Result<Option<String>, GitError> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };

        let head_oid = match head.target() {
            Some(oid) => oid,
            None => return Ok(None),
        };

        let mut revwalk = self.repo.revwalk()?;
        revwalk.push(head_oid)?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;

        for oid in revwalk {
            let oid = oid?;
            let commit = self.repo.find_commit(oid)?;
            if commit.parent_count() == 0 {
                return Ok(Some(oid.to_string()));
            }
        }

        Ok(None)
    }

    /// Get a reference to the underlying repository
    pub(crate) fn repo(&self) -> &Repository {
        &self.repo
    }
}
