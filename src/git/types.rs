//! Git data types and structures
//!
//! Contains all shared types used across git operations

use serde::{Deserialize, Serialize};

/// Represents a git branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub is_head: bool,
    pub upstream: Option<String>,
    pub commit_id: String,
}

/// Represents a git worktree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub name: String,
    pub path: String,
    pub branch: Option<String>,
    pub is_locked: bool,
}

/// Which reference an ahead-count was computed against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AheadReference {
    /// The upstream tracking branch of HEAD
    Upstream(String),
    /// `origin/<base>`
    RemoteBase(String),
    /// Local `<base>`
    LocalBase(String),
}

/// Number of commits HEAD has that the comparison reference does not
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AheadCheck {
    pub reference: AheadReference,
    pub ahead: usize,
}

impl AheadCheck {
    pub fn has_commits(&self) -> bool {
        self.ahead > 0
    }
}
