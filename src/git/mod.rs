//! Git operations using git2-rs
//!
//! This module provides git functionality organized into focused submodules:
//! - `manager` - Core GitManager struct, remote and root-commit lookups
//! - `branches` - Branch operations (create from base, delete, default branch)
//! - `worktrees` - Worktree management (add, remove, prune)
//! - `commits` - Ahead-of-base checks used to detect whether an agent produced work
//! - `forge` - Shell-driven push / pull request / auto-merge operations
//! - `types` - Shared data structures

mod branches;
mod commits;
pub mod forge;
mod manager;
mod types;
mod worktrees;

pub use forge::{GitCliForge, PullRequestSpec, PushOutcome, VersionControl};
pub use manager::GitManager;
pub use types::{AheadCheck, AheadReference, BranchInfo, WorktreeInfo};
