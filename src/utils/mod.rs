// Utility functions

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

// =============================================================================
// Path Helpers
// =============================================================================

/// Get the .fleet directory path for a repository.
#[inline]
pub fn fleet_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(".fleet")
}

/// Get the .fleet/config.yaml path for a repository.
#[inline]
pub fn config_path(repo_root: &Path) -> PathBuf {
    fleet_dir(repo_root).join("config.yaml")
}

/// Get the .fleet/state directory (runtime state, gitignored).
#[inline]
pub fn state_dir(repo_root: &Path) -> PathBuf {
    fleet_dir(repo_root).join("state")
}

/// Get the directory that holds per-task worktrees.
#[inline]
pub fn worktrees_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(".worktrees").join("tasks")
}

// =============================================================================
// Locking
// =============================================================================

/// Safely acquire a mutex lock, recovering from poisoning by returning the guard.
/// A panicking task flow must not wedge the slot table for everyone else.
pub fn lock_mutex_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Mutex was poisoned, recovering: {}", poisoned);
            poisoned.into_inner()
        }
    }
}

// =============================================================================
// Time
// =============================================================================

/// Current wall-clock time in epoch milliseconds.
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render a millisecond duration compactly (`90s`, `5m`, `2h 15m`).
pub fn format_duration_ms(ms: i64) -> String {
    let total_secs = (ms.max(0) + 999) / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        if minutes > 0 {
            format!("{}h {}m", hours, minutes)
        } else {
            format!("{}h", hours)
        }
    } else if minutes > 0 {
        if seconds > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}m", minutes)
        }
    } else {
        format!("{}s", seconds)
    }
}

// =============================================================================
// Naming
// =============================================================================

/// Lowercase slug of `s`: alphanumerics kept, every other run collapsed to a
/// single `-`, trimmed, and truncated to `max_len` characters.
pub fn slugify(s: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(s.len());
    let mut last_dash = true;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }

    let mut slug: String = slug.trim_matches('-').chars().take(max_len).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Short, branch-safe form of a task id (first 8 slug characters).
pub fn short_task_id(task_id: &str) -> String {
    let compact: String = task_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    if compact.is_empty() {
        "task".to_string()
    } else {
        compact.chars().take(8).collect()
    }
}

/// First 8 hex characters of the SHA-256 of the full task id.
pub fn task_id_hash(task_id: &str) -> String {
    let mut hash = hex::encode(Sha256::digest(task_id.as_bytes()));
    hash.truncate(8);
    hash
}

/// Deterministic branch name for a task: `task/<short-id>-<id-hash>-<title-slug>`.
///
/// The short id is readable but lossy; the hash keeps ids that share a
/// prefix on separate branches.
pub fn default_branch_name(task_id: &str, title: &str) -> String {
    let prefix = format!("task/{}-{}", short_task_id(task_id), task_id_hash(task_id));
    let slug = slugify(title, 40);
    if slug.is_empty() {
        prefix
    } else {
        format!("{}-{}", prefix, slug)
    }
}

/// Sanitize a string for use as a path component
pub fn sanitize_path_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
}
