//! Anti-thrash bookkeeping
//!
//! Tracks agents that report success without committing anything. Each such
//! completion bumps a per-task counter and pushes the task's next eligible
//! time further out; at the configured maximum the task is blocked for the
//! rest of the process lifetime. State is written to disk after every change.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::file_storage::{read_json_or_default, with_file_lock, write_json, FileResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AntiThrashEntry {
    pub no_commit_count: u32,
    /// Epoch milliseconds
    pub skip_until: Option<i64>,
}

/// Result of recording a no-commit completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoCommitRecord {
    pub count: u32,
    pub cooldown_ms: i64,
    pub skip_until: i64,
    pub blocked: bool,
}

/// Escalating no-commit cooldown policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoCommitPolicy {
    pub base_cooldown_ms: i64,
    pub max_cooldown_ms: i64,
    pub max_attempts: u32,
}

impl NoCommitPolicy {
    /// `base * 2^(count - 1)`, capped at `max_cooldown_ms`
    pub fn cooldown_for(&self, count: u32) -> i64 {
        let exponent = count.saturating_sub(1).min(30);
        self.base_cooldown_ms
            .saturating_mul(1i64 << exponent)
            .min(self.max_cooldown_ms)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    tasks: HashMap<String, AntiThrashEntry>,
}

pub struct AntiThrashStore {
    path: Option<PathBuf>,
    policy: NoCommitPolicy,
    entries: HashMap<String, AntiThrashEntry>,
}

impl AntiThrashStore {
    /// Store that never touches disk
    pub fn in_memory(policy: NoCommitPolicy) -> Self {
        Self {
            path: None,
            policy,
            entries: HashMap::new(),
        }
    }

    /// Load persisted state.
    ///
    /// Expired skip windows are dropped but their counters are kept, so
    /// escalation resumes where it left off. Counters that had already
    /// reached the maximum are cleared: a block only lasts until restart.
    /// An expired entry is therefore not removed from the store; only its
    /// skip window is.
    pub fn load(path: &Path, policy: NoCommitPolicy, now_ms: i64) -> Self {
        let persisted: PersistedState = match read_json_or_default(path) {
            Ok(state) => state,
            Err(e) => {
                log::warn!("[AntiThrash] Ignoring unreadable state {:?}: {}", path, e);
                PersistedState::default()
            }
        };

        let mut entries = HashMap::new();
        for (task_id, mut entry) in persisted.tasks {
            if entry.no_commit_count >= policy.max_attempts {
                log::info!(
                    "[AntiThrash] Unblocking {} after restart ({} no-commit completions)",
                    task_id,
                    entry.no_commit_count
                );
                continue;
            }
            if entry.skip_until.map_or(false, |until| until <= now_ms) {
                entry.skip_until = None;
            }
            if entry.no_commit_count > 0 || entry.skip_until.is_some() {
                entries.insert(task_id, entry);
            }
        }

        if !entries.is_empty() {
            log::info!("[AntiThrash] Restored {} task(s) from {:?}", entries.len(), path);
        }

        let store = Self {
            path: Some(path.to_path_buf()),
            policy,
            entries,
        };
        store.persist();
        store
    }

    pub fn policy(&self) -> &NoCommitPolicy {
        &self.policy
    }

    pub fn get(&self, task_id: &str) -> Option<AntiThrashEntry> {
        self.entries.get(task_id).copied()
    }

    pub fn entries(&self) -> &HashMap<String, AntiThrashEntry> {
        &self.entries
    }

    pub fn is_blocked(&self, task_id: &str) -> bool {
        self.entries
            .get(task_id)
            .map_or(false, |e| e.no_commit_count >= self.policy.max_attempts)
    }

    /// Active skip window end for `task_id`
    pub fn skip_until(&self, task_id: &str, now_ms: i64) -> Option<i64> {
        self.entries
            .get(task_id)
            .and_then(|e| e.skip_until)
            .filter(|&until| until > now_ms)
    }

    pub fn blocked_tasks(&self) -> Vec<String> {
        let mut blocked: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.no_commit_count >= self.policy.max_attempts)
            .map(|(id, _)| id.clone())
            .collect();
        blocked.sort();
        blocked
    }

    pub fn record_no_commit(&mut self, task_id: &str, now_ms: i64) -> NoCommitRecord {
        let entry = self.entries.entry(task_id.to_string()).or_default();
        entry.no_commit_count += 1;
        let count = entry.no_commit_count;
        let cooldown_ms = self.policy.cooldown_for(count);
        let skip_until = now_ms + cooldown_ms;
        entry.skip_until = Some(skip_until);

        let record = NoCommitRecord {
            count,
            cooldown_ms,
            skip_until,
            blocked: count >= self.policy.max_attempts,
        };
        self.persist();
        record
    }

    /// Forget a task after it produced commits
    pub fn clear(&mut self, task_id: &str) {
        if self.entries.remove(task_id).is_some() {
            self.persist();
        }
    }

    fn persist(&self) {
        let path = match &self.path {
            Some(p) => p,
            None => return,
        };
        let state = PersistedState {
            tasks: self.entries.clone(),
        };
        let result: FileResult<()> = with_file_lock(path, || write_json(path, &state));
        if let Err(e) = result {
            log::warn!("[AntiThrash] Failed to persist state to {:?}: {}", path, e);
        }
    }
}
