// Slot table: one entry per executing task

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::agents::AgentSdk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Running,
    Completing,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub task_id: String,
    pub branch: String,
    pub worktree_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub sdk: AgentSdk,
    pub attempt: u32,
    pub status: SlotStatus,
}

#[derive(Debug, Default)]
pub struct SlotTable {
    slots: HashMap<String, Slot>,
}

impl SlotTable {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.slots.contains_key(task_id)
    }

    /// Claim a slot for `task_id`; `false` if it already holds one
    pub fn allocate(&mut self, task_id: &str, branch: &str, sdk: AgentSdk) -> bool {
        if self.slots.contains_key(task_id) {
            return false;
        }
        self.slots.insert(
            task_id.to_string(),
            Slot {
                task_id: task_id.to_string(),
                branch: branch.to_string(),
                worktree_path: None,
                started_at: Utc::now(),
                sdk,
                attempt: 1,
                status: SlotStatus::Running,
            },
        );
        true
    }

    pub fn update<F: FnOnce(&mut Slot)>(&mut self, task_id: &str, f: F) {
        if let Some(slot) = self.slots.get_mut(task_id) {
            f(slot);
        }
    }

    pub fn release(&mut self, task_id: &str) -> Option<Slot> {
        self.slots.remove(task_id)
    }

    pub fn snapshot(&self) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self.slots.values().cloned().collect();
        slots.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        slots
    }
}
