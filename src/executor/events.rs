// Executor events and status snapshots

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::anti_thrash::AntiThrashEntry;
use super::slots::Slot;
use crate::agents::{AgentSdk, ErrorPattern};
use crate::models::Project;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExecutorEvent {
    #[serde(rename_all = "camelCase")]
    TaskStarted {
        task_id: String,
        branch: String,
        sdk: AgentSdk,
    },
    #[serde(rename_all = "camelCase")]
    TaskCompleted {
        task_id: String,
        pr_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TaskNoCommit {
        task_id: String,
        count: u32,
        cooldown_ms: i64,
        blocked: bool,
    },
    #[serde(rename_all = "camelCase")]
    TaskFailed {
        task_id: String,
        error: String,
        pattern: Option<ErrorPattern>,
    },
    #[serde(rename_all = "camelCase")]
    ExecutorPaused { until_ms: i64, reason: String },
    #[serde(rename_all = "camelCase")]
    ExecutorStopped { drained: bool },
}

/// How a single task execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The task already held a slot
    Skipped,
    WorkspaceFailed { error: String },
    Completed { pr_url: Option<String> },
    NoCommit { count: u32, cooldown_ms: i64, blocked: bool },
    Failed { error: String, pattern: ErrorPattern, paused: bool },
    /// The flow panicked; cleanup still ran
    Aborted { error: String },
}

/// Point-in-time view of the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorStatus {
    pub running: bool,
    pub paused_until: Option<i64>,
    pub max_parallel: usize,
    pub project: Option<Project>,
    pub active_slots: Vec<Slot>,
    /// task id -> end of failure cooldown (epoch ms)
    pub cooldowns: HashMap<String, i64>,
    pub anti_thrash: HashMap<String, AntiThrashEntry>,
    /// Tasks that exhausted their no-commit attempts
    pub blocked: Vec<String>,
}
