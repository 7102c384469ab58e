// Data models shared by the fleet coordinator, scheduler and executor

pub mod state_machine;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Normalized task status. Backend-specific spellings are mapped onto this
/// set by the tracker adapters, never by the orchestration core.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    Done,
    Cancelled,
}

impl TaskStatus {
    /// Returns all statuses in lifecycle order
    pub fn all() -> &'static [TaskStatus] {
        &[
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::InReview,
            TaskStatus::Done,
            TaskStatus::Cancelled,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "inprogress",
            TaskStatus::InReview => "inreview",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Map a backend-specific status string onto the normalized set.
    ///
    /// Accepts the canonical names plus the common spellings used by kanban
    /// tools (`in_progress`, `In Review`, `backlog`, `closed`, ...).
    pub fn normalize(raw: &str) -> Option<TaskStatus> {
        let key: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        match key.as_str() {
            "todo" | "backlog" | "open" | "new" | "ready" => Some(TaskStatus::Todo),
            "inprogress" | "doing" | "started" | "active" | "running" => {
                Some(TaskStatus::InProgress)
            }
            "inreview" | "review" | "pendingreview" => Some(TaskStatus::InReview),
            "done" | "completed" | "complete" | "closed" | "merged" => Some(TaskStatus::Done),
            "cancelled" | "canceled" | "wontfix" | "abandoned" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::normalize(s).ok_or_else(|| {
            format!(
                "Unknown task status: '{}'. Expected one of: todo, inprogress, inreview, done, cancelled",
                s
            )
        })
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Todo
    }
}

/// A backlog task as seen by the orchestration core.
///
/// Owned by the task-tracking backend; the core treats it as a value object
/// and only stamps derived fields (trimmed id, derived scope).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub file_paths: Vec<String>,
}

static SCOPE_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_scope_regex() -> &'static Regex {
    // type(scope): subject  /  type(scope)!: subject
    SCOPE_REGEX.get_or_init(|| {
        Regex::new(r"^\s*[A-Za-z][\w-]*\(\s*([^()]+?)\s*\)!?\s*:").unwrap()
    })
}

/// Extract the scope from a conventional-commit style title (`feat(api): ...`).
pub fn scope_from_title(title: &str) -> Option<String> {
    get_scope_regex()
        .captures(title)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

impl Task {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            status: TaskStatus::Todo,
            branch_name: None,
            scope: None,
            file_paths: Vec::new(),
        }
    }

    /// Scope used for conflict detection: the explicit scope when set,
    /// otherwise the one derived from the title prefix.
    pub fn effective_scope(&self) -> Option<String> {
        match &self.scope {
            Some(scope) if !scope.trim().is_empty() => Some(scope.trim().to_lowercase()),
            _ => scope_from_title(&self.title),
        }
    }

    /// Stamp derived fields: trimmed id and (when absent) the title scope.
    pub fn normalized(mut self) -> Self {
        self.id = self.id.trim().to_string();
        if self.scope.as_deref().map_or(true, |s| s.trim().is_empty()) {
            self.scope = scope_from_title(&self.title);
        }
        self
    }
}

/// A project on the task-tracking backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
}

/// Aggregate task counters used for maintenance-mode detection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    /// Tasks still waiting in the planning backlog
    pub backlog_remaining: usize,
    /// Tasks ready to be picked up
    pub todo: usize,
    /// Tasks currently executing
    pub running: usize,
    /// Tasks waiting on review
    pub review: usize,
}
