//! Agent execution
//!
//! - `AgentPool` runs an AI coding agent against a workspace with bounded
//!   retries and per-task session (thread) tracking.
//! - `ErrorClassifier` turns agent output into a failure pattern and decides
//!   whether the failure is local to the task or systemic.

mod classifier;
mod cli_pool;
mod path_resolver;

pub use classifier::{
    Classification, ErrorClassifier, ErrorPattern, PatternClassifier, RecoveryAction,
};
pub use cli_pool::{build_agent_command, CliAgentPool};
pub use path_resolver::CliPathResolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;

/// Agent CLI used for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentSdk {
    #[default]
    Claude,
    Codex,
    Opencode,
}

impl AgentSdk {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentSdk::Claude => "claude",
            AgentSdk::Codex => "codex",
            AgentSdk::Opencode => "opencode",
        }
    }
}

impl std::fmt::Display for AgentSdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentSdk {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude" | "claude-code" => Ok(AgentSdk::Claude),
            "codex" => Ok(AgentSdk::Codex),
            "opencode" => Ok(AgentSdk::Opencode),
            _ => Err(format!(
                "Unknown agent sdk: '{}'. Expected one of: claude, codex, opencode",
                s
            )),
        }
    }
}

/// What the retry-prompt builder knows about the attempt that just failed
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub task_key: String,
    /// Number of the attempt about to start (2 for the first retry)
    pub attempt: u32,
    pub max_retries: u32,
    pub previous_error: Option<String>,
    pub previous_output: String,
}

pub type RetryPromptBuilder = Arc<dyn Fn(&RetryContext) -> String + Send + Sync>;

/// Progress notifications from a running execution
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    AttemptStarted {
        task_key: String,
        attempt: u32,
        session_id: String,
        resumed: bool,
    },
    AttemptFinished {
        task_key: String,
        attempt: u32,
        success: bool,
        error: Option<String>,
    },
}

#[derive(Clone)]
pub struct ExecOptions {
    /// Stable key for the task; session identity is tracked per key
    pub task_key: String,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub max_retries: u32,
    pub sdk: AgentSdk,
    pub build_retry_prompt: Option<RetryPromptBuilder>,
    pub events: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl std::fmt::Debug for ExecOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecOptions")
            .field("task_key", &self.task_key)
            .field("cwd", &self.cwd)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("sdk", &self.sdk)
            .field("build_retry_prompt", &self.build_retry_prompt.is_some())
            .finish()
    }
}

/// Final outcome of `exec_with_retry`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    pub success: bool,
    pub attempts: u32,
    pub error: Option<String>,
    pub output: String,
}

#[async_trait]
pub trait AgentPool: Send + Sync {
    /// Run `prompt`, retrying failed attempts up to `options.max_retries` times
    async fn exec_with_retry(&self, prompt: &str, options: ExecOptions) -> Result<ExecResult>;

    /// Make the next execution for `task_key` start a fresh session
    async fn force_new_thread(&self, task_key: &str, reason: &str);

    /// Forget everything known about the session for `task_key`
    async fn invalidate_thread(&self, task_key: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdk_parse() {
        assert_eq!("Claude".parse::<AgentSdk>().unwrap(), AgentSdk::Claude);
        assert_eq!("opencode".parse::<AgentSdk>().unwrap(), AgentSdk::Opencode);
        assert!("gpt".parse::<AgentSdk>().is_err());
        assert_eq!(
            serde_json::to_string(&AgentSdk::Codex).unwrap(),
            "\"codex\""
        );
    }
}
