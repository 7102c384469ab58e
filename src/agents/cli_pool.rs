//! Agent pool that drives agent CLIs as child processes

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

use super::path_resolver::CliPathResolver;
use super::{AgentEvent, AgentPool, AgentSdk, ExecOptions, ExecResult, RetryContext};
use crate::error::Result;
use crate::utils::lock_mutex_recover;

/// Namespace for deterministic session ids
const SESSION_NS: Uuid = Uuid::from_bytes([
    0xf1, 0xee, 0x70, 0x5e, 0x55, 0x10, 0x4e, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
]);

/// Output kept per attempt for error reporting and classification
const MAX_OUTPUT_CHARS: usize = 64 * 1024;

/// Session bookkeeping for one task key
#[derive(Debug, Clone)]
struct ThreadState {
    generation: u32,
    /// Attempts already run in this session
    turns: u32,
}

impl ThreadState {
    /// Stable within one pool. `nonce` is drawn per pool, so ids never
    /// repeat across restarts.
    fn session_id(&self, nonce: &Uuid, task_key: &str) -> String {
        Uuid::new_v5(
            &SESSION_NS,
            format!("{}-{}-{}", nonce, task_key, self.generation).as_bytes(),
        )
        .to_string()
    }
}

/// Build command line arguments for an agent SDK.
///
/// `resume` continues the given session instead of starting it.
pub fn build_agent_command(
    sdk: AgentSdk,
    prompt: &str,
    session_id: &str,
    resume: bool,
) -> (&'static str, Vec<String>) {
    match sdk {
        AgentSdk::Claude => {
            let mut args = vec![
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ];
            if resume {
                args.push("--resume".to_string());
            } else {
                args.push("--session-id".to_string());
            }
            args.push(session_id.to_string());
            args.push(prompt.to_string());
            ("claude", args)
        }
        AgentSdk::Codex => (
            "codex",
            vec![
                "exec".to_string(),
                "--full-auto".to_string(),
                prompt.to_string(),
            ],
        ),
        AgentSdk::Opencode => ("opencode", vec!["run".to_string(), prompt.to_string()]),
    }
}

/// Outcome of one attempt
struct AttemptOutcome {
    /// The child process started, so the CLI has seen the session
    spawned: bool,
    success: bool,
    output: String,
    error: Option<String>,
}

fn truncate_tail(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    if count <= max_chars {
        s.to_string()
    } else {
        s.chars().skip(count - max_chars).collect()
    }
}

pub struct CliAgentPool {
    /// Overrides binary resolution (tests, custom installs)
    binary_override: Option<PathBuf>,
    retry_delay: Duration,
    max_retry_delay: Duration,
    session_nonce: Uuid,
    threads: Mutex<HashMap<String, ThreadState>>,
}

impl CliAgentPool {
    pub fn new() -> Self {
        Self {
            binary_override: None,
            retry_delay: Duration::from_secs(2),
            max_retry_delay: Duration::from_secs(30),
            session_nonce: Uuid::new_v4(),
            threads: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_binary(mut self, path: PathBuf) -> Self {
        self.binary_override = Some(path);
        self
    }

    pub fn with_retry_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_delay = initial;
        self.max_retry_delay = max;
        self
    }

    /// Session id and whether it has been used before
    fn session_for(&self, task_key: &str) -> (String, bool) {
        let mut threads = lock_mutex_recover(&self.threads);
        let state = threads
            .entry(task_key.to_string())
            .or_insert(ThreadState {
                generation: 0,
                turns: 0,
            });
        (state.session_id(&self.session_nonce, task_key), state.turns > 0)
    }

    fn mark_turn(&self, task_key: &str) {
        if let Some(state) = lock_mutex_recover(&self.threads).get_mut(task_key) {
            state.turns += 1;
        }
    }

    async fn run_attempt(&self, prompt: &str, options: &ExecOptions, session_id: &str, resume: bool) -> AttemptOutcome {
        let (program, args) = build_agent_command(options.sdk, prompt, session_id, resume);
        let binary = match &self.binary_override {
            Some(path) => path.clone(),
            None => match CliPathResolver::resolve(options.sdk) {
                Some(path) => path,
                None => {
                    return AttemptOutcome {
                        spawned: false,
                        success: false,
                        output: String::new(),
                        error: Some(format!("{} CLI not found", program)),
                    }
                }
            },
        };

        let mut cmd = Command::new(&binary);
        cmd.args(&args)
            .current_dir(&options.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return AttemptOutcome {
                    spawned: false,
                    success: false,
                    output: String::new(),
                    error: Some(format!("Failed to spawn {}: {}", program, e)),
                }
            }
        };

        match tokio::time::timeout(options.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let combined = truncate_tail(&format!("{}{}", stdout, stderr), MAX_OUTPUT_CHARS);
                if output.status.success() {
                    AttemptOutcome {
                        spawned: true,
                        success: true,
                        output: combined,
                        error: None,
                    }
                } else {
                    let last_stderr = stderr
                        .lines()
                        .rev()
                        .find(|l| !l.trim().is_empty())
                        .unwrap_or("")
                        .to_string();
                    AttemptOutcome {
                        spawned: true,
                        success: false,
                        output: combined,
                        error: Some(format!(
                            "{} exited with {}: {}",
                            program, output.status, last_stderr
                        )),
                    }
                }
            }
            Ok(Err(e)) => AttemptOutcome {
                spawned: true,
                success: false,
                output: String::new(),
                error: Some(format!("Failed to wait for {}: {}", program, e)),
            },
            // Dropping the future kills the child (kill_on_drop)
            Err(_) => AttemptOutcome {
                spawned: true,
                success: false,
                output: String::new(),
                error: Some(format!(
                    "{} timed out after {}s",
                    program,
                    options.timeout.as_secs()
                )),
            },
        }
    }
}

impl Default for CliAgentPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentPool for CliAgentPool {
    async fn exec_with_retry(&self, prompt: &str, options: ExecOptions) -> Result<ExecResult> {
        let max_attempts = options.max_retries + 1;
        let mut current_prompt = prompt.to_string();
        let mut delay = self.retry_delay;
        let mut last = AttemptOutcome {
            spawned: false,
            success: false,
            output: String::new(),
            error: None,
        };

        for attempt in 1..=max_attempts {
            let (session_id, resume) = self.session_for(&options.task_key);
            log::info!(
                "[AgentPool] {} attempt {}/{} ({} session {})",
                options.task_key,
                attempt,
                max_attempts,
                if resume { "resuming" } else { "new" },
                session_id
            );
            if let Some(tx) = &options.events {
                let _ = tx.send(AgentEvent::AttemptStarted {
                    task_key: options.task_key.clone(),
                    attempt,
                    session_id: session_id.clone(),
                    resumed: resume,
                });
            }

            last = self.run_attempt(&current_prompt, &options, &session_id, resume).await;
            if last.spawned {
                self.mark_turn(&options.task_key);
            }

            if let Some(tx) = &options.events {
                let _ = tx.send(AgentEvent::AttemptFinished {
                    task_key: options.task_key.clone(),
                    attempt,
                    success: last.success,
                    error: last.error.clone(),
                });
            }

            if last.success {
                return Ok(ExecResult {
                    success: true,
                    attempts: attempt,
                    error: None,
                    output: last.output,
                });
            }

            log::warn!(
                "[AgentPool] {} attempt {} failed: {}",
                options.task_key,
                attempt,
                last.error.as_deref().unwrap_or("unknown error")
            );

            if attempt < max_attempts {
                if let Some(builder) = &options.build_retry_prompt {
                    current_prompt = builder(&RetryContext {
                        task_key: options.task_key.clone(),
                        attempt: attempt + 1,
                        max_retries: options.max_retries,
                        previous_error: last.error.clone(),
                        previous_output: last.output.clone(),
                    });
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(self.max_retry_delay);
            }
        }

        Ok(ExecResult {
            success: false,
            attempts: max_attempts,
            error: last.error,
            output: last.output,
        })
    }

    async fn force_new_thread(&self, task_key: &str, reason: &str) {
        let mut threads = lock_mutex_recover(&self.threads);
        let state = threads
            .entry(task_key.to_string())
            .or_insert(ThreadState {
                generation: 0,
                turns: 0,
            });
        state.generation += 1;
        state.turns = 0;
        log::info!(
            "[AgentPool] Fresh session for {} (generation {}): {}",
            task_key,
            state.generation,
            reason
        );
    }

    async fn invalidate_thread(&self, task_key: &str) {
        if lock_mutex_recover(&self.threads).remove(task_key).is_some() {
            log::debug!("[AgentPool] Invalidated session for {}", task_key);
        }
    }
}
