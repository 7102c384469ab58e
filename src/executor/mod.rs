//! Task executor
//!
//! Polls the task tracker for `todo` work, runs each task in its own
//! worktree through the agent pool and moves it along the kanban lifecycle.
//!
//! - `slots` - the in-process slot table (one entry per executing task)
//! - `anti_thrash` - persisted no-commit counters and skip windows
//! - `prompt` - task and retry prompt construction
//! - `events` - executor events, outcomes and status snapshots
//!
//! Every execution that gets past slot allocation funnels through one cleanup
//! path: the workspace is released (once) and the slot is freed, whether the
//! flow finished, failed or panicked.

pub mod anti_thrash;
pub mod events;
pub mod prompt;
pub mod slots;

pub use anti_thrash::{AntiThrashEntry, AntiThrashStore, NoCommitPolicy, NoCommitRecord};
pub use events::{ExecutorEvent, ExecutorStatus, TaskOutcome};
pub use prompt::{build_retry_prompt, build_task_prompt, PromptContext};
pub use slots::{Slot, SlotStatus, SlotTable};

use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Instant, MissedTickBehavior};

use crate::agents::{
    AgentPool, ErrorClassifier, ExecOptions, RecoveryAction, RetryContext, RetryPromptBuilder,
};
use crate::config::ExecutorConfig;
use crate::error::{OrchestratorError, Result};
use crate::git::{PullRequestSpec, PushOutcome, VersionControl};
use crate::models::{Project, Task, TaskStatus};
use crate::tracker::TaskBackend;
use crate::utils::{default_branch_name, format_duration_ms, lock_mutex_recover, now_ms};
use crate::workspace::{AcquireOptions, Workspace, WorkspaceManager};

/// Name of the persisted anti-thrash file inside the state directory
pub const ANTI_THRASH_FILE: &str = "anti-thrash.json";

/// Agent-pool key for a task; stable across retries and restarts
pub fn task_key(task_id: &str) -> String {
    format!("task:{}", task_id)
}

/// Branch a task runs on: its own branch name, or a slug of id and title
pub fn branch_for(task: &Task) -> String {
    match task.branch_name.as_deref().map(str::trim) {
        Some(branch) if !branch.is_empty() => branch.to_string(),
        _ => default_branch_name(&task.id, &task.title),
    }
}

/// The collaborators the executor drives
#[derive(Clone)]
pub struct ExecutorDeps {
    pub tracker: Arc<dyn TaskBackend>,
    pub workspaces: Arc<dyn WorkspaceManager>,
    pub agents: Arc<dyn AgentPool>,
    pub classifier: Arc<dyn ErrorClassifier>,
    pub vcs: Arc<dyn VersionControl>,
}

#[derive(Default)]
struct ExecutorState {
    slots: SlotTable,
    /// task id -> end of failure cooldown (epoch ms)
    cooldowns: HashMap<String, i64>,
    project: Option<Project>,
    paused_until: Option<i64>,
}

/// Resets the re-entrancy flag when a poll ends, however it ends
struct PollGuard<'a>(&'a AtomicBool);

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct TaskExecutor {
    config: ExecutorConfig,
    owner: String,
    deps: ExecutorDeps,
    events: Option<mpsc::UnboundedSender<ExecutorEvent>>,
    state: Mutex<ExecutorState>,
    anti_thrash: Mutex<AntiThrashStore>,
    polling: AtomicBool,
    running: AtomicBool,
    stopping: AtomicBool,
    slot_released: Notify,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl TaskExecutor {
    pub fn new(
        config: ExecutorConfig,
        owner: &str,
        deps: ExecutorDeps,
        anti_thrash: AntiThrashStore,
    ) -> Self {
        Self {
            config,
            owner: owner.to_string(),
            deps,
            events: None,
            state: Mutex::new(ExecutorState::default()),
            anti_thrash: Mutex::new(anti_thrash),
            polling: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            slot_released: Notify::new(),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Executor whose anti-thrash state is restored from the repository's
    /// state directory (or `config.state_dir`)
    pub fn for_repo(
        config: ExecutorConfig,
        owner: &str,
        deps: ExecutorDeps,
        repo_root: &Path,
    ) -> Self {
        let state_dir = config
            .state_dir
            .clone()
            .unwrap_or_else(|| crate::utils::state_dir(repo_root));
        let store = AntiThrashStore::load(
            &state_dir.join(ANTI_THRASH_FILE),
            config.no_commit_policy(),
            now_ms(),
        );
        Self::new(config, owner, deps, store)
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<ExecutorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        lock_mutex_recover(&self.state).slots.len()
    }

    pub fn is_paused(&self) -> bool {
        self.active_pause(now_ms()).is_some()
    }

    /// Snapshot for status queries
    pub fn status(&self) -> ExecutorStatus {
        let now = now_ms();
        let (paused_until, project, active_slots, cooldowns) = {
            let state = lock_mutex_recover(&self.state);
            let cooldowns = state
                .cooldowns
                .iter()
                .filter(|(_, until)| **until > now)
                .map(|(id, until)| (id.clone(), *until))
                .collect();
            (
                state.paused_until.filter(|&until| until > now),
                state.project.clone(),
                state.slots.snapshot(),
                cooldowns,
            )
        };
        let (anti_thrash, blocked) = {
            let store = lock_mutex_recover(&self.anti_thrash);
            (store.entries().clone(), store.blocked_tasks())
        };

        ExecutorStatus {
            running: self.is_running(),
            paused_until,
            max_parallel: self.config.max_parallel,
            project,
            active_slots,
            cooldowns,
            anti_thrash,
            blocked,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the poll loop. The first tick fires immediately.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            log::debug!("[TaskExecutor] Already running");
            return;
        }
        self.stopping.store(false, Ordering::SeqCst);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *lock_mutex_recover(&self.shutdown_tx) = Some(shutdown_tx);

        let executor = Arc::clone(self);
        let every = Duration::from_millis(self.config.poll_interval_ms.max(1));
        log::info!(
            "[TaskExecutor] Starting poll loop (every {}, max {} parallel)",
            format_duration_ms(every.as_millis() as i64),
            self.config.max_parallel
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let dispatched = executor.poll_once().await;
                        if !dispatched.is_empty() {
                            log::info!("[TaskExecutor] Dispatched {:?}", dispatched);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        log::debug!("[TaskExecutor] Poll loop received shutdown");
                        break;
                    }
                }
            }
        });
    }

    /// Stop accepting ticks and wait up to the grace period for in-flight
    /// slots to drain. Running attempts are never killed from here.
    ///
    /// Returns whether every slot drained in time.
    pub async fn stop(&self) -> bool {
        self.stopping.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = lock_mutex_recover(&self.shutdown_tx).take() {
            let _ = tx.try_send(());
        }

        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        let deadline = Instant::now() + grace;
        let drained = loop {
            let released = self.slot_released.notified();
            let active = self.active_count();
            if active == 0 {
                break true;
            }
            log::info!(
                "[TaskExecutor] Waiting for {} in-flight task(s) to finish",
                active
            );
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                break self.active_count() == 0;
            }
        };

        if drained {
            log::info!("[TaskExecutor] Stopped");
        } else {
            log::warn!(
                "[TaskExecutor] Stopped with {} task(s) still running after {}",
                self.active_count(),
                format_duration_ms(grace.as_millis() as i64)
            );
        }
        self.emit(ExecutorEvent::ExecutorStopped { drained });
        drained
    }

    // =========================================================================
    // Polling
    // =========================================================================

    /// One poll tick. Returns the ids of the tasks dispatched.
    ///
    /// No-op while stopping, paused, saturated or when another poll is in
    /// flight. List and resolve errors are logged and swallowed.
    pub async fn poll_once(self: &Arc<Self>) -> Vec<String> {
        if self.stopping.load(Ordering::SeqCst) {
            return Vec::new();
        }
        if self.polling.swap(true, Ordering::SeqCst) {
            log::debug!("[TaskExecutor] Poll already in flight, skipping tick");
            return Vec::new();
        }
        let _guard = PollGuard(&self.polling);

        let now = now_ms();
        if let Some(until) = self.active_pause(now) {
            log::debug!(
                "[TaskExecutor] Paused for another {}",
                format_duration_ms(until - now)
            );
            return Vec::new();
        }
        if self.free_slots() == 0 {
            return Vec::new();
        }

        let project = match self.resolve_project().await {
            Ok(project) => project,
            Err(e) => {
                log::warn!("[TaskExecutor] Could not resolve project: {}", e);
                return Vec::new();
            }
        };

        let tasks = match self
            .deps
            .tracker
            .list_tasks(&project.id, Some(TaskStatus::Todo))
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                log::warn!("[TaskExecutor] Failed to list tasks for {}: {}", project.name, e);
                return Vec::new();
            }
        };

        let mut dispatched = Vec::new();
        for task in tasks.into_iter().map(Task::normalized) {
            if self.stopping.load(Ordering::SeqCst) || self.free_slots() == 0 {
                break;
            }
            if task.id.is_empty() || !self.is_eligible(&task.id, now) {
                continue;
            }

            let branch = branch_for(&task);
            if !self.allocate_slot(&task.id, &branch) {
                continue;
            }

            dispatched.push(task.id.clone());
            let executor = Arc::clone(self);
            tokio::spawn(async move {
                executor.run_slot(task, branch).await;
            });
        }

        dispatched
    }

    /// Run one task to completion on the calling task.
    ///
    /// `Skipped` when the task already holds a slot.
    pub async fn execute_task(&self, task: Task) -> TaskOutcome {
        let task = task.normalized();
        let branch = branch_for(&task);
        if !self.allocate_slot(&task.id, &branch) {
            return TaskOutcome::Skipped;
        }
        self.run_slot(task, branch).await
    }

    /// Whether `task_id` may be dispatched at `now`
    pub fn is_eligible(&self, task_id: &str, now: i64) -> bool {
        {
            let mut state = lock_mutex_recover(&self.state);
            if state.slots.contains(task_id) {
                return false;
            }
            match state.cooldowns.get(task_id).copied() {
                Some(until) if until > now => return false,
                Some(_) => {
                    state.cooldowns.remove(task_id);
                }
                None => {}
            }
        }

        let store = lock_mutex_recover(&self.anti_thrash);
        !store.is_blocked(task_id) && store.skip_until(task_id, now).is_none()
    }

    fn free_slots(&self) -> usize {
        self.config
            .max_parallel
            .saturating_sub(lock_mutex_recover(&self.state).slots.len())
    }

    fn active_pause(&self, now: i64) -> Option<i64> {
        let mut state = lock_mutex_recover(&self.state);
        match state.paused_until {
            Some(until) if until > now => Some(until),
            Some(_) => {
                log::info!("[TaskExecutor] Pause window ended, resuming dispatch");
                state.paused_until = None;
                None
            }
            None => None,
        }
    }

    /// Explicit project id, else case-insensitive name match, else the first
    /// project. Cached after the first success.
    pub async fn resolve_project(&self) -> Result<Project> {
        if let Some(project) = lock_mutex_recover(&self.state).project.clone() {
            return Ok(project);
        }

        let project = match self.config.project_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Project {
                id: id.to_string(),
                name: self
                    .config
                    .project_name
                    .clone()
                    .unwrap_or_else(|| id.to_string()),
            },
            _ => {
                let projects = self.deps.tracker.list_projects().await?;
                match self.config.project_name.as_deref() {
                    Some(name) => projects
                        .into_iter()
                        .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
                        .ok_or_else(|| {
                            OrchestratorError::Tracker(format!("No project named '{}'", name))
                        })?,
                    None => projects.into_iter().next().ok_or_else(|| {
                        OrchestratorError::Tracker("Task tracker has no projects".to_string())
                    })?,
                }
            }
        };

        log::info!(
            "[TaskExecutor] Working on project {} ({}) via {}",
            project.name,
            project.id,
            self.deps.tracker.name()
        );
        lock_mutex_recover(&self.state).project = Some(project.clone());
        Ok(project)
    }

    // =========================================================================
    // Per-task execution
    // =========================================================================

    fn allocate_slot(&self, task_id: &str, branch: &str) -> bool {
        lock_mutex_recover(&self.state)
            .slots
            .allocate(task_id, branch, self.config.sdk)
    }

    fn release_slot(&self, task_id: &str) {
        lock_mutex_recover(&self.state).slots.release(task_id);
        self.slot_released.notify_waiters();
    }

    fn update_slot<F: FnOnce(&mut Slot)>(&self, task_id: &str, f: F) {
        lock_mutex_recover(&self.state).slots.update(task_id, f);
    }

    /// Drive an allocated slot through the task flow and the cleanup path
    async fn run_slot(&self, task: Task, branch: String) -> TaskOutcome {
        self.emit(ExecutorEvent::TaskStarted {
            task_id: task.id.clone(),
            branch: branch.clone(),
            sdk: self.config.sdk,
        });
        log::info!("[TaskExecutor] Starting {} on {}", task.id, branch);

        let workspace_requested = AtomicBool::new(false);
        let flow = AssertUnwindSafe(self.run_task_flow(&task, &branch, &workspace_requested))
            .catch_unwind()
            .await;

        let outcome = match flow {
            Ok(outcome) => outcome,
            Err(panic) => {
                let error = panic_message(panic.as_ref());
                log::error!("[TaskExecutor] Execution of {} panicked: {}", task.id, error);
                self.set_cooldown(&task.id, self.config.failure_cooldown_ms);
                self.update_status_best_effort(&task.id, TaskStatus::Todo).await;
                TaskOutcome::Aborted { error }
            }
        };

        if workspace_requested.load(Ordering::SeqCst) {
            if let Err(e) = self.deps.workspaces.release_worktree(&task.id).await {
                log::warn!(
                    "[TaskExecutor] Failed to release workspace for {}: {}",
                    task.id,
                    e
                );
            }
        }
        self.release_slot(&task.id);

        self.emit_outcome(&task.id, &outcome);
        outcome
    }

    async fn run_task_flow(
        &self,
        task: &Task,
        branch: &str,
        workspace_requested: &AtomicBool,
    ) -> TaskOutcome {
        let task_id = task.id.as_str();
        self.update_status_best_effort(task_id, TaskStatus::InProgress)
            .await;

        workspace_requested.store(true, Ordering::SeqCst);
        let options = AcquireOptions {
            owner: self.owner.clone(),
            base_branch: self.config.base_branch.clone(),
        };
        let workspace = match self
            .deps
            .workspaces
            .acquire_worktree(branch, task_id, &options)
            .await
        {
            Ok(workspace) if workspace.is_valid() => workspace,
            Ok(workspace) => {
                let error = format!("Workspace path {:?} is not a directory", workspace.path);
                return self.handle_workspace_failure(task_id, error).await;
            }
            Err(e) => return self.handle_workspace_failure(task_id, e.to_string()).await,
        };
        let branch = if workspace.branch.trim().is_empty() {
            branch.to_string()
        } else {
            workspace.branch.clone()
        };
        self.update_slot(task_id, |slot| {
            slot.worktree_path = Some(workspace.path.clone());
            slot.branch = branch.clone();
        });

        let prompt = build_task_prompt(&PromptContext {
            task,
            workspace: &workspace.path,
            branch: &branch,
            base_branch: &self.config.base_branch,
            status_endpoint: &self.config.status_endpoint,
        });
        let exec_options = ExecOptions {
            task_key: task_key(task_id),
            cwd: workspace.path.clone(),
            timeout: Duration::from_millis(self.config.agent_timeout_ms),
            max_retries: self.config.max_retries,
            sdk: self.config.sdk,
            build_retry_prompt: Some(self.retry_prompt_builder(prompt.clone())),
            events: None,
        };

        let result = match self.deps.agents.exec_with_retry(&prompt, exec_options).await {
            Ok(result) => result,
            Err(e) => return self.handle_failure(task_id, "", &e.to_string()).await,
        };
        self.update_slot(task_id, |slot| slot.attempt = result.attempts.max(1));

        if !result.success {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| "Agent execution failed".to_string());
            return self.handle_failure(task_id, &result.output, &error).await;
        }

        let has_commits = match self
            .deps
            .vcs
            .has_new_commits(&workspace.path, &self.config.base_branch)
            .await
        {
            Ok(has_commits) => has_commits,
            Err(e) => {
                log::warn!(
                    "[TaskExecutor] Could not inspect commits for {}: {}",
                    task_id,
                    e
                );
                false
            }
        };

        if has_commits {
            self.handle_completion(task, &workspace, &branch).await
        } else {
            self.handle_no_commit(task_id).await
        }
    }

    async fn handle_workspace_failure(&self, task_id: &str, error: String) -> TaskOutcome {
        log::warn!(
            "[TaskExecutor] Failed to acquire workspace for {}: {}",
            task_id,
            error
        );
        self.set_cooldown(task_id, self.config.failure_cooldown_ms);
        self.update_status_best_effort(task_id, TaskStatus::Todo)
            .await;
        TaskOutcome::WorkspaceFailed { error }
    }

    async fn handle_completion(&self, task: &Task, workspace: &Workspace, branch: &str) -> TaskOutcome {
        let task_id = task.id.as_str();
        lock_mutex_recover(&self.anti_thrash).clear(task_id);
        self.update_slot(task_id, |slot| slot.status = SlotStatus::Completing);
        self.update_status_best_effort(task_id, TaskStatus::InReview)
            .await;
        log::info!("[TaskExecutor] {} completed with commits on {}", task_id, branch);

        let pr_url = if self.config.auto_create_pr {
            self.publish(task, &workspace.path, branch).await
        } else {
            None
        };
        TaskOutcome::Completed { pr_url }
    }

    /// Push, open a pull request and optionally enable auto-merge.
    /// Every step is best-effort.
    async fn publish(&self, task: &Task, workspace: &Path, branch: &str) -> Option<String> {
        let base = &self.config.base_branch;
        match self.deps.vcs.push_branch(workspace, branch, base).await {
            Ok(PushOutcome::Pushed) => {}
            Ok(PushOutcome::PushedWithConflicts) => log::warn!(
                "[TaskExecutor] {} conflicts with {}; pushed without merging",
                branch,
                base
            ),
            Err(e) => {
                log::warn!("[TaskExecutor] Failed to push {}: {}", branch, e);
                return None;
            }
        }

        let spec = PullRequestSpec {
            branch: branch.to_string(),
            base_branch: base.clone(),
            title: task.title.clone(),
            body: pull_request_body(task),
        };
        let url = match self.deps.vcs.create_pull_request(workspace, &spec).await {
            Ok(url) => url,
            Err(e) => {
                log::warn!("[TaskExecutor] Failed to open pull request for {}: {}", task.id, e);
                return None;
            }
        };
        log::info!("[TaskExecutor] Opened {} for {}", url, task.id);

        if self.config.auto_merge {
            if let Err(e) = self.deps.vcs.enable_auto_merge(workspace, branch).await {
                log::warn!("[TaskExecutor] Failed to enable auto-merge on {}: {}", branch, e);
            }
        }
        Some(url)
    }

    async fn handle_no_commit(&self, task_id: &str) -> TaskOutcome {
        let record = lock_mutex_recover(&self.anti_thrash).record_no_commit(task_id, now_ms());
        self.deps
            .agents
            .force_new_thread(&task_key(task_id), "completed without commits")
            .await;
        self.update_status_best_effort(task_id, TaskStatus::Todo)
            .await;

        if record.blocked {
            log::warn!(
                "[TaskExecutor] {} finished without commits {} times; blocked until restart",
                task_id,
                record.count
            );
        } else {
            log::warn!(
                "[TaskExecutor] {} finished without commits ({}x); retry in {}",
                task_id,
                record.count,
                format_duration_ms(record.cooldown_ms)
            );
        }

        TaskOutcome::NoCommit {
            count: record.count,
            cooldown_ms: record.cooldown_ms,
            blocked: record.blocked,
        }
    }

    async fn handle_failure(&self, task_id: &str, output: &str, error: &str) -> TaskOutcome {
        let classification = self.deps.classifier.classify(output, Some(error));
        let action = self.deps.classifier.record_error(task_id, &classification);
        log::warn!(
            "[TaskExecutor] {} failed ({}, confidence {:.1}): {}",
            task_id,
            classification.pattern,
            classification.confidence,
            error
        );

        self.update_slot(task_id, |slot| slot.status = SlotStatus::Failed);
        self.deps
            .agents
            .force_new_thread(
                &task_key(task_id),
                &format!("execution failed: {}", classification.pattern),
            )
            .await;
        self.set_cooldown(task_id, self.config.failure_cooldown_ms);
        self.update_status_best_effort(task_id, TaskStatus::Todo)
            .await;

        let paused = action == RecoveryAction::PauseExecutor;
        if paused {
            self.pause(
                self.config.rate_limit_pause_ms,
                format!("{} across multiple tasks", classification.pattern),
            );
        }

        TaskOutcome::Failed {
            error: error.to_string(),
            pattern: classification.pattern,
            paused,
        }
    }

    fn retry_prompt_builder(&self, base_prompt: String) -> RetryPromptBuilder {
        let classifier = Arc::clone(&self.deps.classifier);
        Arc::new(move |ctx: &RetryContext| {
            let classification =
                classifier.classify(&ctx.previous_output, ctx.previous_error.as_deref());
            build_retry_prompt(&base_prompt, ctx, &classification)
        })
    }

    fn set_cooldown(&self, task_id: &str, duration_ms: i64) {
        lock_mutex_recover(&self.state)
            .cooldowns
            .insert(task_id.to_string(), now_ms() + duration_ms);
    }

    fn pause(&self, duration_ms: i64, reason: String) {
        let until = now_ms() + duration_ms;
        lock_mutex_recover(&self.state).paused_until = Some(until);
        log::warn!(
            "[TaskExecutor] Pausing dispatch for {}: {}",
            format_duration_ms(duration_ms),
            reason
        );
        self.emit(ExecutorEvent::ExecutorPaused {
            until_ms: until,
            reason,
        });
    }

    async fn update_status_best_effort(&self, task_id: &str, status: TaskStatus) {
        if let Err(e) = self.deps.tracker.update_task_status(task_id, status).await {
            log::warn!(
                "[TaskExecutor] Failed to move {} to {}: {}",
                task_id,
                status,
                e
            );
        }
    }

    fn emit(&self, event: ExecutorEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn emit_outcome(&self, task_id: &str, outcome: &TaskOutcome) {
        let task_id = task_id.to_string();
        let event = match outcome {
            TaskOutcome::Skipped => return,
            TaskOutcome::Completed { pr_url } => ExecutorEvent::TaskCompleted {
                task_id,
                pr_url: pr_url.clone(),
            },
            TaskOutcome::NoCommit {
                count,
                cooldown_ms,
                blocked,
            } => ExecutorEvent::TaskNoCommit {
                task_id,
                count: *count,
                cooldown_ms: *cooldown_ms,
                blocked: *blocked,
            },
            TaskOutcome::WorkspaceFailed { error } | TaskOutcome::Aborted { error } => {
                ExecutorEvent::TaskFailed {
                    task_id,
                    error: error.clone(),
                    pattern: None,
                }
            }
            TaskOutcome::Failed { error, pattern, .. } => ExecutorEvent::TaskFailed {
                task_id,
                error: error.clone(),
                pattern: Some(*pattern),
            },
        };
        self.emit(event);
    }
}

fn pull_request_body(task: &Task) -> String {
    let mut body = String::new();
    if !task.description.trim().is_empty() {
        body.push_str(task.description.trim());
        body.push_str("\n\n");
    }
    body.push_str(&format!("Task: `{}`", task.id));
    body
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task flow panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_key() {
        assert_eq!(task_key("abc"), "task:abc");
    }

    #[test]
    fn test_branch_for_prefers_task_branch() {
        let mut task = Task::new("7f3a9c21", "feat(api): add endpoint");
        assert_eq!(branch_for(&task), "task/7f3a9c21-e727ef61-feat-api-add-endpoint");

        task.branch_name = Some("feature/custom".to_string());
        assert_eq!(branch_for(&task), "feature/custom");

        task.branch_name = Some("   ".to_string());
        assert_eq!(branch_for(&task), "task/7f3a9c21-e727ef61-feat-api-add-endpoint");
    }

    #[test]
    fn test_branch_for_separates_tasks_sharing_id_prefix() {
        let a = Task::new("backlog-item-1", "Fix flaky test");
        let b = Task::new("backlog-item-2", "Fix flaky test");
        assert_ne!(branch_for(&a), branch_for(&b));
    }

    #[test]
    fn test_pull_request_body() {
        let mut task = Task::new("t1", "Fix it");
        assert_eq!(pull_request_body(&task), "Task: `t1`");
        task.description = "Details here\n".to_string();
        assert_eq!(pull_request_body(&task), "Details here\n\nTask: `t1`");
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42);
        assert_eq!(panic_message(boxed.as_ref()), "task flow panicked");
    }
}
