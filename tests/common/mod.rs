// In-memory collaborators for driving the executor and the fleet coordinator

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use fleet_orchestrator_lib::agents::{
    AgentPool, ErrorClassifier, ExecOptions, ExecResult, PatternClassifier, RetryContext,
};
use fleet_orchestrator_lib::config::ExecutorConfig;
use fleet_orchestrator_lib::error::{OrchestratorError, Result};
use fleet_orchestrator_lib::executor::{ExecutorDeps, TaskExecutor};
use fleet_orchestrator_lib::fleet::{PeerRecord, PresenceSource};
use fleet_orchestrator_lib::git::{PullRequestSpec, PushOutcome, VersionControl};
use fleet_orchestrator_lib::models::{Project, Task, TaskStatus};
use fleet_orchestrator_lib::tracker::TaskBackend;
use fleet_orchestrator_lib::workspace::{AcquireOptions, Workspace, WorkspaceManager};

// =============================================================================
// Task tracker
// =============================================================================

pub struct MockTracker {
    pub projects: Vec<Project>,
    pub tasks: Mutex<Vec<Task>>,
    /// Every status update, in order
    pub updates: Mutex<Vec<(String, TaskStatus)>>,
    pub fail_updates: AtomicBool,
}

impl MockTracker {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            projects: vec![Project {
                id: "p1".to_string(),
                name: "Platform".to_string(),
            }],
            tasks: Mutex::new(tasks),
            updates: Mutex::new(Vec::new()),
            fail_updates: AtomicBool::new(false),
        }
    }

    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == task_id)
            .map(|t| t.status)
    }

    pub fn task(&self, task_id: &str) -> Task {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
            .unwrap()
    }

    pub fn updates_for(&self, task_id: &str) -> Vec<TaskStatus> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(_, s)| *s)
            .collect()
    }
}

#[async_trait]
impl TaskBackend for MockTracker {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.projects.clone())
    }

    async fn list_tasks(&self, _project_id: &str, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == task_id)
            .cloned())
    }

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<Task> {
        self.updates
            .lock()
            .unwrap()
            .push((task_id.to_string(), status));
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Tracker("tracker offline".to_string()));
        }
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| OrchestratorError::Tracker(format!("unknown task {}", task_id)))?;
        task.status = status;
        Ok(task.clone())
    }
}

// =============================================================================
// Workspaces
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceMode {
    Ok,
    Fail,
    /// Returns a path that does not exist
    InvalidPath,
}

pub struct MockWorkspaces {
    root: PathBuf,
    pub mode: Mutex<WorkspaceMode>,
    pub acquired: Mutex<Vec<(String, String, AcquireOptions)>>,
    pub releases: Mutex<HashMap<String, usize>>,
}

impl MockWorkspaces {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            mode: Mutex::new(WorkspaceMode::Ok),
            acquired: Mutex::new(Vec::new()),
            releases: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_mode(&self, mode: WorkspaceMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn release_count(&self, task_id: &str) -> usize {
        self.releases
            .lock()
            .unwrap()
            .get(task_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl WorkspaceManager for MockWorkspaces {
    async fn acquire_worktree(
        &self,
        branch: &str,
        task_id: &str,
        options: &AcquireOptions,
    ) -> Result<Workspace> {
        self.acquired.lock().unwrap().push((
            branch.to_string(),
            task_id.to_string(),
            options.clone(),
        ));
        let mode = *self.mode.lock().unwrap();
        match mode {
            WorkspaceMode::Fail => Err(OrchestratorError::Workspace("disk full".to_string())),
            WorkspaceMode::InvalidPath => Ok(Workspace {
                path: self.root.join("does-not-exist"),
                branch: branch.to_string(),
            }),
            WorkspaceMode::Ok => {
                let path = self.root.join(task_id);
                std::fs::create_dir_all(&path)?;
                Ok(Workspace {
                    path,
                    branch: branch.to_string(),
                })
            }
        }
    }

    async fn release_worktree(&self, task_id: &str) -> Result<()> {
        *self
            .releases
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }
}

// =============================================================================
// Agent pool
// =============================================================================

#[derive(Debug, Clone)]
pub enum AgentBehavior {
    Succeed,
    /// Returns a failed `ExecResult` with this error
    Fail(String),
    /// `exec_with_retry` itself returns an error
    Error(String),
    Panic,
}

pub struct MockAgents {
    pub behavior: Mutex<AgentBehavior>,
    pub prompts: Mutex<Vec<String>>,
    pub options: Mutex<Vec<ExecOptions>>,
    pub forced_new_threads: Mutex<Vec<(String, String)>>,
    pub invalidated: Mutex<Vec<String>>,
    /// When set, each execution waits for a permit before returning
    pub gate: Option<Arc<Semaphore>>,
    pub in_flight: AtomicUsize,
}

impl MockAgents {
    pub fn new(behavior: AgentBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            prompts: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
            forced_new_threads: Mutex::new(Vec::new()),
            invalidated: Mutex::new(Vec::new()),
            gate: None,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn gated(behavior: AgentBehavior, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(behavior)
        }
    }

    pub fn set_behavior(&self, behavior: AgentBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn forced_keys(&self) -> Vec<String> {
        self.forced_new_threads
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl AgentPool for MockAgents {
    async fn exec_with_retry(&self, prompt: &str, options: ExecOptions) -> Result<ExecResult> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.options.lock().unwrap().push(options);
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            AgentBehavior::Succeed => Ok(ExecResult {
                success: true,
                attempts: 1,
                error: None,
                output: "done".to_string(),
            }),
            AgentBehavior::Fail(error) => Ok(ExecResult {
                success: false,
                attempts: 3,
                error: Some(error),
                output: String::new(),
            }),
            AgentBehavior::Error(error) => Err(OrchestratorError::Agent(error)),
            AgentBehavior::Panic => panic!("agent pool exploded"),
        }
    }

    async fn force_new_thread(&self, task_key: &str, reason: &str) {
        self.forced_new_threads
            .lock()
            .unwrap()
            .push((task_key.to_string(), reason.to_string()));
    }

    async fn invalidate_thread(&self, task_key: &str) {
        self.invalidated.lock().unwrap().push(task_key.to_string());
    }
}

// =============================================================================
// Version control
// =============================================================================

pub struct MockVcs {
    pub has_commits: AtomicBool,
    pub pushes: Mutex<Vec<String>>,
    pub pull_requests: Mutex<Vec<PullRequestSpec>>,
    pub auto_merges: Mutex<Vec<String>>,
    pub fail_push: AtomicBool,
}

impl MockVcs {
    pub fn new(has_commits: bool) -> Self {
        Self {
            has_commits: AtomicBool::new(has_commits),
            pushes: Mutex::new(Vec::new()),
            pull_requests: Mutex::new(Vec::new()),
            auto_merges: Mutex::new(Vec::new()),
            fail_push: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl VersionControl for MockVcs {
    async fn has_new_commits(&self, _workspace: &Path, _base_branch: &str) -> Result<bool> {
        Ok(self.has_commits.load(Ordering::SeqCst))
    }

    async fn push_branch(
        &self,
        _workspace: &Path,
        branch: &str,
        _base_branch: &str,
    ) -> Result<PushOutcome> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Forge("remote rejected".to_string()));
        }
        self.pushes.lock().unwrap().push(branch.to_string());
        Ok(PushOutcome::Pushed)
    }

    async fn create_pull_request(&self, _workspace: &Path, pr: &PullRequestSpec) -> Result<String> {
        let mut prs = self.pull_requests.lock().unwrap();
        prs.push(pr.clone());
        Ok(format!("https://github.com/acme/repo/pull/{}", prs.len()))
    }

    async fn enable_auto_merge(&self, _workspace: &Path, branch: &str) -> Result<()> {
        self.auto_merges.lock().unwrap().push(branch.to_string());
        Ok(())
    }
}

// =============================================================================
// Presence
// =============================================================================

/// Presence source whose availability can be toggled
pub struct FlakyPresence {
    pub peers: Mutex<Vec<PeerRecord>>,
    pub coordinator: Mutex<Option<String>>,
    pub available: AtomicBool,
}

impl FlakyPresence {
    pub fn new(peers: Vec<PeerRecord>) -> Self {
        Self {
            peers: Mutex::new(peers),
            coordinator: Mutex::new(None),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OrchestratorError::Presence("registry unreachable".to_string()))
        }
    }
}

#[async_trait]
impl PresenceSource for FlakyPresence {
    async fn list_active_instances(&self, _now_ms: i64, _ttl_ms: i64) -> Result<Vec<PeerRecord>> {
        self.check()?;
        Ok(self.peers.lock().unwrap().clone())
    }

    async fn select_coordinator(&self, _now_ms: i64, _ttl_ms: i64) -> Result<Option<PeerRecord>> {
        self.check()?;
        let coordinator = self.coordinator.lock().unwrap().clone();
        Ok(coordinator.and_then(|id| {
            self.peers
                .lock()
                .unwrap()
                .iter()
                .find(|p| p.instance_id == id)
                .cloned()
        }))
    }
}

pub fn peer(id: &str, fingerprint: &str, max_parallel: Option<usize>) -> PeerRecord {
    let mut record = PeerRecord::new(id);
    record.repo_fingerprint = Some(fingerprint.to_string());
    record.max_parallel = max_parallel;
    record
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub tracker: Arc<MockTracker>,
    pub workspaces: Arc<MockWorkspaces>,
    pub agents: Arc<MockAgents>,
    pub vcs: Arc<MockVcs>,
    pub classifier: Arc<PatternClassifier>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(tasks: Vec<Task>, agents: MockAgents, has_commits: bool) -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        Self {
            tracker: Arc::new(MockTracker::new(tasks)),
            workspaces: Arc::new(MockWorkspaces::new(&dir.path().join("worktrees"))),
            agents: Arc::new(agents),
            vcs: Arc::new(MockVcs::new(has_commits)),
            classifier: Arc::new(PatternClassifier::new()),
            dir,
        }
    }

    pub fn deps(&self) -> ExecutorDeps {
        ExecutorDeps {
            tracker: self.tracker.clone(),
            workspaces: self.workspaces.clone(),
            agents: self.agents.clone(),
            classifier: self.classifier.clone() as Arc<dyn ErrorClassifier>,
            vcs: self.vcs.clone(),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_parallel: 2,
            poll_interval_ms: 20,
            shutdown_grace_ms: 2_000,
            state_dir: Some(self.state_dir()),
            ..ExecutorConfig::default()
        }
    }

    pub fn executor(&self, config: ExecutorConfig) -> Arc<TaskExecutor> {
        Arc::new(TaskExecutor::for_repo(
            config,
            "ws-test",
            self.deps(),
            self.dir.path(),
        ))
    }
}

pub fn todo_tasks(ids: &[&str]) -> Vec<Task> {
    ids.iter()
        .map(|id| Task::new(id, &format!("feat({}): do {}", id, id)))
        .collect()
}

/// Poll `cond` every 10ms until it holds or `timeout` passes
pub async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Retry context as the agent pool would build it
pub fn retry_context(error: &str) -> RetryContext {
    RetryContext {
        task_key: "task:t1".to_string(),
        attempt: 2,
        max_retries: 2,
        previous_error: Some(error.to_string()),
        previous_output: String::new(),
    }
}
