//! Process-level wiring
//!
//! `Orchestrator` owns one `FleetCoordinator`, one `BacklogController` and one
//! `TaskExecutor` and drives them through `init -> start -> stop`.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::agents::{CliAgentPool, PatternClassifier};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::executor::{ExecutorDeps, ExecutorEvent, ExecutorStatus, TaskExecutor};
use crate::fleet::{
    BacklogController, FleetCoordinator, FleetState, GenerationDecision, MaintenanceCheck,
    PeerRecord, PresenceSource, StaticPresence,
};
use crate::git::GitCliForge;
use crate::tracker::{FileTaskBackend, TaskBackend};
use crate::utils::lock_mutex_recover;
use crate::workspace::GitWorktreeManager;

/// Result of one backlog review
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogReview {
    pub maintenance: MaintenanceCheck,
    pub decision: GenerationDecision,
}

/// Combined status for the CLI and external control surfaces
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub instance_id: String,
    pub fleet: FleetState,
    pub executor: ExecutorStatus,
}

pub struct Orchestrator {
    repo_root: PathBuf,
    config: OrchestratorConfig,
    instance_id: String,
    tracker: Arc<dyn TaskBackend>,
    coordinator: Arc<FleetCoordinator>,
    backlog: BacklogController,
    executor: Arc<TaskExecutor>,
    started: AtomicBool,
    review_shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl Orchestrator {
    pub fn new(
        repo_root: &Path,
        config: OrchestratorConfig,
        instance_id: &str,
        deps: ExecutorDeps,
        presence: Arc<dyn PresenceSource>,
        events: Option<mpsc::UnboundedSender<ExecutorEvent>>,
    ) -> Self {
        let coordinator = FleetCoordinator::new(instance_id, presence)
            .with_label(config.instance.label.clone())
            .with_capabilities(config.instance.capabilities.clone())
            .with_default_peer_parallelism(config.fleet.default_peer_parallelism);

        let tracker = Arc::clone(&deps.tracker);
        let mut executor =
            TaskExecutor::for_repo(config.executor.clone(), instance_id, deps, repo_root);
        if let Some(events) = events {
            executor = executor.with_events(events);
        }

        Self {
            repo_root: repo_root.to_path_buf(),
            backlog: BacklogController::new(config.backlog.clone()),
            config,
            instance_id: instance_id.to_string(),
            tracker,
            coordinator: Arc::new(coordinator),
            executor: Arc::new(executor),
            started: AtomicBool::new(false),
            review_shutdown_tx: Mutex::new(None),
        }
    }

    /// Orchestrator wired to the bundled adapters: the JSON kanban, the git
    /// worktree pool, the agent CLIs, the regex classifier, `git`/`gh` and an
    /// in-process presence list containing only this instance.
    pub fn with_default_adapters(
        repo_root: &Path,
        config: OrchestratorConfig,
        instance_id: &str,
        events: Option<mpsc::UnboundedSender<ExecutorEvent>>,
    ) -> Self {
        let deps = ExecutorDeps {
            tracker: Arc::new(FileTaskBackend::for_repo(repo_root)),
            workspaces: Arc::new(GitWorktreeManager::new(repo_root)),
            agents: Arc::new(CliAgentPool::new()),
            classifier: Arc::new(PatternClassifier::new()),
            vcs: Arc::new(GitCliForge::new()),
        };

        let mut local = PeerRecord::new(instance_id);
        local.max_parallel = Some(config.executor.max_parallel);
        local.capabilities = config.instance.capabilities.clone();
        local.instance_label = config.instance.label.clone();
        // never expires
        local.last_seen_ms = i64::MAX;
        let presence = Arc::new(StaticPresence::new(vec![local]));

        Self::new(repo_root, config, instance_id, deps, presence, events)
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<FleetCoordinator> {
        &self.coordinator
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn backlog(&self) -> &BacklogController {
        &self.backlog
    }

    /// Prepare `.fleet/`, compute the fingerprint and do the first fleet refresh
    pub async fn init(&self) -> Result<FleetState> {
        crate::file_storage::init_fleet_dir(&self.repo_root).map_err(OrchestratorError::Other)?;

        let state = self
            .coordinator
            .init(
                &self.repo_root,
                self.config.executor.max_parallel,
                self.config.fleet.presence_ttl_ms,
            )
            .await;
        log::info!(
            "[Orchestrator] Instance {} initialized: mode={}, fleet size={}, total slots={}",
            self.instance_id,
            state.mode,
            state.fleet_size,
            state.total_slots
        );
        Ok(state)
    }

    /// Count tasks, report maintenance mode and decide whether the backlog
    /// needs to grow. Generation itself belongs to the external planner, so
    /// the trigger is not marked here.
    pub async fn review_backlog(&self) -> Result<BacklogReview> {
        let project = self.executor.resolve_project().await?;
        let counts = self.tracker.count_tasks(&project.id).await?;

        let maintenance = self.backlog.report_counts(&counts, &self.coordinator);
        let fleet = self.coordinator.state();
        let decision = self
            .backlog
            .should_auto_generate(counts.backlog_remaining + counts.todo, &fleet);

        if maintenance.is_maintenance_mode {
            log::info!("[Orchestrator] Maintenance mode: {}", maintenance.reason);
        }
        if decision.should_generate {
            log::info!(
                "[Orchestrator] Backlog generation needed: {}{}",
                decision.reason,
                if decision.requires_approval {
                    " (requires approval)"
                } else {
                    ""
                }
            );
        }

        Ok(BacklogReview {
            maintenance,
            decision,
        })
    }

    /// Start the fleet refresh timer, the backlog review timer and the poll loop
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            log::debug!("[Orchestrator] Already started");
            return;
        }

        let every = Duration::from_millis(self.config.fleet.refresh_interval_ms.max(1));
        self.coordinator
            .start_refresh_loop(every, self.config.fleet.presence_ttl_ms);
        self.start_review_loop(every);
        self.executor.start();
    }

    fn start_review_loop(self: &Arc<Self>, every: Duration) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *lock_mutex_recover(&self.review_shutdown_tx) = Some(shutdown_tx);

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = orchestrator.review_backlog().await {
                            log::warn!("[Orchestrator] Backlog review failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    /// Graceful shutdown. Returns whether every in-flight task drained.
    pub async fn stop(&self) -> bool {
        if let Some(tx) = lock_mutex_recover(&self.review_shutdown_tx).take() {
            let _ = tx.try_send(());
        }
        self.coordinator.stop_refresh_loop();
        let drained = self.executor.stop().await;
        self.started.store(false, Ordering::SeqCst);
        drained
    }

    /// Payload this instance contributes to the presence broadcast
    pub fn presence_payload(&self, extra: serde_json::Value) -> serde_json::Value {
        self.coordinator.build_presence_payload(extra)
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            instance_id: self.instance_id.clone(),
            fleet: self.coordinator.state(),
            executor: self.executor.status(),
        }
    }
}

static GLOBAL: OnceLock<Arc<Orchestrator>> = OnceLock::new();

/// Install the process-wide orchestrator. Fails if one is already installed.
pub fn install_global(orchestrator: Orchestrator) -> Result<Arc<Orchestrator>> {
    let orchestrator = Arc::new(orchestrator);
    GLOBAL
        .set(Arc::clone(&orchestrator))
        .map_err(|_| OrchestratorError::Other("Orchestrator already installed".to_string()))?;
    Ok(orchestrator)
}

/// The process-wide orchestrator, if one was installed
pub fn global() -> Option<Arc<Orchestrator>> {
    GLOBAL.get().cloned()
}
