use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use fleet_orchestrator_lib::agents::AgentSdk;
use fleet_orchestrator_lib::config::{
    merge_overrides, resolve_instance_id, ConfigManager, ConfigOverrides, INSTANCE_ID_ENV,
};
use fleet_orchestrator_lib::executor::ExecutorEvent;
use fleet_orchestrator_lib::fleet::{
    assign_to_workstations, backlog_depth, build_waves, compute_fingerprint, BacklogPolicy,
    PeerRecord,
};
use fleet_orchestrator_lib::shutdown::{self, ShutdownHandler, ShutdownReport, ShutdownState};
use fleet_orchestrator_lib::{install_global, Orchestrator, Task};

/// Fleet orchestrator - coordinates autonomous coding agents across workstations
#[derive(Parser, Debug)]
#[command(name = "fleet-orchestrator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the repository fingerprint used to group fleet peers
    Fingerprint {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },

    /// Split tasks into conflict-free waves and assign them to workstations
    Waves {
        /// JSON array of tasks
        #[arg(long)]
        tasks: PathBuf,
        /// JSON array of peer records
        #[arg(long)]
        peers: Option<PathBuf>,
    },

    /// Compute the target backlog depth for a fleet
    Backlog {
        /// Total execution slots across the fleet
        #[arg(long)]
        slots: usize,
        /// Tasks currently waiting
        #[arg(long)]
        backlog: usize,
        #[arg(long, default_value = "3")]
        multiplier: usize,
        #[arg(long, default_value = "6")]
        min_tasks: usize,
        #[arg(long, default_value = "100")]
        max_tasks: usize,
    },

    /// Run the orchestrator until interrupted
    Run {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Pin the instance id (or set FLEET_INSTANCE_ID)
        #[arg(long)]
        instance_id: Option<String>,
        #[arg(long)]
        max_parallel: Option<usize>,
        /// Project name on the task tracker
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        base_branch: Option<String>,
        /// Agent CLI: claude, codex or opencode
        #[arg(long)]
        sdk: Option<AgentSdk>,
        #[arg(long)]
        poll_interval_ms: Option<u64>,
        /// Do not push branches or open pull requests
        #[arg(long)]
        no_pr: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Command::Fingerprint { repo } => print_fingerprint(&repo),
        Command::Waves { tasks, peers } => print_waves(&tasks, peers.as_deref()),
        Command::Backlog {
            slots,
            backlog,
            multiplier,
            min_tasks,
            max_tasks,
        } => {
            let policy = BacklogPolicy {
                buffer_multiplier: multiplier,
                min_tasks,
                max_tasks,
                ..BacklogPolicy::default()
            };
            print_json(&backlog_depth(slots, backlog, &policy))
        }
        Command::Run {
            repo,
            instance_id,
            max_parallel,
            project,
            base_branch,
            sdk,
            poll_interval_ms,
            no_pr,
        } => {
            let overrides = ConfigOverrides {
                instance_id,
                max_parallel,
                project,
                base_branch,
                sdk,
                poll_interval_ms,
                auto_create_pr: no_pr.then_some(false),
            };
            let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
            rt.block_on(run(&repo, overrides))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
}

fn print_fingerprint(repo: &Path) -> Result<()> {
    let fingerprint = compute_fingerprint(repo)
        .ok_or_else(|| anyhow!("No remote origin or commits found in {:?}", repo))?;
    print_json(&fingerprint)
}

fn print_waves(tasks_path: &Path, peers_path: Option<&Path>) -> Result<()> {
    let tasks: Vec<Task> = read_json_file(tasks_path)?;
    let tasks: Vec<Task> = tasks.into_iter().map(Task::normalized).collect();
    let waves = build_waves(&tasks);

    let assignments = match peers_path {
        Some(path) => {
            let peers: Vec<PeerRecord> = read_json_file(path)?;
            let lookup: HashMap<String, Task> =
                tasks.iter().map(|t| (t.id.clone(), t.clone())).collect();
            assign_to_workstations(&waves, &peers, &lookup)
        }
        None => Vec::new(),
    };

    print_json(&serde_json::json!({
        "waves": waves,
        "assignments": assignments,
    }))
}

async fn run(repo: &Path, overrides: ConfigOverrides) -> Result<()> {
    let repo = repo
        .canonicalize()
        .with_context(|| format!("Repository path {:?} does not exist", repo))?;

    let file_config = ConfigManager::new(&repo).read()?;
    let config = merge_overrides(&file_config, &overrides, std::env::var(INSTANCE_ID_ENV).ok());
    let instance_id = resolve_instance_id(&config)?;

    let shutdown_state = ShutdownState::new();
    if let Err(e) = shutdown::register_signal_handlers(shutdown_state.clone()) {
        log::warn!("Failed to register signal handlers: {}", e);
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel::<ExecutorEvent>();
    tokio::spawn(log_executor_events(events_rx));

    let orchestrator = install_global(Orchestrator::with_default_adapters(
        &repo,
        config,
        &instance_id,
        Some(events_tx),
    ))?;
    orchestrator.init().await?;
    orchestrator.start();

    shutdown_state
        .wait_for_shutdown(Duration::from_millis(250))
        .await;

    let handler = ShutdownHandler::with_state(shutdown_state);
    let report = handler
        .handle_shutdown(|| async {
            let drained = orchestrator.stop().await;
            let still_running = orchestrator
                .executor()
                .status()
                .active_slots
                .into_iter()
                .map(|slot| slot.task_id)
                .collect();
            ShutdownReport {
                drained,
                still_running,
            }
        })
        .await;

    if !report.drained {
        log::warn!("Exiting with unfinished tasks; their worktrees are left in place");
    }
    Ok(())
}

async fn log_executor_events(mut events: mpsc::UnboundedReceiver<ExecutorEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => log::debug!("[Events] {}", json),
            Err(e) => log::warn!("[Events] Failed to serialize event: {}", e),
        }
    }
}
