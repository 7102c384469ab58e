//! Fleet membership and capacity
//!
//! `FleetCoordinator` turns raw presence records into a `FleetState`: which
//! peers share this repository, how many slots the fleet has in total, and
//! whether this instance is the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::identity::{compute_fingerprint, RepoFingerprint};
use super::presence::{PeerRecord, PresenceSource, DEFAULT_PEER_PARALLELISM};
use crate::utils::{lock_mutex_recover, now_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FleetMode {
    #[default]
    Solo,
    Fleet,
    Maintenance,
}

impl FleetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FleetMode::Solo => "solo",
            FleetMode::Fleet => "fleet",
            FleetMode::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for FleetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of fleet membership as seen by this instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetState {
    pub repo_fingerprint: Option<RepoFingerprint>,
    pub is_coordinator: bool,
    pub fleet_size: usize,
    pub total_slots: usize,
    pub local_slots: usize,
    pub mode: FleetMode,
    pub peers: Vec<PeerRecord>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl FleetState {
    /// A lone instance: its own coordinator, only local capacity
    pub fn solo(repo_fingerprint: Option<RepoFingerprint>, local_slots: usize) -> Self {
        Self {
            repo_fingerprint,
            is_coordinator: true,
            fleet_size: 1,
            total_slots: local_slots,
            local_slots,
            mode: FleetMode::Solo,
            peers: Vec::new(),
            last_sync_at: None,
        }
    }
}

impl Default for FleetState {
    fn default() -> Self {
        Self::solo(None, 0)
    }
}

pub struct FleetCoordinator {
    instance_id: String,
    instance_label: Option<String>,
    capabilities: Vec<String>,
    default_peer_parallelism: usize,
    presence: Arc<dyn PresenceSource>,
    state: Mutex<FleetState>,
    maintenance: AtomicBool,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl FleetCoordinator {
    pub fn new(instance_id: &str, presence: Arc<dyn PresenceSource>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            instance_label: None,
            capabilities: Vec::new(),
            default_peer_parallelism: DEFAULT_PEER_PARALLELISM,
            presence,
            state: Mutex::new(FleetState::default()),
            maintenance: AtomicBool::new(false),
            shutdown_tx: Mutex::new(None),
        }
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.instance_label = label;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_default_peer_parallelism(mut self, parallelism: usize) -> Self {
        self.default_peer_parallelism = parallelism;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Current fleet state
    pub fn state(&self) -> FleetState {
        lock_mutex_recover(&self.state).clone()
    }

    pub fn is_coordinator(&self) -> bool {
        lock_mutex_recover(&self.state).is_coordinator
    }

    /// Compute the repository fingerprint and perform the first refresh.
    ///
    /// Without a fingerprint the instance stays solo for the lifetime of
    /// this initialization.
    pub async fn init(&self, repo_root: &Path, local_slots: usize, ttl_ms: i64) -> FleetState {
        let root = repo_root.to_path_buf();
        let fingerprint = tokio::task::spawn_blocking(move || compute_fingerprint(&root))
            .await
            .unwrap_or_else(|e| {
                log::warn!("[FleetCoordinator] Fingerprint computation panicked: {}", e);
                None
            });

        match &fingerprint {
            Some(fp) => log::info!(
                "[FleetCoordinator] Repository fingerprint {} ({}: {})",
                fp.hash,
                fp.method,
                fp.normalized
            ),
            None => log::info!(
                "[FleetCoordinator] No repository fingerprint for {:?}, running solo",
                repo_root
            ),
        }

        let has_fingerprint = fingerprint.is_some();
        self.store(FleetState::solo(fingerprint, local_slots));

        if has_fingerprint {
            self.refresh(ttl_ms).await
        } else {
            self.state()
        }
    }

    /// Re-read presence and recompute membership, capacity and leadership.
    ///
    /// Never fails: if the presence source is unavailable the previous state
    /// is kept as-is.
    pub async fn refresh(&self, ttl_ms: i64) -> FleetState {
        let previous = self.state();
        let local_slots = previous.local_slots;

        let fingerprint = match &previous.repo_fingerprint {
            Some(fp) => fp.clone(),
            None => return previous,
        };

        let now = now_ms();
        let instances = match self.presence.list_active_instances(now, ttl_ms).await {
            Ok(instances) => instances,
            Err(e) => {
                log::warn!(
                    "[FleetCoordinator] Presence source unavailable, keeping previous state: {}",
                    e
                );
                return previous;
            }
        };

        if instances.len() < 2 {
            let mut next = FleetState::solo(Some(fingerprint), local_slots);
            next.last_sync_at = Some(Utc::now());
            return self.store(next);
        }

        let peers: Vec<PeerRecord> = instances
            .into_iter()
            .filter(|p| p.repo_fingerprint.as_deref() == Some(fingerprint.hash.as_str()))
            .collect();

        let self_listed = peers.iter().any(|p| p.instance_id == self.instance_id);
        let mut total_slots: usize = peers
            .iter()
            .map(|p| p.parallelism_or(self.default_peer_parallelism))
            .sum();
        let mut fleet_size = peers.len();
        if !self_listed {
            total_slots += local_slots;
            fleet_size += 1;
        }
        let fleet_size = fleet_size.max(1);
        let total_slots = total_slots.max(local_slots);

        let is_coordinator = match self.presence.select_coordinator(now, ttl_ms).await {
            Ok(Some(leader)) => leader.instance_id == self.instance_id,
            Ok(None) => false,
            Err(e) => {
                log::warn!(
                    "[FleetCoordinator] Coordinator lookup failed, keeping previous role: {}",
                    e
                );
                previous.is_coordinator
            }
        };

        let next = FleetState {
            repo_fingerprint: Some(fingerprint),
            is_coordinator,
            fleet_size,
            total_slots,
            local_slots,
            mode: if fleet_size > 1 {
                FleetMode::Fleet
            } else {
                FleetMode::Solo
            },
            peers,
            last_sync_at: Some(Utc::now()),
        };

        if next.fleet_size != previous.fleet_size || next.is_coordinator != previous.is_coordinator
        {
            log::info!(
                "[FleetCoordinator] Fleet size {} ({} slots), coordinator: {}",
                next.fleet_size,
                next.total_slots,
                next.is_coordinator
            );
        }

        self.store(next)
    }

    /// Toggle maintenance mode (reported by the backlog controller)
    pub fn set_maintenance(&self, enabled: bool) {
        let was = self.maintenance.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            log::info!(
                "[FleetCoordinator] Maintenance mode {}",
                if enabled { "entered" } else { "left" }
            );
        }
        let mut state = lock_mutex_recover(&self.state);
        state.mode = self.effective_mode(state.fleet_size);
    }

    pub fn is_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    fn effective_mode(&self, fleet_size: usize) -> FleetMode {
        if self.is_maintenance() {
            FleetMode::Maintenance
        } else if fleet_size > 1 {
            FleetMode::Fleet
        } else {
            FleetMode::Solo
        }
    }

    fn store(&self, mut next: FleetState) -> FleetState {
        next.mode = self.effective_mode(next.fleet_size);
        let mut state = lock_mutex_recover(&self.state);
        *state = next.clone();
        next
    }

    /// Merge this instance's fleet data into the presence payload the
    /// registry broadcasts. Keys already present in `extra` are overwritten.
    pub fn build_presence_payload(&self, extra: serde_json::Value) -> serde_json::Value {
        let state = self.state();
        let mut payload = match extra {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("extra".to_string(), other);
                map
            }
        };

        payload.insert("instance_id".into(), self.instance_id.clone().into());
        payload.insert(
            "repo_fingerprint".into(),
            state
                .repo_fingerprint
                .as_ref()
                .map(|fp| serde_json::Value::String(fp.hash.clone()))
                .unwrap_or(serde_json::Value::Null),
        );
        payload.insert("max_parallel".into(), state.local_slots.into());
        payload.insert("fleet_mode".into(), state.mode.as_str().into());
        payload.insert("is_coordinator".into(), state.is_coordinator.into());
        payload.insert("capabilities".into(), self.capabilities.clone().into());
        if let Some(label) = &self.instance_label {
            payload.insert("instance_label".into(), label.clone().into());
        }
        if let Some(host) = sysinfo::System::host_name() {
            payload.entry("host").or_insert_with(|| host.into());
        }

        serde_json::Value::Object(payload)
    }

    /// Refresh on a timer until `stop_refresh_loop` is called
    pub fn start_refresh_loop(self: &Arc<Self>, every: Duration, ttl_ms: i64) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        if let Some(previous) = lock_mutex_recover(&self.shutdown_tx).replace(shutdown_tx) {
            let _ = previous.try_send(());
        }

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick fires immediately; init already refreshed
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        coordinator.refresh(ttl_ms).await;
                    }
                    _ = shutdown_rx.recv() => {
                        log::debug!("[FleetCoordinator] Refresh loop shutting down");
                        break;
                    }
                }
            }
        });
    }

    pub fn stop_refresh_loop(&self) {
        if let Some(tx) = lock_mutex_recover(&self.shutdown_tx).take() {
            let _ = tx.try_send(());
        }
    }
}
