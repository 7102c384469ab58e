//! Presence registry interface
//!
//! The registry that tracks live workstations and elects a coordinator lives
//! outside this crate. The orchestrator only reads peer records from it and
//! contributes its own payload (see `FleetCoordinator::build_presence_payload`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::Result;
use crate::utils::lock_mutex_recover;

/// Advertised parallelism assumed for peers that do not publish one
pub const DEFAULT_PEER_PARALLELISM: usize = 6;

/// One workstation as reported by the presence registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub instance_id: String,
    #[serde(default)]
    pub max_parallel: Option<usize>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub repo_fingerprint: Option<String>,
    #[serde(default)]
    pub is_coordinator: bool,
    #[serde(default)]
    pub instance_label: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    /// Last heartbeat, epoch milliseconds
    #[serde(default)]
    pub last_seen_ms: i64,
}

impl PeerRecord {
    pub fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            max_parallel: None,
            capabilities: Vec::new(),
            repo_fingerprint: None,
            is_coordinator: false,
            instance_label: None,
            host: None,
            last_seen_ms: 0,
        }
    }

    /// Advertised parallelism, falling back to `default`
    pub fn parallelism_or(&self, default: usize) -> usize {
        self.max_parallel.unwrap_or(default)
    }

    pub fn is_active(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.last_seen_ms <= ttl_ms
    }
}

/// Source of presence information
#[async_trait]
pub trait PresenceSource: Send + Sync {
    /// All instances that sent a heartbeat within `ttl_ms` of `now_ms`
    async fn list_active_instances(&self, now_ms: i64, ttl_ms: i64) -> Result<Vec<PeerRecord>>;

    /// The currently elected coordinator among the active instances
    async fn select_coordinator(&self, now_ms: i64, ttl_ms: i64) -> Result<Option<PeerRecord>>;
}

/// In-process presence source holding a fixed, updatable peer list.
///
/// Coordinator selection picks the peer flagged `is_coordinator`, otherwise
/// the active peer with the smallest instance id.
#[derive(Default)]
pub struct StaticPresence {
    peers: Mutex<Vec<PeerRecord>>,
}

impl StaticPresence {
    pub fn new(peers: Vec<PeerRecord>) -> Self {
        Self {
            peers: Mutex::new(peers),
        }
    }

    pub fn set_peers(&self, peers: Vec<PeerRecord>) {
        *lock_mutex_recover(&self.peers) = peers;
    }

    /// Insert or replace the record with the same instance id
    pub fn upsert(&self, record: PeerRecord) {
        let mut peers = lock_mutex_recover(&self.peers);
        match peers.iter_mut().find(|p| p.instance_id == record.instance_id) {
            Some(existing) => *existing = record,
            None => peers.push(record),
        }
    }
}

#[async_trait]
impl PresenceSource for StaticPresence {
    async fn list_active_instances(&self, now_ms: i64, ttl_ms: i64) -> Result<Vec<PeerRecord>> {
        Ok(lock_mutex_recover(&self.peers)
            .iter()
            .filter(|p| p.is_active(now_ms, ttl_ms))
            .cloned()
            .collect())
    }

    async fn select_coordinator(&self, now_ms: i64, ttl_ms: i64) -> Result<Option<PeerRecord>> {
        let active = self.list_active_instances(now_ms, ttl_ms).await?;
        if let Some(flagged) = active.iter().find(|p| p.is_coordinator) {
            return Ok(Some(flagged.clone()));
        }
        Ok(active
            .into_iter()
            .min_by(|a, b| a.instance_id.cmp(&b.instance_id)))
    }
}
