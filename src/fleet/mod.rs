//! Fleet coordination
//!
//! - `identity` - repository fingerprinting
//! - `presence` - presence registry interface and an in-process source
//! - `coordinator` - membership, capacity and leadership (`FleetState`)
//! - `scheduler` - conflict graph, waves and workstation assignment
//! - `backlog` - backlog depth and maintenance-mode control

pub mod backlog;
pub mod coordinator;
pub mod identity;
pub mod presence;
pub mod scheduler;

pub use backlog::{
    backlog_depth, calculate_target_depth, detect_maintenance_mode, evaluate_auto_generate,
    BacklogController, BacklogDepth, BacklogPolicy, GenerationDecision, MaintenanceCheck,
    PlannerMode,
};
pub use coordinator::{FleetCoordinator, FleetMode, FleetState};
pub use identity::{compute_fingerprint, fingerprint_hash, normalize_remote_url, FingerprintMethod, RepoFingerprint};
pub use presence::{PeerRecord, PresenceSource, StaticPresence, DEFAULT_PEER_PARALLELISM};
pub use scheduler::{assign_to_workstations, build_waves, ConflictGraph, DispatchAssignment, Wave};
