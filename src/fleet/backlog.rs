//! Backlog depth and maintenance-mode control
//!
//! Decides whether the fleet needs more planned work. Only the coordinator
//! grows the backlog while several instances share the repository.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use super::coordinator::{FleetCoordinator, FleetState};
use crate::models::TaskCounts;
use crate::utils::{format_duration_ms, lock_mutex_recover, now_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlannerMode {
    Disabled,
    #[default]
    Auto,
}

impl std::str::FromStr for PlannerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disabled" | "off" | "none" => Ok(PlannerMode::Disabled),
            "auto" | "on" => Ok(PlannerMode::Auto),
            _ => Err(format!("Unknown planner mode: '{}'. Expected: disabled, auto", s)),
        }
    }
}

/// Backlog sizing policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BacklogPolicy {
    pub buffer_multiplier: usize,
    pub min_tasks: usize,
    pub max_tasks: usize,
    pub planner_mode: PlannerMode,
    pub cooldown_ms: i64,
    pub require_approval: bool,
}

impl Default for BacklogPolicy {
    fn default() -> Self {
        Self {
            buffer_multiplier: 3,
            min_tasks: 6,
            max_tasks: 100,
            planner_mode: PlannerMode::Auto,
            cooldown_ms: 10 * 60 * 1000,
            require_approval: false,
        }
    }
}

/// Target and deficit for the current backlog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogDepth {
    pub target: usize,
    pub current: usize,
    pub deficit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceCheck {
    pub is_maintenance_mode: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationDecision {
    pub should_generate: bool,
    pub reason: String,
    pub depth: Option<BacklogDepth>,
    pub requires_approval: bool,
    pub cooldown_remaining_ms: Option<i64>,
}

impl GenerationDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            should_generate: false,
            reason: reason.into(),
            depth: None,
            requires_approval: false,
            cooldown_remaining_ms: None,
        }
    }
}

/// `clamp(total_slots * buffer_multiplier, min_tasks, max_tasks)`.
/// `max_tasks` wins if the bounds are inverted.
pub fn calculate_target_depth(
    total_slots: usize,
    buffer_multiplier: usize,
    min_tasks: usize,
    max_tasks: usize,
) -> usize {
    total_slots
        .saturating_mul(buffer_multiplier)
        .max(min_tasks)
        .min(max_tasks)
}

pub fn backlog_depth(total_slots: usize, current_backlog: usize, policy: &BacklogPolicy) -> BacklogDepth {
    let target = calculate_target_depth(
        total_slots,
        policy.buffer_multiplier,
        policy.min_tasks,
        policy.max_tasks,
    );
    BacklogDepth {
        target,
        current: current_backlog,
        deficit: target.saturating_sub(current_backlog),
    }
}

/// Maintenance mode means there is nothing left anywhere in the pipeline
pub fn detect_maintenance_mode(counts: &TaskCounts) -> MaintenanceCheck {
    let counters = [
        ("backlog", counts.backlog_remaining),
        ("todo", counts.todo),
        ("running", counts.running),
        ("review", counts.review),
    ];
    let active: Vec<String> = counters
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(name, n)| format!("{}={}", name, n))
        .collect();

    if active.is_empty() {
        MaintenanceCheck {
            is_maintenance_mode: true,
            reason: "no backlog, todo, running or review tasks".to_string(),
        }
    } else {
        MaintenanceCheck {
            is_maintenance_mode: false,
            reason: format!("active: {}", active.join(", ")),
        }
    }
}

/// Pure generation decision; `last_triggered_ms` comes from `mark_triggered`.
pub fn evaluate_auto_generate(
    current_backlog: usize,
    policy: &BacklogPolicy,
    fleet: &FleetState,
    last_triggered_ms: Option<i64>,
    now_ms: i64,
) -> GenerationDecision {
    if policy.planner_mode == PlannerMode::Disabled {
        return GenerationDecision::skip("planner disabled");
    }

    if fleet.fleet_size > 1 && !fleet.is_coordinator {
        return GenerationDecision::skip("not the fleet coordinator");
    }

    if let Some(last) = last_triggered_ms {
        let elapsed = now_ms - last;
        if elapsed < policy.cooldown_ms {
            let remaining = policy.cooldown_ms - elapsed;
            let mut decision = GenerationDecision::skip(format!(
                "cooldown active ({} remaining)",
                format_duration_ms(remaining)
            ));
            decision.cooldown_remaining_ms = Some(remaining);
            return decision;
        }
    }

    let depth = backlog_depth(fleet.total_slots, current_backlog, policy);
    if depth.deficit == 0 {
        return GenerationDecision {
            depth: Some(depth),
            ..GenerationDecision::skip(format!(
                "backlog {} meets target {}",
                depth.current, depth.target
            ))
        };
    }

    GenerationDecision {
        should_generate: true,
        reason: format!(
            "backlog {} below target {} (deficit {})",
            depth.current, depth.target, depth.deficit
        ),
        depth: Some(depth),
        requires_approval: policy.require_approval,
        cooldown_remaining_ms: None,
    }
}

/// Stateful wrapper holding the policy and the last trigger time
pub struct BacklogController {
    policy: BacklogPolicy,
    last_triggered_ms: Mutex<Option<i64>>,
}

impl BacklogController {
    pub fn new(policy: BacklogPolicy) -> Self {
        Self {
            policy,
            last_triggered_ms: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &BacklogPolicy {
        &self.policy
    }

    pub fn should_auto_generate(&self, current_backlog: usize, fleet: &FleetState) -> GenerationDecision {
        let last = *lock_mutex_recover(&self.last_triggered_ms);
        let decision = evaluate_auto_generate(current_backlog, &self.policy, fleet, last, now_ms());
        log::debug!(
            "[BacklogController] generate={} ({})",
            decision.should_generate,
            decision.reason
        );
        decision
    }

    /// Record that generation was actually started
    pub fn mark_triggered(&self) {
        self.mark_triggered_at(now_ms());
    }

    pub fn mark_triggered_at(&self, at_ms: i64) {
        *lock_mutex_recover(&self.last_triggered_ms) = Some(at_ms);
    }

    pub fn last_triggered_ms(&self) -> Option<i64> {
        *lock_mutex_recover(&self.last_triggered_ms)
    }

    /// Detect maintenance mode from `counts` and report it to the coordinator
    pub fn report_counts(&self, counts: &TaskCounts, coordinator: &FleetCoordinator) -> MaintenanceCheck {
        let check = detect_maintenance_mode(counts);
        coordinator.set_maintenance(check.is_maintenance_mode);
        check
    }
}
