// Task status state machine with validation

use super::TaskStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

/// Validates if a task can transition from one status to another
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    match (from, to) {
        // Dispatch
        (TaskStatus::Todo, TaskStatus::InProgress) => true,
        (TaskStatus::Todo, TaskStatus::Cancelled) => true,

        // Outcomes of an attempt
        (TaskStatus::InProgress, TaskStatus::InReview) => true,
        (TaskStatus::InProgress, TaskStatus::Done) => true,
        (TaskStatus::InProgress, TaskStatus::Cancelled) => true,
        // Reverted on worktree failure, execution failure or no-commit completion
        (TaskStatus::InProgress, TaskStatus::Todo) => true,

        // Review outcomes
        (TaskStatus::InReview, TaskStatus::Done) => true,
        (TaskStatus::InReview, TaskStatus::Todo) => true, // Changes requested
        (TaskStatus::InReview, TaskStatus::Cancelled) => true,

        // Reopen
        (TaskStatus::Done, TaskStatus::Todo) => true,
        (TaskStatus::Cancelled, TaskStatus::Todo) => true,

        // Same state is always allowed (no-op)
        (a, b) if a == b => true,

        _ => false,
    }
}

/// Validates and performs a state transition
pub fn transition_state(
    current: TaskStatus,
    target: TaskStatus,
) -> Result<TaskStatus, StateTransitionError> {
    if !can_transition(current, target) {
        return Err(StateTransitionError::InvalidTransition {
            from: current,
            to: target,
        });
    }

    Ok(target)
}

/// Check if a status is a terminal state
pub fn is_terminal_state(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Done | TaskStatus::Cancelled)
}

/// Check if a status indicates active work
pub fn is_active_state(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::InProgress)
}

/// Get all valid next states from current state
pub fn valid_next_states(current: TaskStatus) -> Vec<TaskStatus> {
    TaskStatus::all()
        .iter()
        .copied()
        .filter(|&state| state != current && can_transition(current, state))
        .collect()
}
