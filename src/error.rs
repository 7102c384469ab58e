// Error types shared across the orchestration core

use thiserror::Error;

/// Errors surfaced at the collaborator seams (tracker, workspace, agent pool,
/// presence registry, forge) and by the git/config plumbing.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Task tracker error: {0}")]
    Tracker(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Presence registry error: {0}")]
    Presence(String),

    #[error("Forge operation failed: {0}")]
    Forge(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    InvalidTransition(#[from] crate::models::state_machine::StateTransitionError),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        OrchestratorError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(e: serde_yaml::Error) -> Self {
        OrchestratorError::Serialization(e.to_string())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::Workspace("disk full".to_string());
        assert_eq!(err.to_string(), "Workspace error: disk full");
    }

    #[test]
    fn test_from_serde_json() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: OrchestratorError = parse.unwrap_err().into();
        assert!(matches!(err, OrchestratorError::Serialization(_)));
    }

    #[test]
    fn test_from_transition_error() {
        let err: OrchestratorError =
            crate::models::state_machine::transition_state(TaskStatus::Done, TaskStatus::InReview)
                .unwrap_err()
                .into();
        assert!(err.to_string().contains("Invalid state transition"));
    }
}
