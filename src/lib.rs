// Clippy allows for reasonable defaults
// These suppress warnings where the suggested change doesn't improve readability
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::derivable_impls)] // Explicit Default impls can be clearer
#![allow(clippy::field_reassign_with_default)] // Builder pattern is clearer
#![allow(clippy::unnecessary_map_or)] // map_or can be clearer than alternatives
#![allow(clippy::single_char_add_str)] // push_str("\n") reads better than push('\n')
#![allow(clippy::clone_on_copy)] // .clone() can be clearer than implicit copy
#![allow(clippy::collapsible_if)] // Separate ifs can be more readable

// Module declarations
pub mod agents;
pub mod config;
pub mod error;
pub mod executor;
pub mod file_storage;
pub mod fleet;
pub mod git;
pub mod models;
pub mod orchestrator;
pub mod shutdown;
pub mod tracker;
pub mod utils;
pub mod workspace;

pub use error::{OrchestratorError, Result};
pub use models::*;
pub use orchestrator::{install_global, Orchestrator};
