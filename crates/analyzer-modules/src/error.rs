//! Error types for analyzer-modules

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for analyzer-modules
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Lifecycle step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    /// Factory construction
    Load,
    /// Activation hook
    Activate,
    /// Deactivation hook
    Deactivate,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
        })
    }
}

/// Error type for module registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A module with this id already exists
    #[error("Module '{0}' is already registered")]
    AlreadyRegistered(String),

    /// No module with this id, either requested directly or named as a
    /// dependency
    #[error("Module '{0}' is not registered")]
    NotRegistered(String),

    /// The dependency graph reachable from the requested module has a cycle
    #[error("Circular dependency: {}", chain.join(" -> "))]
    CircularDependency {
        /// Module ids along the cycle, first id repeated at the end
        chain: Vec<String>,
    },

    /// A factory or lifecycle hook failed
    #[error("Module '{module_id}' failed to {phase}: {message}")]
    Lifecycle {
        /// Failing module
        module_id: String,
        /// Failing step
        phase: LifecyclePhase,
        /// Error reported by the module
        message: String,
    },
}
