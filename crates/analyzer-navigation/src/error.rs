//! Error types for analyzer-navigation

use analyzer_modules::RegistryError;
use thiserror::Error;

/// Result type alias for analyzer-navigation
pub type Result<T> = std::result::Result<T, NavigationError>;

/// Why a navigation did not complete
#[derive(Error, Debug)]
pub enum NavigationError {
    /// No route registered under this path
    #[error("No route registered for '{0}'")]
    RouteNotFound(String),

    /// The target module is unknown to the registry
    #[error("Module '{0}' is not registered")]
    UnknownModule(String),

    /// Another transition is in progress
    #[error("Navigation to '{requested}' rejected: a transition is in progress")]
    Busy {
        /// Rejected target
        requested: String,
    },

    /// A before guard returned `false` or failed
    #[error("Navigation to '{to}' cancelled by a guard")]
    Cancelled {
        /// Vetoed target
        to: String,
    },

    /// Deactivating the current module or activating the target failed
    #[error("Navigation to '{to}' failed: {source}")]
    Transition {
        /// Failed target
        to: String,
        /// Registry error
        #[source]
        source: RegistryError,
    },

    /// There is no earlier entry to go back to
    #[error("No earlier navigation entry")]
    NoHistory,

    /// No module is active
    #[error("No current module")]
    NoCurrentModule,
}
