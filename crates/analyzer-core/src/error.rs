//! Error types for analyzer-core

use analyzer_events::EventError;
use analyzer_modules::RegistryError;
use analyzer_navigation::NavigationError;
use analyzer_state::StateError;
use analyzer_utils::ConfigError;
use thiserror::Error;

/// Result type alias for analyzer-core
pub type Result<T> = std::result::Result<T, Error>;

/// Umbrella error over every component of the core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A synchronous publish surfaced a handler failure
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// State serialization or persistence failed
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Module registration or lifecycle failed
    #[error("Module error: {0}")]
    Registry(#[from] RegistryError),

    /// A navigation did not complete
    #[error("Navigation error: {0}")]
    Navigation(#[from] NavigationError),
}
