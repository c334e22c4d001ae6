//! Error types for analyzer-events

use thiserror::Error;

/// Result type alias for analyzer-events
pub type Result<T> = std::result::Result<T, EventError>;

/// Error type for broker operations
#[derive(Error, Debug)]
pub enum EventError {
    /// A handler failed during a synchronous publish
    ///
    /// Only the first failure is reported; every other handler still ran.
    #[error("Handler for '{event}' failed: {message}")]
    HandlerFailed {
        /// Name of the event being dispatched
        event: String,
        /// Error or panic message from the handler
        message: String,
    },
}
