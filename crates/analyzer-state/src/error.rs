//! Error types for analyzer-state

use thiserror::Error;

/// Result type alias for analyzer-state
pub type Result<T> = std::result::Result<T, StateError>;

/// Error type for state store operations
#[derive(Error, Debug)]
pub enum StateError {
    /// State could not be serialized or a persisted blob could not be parsed
    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The persistence backend failed
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl StateError {
    pub(crate) fn persistence(err: &anyhow::Error) -> Self {
        Self::Persistence(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StateError::persistence(&anyhow::anyhow!("disk full"));
        assert_eq!(err.to_string(), "Persistence error: disk full");

        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StateError = parse.into();
        assert!(err.to_string().starts_with("State serialization error"));
    }
}
