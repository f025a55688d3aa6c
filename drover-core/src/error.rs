//! Error types for Drover operations

use crate::worker::WorkerState;

/// Result type for Drover operations
pub type Result<T> = std::result::Result<T, DroverError>;

/// Error types for the Drover core
#[derive(Debug, thiserror::Error)]
pub enum DroverError {
    /// A state change that the worker state machine does not allow
    #[error("Invalid worker transition: {from} -> {to}")]
    InvalidTransition {
        /// State the row was expected to be in
        from: WorkerState,
        /// Requested state
        to: WorkerState,
    },

    /// A persisted value could not be decoded
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// OS process inspection or signalling failed
    #[error("Process error: {0}")]
    Process(String),

    /// Task execution error
    #[error("Task error: {0}")]
    Task(String),

    /// Storage error (from SQLite)
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for DroverError {
    fn from(s: String) -> Self {
        DroverError::Other(s)
    }
}

impl From<&str> for DroverError {
    fn from(s: &str) -> Self {
        DroverError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for DroverError {
    fn from(err: anyhow::Error) -> Self {
        DroverError::Other(err.to_string())
    }
}
