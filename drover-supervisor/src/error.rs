//! Error types for supervisor operations

use drover_core::DroverError;
use drover_core::worker::WorkerState;
use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Why a worker process refused to take over its record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// No row exists for the worker id
    MissingRecord,
    /// The launch token does not match the row
    TokenMismatch,
    /// The row was already claimed or has left STARTING
    AlreadyClaimed,
}

impl std::fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeFailure::MissingRecord => write!(f, "worker record not found"),
            HandshakeFailure::TokenMismatch => write!(f, "launch token mismatch"),
            HandshakeFailure::AlreadyClaimed => {
                write!(f, "worker record already claimed or no longer starting")
            }
        }
    }
}

/// Error types for supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Abort of {worker_id} requires explicit confirmation")]
    ConfirmationRequired { worker_id: String },

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("No running worker")]
    NoRunningWorker,

    #[error("Cannot {action} worker {worker_id} in state {state}")]
    InvalidState {
        worker_id: String,
        state: WorkerState,
        action: &'static str,
    },

    #[error("Handshake rejected for {worker_id}: {reason}")]
    HandshakeRejected {
        worker_id: String,
        reason: HandshakeFailure,
    },

    #[error("Worker binary not found: {0}")]
    BinaryNotFound(String),

    #[error("Launch error: {0}")]
    Launch(String),

    #[error(transparent)]
    Core(#[from] DroverError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for SupervisorError {
    fn from(err: std::io::Error) -> Self {
        SupervisorError::Core(DroverError::Io(err))
    }
}
