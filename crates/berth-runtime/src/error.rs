//! Container runtime error types.

use thiserror::Error;

/// Result type alias for container runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur while talking to a container engine.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to connect to container engine: {0}")]
    Connect(String),

    #[error("engine request failed: {0}")]
    Request(String),

    #[error("engine returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("engine operation timed out: {0}")]
    Timeout(String),

    #[error("unexpected engine response: {0}")]
    BadResponse(String),
}
