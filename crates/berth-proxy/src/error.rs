//! Proxy manager error types.

use thiserror::Error;

/// Result type alias for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors that can occur while managing reverse-proxy configuration.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no proxy configuration for domain: {0}")]
    NotFound(String),

    #[error("invalid proxy value: {0}")]
    Validation(String),

    #[error("template rendering failed: {0}")]
    Render(String),

    #[error("failed to write {path}: {message}")]
    Io { path: String, message: String },

    #[error("proxy reload failed: {0}")]
    Reload(String),

    #[error("state store error: {0}")]
    State(#[from] berth_state::StateError),
}
