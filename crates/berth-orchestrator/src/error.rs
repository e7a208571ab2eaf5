//! Unified error taxonomy for orchestration operations.

use thiserror::Error;

/// Result type alias for orchestration operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Everything that can go wrong while driving a deployment.
///
/// Subsystem failures keep their source error so callers can log the
/// full chain; the variant tells them which collaborator failed.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("container runtime error: {0}")]
    Runtime(#[from] berth_runtime::RuntimeError),

    #[error("proxy error: {0}")]
    Proxy(#[from] berth_proxy::ProxyError),

    #[error("certificate error: {0}")]
    Certificate(#[from] berth_certs::CertError),

    #[error("state store error: {0}")]
    Persistence(#[from] berth_state::StateError),
}
