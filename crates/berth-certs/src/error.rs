//! Certificate issuance error types.

use thiserror::Error;

/// Result type alias for certificate operations.
pub type CertResult<T> = Result<T, CertError>;

/// Errors that can occur while issuing or persisting certificates.
#[derive(Debug, Error)]
pub enum CertError {
    #[error("invalid certificate host: {0}")]
    InvalidHost(String),

    #[error("certificate generation failed: {0}")]
    Generate(String),

    #[error("failed to write key material to {path}: {message}")]
    Write { path: String, message: String },

    #[error("unsupported certificate provider: {0}")]
    UnsupportedProvider(String),
}
