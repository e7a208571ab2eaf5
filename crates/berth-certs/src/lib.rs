//! berth-certs — TLS certificate issuance for proxied sites.
//!
//! Generates self-signed key/certificate pairs for a single hostname
//! and persists them as PEM files, with private keys restricted to the
//! owner. A certificate-authority-backed provider (automated domain
//! validation) is an acknowledged extension point; only `selfsigned`
//! is implemented.

pub mod error;
pub mod issuer;

pub use error::{CertError, CertResult};
pub use issuer::{
    write_certificate, write_private_key, CertKeyPair, CertProvider, CertSettings,
    SelfSignedIssuer,
};
