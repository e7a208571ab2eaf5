//! berth-proxy — reverse-proxy configuration management.
//!
//! Renders nginx server blocks for published deployments from
//! compile-time templates, writes them into the sites directory as
//! `MDS-<domain>.conf`, and asks nginx to apply the change via a
//! configured reload command. Proxy-configuration rows in the state
//! store are owned by this crate.
//!
//! Substituted values (domain, upstream destination, key material
//! paths) are validated against a conservative character set before
//! rendering, so user-influenced input cannot terminate an nginx
//! block or smuggle directives into the generated file.

pub mod error;
pub mod manager;
pub mod render;

pub use error::{ProxyError, ProxyResult};
pub use manager::NginxManager;
