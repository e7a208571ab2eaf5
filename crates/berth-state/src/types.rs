//! Domain types for the Berth state store.
//!
//! These types represent the persisted state of deployments and their
//! reverse-proxy configurations. All types are serializable to/from
//! JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a deployment.
pub type DeploymentId = String;

/// Deployment status while resources are being provisioned.
pub const STATUS_PROVISIONING: &str = "provisioning";
/// Deployment status once its container is confirmed started.
pub const STATUS_RUNNING: &str = "running";
/// Deployment status after an aborted update left no running container.
pub const STATUS_FAILED: &str = "failed";

// ── Deployment ─────────────────────────────────────────────────────

/// A managed application instance: one container, one leased port,
/// one domain, one proxy route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    /// Human label; not required to be unique.
    pub project_name: String,
    /// Host path of the directory containing the application bundle.
    pub volume_path: String,
    /// Whether the container should be started automatically.
    pub auto_start: bool,
    /// Container id of the application container. Empty until the
    /// first successful container creation.
    pub container_id: String,
    /// Container id of the database sidecar, if one is managed.
    pub sidecar_container_id: Option<String>,
    /// Leased host port the application container is bound to.
    pub port: u16,
    /// Assigned domain name. Empty until provisioning completes.
    pub url: String,
    /// Observed runtime state (`running`, `exited`, ...). Written by
    /// the orchestrator and refreshed by the reconciler.
    pub status: String,
    /// Unix timestamp (seconds) when this record was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last mutation.
    pub updated_at: u64,
}

// ── Proxy configuration ────────────────────────────────────────────

/// A published (or reserved) reverse-proxy route.
///
/// A row may exist before its deployment does: domain reservation
/// inserts a placeholder carrying only `domain_name`, which prevents a
/// concurrent caller from generating the same name before binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyConfig {
    /// Globally unique, including unbound reservations.
    pub domain_name: String,
    pub is_https: bool,
    /// Path of the PEM certificate. Empty unless `is_https`.
    pub certificate_path: String,
    /// Path of the PEM private key. Empty unless `is_https`.
    pub private_key_path: String,
    /// Upstream URL, typically `http://127.0.0.1:<port>`.
    pub destination: String,
    /// Owning deployment. `None` while the domain is only reserved.
    pub deployment_id: Option<DeploymentId>,
    /// Path of the rendered site file on disk. Empty until rendered.
    pub config_file_path: String,
}

impl ProxyConfig {
    /// A placeholder row carrying only a reserved domain name.
    pub fn reservation(domain_name: impl Into<String>) -> Self {
        Self {
            domain_name: domain_name.into(),
            is_https: false,
            certificate_path: String::new(),
            private_key_path: String::new(),
            destination: String::new(),
            deployment_id: None,
            config_file_path: String::new(),
        }
    }
}
