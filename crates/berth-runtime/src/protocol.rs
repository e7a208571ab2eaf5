//! The container-orchestration protocol required by the core.
//!
//! [`ContainerRuntime`] is the contract the orchestrator expects from a
//! container engine. No particular engine is mandated; the trait is
//! object-safe so the core can hold an `Arc<dyn ContainerRuntime>`.

use async_trait::async_trait;

use crate::error::RuntimeResult;

/// A host directory mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBind {
    pub host_path: String,
    pub container_path: String,
}

/// A container port published on a host interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBind {
    pub container_port: u16,
    pub host_ip: String,
    pub host_port: u16,
}

/// A legacy link to another container under an alias.
///
/// Used to wire the application container to its database sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLink {
    pub container: String,
    pub alias: String,
}

/// Everything the core needs to describe a container to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub name: Option<String>,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    pub volume_binds: Vec<VolumeBind>,
    pub port_binds: Vec<PortBind>,
    pub link: Option<ContainerLink>,
}

/// Options for container removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveOptions {
    pub remove_volumes: bool,
    pub force: bool,
}

/// The closed set of runtime-reported container states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl ContainerStatus {
    /// The engine's lowercase name for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
        }
    }

    /// Parse an engine-reported state name. Returns `None` for
    /// anything outside the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ContainerStatus::Created),
            "running" => Some(ContainerStatus::Running),
            "paused" => Some(ContainerStatus::Paused),
            "restarting" => Some(ContainerStatus::Restarting),
            "removing" => Some(ContainerStatus::Removing),
            "exited" => Some(ContainerStatus::Exited),
            "dead" => Some(ContainerStatus::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The contract the core requires of a container engine.
///
/// All calls are blocking, fallible I/O against a remote engine;
/// implementations apply a bounded timeout to each and translate
/// timeouts and transport failures into [`crate::RuntimeError`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container. Returns the engine-assigned container id.
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    /// Start a created container.
    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    /// Stop a running container, giving it `timeout_secs` to exit.
    async fn stop_container(&self, id: &str, timeout_secs: u32) -> RuntimeResult<()>;

    /// Remove a container.
    async fn remove_container(&self, id: &str, options: RemoveOptions) -> RuntimeResult<()>;

    /// Observe the current runtime state of a container.
    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerStatus>;

    /// Pull an image from its registry.
    async fn pull_image(&self, image: &str) -> RuntimeResult<()>;
}
