//! berth-runtime — the container-orchestration protocol and its adapters.
//!
//! The orchestrator core talks to a container engine only through the
//! [`ContainerRuntime`] trait: create/start/stop/remove/inspect
//! containers and pull images. All operations are fallible remote I/O;
//! adapters must bound every call with a timeout and report failures
//! as [`RuntimeError`], never panicking.
//!
//! Two implementations live here:
//! - [`DockerRuntime`] — the Docker Engine HTTP API over the local
//!   Unix socket.
//! - [`FakeRuntime`] — an in-memory engine with scriptable failures,
//!   used by orchestrator and reconciler tests.

pub mod docker;
pub mod error;
pub mod fake;
pub mod protocol;

pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};
pub use fake::FakeRuntime;
pub use protocol::{
    ContainerLink, ContainerRuntime, ContainerSpec, ContainerStatus, PortBind, RemoveOptions,
    VolumeBind,
};
