//! berth-orchestrator — the deployment lifecycle core.
//!
//! Ties the state store, container runtime, certificate issuer and
//! proxy manager together into three collaborators:
//!
//! - [`Allocator`] leases host ports and mints unique two-word domain
//!   names, both backed by atomic claims in the state store.
//! - [`Orchestrator`] drives create/update/delete of deployments,
//!   rolling back partially provisioned resources when a create fails.
//! - [`Reconciler`] periodically folds observed container state back
//!   into deployment records.
//!
//! Mutations to a deployment are serialized through a shared per-id
//! lock registry; distinct deployments never contend.

pub mod allocator;
pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod reconciler;
pub mod words;

pub use allocator::Allocator;
pub use error::{OrchestratorError, OrchestratorResult};
pub use locks::DeploymentLocks;
pub use orchestrator::{
    CreateRequest, Orchestrator, OrchestratorSettings, SidecarDeletePolicy, UpdateRequest,
};
pub use reconciler::{Reconciler, ReconcilerHandle};
pub use words::MNEMONIC_WORDS;
