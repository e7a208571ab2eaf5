//! Per-deployment lock registry.
//!
//! Serializes orchestrator mutations and reconciler sweeps that touch
//! the same deployment. Locks are keyed by deployment id; operations
//! on distinct deployments never contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Shared registry of per-deployment async locks.
#[derive(Clone, Default)]
pub struct DeploymentLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl DeploymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a deployment id, creating it on first use.
    /// The guard is owned so it can cross await points freely.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(id.to_string()).or_default())
        };
        entry.lock_owned().await
    }

    /// Drop the registry entry for a deleted deployment. A holder of
    /// an outstanding guard keeps its Arc alive; new callers get a
    /// fresh lock.
    pub async fn remove(&self, id: &str) {
        self.inner.lock().await.remove(id);
    }
}
