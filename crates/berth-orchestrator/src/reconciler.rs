//! Background reconciliation of observed container state.
//!
//! Containers die, restart, and get poked at outside the daemon. The
//! reconciler periodically inspects every deployment's container and
//! folds the engine's answer back into the stored record, so reads
//! reflect reality without an inspect on every request.

use std::sync::Arc;
use std::time::Duration;

use berth_runtime::ContainerRuntime;
use berth_state::{Deployment, StateStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::locks::DeploymentLocks;

/// Periodic status sweeper.
pub struct Reconciler {
    store: StateStore,
    runtime: Arc<dyn ContainerRuntime>,
    locks: DeploymentLocks,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        store: StateStore,
        runtime: Arc<dyn ContainerRuntime>,
        locks: DeploymentLocks,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            runtime,
            locks,
            interval,
        }
    }

    /// Spawn the sweep loop. The returned handle shuts it down
    /// gracefully: no new sweep starts, an in-flight sweep finishes.
    pub fn spawn(self) -> ReconcilerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        ReconcilerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "reconciler started");
        loop {
            let pause = self.interval + jitter(self.interval);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reconciler stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One full pass over all deployments.
    pub async fn sweep(&self) {
        let deployments = match self.store.list_deployments() {
            Ok(deployments) => deployments,
            Err(e) => {
                warn!(error = %e, "reconcile sweep: failed to list deployments");
                return;
            }
        };
        for deployment in deployments {
            self.reconcile_one(deployment).await;
        }
    }

    async fn reconcile_one(&self, mut deployment: Deployment) {
        if deployment.container_id.is_empty() {
            return;
        }
        let _guard = self.locks.lock(&deployment.id).await;

        // Re-read under the lock; an orchestrator op may have just won.
        match self.store.get_deployment(&deployment.id) {
            Ok(Some(current)) => deployment = current,
            Ok(None) => return,
            Err(e) => {
                warn!(id = %deployment.id, error = %e, "reconcile: failed to re-read record");
                return;
            }
        }
        if deployment.container_id.is_empty() {
            return;
        }

        match self.runtime.inspect_container(&deployment.container_id).await {
            Ok(observed) => {
                if observed.as_str() != deployment.status {
                    debug!(
                        id = %deployment.id,
                        from = %deployment.status,
                        to = %observed,
                        "reconcile: status changed"
                    );
                    deployment.status = observed.as_str().to_string();
                    deployment.updated_at = unix_now();
                    if let Err(e) = self.store.put_deployment(&deployment) {
                        warn!(id = %deployment.id, error = %e, "reconcile: failed to persist status");
                    }
                }
            }
            Err(e) => {
                warn!(id = %deployment.id, container = %deployment.container_id, error = %e,
                    "reconcile: inspect failed, leaving status untouched");
            }
        }
    }
}

/// Handle to a running reconciler.
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signal shutdown and wait for the loop (and any in-flight sweep)
    /// to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Up to 20% of the interval, to keep sweeps from syncing up with
/// other periodic work.
fn jitter(interval: Duration) -> Duration {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_err() {
        return Duration::ZERO;
    }
    let spread = (interval.as_millis() as u64 / 5).max(1);
    Duration::from_millis(u64::from(u32::from_le_bytes(buf)) % spread)
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// ─────────────────────────── Tests ───────────────────────────
