//! In-memory [`ContainerRuntime`] for tests.
//!
//! Records every container the orchestrator asks for and lets tests
//! script failures and out-of-band state changes. No engine involved.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{RuntimeError, RuntimeResult};
use crate::protocol::{ContainerRuntime, ContainerSpec, ContainerStatus, RemoveOptions};

/// A container the fake knows about.
#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub status: ContainerStatus,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    pulled_images: Vec<String>,
    next_id: u64,
    fail_create: bool,
    fail_start: bool,
    fail_stop: bool,
    fail_remove: bool,
    fail_inspect: bool,
}

/// Scriptable in-memory container engine.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create_container` calls fail.
    pub fn fail_create(&self) {
        self.state.lock().unwrap().fail_create = true;
    }

    /// Make subsequent `start_container` calls fail.
    pub fn fail_start(&self) {
        self.state.lock().unwrap().fail_start = true;
    }

    /// Make subsequent `stop_container` calls fail.
    pub fn fail_stop(&self) {
        self.state.lock().unwrap().fail_stop = true;
    }

    /// Make subsequent `remove_container` calls fail.
    pub fn fail_remove(&self) {
        self.state.lock().unwrap().fail_remove = true;
    }

    /// Make subsequent `inspect_container` calls fail.
    pub fn fail_inspect(&self) {
        self.state.lock().unwrap().fail_inspect = true;
    }

    /// Overwrite a container's reported state, simulating something
    /// happening to it outside the orchestrator.
    pub fn set_status(&self, id: &str, status: ContainerStatus) {
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(id) {
            c.status = status;
        }
    }

    /// Snapshot of all containers the fake currently holds.
    pub fn containers(&self) -> Vec<FakeContainer> {
        let mut all: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .containers
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Look up one container by id.
    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(id).cloned()
    }

    /// Images passed to `pull_image`, in call order.
    pub fn pulled_images(&self) -> Vec<String> {
        self.state.lock().unwrap().pulled_images.clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(RuntimeError::Api {
                status: 500,
                message: "scripted create failure".to_string(),
            });
        }
        state.next_id += 1;
        let id = format!("ctr-{}", state.next_id);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                spec: spec.clone(),
                status: ContainerStatus::Created,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_start {
            return Err(RuntimeError::Api {
                status: 500,
                message: "scripted start failure".to_string(),
            });
        }
        match state.containers.get_mut(id) {
            Some(c) => {
                c.status = ContainerStatus::Running;
                Ok(())
            }
            None => Err(RuntimeError::Api {
                status: 404,
                message: format!("no such container: {id}"),
            }),
        }
    }

    async fn stop_container(&self, id: &str, _timeout_secs: u32) -> RuntimeResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_stop {
            return Err(RuntimeError::Api {
                status: 500,
                message: "scripted stop failure".to_string(),
            });
        }
        match state.containers.get_mut(id) {
            Some(c) => {
                c.status = ContainerStatus::Exited;
                Ok(())
            }
            None => Err(RuntimeError::Api {
                status: 404,
                message: format!("no such container: {id}"),
            }),
        }
    }

    async fn remove_container(&self, id: &str, _options: RemoveOptions) -> RuntimeResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_remove {
            return Err(RuntimeError::Api {
                status: 500,
                message: "scripted remove failure".to_string(),
            });
        }
        match state.containers.remove(id) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::Api {
                status: 404,
                message: format!("no such container: {id}"),
            }),
        }
    }

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerStatus> {
        let state = self.state.lock().unwrap();
        if state.fail_inspect {
            return Err(RuntimeError::Request("scripted inspect failure".to_string()));
        }
        match state.containers.get(id) {
            Some(c) => Ok(c.status),
            None => Err(RuntimeError::Api {
                status: 404,
                message: format!("no such container: {id}"),
            }),
        }
    }

    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        self.state
            .lock()
            .unwrap()
            .pulled_images
            .push(image.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_tracks_state() {
        let runtime = FakeRuntime::new();
        let spec = ContainerSpec {
            image: "kadirahq/meteord:base".to_string(),
            ..Default::default()
        };

        let id = runtime.create_container(&spec).await.unwrap();
        assert_eq!(
            runtime.inspect_container(&id).await.unwrap(),
            ContainerStatus::Created
        );

        runtime.start_container(&id).await.unwrap();
        assert_eq!(
            runtime.inspect_container(&id).await.unwrap(),
            ContainerStatus::Running
        );

        runtime.stop_container(&id, 10).await.unwrap();
        assert_eq!(
            runtime.inspect_container(&id).await.unwrap(),
            ContainerStatus::Exited
        );

        runtime
            .remove_container(&id, RemoveOptions::default())
            .await
            .unwrap();
        assert!(runtime.inspect_container(&id).await.is_err());
    }

    #[tokio::test]
    async fn scripted_failures_fire() {
        let runtime = FakeRuntime::new();
        runtime.fail_create();
        let err = runtime
            .create_container(&ContainerSpec::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn unknown_container_is_an_api_error() {
        let runtime = FakeRuntime::new();
        let err = runtime.start_container("ghost").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Api { status: 404, .. }));
    }
}
