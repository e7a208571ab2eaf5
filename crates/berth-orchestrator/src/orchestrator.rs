//! Deployment lifecycle: create, update, delete.
//!
//! The orchestrator owns the provisioning order and its failure
//! handling. A create that fails part-way rolls back every resource it
//! managed to acquire; an update only replaces the application
//! container and re-renders the proxy, never touching the port or
//! domain lease.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use berth_certs::{self as certs, SelfSignedIssuer};
use berth_proxy::NginxManager;
use berth_runtime::{
    ContainerLink, ContainerRuntime, ContainerSpec, ContainerStatus, PortBind, RemoveOptions,
    VolumeBind,
};
use berth_state::{
    Deployment, ProxyConfig, StateStore, STATUS_FAILED, STATUS_PROVISIONING, STATUS_RUNNING,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::allocator::Allocator;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::locks::DeploymentLocks;

/// Container path the application bundle is mounted at.
const BUNDLE_MOUNT: &str = "/bundle";

/// Port the application listens on inside its container.
const APP_CONTAINER_PORT: u16 = 80;

/// Link alias the application resolves its database sidecar under.
const SIDECAR_ALIAS: &str = "mongo";

/// What `delete_deployment` does with a managed database sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SidecarDeletePolicy {
    /// Keep the sidecar and its data. The reference behavior.
    #[default]
    Retain,
    /// Stop and remove the sidecar with the deployment.
    Remove,
}

impl SidecarDeletePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "retain" => Some(SidecarDeletePolicy::Retain),
            "remove" => Some(SidecarDeletePolicy::Remove),
            _ => None,
        }
    }
}

/// Operator-level knobs, sourced from daemon configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Image for the application container.
    pub app_image: String,
    /// Image for the managed database sidecar.
    pub mongo_image: String,
    /// Create a database sidecar per deployment instead of pointing
    /// applications at an external database.
    pub auto_manage_mongodb: bool,
    /// External database URL, used when sidecars are not managed.
    pub mongodb_url: String,
    /// External oplog URL, optional.
    pub mongodb_oplog_url: String,
    /// Grace period handed to the engine when stopping containers.
    pub stop_timeout_secs: u32,
    pub sidecar_delete_policy: SidecarDeletePolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            app_image: "kadirahq/meteord:base".to_string(),
            mongo_image: "mongo:3.4".to_string(),
            auto_manage_mongodb: true,
            mongodb_url: String::new(),
            mongodb_oplog_url: String::new(),
            stop_timeout_secs: 10,
            sidecar_delete_policy: SidecarDeletePolicy::default(),
        }
    }
}

/// Inputs for [`Orchestrator::create_deployment`].
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub project_name: String,
    /// Host directory containing the application bundle.
    pub volume_path: String,
    /// Start the container once created.
    pub auto_start: bool,
    /// Publish over HTTPS with freshly issued self-signed material.
    pub https: bool,
    /// Application settings blob, exported as `SETTINGS`.
    pub settings: Option<String>,
    /// Extra `KEY=VALUE` entries. Win over derived entries on conflict.
    pub env: Vec<String>,
}

/// Inputs for [`Orchestrator::update_deployment`].
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// Replacement bundle directory, if it moved.
    pub volume_path: Option<String>,
    pub settings: Option<String>,
    pub env: Vec<String>,
}

/// Drives deployment lifecycle against the runtime, proxy, certificate
/// and state collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    store: StateStore,
    runtime: Arc<dyn ContainerRuntime>,
    proxy: NginxManager,
    issuer: SelfSignedIssuer,
    allocator: Allocator,
    locks: DeploymentLocks,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: StateStore,
        runtime: Arc<dyn ContainerRuntime>,
        proxy: NginxManager,
        issuer: SelfSignedIssuer,
        allocator: Allocator,
        locks: DeploymentLocks,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            runtime,
            proxy,
            issuer,
            allocator,
            locks,
            settings,
        }
    }

    // ── Create ─────────────────────────────────────────────────────

    /// Provision a new deployment end to end.
    ///
    /// On any failure, everything acquired so far is rolled back
    /// best-effort and the error is returned; no partially provisioned
    /// deployment survives.
    pub async fn create_deployment(
        &self,
        request: CreateRequest,
    ) -> OrchestratorResult<Deployment> {
        validate_create(&request)?;

        let now = unix_now();
        let mut deployment = Deployment {
            id: Uuid::new_v4().to_string(),
            project_name: request.project_name.clone(),
            volume_path: request.volume_path.clone(),
            auto_start: request.auto_start,
            container_id: String::new(),
            sidecar_container_id: None,
            port: 0,
            url: String::new(),
            status: STATUS_PROVISIONING.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.store.put_deployment(&deployment)?;
        let _guard = self.locks.lock(&deployment.id).await;

        info!(id = %deployment.id, project = %request.project_name, "creating deployment");
        match self.provision(&mut deployment, &request).await {
            Ok(()) => Ok(deployment),
            Err(e) => {
                warn!(id = %deployment.id, error = %e, "create failed, rolling back");
                self.abort_create(&deployment).await;
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        deployment: &mut Deployment,
        request: &CreateRequest,
    ) -> OrchestratorResult<()> {
        deployment.port = self.allocator.allocate_port(&deployment.id)?;
        deployment.url = self.allocator.reserve_domain()?;
        self.persist(deployment)?;

        // Bind the fresh reservation to this deployment right away so
        // the row is attributable even if provisioning aborts later.
        let mut config = self
            .store
            .get_proxy(&deployment.url)?
            .unwrap_or_else(|| ProxyConfig::reservation(&deployment.url));
        config.deployment_id = Some(deployment.id.clone());
        self.store.put_proxy(&config)?;

        self.runtime.pull_image(&self.settings.app_image).await?;

        // Database sidecar, or an external database URL.
        let database_url = if self.settings.auto_manage_mongodb {
            self.runtime.pull_image(&self.settings.mongo_image).await?;
            let sidecar_spec = ContainerSpec {
                image: self.settings.mongo_image.clone(),
                name: Some(format!("berth-{}-mongo", deployment.id)),
                ..Default::default()
            };
            let sidecar_id = self.runtime.create_container(&sidecar_spec).await?;
            deployment.sidecar_container_id = Some(sidecar_id.clone());
            self.persist(deployment)?;
            self.runtime.start_container(&sidecar_id).await?;
            format!("mongodb://{SIDECAR_ALIAS}:27017/{}", deployment.project_name)
        } else {
            self.settings.mongodb_url.clone()
        };

        // Application container.
        let env = self.build_env(
            deployment,
            request.https,
            &database_url,
            request.settings.as_deref(),
            &request.env,
        );
        let spec = ContainerSpec {
            image: self.settings.app_image.clone(),
            name: Some(format!("berth-{}", deployment.id)),
            env,
            volume_binds: vec![VolumeBind {
                host_path: deployment.volume_path.clone(),
                container_path: BUNDLE_MOUNT.to_string(),
            }],
            port_binds: vec![PortBind {
                container_port: APP_CONTAINER_PORT,
                host_ip: "127.0.0.1".to_string(),
                host_port: deployment.port,
            }],
            link: deployment.sidecar_container_id.as_ref().map(|id| ContainerLink {
                container: id.clone(),
                alias: SIDECAR_ALIAS.to_string(),
            }),
        };
        deployment.container_id = self.runtime.create_container(&spec).await?;
        self.persist(deployment)?;
        if deployment.auto_start {
            self.runtime.start_container(&deployment.container_id).await?;
        }

        // Publish the proxy route over the reserved domain.
        config.destination = format!("http://127.0.0.1:{}", deployment.port);
        if request.https {
            config = self.proxy.https_settings(config);
            self.issue_certificate(&deployment.url, &config)?;
        }
        self.proxy.create_proxy(&mut config).await?;

        deployment.status = if deployment.auto_start {
            STATUS_RUNNING.to_string()
        } else {
            ContainerStatus::Created.as_str().to_string()
        };
        self.persist(deployment)?;
        info!(id = %deployment.id, url = %deployment.url, port = deployment.port, "deployment created");
        Ok(())
    }

    /// Best-effort rollback of a partially provisioned create.
    async fn abort_create(&self, deployment: &Deployment) {
        if !deployment.container_id.is_empty() {
            self.teardown_container(&deployment.container_id, "application container")
                .await;
        }
        if let Some(sidecar_id) = &deployment.sidecar_container_id {
            self.teardown_container(sidecar_id, "database sidecar").await;
        }

        if !deployment.url.is_empty() {
            match self.store.get_proxy(&deployment.url) {
                // Reservation only, nothing rendered yet.
                Ok(Some(config)) if config.config_file_path.is_empty() => {
                    if let Err(e) = self.store.delete_proxy(&deployment.url) {
                        warn!(domain = %deployment.url, error = %e, "rollback: failed to drop reservation");
                    }
                }
                Ok(Some(_)) => {
                    if let Err(e) = self.proxy.delete_proxy(&deployment.url).await {
                        warn!(domain = %deployment.url, error = %e, "rollback: failed to remove proxy");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(domain = %deployment.url, error = %e, "rollback: failed to look up proxy")
                }
            }
        }

        if deployment.port != 0 {
            if let Err(e) = self.store.release_port(deployment.port) {
                warn!(port = deployment.port, error = %e, "rollback: failed to release port");
            }
        }
        if let Err(e) = self.store.delete_deployment(&deployment.id) {
            warn!(id = %deployment.id, error = %e, "rollback: failed to delete record");
        }
        self.locks.remove(&deployment.id).await;
    }

    // ── Update ─────────────────────────────────────────────────────

    /// Replace a deployment's application container with a new one
    /// built from the (possibly updated) bundle. The port lease and
    /// domain never change.
    pub async fn update_deployment(
        &self,
        id: &str,
        request: UpdateRequest,
    ) -> OrchestratorResult<Deployment> {
        let _guard = self.locks.lock(id).await;

        let mut deployment = self
            .store
            .get_deployment(id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("deployment {id}")))?;
        let mut config = self
            .store
            .find_proxy_for_deployment(id)?
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("proxy configuration for deployment {id}"))
            })?;

        if let Some(volume_path) = request.volume_path {
            if volume_path.is_empty() {
                return Err(OrchestratorError::Validation(
                    "volume path must not be empty".to_string(),
                ));
            }
            deployment.volume_path = volume_path;
        }

        info!(id, url = %deployment.url, "updating deployment");

        // The sidecar survives updates; just check it is still there.
        let database_url = match &deployment.sidecar_container_id {
            Some(sidecar_id) => {
                if let Err(e) = self.runtime.inspect_container(sidecar_id).await {
                    warn!(id, sidecar = %sidecar_id, error = %e, "sidecar inspect failed");
                }
                format!("mongodb://{SIDECAR_ALIAS}:27017/{}", deployment.project_name)
            }
            None => self.settings.mongodb_url.clone(),
        };

        // Old container out of the way first; failures are logged and
        // skipped so a dead container cannot wedge the update.
        let old_container = deployment.container_id.clone();
        if !old_container.is_empty() {
            if let Err(e) = self
                .runtime
                .stop_container(&old_container, self.settings.stop_timeout_secs)
                .await
            {
                warn!(id, container = %old_container, error = %e, "failed to stop old container");
            }
            if let Err(e) = self
                .runtime
                .remove_container(
                    &old_container,
                    RemoveOptions {
                        remove_volumes: true,
                        force: true,
                    },
                )
                .await
            {
                warn!(id, container = %old_container, error = %e, "failed to remove old container");
            }
        }

        let env = self.build_env(
            &deployment,
            config.is_https,
            &database_url,
            request.settings.as_deref(),
            &request.env,
        );
        let spec = ContainerSpec {
            image: self.settings.app_image.clone(),
            name: Some(format!("berth-{}", deployment.id)),
            env,
            volume_binds: vec![VolumeBind {
                host_path: deployment.volume_path.clone(),
                container_path: BUNDLE_MOUNT.to_string(),
            }],
            port_binds: vec![PortBind {
                container_port: APP_CONTAINER_PORT,
                host_ip: "127.0.0.1".to_string(),
                host_port: deployment.port,
            }],
            link: deployment.sidecar_container_id.as_ref().map(|cid| ContainerLink {
                container: cid.clone(),
                alias: SIDECAR_ALIAS.to_string(),
            }),
        };

        let replacement = match self.replace_container(&spec).await {
            Ok(container_id) => container_id,
            Err(e) => {
                // The old container is already gone; record the outage.
                deployment.container_id = String::new();
                deployment.status = STATUS_FAILED.to_string();
                self.persist(&mut deployment)?;
                return Err(e);
            }
        };
        deployment.container_id = replacement;

        if config.is_https {
            self.issue_certificate(&deployment.url, &config)?;
        }
        self.proxy.create_proxy(&mut config).await?;

        deployment.status = STATUS_RUNNING.to_string();
        self.persist(&mut deployment)?;
        info!(id, container = %deployment.container_id, "deployment updated");
        Ok(deployment)
    }

    async fn replace_container(&self, spec: &ContainerSpec) -> OrchestratorResult<String> {
        let container_id = self.runtime.create_container(spec).await?;
        if let Err(e) = self.runtime.start_container(&container_id).await {
            self.teardown_container(&container_id, "replacement container")
                .await;
            return Err(e.into());
        }
        Ok(container_id)
    }

    // ── Delete ─────────────────────────────────────────────────────

    /// Tear a deployment down: proxy route, containers, port lease,
    /// record. Resource failures are logged, not fatal; the record is
    /// always removed.
    pub async fn delete_deployment(&self, id: &str) -> OrchestratorResult<()> {
        let _guard = self.locks.lock(id).await;

        let deployment = self
            .store
            .get_deployment(id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("deployment {id}")))?;

        info!(id, url = %deployment.url, "deleting deployment");

        if !deployment.url.is_empty() {
            if let Err(e) = self.proxy.delete_proxy(&deployment.url).await {
                warn!(id, domain = %deployment.url, error = %e, "failed to remove proxy");
            }
        }

        if !deployment.container_id.is_empty() {
            self.teardown_container(&deployment.container_id, "application container")
                .await;
        }
        if let Some(sidecar_id) = &deployment.sidecar_container_id {
            match self.settings.sidecar_delete_policy {
                SidecarDeletePolicy::Remove => {
                    self.teardown_container(sidecar_id, "database sidecar").await;
                }
                SidecarDeletePolicy::Retain => {
                    info!(id, sidecar = %sidecar_id, "retaining database sidecar");
                }
            }
        }

        if deployment.port != 0 {
            if let Err(e) = self.store.release_port(deployment.port) {
                warn!(id, port = deployment.port, error = %e, "failed to release port");
            }
        }
        self.store.delete_deployment(id)?;
        self.locks.remove(id).await;
        info!(id, "deployment deleted");
        Ok(())
    }

    // ── Read-through accessors ─────────────────────────────────────

    pub fn get_deployment(&self, id: &str) -> OrchestratorResult<Deployment> {
        self.store
            .get_deployment(id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("deployment {id}")))
    }

    pub fn list_deployments(&self) -> OrchestratorResult<Vec<Deployment>> {
        Ok(self.store.list_deployments()?)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn build_env(
        &self,
        deployment: &Deployment,
        https: bool,
        database_url: &str,
        settings_blob: Option<&str>,
        extra: &[String],
    ) -> Vec<String> {
        let scheme = if https { "https" } else { "http" };
        let mut env = vec![
            format!("ROOT_URL={scheme}://{}", deployment.url),
            format!("DATABASE_URL={database_url}"),
        ];
        if !self.settings.auto_manage_mongodb && !self.settings.mongodb_oplog_url.is_empty() {
            env.push(format!(
                "DATABASE_OPLOG_URL={}",
                self.settings.mongodb_oplog_url
            ));
        }
        if let Some(blob) = settings_blob {
            env.push(format!("SETTINGS={blob}"));
        }
        merge_env(env, extra)
    }

    fn issue_certificate(&self, host: &str, config: &ProxyConfig) -> OrchestratorResult<()> {
        let pair = self.issuer.create_self_signed(host)?;
        certs::write_certificate(&pair.cert_pem, Path::new(&config.certificate_path))?;
        certs::write_private_key(&pair.key_pem, Path::new(&config.private_key_path))?;
        Ok(())
    }

    async fn teardown_container(&self, container_id: &str, what: &str) {
        if let Err(e) = self
            .runtime
            .stop_container(container_id, self.settings.stop_timeout_secs)
            .await
        {
            warn!(container = %container_id, error = %e, "failed to stop {what}");
        }
        if let Err(e) = self
            .runtime
            .remove_container(
                container_id,
                RemoveOptions {
                    remove_volumes: true,
                    force: true,
                },
            )
            .await
        {
            warn!(container = %container_id, error = %e, "failed to remove {what}");
        }
    }

    fn persist(&self, deployment: &mut Deployment) -> OrchestratorResult<()> {
        deployment.updated_at = unix_now();
        Ok(self.store.put_deployment(deployment)?)
    }
}

fn validate_create(request: &CreateRequest) -> OrchestratorResult<()> {
    if request.project_name.is_empty() {
        return Err(OrchestratorError::Validation(
            "project name must not be empty".to_string(),
        ));
    }
    if request.project_name.contains(char::is_whitespace) {
        return Err(OrchestratorError::Validation(
            "project name must not contain whitespace".to_string(),
        ));
    }
    if request.volume_path.is_empty() {
        return Err(OrchestratorError::Validation(
            "volume path must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Merge caller `KEY=VALUE` entries over derived defaults. On key
/// collision the caller's entry wins.
fn merge_env(defaults: Vec<String>, overrides: &[String]) -> Vec<String> {
    let override_keys: Vec<&str> = overrides
        .iter()
        .map(|e| e.split_once('=').map_or(e.as_str(), |(k, _)| k))
        .collect();
    let mut env: Vec<String> = defaults
        .into_iter()
        .filter(|e| {
            let key = e.split_once('=').map_or(e.as_str(), |(k, _)| k);
            !override_keys.contains(&key)
        })
        .collect();
    env.extend(overrides.iter().cloned());
    env
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

// ─────────────────────────── Tests ───────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use berth_certs::CertSettings;
    use berth_runtime::FakeRuntime;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        orchestrator: Orchestrator,
        runtime: Arc<FakeRuntime>,
        store: StateStore,
        #[allow(dead_code)]
        tmp: TempDir,
    }

    fn fixture(settings: OrchestratorSettings) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("sites")).unwrap();
        std::fs::create_dir_all(tmp.path().join("certs")).unwrap();

        let store = StateStore::open_in_memory().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let proxy = NginxManager::new(
            store.clone(),
            tmp.path().join("sites"),
            tmp.path().join("certs"),
            vec![],
            Duration::from_secs(5),
        );
        let allocator =
            Allocator::new(store.clone(), ".berth.example").with_words(&["alpha", "omega"]);
        let orchestrator = Orchestrator::new(
            store.clone(),
            runtime.clone(),
            proxy,
            SelfSignedIssuer::new(CertSettings::default()),
            allocator,
            DeploymentLocks::new(),
            settings,
        );
        Fixture {
            orchestrator,
            runtime,
            store,
            tmp,
        }
    }

    fn request() -> CreateRequest {
        CreateRequest {
            project_name: "demo".to_string(),
            volume_path: "/srv/bundles/demo".to_string(),
            auto_start: true,
            https: false,
            settings: None,
            env: vec![],
        }
    }

    fn no_sidecar() -> OrchestratorSettings {
        OrchestratorSettings {
            auto_manage_mongodb: false,
            mongodb_url: "mongodb://db.internal:27017/demo".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_provisions_container_port_domain_and_proxy() {
        let f = fixture(no_sidecar());

        let deployment = f.orchestrator.create_deployment(request()).await.unwrap();

        assert_eq!(deployment.status, STATUS_RUNNING);
        assert!((30000..40000).contains(&deployment.port));
        assert!(deployment.url.ends_with(".berth.example"));
        assert!(!deployment.container_id.is_empty());
        assert!(deployment.sidecar_container_id.is_none());

        let row = f.store.get_proxy(&deployment.url).unwrap().unwrap();
        assert_eq!(row.deployment_id.as_deref(), Some(deployment.id.as_str()));
        assert_eq!(row.destination, format!("http://127.0.0.1:{}", deployment.port));
        assert!(Path::new(&row.config_file_path).exists());

        assert_eq!(
            f.store.port_holder(deployment.port).unwrap().as_deref(),
            Some(deployment.id.as_str())
        );
        assert_eq!(f.runtime.pulled_images(), vec!["kadirahq/meteord:base"]);

        let container = f.runtime.container(&deployment.container_id).unwrap();
        assert_eq!(container.status, ContainerStatus::Running);
        assert_eq!(container.spec.volume_binds[0].container_path, "/bundle");
        assert_eq!(container.spec.port_binds[0].host_port, deployment.port);
        assert_eq!(container.spec.port_binds[0].host_ip, "127.0.0.1");
        assert!(container
            .spec
            .env
            .contains(&"DATABASE_URL=mongodb://db.internal:27017/demo".to_string()));
        assert!(container
            .spec
            .env
            .contains(&format!("ROOT_URL=http://{}", deployment.url)));
    }

    #[tokio::test]
    async fn create_with_managed_sidecar_links_and_derives_database_url() {
        let f = fixture(OrchestratorSettings::default());

        let deployment = f.orchestrator.create_deployment(request()).await.unwrap();

        let sidecar_id = deployment.sidecar_container_id.clone().unwrap();
        let sidecar = f.runtime.container(&sidecar_id).unwrap();
        assert_eq!(sidecar.status, ContainerStatus::Running);
        assert_eq!(sidecar.spec.image, "mongo:3.4");

        let app = f.runtime.container(&deployment.container_id).unwrap();
        let link = app.spec.link.clone().unwrap();
        assert_eq!(link.container, sidecar_id);
        assert_eq!(link.alias, "mongo");
        assert!(app
            .spec
            .env
            .contains(&"DATABASE_URL=mongodb://mongo:27017/demo".to_string()));
    }

    #[tokio::test]
    async fn create_without_auto_start_leaves_container_created() {
        let f = fixture(no_sidecar());
        let mut req = request();
        req.auto_start = false;

        let deployment = f.orchestrator.create_deployment(req).await.unwrap();
        assert_eq!(deployment.status, ContainerStatus::Created.as_str());
        assert_eq!(
            f.runtime.container(&deployment.container_id).unwrap().status,
            ContainerStatus::Created
        );
    }

    #[tokio::test]
    async fn create_https_issues_material_and_renders_ssl_site() {
        let f = fixture(no_sidecar());
        let mut req = request();
        req.https = true;

        let deployment = f.orchestrator.create_deployment(req).await.unwrap();

        let row = f.store.get_proxy(&deployment.url).unwrap().unwrap();
        assert!(row.is_https);
        assert!(row.certificate_path.ends_with(&format!("{}.cer", deployment.url)));
        assert!(Path::new(&row.certificate_path).exists());
        assert!(Path::new(&row.private_key_path).exists());

        let site = std::fs::read_to_string(&row.config_file_path).unwrap();
        assert!(site.contains("listen 443 ssl;"));

        let app = f.runtime.container(&deployment.container_id).unwrap();
        assert!(app
            .spec
            .env
            .contains(&format!("ROOT_URL=https://{}", deployment.url)));
    }

    #[tokio::test]
    async fn caller_env_overrides_derived_entries() {
        let f = fixture(no_sidecar());
        let mut req = request();
        req.settings = Some("{\"public\":{}}".to_string());
        req.env = vec![
            "DATABASE_URL=mongodb://elsewhere:27017/x".to_string(),
            "EXTRA=1".to_string(),
        ];

        let deployment = f.orchestrator.create_deployment(req).await.unwrap();
        let env = f.runtime.container(&deployment.container_id).unwrap().spec.env;

        assert!(env.contains(&"DATABASE_URL=mongodb://elsewhere:27017/x".to_string()));
        assert!(!env.iter().any(|e| e.starts_with("DATABASE_URL=mongodb://db.internal")));
        assert!(env.contains(&"SETTINGS={\"public\":{}}".to_string()));
        assert!(env.contains(&"EXTRA=1".to_string()));
    }

    #[tokio::test]
    async fn create_rejects_invalid_names() {
        let f = fixture(no_sidecar());
        for (name, volume) in [("", "/srv/x"), ("has space", "/srv/x"), ("ok", "")] {
            let req = CreateRequest {
                project_name: name.to_string(),
                volume_path: volume.to_string(),
                ..request()
            };
            let err = f.orchestrator.create_deployment(req).await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Validation(_)));
        }
        assert!(f.store.list_deployments().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_create_rolls_back_everything() {
        let f = fixture(no_sidecar());
        f.runtime.fail_start();

        let err = f.orchestrator.create_deployment(request()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Runtime(_)));

        assert!(f.store.list_deployments().unwrap().is_empty());
        assert!(f.store.list_proxies().unwrap().is_empty());
        assert!(f.runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn failed_create_releases_the_port() {
        let f = fixture(no_sidecar());
        // A one-port universe: if rollback leaked the claim, the
        // second create could never succeed.
        let orchestrator = Orchestrator {
            allocator: Allocator::new(f.store.clone(), ".berth.example")
                .with_port_range(30000..30001),
            ..f.orchestrator.clone()
        };

        f.runtime.fail_create();
        orchestrator.create_deployment(request()).await.unwrap_err();
        assert!(f.store.port_holder(30000).unwrap().is_none());

        let f2 = fixture(no_sidecar());
        let orchestrator = Orchestrator {
            allocator: Allocator::new(f2.store.clone(), ".berth.example")
                .with_port_range(30000..30001),
            ..f2.orchestrator.clone()
        };
        let deployment = orchestrator.create_deployment(request()).await.unwrap();
        assert_eq!(deployment.port, 30000);
    }

    #[tokio::test]
    async fn update_preserves_port_and_url_and_replaces_container() {
        let f = fixture(no_sidecar());
        let created = f.orchestrator.create_deployment(request()).await.unwrap();

        let updated = f
            .orchestrator
            .update_deployment(
                &created.id,
                UpdateRequest {
                    volume_path: Some("/srv/bundles/demo-v2".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.port, created.port);
        assert_eq!(updated.url, created.url);
        assert_ne!(updated.container_id, created.container_id);
        assert_eq!(updated.status, STATUS_RUNNING);
        assert_eq!(updated.volume_path, "/srv/bundles/demo-v2");

        // old container gone, replacement running
        assert!(f.runtime.container(&created.container_id).is_none());
        assert_eq!(
            f.runtime.container(&updated.container_id).unwrap().status,
            ContainerStatus::Running
        );
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let f = fixture(no_sidecar());
        let err = f
            .orchestrator
            .update_deployment("ghost", UpdateRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_marks_deployment_failed_when_replacement_fails() {
        let f = fixture(no_sidecar());
        let created = f.orchestrator.create_deployment(request()).await.unwrap();

        f.runtime.fail_create();
        let err = f
            .orchestrator
            .update_deployment(&created.id, UpdateRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Runtime(_)));

        let stored = f.store.get_deployment(&created.id).unwrap().unwrap();
        assert_eq!(stored.status, STATUS_FAILED);
        assert_eq!(stored.port, created.port);
        assert_eq!(stored.url, created.url);
    }

    #[tokio::test]
    async fn delete_tears_down_proxy_container_port_and_record() {
        let f = fixture(no_sidecar());
        let created = f.orchestrator.create_deployment(request()).await.unwrap();
        let site = f.store.get_proxy(&created.url).unwrap().unwrap().config_file_path;

        f.orchestrator.delete_deployment(&created.id).await.unwrap();

        assert!(f.store.get_deployment(&created.id).unwrap().is_none());
        assert!(f.store.get_proxy(&created.url).unwrap().is_none());
        assert!(f.store.port_holder(created.port).unwrap().is_none());
        assert!(!Path::new(&site).exists());
        assert!(f.runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_id_is_not_found() {
        let f = fixture(no_sidecar());
        let err = f.orchestrator.delete_deployment("ghost").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_retains_sidecar_by_default() {
        let f = fixture(OrchestratorSettings::default());
        let created = f.orchestrator.create_deployment(request()).await.unwrap();
        let sidecar_id = created.sidecar_container_id.clone().unwrap();

        f.orchestrator.delete_deployment(&created.id).await.unwrap();

        assert!(f.runtime.container(&sidecar_id).is_some());
        assert!(f.runtime.container(&created.container_id).is_none());
    }

    #[tokio::test]
    async fn delete_removes_sidecar_under_remove_policy() {
        let settings = OrchestratorSettings {
            sidecar_delete_policy: SidecarDeletePolicy::Remove,
            ..Default::default()
        };
        let f = fixture(settings);
        let created = f.orchestrator.create_deployment(request()).await.unwrap();

        f.orchestrator.delete_deployment(&created.id).await.unwrap();
        assert!(f.runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn delete_survives_runtime_failures() {
        let f = fixture(no_sidecar());
        let created = f.orchestrator.create_deployment(request()).await.unwrap();

        f.runtime.fail_stop();
        f.runtime.fail_remove();
        f.orchestrator.delete_deployment(&created.id).await.unwrap();

        assert!(f.store.get_deployment(&created.id).unwrap().is_none());
        assert!(f.store.port_holder(created.port).unwrap().is_none());
    }

    #[test]
    fn merge_env_caller_wins() {
        let merged = merge_env(
            vec!["A=1".to_string(), "B=2".to_string()],
            &["B=3".to_string(), "C=4".to_string()],
        );
        assert_eq!(merged, vec!["A=1", "B=3", "C=4"]);
    }

    #[test]
    fn sidecar_policy_parses() {
        assert_eq!(
            SidecarDeletePolicy::parse("retain"),
            Some(SidecarDeletePolicy::Retain)
        );
        assert_eq!(
            SidecarDeletePolicy::parse("remove"),
            Some(SidecarDeletePolicy::Remove)
        );
        assert_eq!(SidecarDeletePolicy::parse("keep"), None);
    }
}
