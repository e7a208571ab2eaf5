//! StateStore — redb-backed state persistence for Berth.
//!
//! Provides typed CRUD operations over deployments and proxy
//! configurations, plus the atomic port-claim and domain-reservation
//! primitives the allocator relies on. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk
//! and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(PROXIES).map_err(map_err!(Table))?;
        txn.open_table(PORTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment record.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let value = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(deployment.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %deployment.id, "deployment stored");
        Ok(())
    }

    /// Get a deployment by id.
    pub fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let deployment: Deployment =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(deployment))
            }
            None => Ok(None),
        }
    }

    /// List all deployments.
    pub fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(deployment);
        }
        Ok(results)
    }

    /// Delete a deployment by id. Returns true if it existed.
    pub fn delete_deployment(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, existed, "deployment deleted");
        Ok(existed)
    }

    // ── Proxy configurations ───────────────────────────────────────

    /// Insert or update a proxy configuration (keyed by domain name).
    pub fn put_proxy(&self, config: &ProxyConfig) -> StateResult<()> {
        let value = serde_json::to_vec(config).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PROXIES).map_err(map_err!(Table))?;
            table
                .insert(config.domain_name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a proxy configuration by domain name.
    pub fn get_proxy(&self, domain_name: &str) -> StateResult<Option<ProxyConfig>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROXIES).map_err(map_err!(Table))?;
        match table.get(domain_name).map_err(map_err!(Read))? {
            Some(guard) => {
                let config: ProxyConfig =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(config))
            }
            None => Ok(None),
        }
    }

    /// List all proxy configurations, bound and reserved.
    pub fn list_proxies(&self) -> StateResult<Vec<ProxyConfig>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROXIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let config: ProxyConfig =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(config);
        }
        Ok(results)
    }

    /// Find the proxy configuration bound to a deployment, if any.
    pub fn find_proxy_for_deployment(
        &self,
        deployment_id: &str,
    ) -> StateResult<Option<ProxyConfig>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROXIES).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let config: ProxyConfig =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if config.deployment_id.as_deref() == Some(deployment_id) {
                return Ok(Some(config));
            }
        }
        Ok(None)
    }

    /// Delete a proxy configuration by domain name. Returns true if it existed.
    pub fn delete_proxy(&self, domain_name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(PROXIES).map_err(map_err!(Table))?;
            existed = table.remove(domain_name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%domain_name, existed, "proxy configuration deleted");
        Ok(existed)
    }

    /// Atomically reserve a domain name by inserting a placeholder row.
    ///
    /// Returns false if the domain already exists (bound or reserved).
    /// The check and the insert happen inside one write transaction;
    /// redb serializes writers, so two concurrent reservations of the
    /// same name cannot both succeed.
    pub fn try_reserve_domain(&self, domain_name: &str) -> StateResult<bool> {
        let reservation = ProxyConfig::reservation(domain_name);
        let value = serde_json::to_vec(&reservation).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let reserved;
        {
            let mut table = txn.open_table(PROXIES).map_err(map_err!(Table))?;
            if table.get(domain_name).map_err(map_err!(Read))?.is_some() {
                reserved = false;
            } else {
                table
                    .insert(domain_name, value.as_slice())
                    .map_err(map_err!(Write))?;
                reserved = true;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%domain_name, reserved, "domain reservation attempt");
        Ok(reserved)
    }

    // ── Port leases ────────────────────────────────────────────────

    /// Atomically claim a host port for a deployment.
    ///
    /// Returns false if the port is already held. Same transactional
    /// guarantee as [`StateStore::try_reserve_domain`].
    pub fn try_claim_port(&self, port: u16, deployment_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let claimed;
        {
            let mut table = txn.open_table(PORTS).map_err(map_err!(Table))?;
            if table.get(port).map_err(map_err!(Read))?.is_some() {
                claimed = false;
            } else {
                table.insert(port, deployment_id).map_err(map_err!(Write))?;
                claimed = true;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(port, %deployment_id, claimed, "port claim attempt");
        Ok(claimed)
    }

    /// Release a port lease. Returns true if it was held.
    pub fn release_port(&self, port: u16) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(PORTS).map_err(map_err!(Table))?;
            existed = table.remove(port).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(port, existed, "port released");
        Ok(existed)
    }

    /// Deployment id currently holding a port, if any.
    pub fn port_holder(&self, port: u16) -> StateResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PORTS).map_err(map_err!(Table))?;
        Ok(table
            .get(port)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_deployment(id: &str, project: &str) -> Deployment {
        Deployment {
            id: id.to_string(),
            project_name: project.to_string(),
            volume_path: format!("/srv/apps/{project}"),
            auto_start: true,
            container_id: String::new(),
            sidecar_container_id: None,
            port: 30500,
            url: String::new(),
            status: STATUS_PROVISIONING.to_string(),
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_proxy(domain: &str, deployment_id: Option<&str>) -> ProxyConfig {
        ProxyConfig {
            domain_name: domain.to_string(),
            is_https: false,
            certificate_path: String::new(),
            private_key_path: String::new(),
            destination: "http://127.0.0.1:30500".to_string(),
            deployment_id: deployment_id.map(str::to_string),
            config_file_path: String::new(),
        }
    }

    // ── Deployment CRUD ────────────────────────────────────────────

    #[test]
    fn deployment_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let deployment = test_deployment("d-1", "shop");

        store.put_deployment(&deployment).unwrap();
        let retrieved = store.get_deployment("d-1").unwrap();

        assert_eq!(retrieved, Some(deployment));
    }

    #[test]
    fn deployment_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_deployment("nope").unwrap().is_none());
    }

    #[test]
    fn deployment_update_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut deployment = test_deployment("d-1", "shop");
        store.put_deployment(&deployment).unwrap();

        deployment.status = STATUS_RUNNING.to_string();
        deployment.container_id = "abc123".to_string();
        deployment.updated_at = 2000;
        store.put_deployment(&deployment).unwrap();

        let retrieved = store.get_deployment("d-1").unwrap().unwrap();
        assert_eq!(retrieved.status, STATUS_RUNNING);
        assert_eq!(retrieved.container_id, "abc123");
        assert_eq!(retrieved.updated_at, 2000);
    }

    #[test]
    fn deployment_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_deployment(&test_deployment("d-1", "a")).unwrap();
        store.put_deployment(&test_deployment("d-2", "b")).unwrap();
        store.put_deployment(&test_deployment("d-3", "c")).unwrap();

        assert_eq!(store.list_deployments().unwrap().len(), 3);
    }

    #[test]
    fn deployment_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_deployment(&test_deployment("d-1", "shop")).unwrap();

        assert!(store.delete_deployment("d-1").unwrap());
        assert!(!store.delete_deployment("d-1").unwrap());
        assert!(store.get_deployment("d-1").unwrap().is_none());
    }

    // ── Proxy CRUD ─────────────────────────────────────────────────

    #[test]
    fn proxy_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let config = test_proxy("silverocean.apps.example.com", Some("d-1"));

        store.put_proxy(&config).unwrap();
        let retrieved = store.get_proxy("silverocean.apps.example.com").unwrap();

        assert_eq!(retrieved, Some(config));
    }

    #[test]
    fn proxy_find_by_deployment() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_proxy(&test_proxy("a.example.com", Some("d-1"))).unwrap();
        store.put_proxy(&test_proxy("b.example.com", Some("d-2"))).unwrap();
        store.put_proxy(&test_proxy("c.example.com", None)).unwrap();

        let found = store.find_proxy_for_deployment("d-2").unwrap().unwrap();
        assert_eq!(found.domain_name, "b.example.com");
        assert!(store.find_proxy_for_deployment("d-9").unwrap().is_none());
    }

    #[test]
    fn proxy_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_proxy(&test_proxy("a.example.com", None)).unwrap();

        assert!(store.delete_proxy("a.example.com").unwrap());
        assert!(!store.delete_proxy("a.example.com").unwrap());
    }

    // ── Domain reservation ─────────────────────────────────────────

    #[test]
    fn domain_reservation_is_exclusive() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.try_reserve_domain("moonriver.example.com").unwrap());
        assert!(!store.try_reserve_domain("moonriver.example.com").unwrap());

        let row = store.get_proxy("moonriver.example.com").unwrap().unwrap();
        assert!(row.deployment_id.is_none());
    }

    #[test]
    fn reservation_blocked_by_bound_row() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_proxy(&test_proxy("taken.example.com", Some("d-1"))).unwrap();

        assert!(!store.try_reserve_domain("taken.example.com").unwrap());
    }

    // ── Port leases ────────────────────────────────────────────────

    #[test]
    fn port_claim_is_exclusive() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.try_claim_port(30500, "d-1").unwrap());
        assert!(!store.try_claim_port(30500, "d-2").unwrap());
        assert_eq!(store.port_holder(30500).unwrap(), Some("d-1".to_string()));
    }

    #[test]
    fn port_release_allows_reclaim() {
        let store = StateStore::open_in_memory().unwrap();
        store.try_claim_port(30500, "d-1").unwrap();

        assert!(store.release_port(30500).unwrap());
        assert!(!store.release_port(30500).unwrap());
        assert!(store.try_claim_port(30500, "d-2").unwrap());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("berth.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_deployment(&test_deployment("d-1", "shop")).unwrap();
            store.try_claim_port(31000, "d-1").unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_deployment("d-1").unwrap().is_some());
        assert_eq!(store.port_holder(31000).unwrap(), Some("d-1".to_string()));
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_deployments().unwrap().is_empty());
        assert!(store.list_proxies().unwrap().is_empty());
        assert!(store.port_holder(30000).unwrap().is_none());
        assert!(!store.delete_deployment("nope").unwrap());
        assert!(!store.delete_proxy("nope").unwrap());
    }
}
