//! redb table definitions for the Berth state store.
//!
//! Deployments and proxy configurations use `&str` keys with
//! JSON-serialized values. Port leases use the port number itself as
//! the key so a claim is a plain insert-if-absent.

use redb::TableDefinition;

/// Deployment records keyed by deployment id.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Proxy configurations keyed by domain name.
///
/// Keying by domain makes this table the uniqueness constraint for
/// domain names, including reservations not yet bound to a deployment.
pub const PROXIES: TableDefinition<&str, &[u8]> = TableDefinition::new("proxies");

/// Port leases: host port → owning deployment id.
pub const PORTS: TableDefinition<u16, &str> = TableDefinition::new("ports");
