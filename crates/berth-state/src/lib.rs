//! berth-state — embedded state store for Berth.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for deployments, proxy configurations, and port leases.
//!
//! # Architecture
//!
//! Domain records are JSON-serialized into redb's `&[u8]` value columns.
//! Proxy configurations are keyed by domain name, which makes the table
//! itself the uniqueness constraint for domains (bound or merely
//! reserved). Port leases live in a dedicated `u16 → deployment id`
//! table; claims and reservations are insert-if-absent operations inside
//! a single write transaction, and redb serializes writers, so two
//! concurrent callers can never claim the same resource.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
