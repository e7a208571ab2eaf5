//! Port and domain allocation.
//!
//! Both resources are leased through atomic insert-if-absent claims in
//! the state store, so concurrent allocations can never hand out the
//! same port or domain twice.

use std::ops::Range;

use berth_state::StateStore;
use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::words::MNEMONIC_WORDS;

/// Default host-port range deployments are bound into.
pub const DEFAULT_PORT_RANGE: Range<u16> = 30000..40000;

/// Random probes before port allocation gives up.
const MAX_PORT_ATTEMPTS: u32 = 100;

/// Name-generation attempts before domain reservation gives up. Far
/// beyond what a healthy word universe ever needs.
const MAX_DOMAIN_ATTEMPTS: u32 = 10_000;

/// Leases host ports and mints unique domain names.
#[derive(Clone)]
pub struct Allocator {
    store: StateStore,
    port_range: Range<u16>,
    words: &'static [&'static str],
    url_base: String,
}

impl Allocator {
    /// Allocator with the default port range and word list.
    pub fn new(store: StateStore, url_base: impl Into<String>) -> Self {
        Self {
            store,
            port_range: DEFAULT_PORT_RANGE,
            words: MNEMONIC_WORDS,
            url_base: url_base.into(),
        }
    }

    pub fn with_port_range(mut self, range: Range<u16>) -> Self {
        self.port_range = range;
        self
    }

    /// Swap the word universe. Tests shrink it to force collisions.
    pub fn with_words(mut self, words: &'static [&'static str]) -> Self {
        self.words = words;
        self
    }

    /// Lease a host port for a deployment.
    ///
    /// Picks uniform candidates in the configured range and claims the
    /// first free one atomically. Fails with `ResourceExhausted` after
    /// a bounded number of collisions.
    pub fn allocate_port(&self, deployment_id: &str) -> OrchestratorResult<u16> {
        let width = u32::from(self.port_range.end - self.port_range.start);
        if width == 0 {
            return Err(OrchestratorError::ResourceExhausted(
                "port range is empty".to_string(),
            ));
        }
        for _ in 0..MAX_PORT_ATTEMPTS {
            let candidate = self.port_range.start + (random_u32()? % width) as u16;
            if self.store.try_claim_port(candidate, deployment_id)? {
                debug!(port = candidate, deployment_id, "port leased");
                return Ok(candidate);
            }
        }
        Err(OrchestratorError::ResourceExhausted(format!(
            "no free port found in {:?} after {MAX_PORT_ATTEMPTS} attempts",
            self.port_range
        )))
    }

    /// Reserve a unique domain name.
    ///
    /// Names are two mnemonic words drawn independently (repeats are
    /// possible) followed by the configured base suffix. The winning
    /// name is inserted as a placeholder proxy row, which is what makes
    /// the reservation stick.
    pub fn reserve_domain(&self) -> OrchestratorResult<String> {
        if self.words.is_empty() {
            return Err(OrchestratorError::ResourceExhausted(
                "domain word list is empty".to_string(),
            ));
        }
        for _ in 0..MAX_DOMAIN_ATTEMPTS {
            let first = self.words[(random_u32()? as usize) % self.words.len()];
            let second = self.words[(random_u32()? as usize) % self.words.len()];
            let domain = format!("{first}{second}{}", self.url_base);
            if self.store.try_reserve_domain(&domain)? {
                debug!(domain, "domain reserved");
                return Ok(domain);
            }
        }
        Err(OrchestratorError::ResourceExhausted(format!(
            "no unique domain found after {MAX_DOMAIN_ATTEMPTS} attempts"
        )))
    }
}

fn random_u32() -> OrchestratorResult<u32> {
    let mut buf = [0u8; 4];
    getrandom::getrandom(&mut buf).map_err(|e| {
        OrchestratorError::ResourceExhausted(format!("random source unavailable: {e}"))
    })?;
    Ok(u32::from_le_bytes(buf))
}
