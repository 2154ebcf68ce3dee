//! Cache Store (§4.2): three independently-refreshed snapshots — catalog,
//! revocation set, issuer public-key map — each behind a read-mostly lock.
//!
//! Generalizes a simple insert/get/is_expired cache to whole-entry atomic
//! replacement: a reader never observes a partially written snapshot, and
//! the background refresher (`refresh.rs`) swaps an entry only after a
//! fetch fully succeeds.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use ed25519_dalek::VerifyingKey;
use parking_lot::RwLock;

use crate::catalog::Catalog;
use crate::identifiers::{CredentialId, IssuerId};

/// A snapshot of `T` plus the instant it was written, used to answer
/// freshness checks without re-fetching.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub value: T,
    pub cached_at: Instant,
}

impl<T> Snapshot<T> {
    pub fn new(value: T, now: Instant) -> Self {
        Self {
            value,
            cached_at: now,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.cached_at)
    }

    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        self.age(now) <= ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    FailOpen,
    FailClosed,
}

/// Per-action override of the default fail mode and revocation staleness budget.
#[derive(Debug, Clone, Copy)]
pub struct FailModeOverride {
    pub fail_mode: FailMode,
    pub revocation_max_age: Duration,
}

/// Outcome of reading a snapshot: the value plus whether it was fresh enough
/// for the caller to treat with full confidence (§9 `confident` flag).
pub struct Read<T> {
    pub value: T,
    pub fresh: bool,
}

pub struct CacheStore {
    catalog: RwLock<Option<Snapshot<Catalog>>>,
    catalog_ttl: Duration,

    revocations: RwLock<Option<Snapshot<HashSet<CredentialId>>>>,
    revocation_ttl: Duration,

    issuer_keys: RwLock<Option<Snapshot<HashMap<IssuerId, VerifyingKey>>>>,
    issuer_keys_ttl: Duration,

    default_fail_mode: FailMode,
    fail_mode_overrides: HashMap<String, FailModeOverride>,
}

impl CacheStore {
    pub fn new(
        catalog_ttl: Duration,
        revocation_ttl: Duration,
        issuer_keys_ttl: Duration,
        default_fail_mode: FailMode,
        fail_mode_overrides: HashMap<String, FailModeOverride>,
    ) -> Self {
        Self {
            catalog: RwLock::new(None),
            catalog_ttl,
            revocations: RwLock::new(None),
            revocation_ttl,
            issuer_keys: RwLock::new(None),
            issuer_keys_ttl,
            default_fail_mode,
            fail_mode_overrides,
        }
    }

    /// Defaults per §3: catalog 5 min, revocation 1 min, keys 5 min.
    pub fn with_defaults() -> Self {
        Self::new(
            Duration::from_secs(5 * 60),
            Duration::from_secs(60),
            Duration::from_secs(5 * 60),
            FailMode::FailClosed,
            HashMap::new(),
        )
    }

    pub fn fail_mode_for(&self, action: &str) -> FailMode {
        self.fail_mode_overrides
            .get(action)
            .map(|o| o.fail_mode)
            .unwrap_or(self.default_fail_mode)
    }

    pub fn revocation_max_age_for(&self, action: &str) -> Duration {
        self.fail_mode_overrides
            .get(action)
            .map(|o| o.revocation_max_age)
            .unwrap_or(self.revocation_ttl)
    }

    pub fn read_catalog(&self, now: Instant) -> Option<Read<Catalog>> {
        let guard = self.catalog.read();
        guard.as_ref().map(|snap| Read {
            value: snap.value.clone(),
            fresh: snap.is_fresh(now, self.catalog_ttl),
        })
    }

    pub fn replace_catalog(&self, catalog: Catalog, now: Instant) {
        *self.catalog.write() = Some(Snapshot::new(catalog, now));
    }

    /// Freshness here is measured against the per-action `revocation_max_age`
    /// rather than the store's own TTL, per §4.2's override table.
    pub fn read_revocations(&self, action: &str, now: Instant) -> Option<Read<HashSet<CredentialId>>> {
        let max_age = self.revocation_max_age_for(action);
        let guard = self.revocations.read();
        guard.as_ref().map(|snap| Read {
            value: snap.value.clone(),
            fresh: snap.is_fresh(now, max_age),
        })
    }

    pub fn replace_revocations(&self, revoked: HashSet<CredentialId>, now: Instant) {
        *self.revocations.write() = Some(Snapshot::new(revoked, now));
    }

    pub fn read_issuer_keys(&self, now: Instant) -> Option<Read<HashMap<IssuerId, VerifyingKey>>> {
        let guard = self.issuer_keys.read();
        guard.as_ref().map(|snap| Read {
            value: snap.value.clone(),
            fresh: snap.is_fresh(now, self.issuer_keys_ttl),
        })
    }

    pub fn replace_issuer_keys(&self, keys: HashMap<IssuerId, VerifyingKey>, now: Instant) {
        *self.issuer_keys.write() = Some(Snapshot::new(keys, now));
    }
}
