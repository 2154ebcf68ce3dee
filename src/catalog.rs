//! Catalog: the gate's authoritative declaration of recognized permissions and
//! their default constraints, plus version resolution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constraints::ConstraintMap;
use crate::identifiers::GateId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// One permission entry in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub permission_key: String,
    pub display_name: String,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub default_constraints: ConstraintMap,
    #[serde(default)]
    pub required_constraint_keys: Vec<String>,
    pub upgrade_template: Option<String>,
}

/// A single published catalog version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogVersion {
    pub version: u64,
    pub permissions: Vec<PermissionEntry>,
    pub published_at: chrono::DateTime<chrono::Utc>,

    #[serde(skip)]
    by_key: HashMap<String, usize>,
}

impl CatalogVersion {
    /// Build a version from its wire fields, indexing permissions by key.
    /// `by_key` is a private, derived field, so callers outside this module
    /// construct a `CatalogVersion` through here rather than a struct literal.
    pub fn new(
        version: u64,
        permissions: Vec<PermissionEntry>,
        published_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        CatalogVersion {
            version,
            permissions,
            published_at,
            by_key: HashMap::new(),
        }
        .indexed()
    }

    pub fn indexed(mut self) -> Self {
        self.by_key = self
            .permissions
            .iter()
            .enumerate()
            .map(|(i, p)| (p.permission_key.clone(), i))
            .collect();
        self
    }

    pub fn permission(&self, key: &str) -> Option<&PermissionEntry> {
        self.by_key.get(key).and_then(|i| self.permissions.get(*i))
    }
}

/// The gate's full catalog: current version, optionally some retained older versions,
/// and the minimum compatible version (§3/§4.2).
#[derive(Debug, Clone)]
pub struct Catalog {
    pub gate_id: GateId,
    pub min_compatible_version: u64,
    pub current: CatalogVersion,
    pub retained: HashMap<u64, CatalogVersion>,
}

/// Outcome of resolving a credential's catalog-version pin against this catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedVersion<'a> {
    Version(&'a CatalogVersion),
    Deprecated,
}

impl Catalog {
    /// Resolve which catalog version applies for a credential's pin (§4.2):
    /// no pin -> current; pin below `min_compatible_version` -> deprecated;
    /// pin at or above that floor -> that version if retained, else current
    /// (fall-forward, since current is always a superset-or-later of compatible).
    pub fn resolve(&self, pin: Option<u64>) -> ResolvedVersion<'_> {
        let Some(pinned) = pin else {
            return ResolvedVersion::Version(&self.current);
        };

        if pinned < self.min_compatible_version {
            return ResolvedVersion::Deprecated;
        }

        match self.retained.get(&pinned) {
            Some(version) => ResolvedVersion::Version(version),
            None => ResolvedVersion::Version(&self.current),
        }
    }
}
