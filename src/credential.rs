//! Credential (passport) data model, canonical signing payload, and the
//! claims-by-key index.
//!
//! The claims-by-key index is a pure function of the claims list: it is rebuilt
//! whenever a credential is loaded and never mutated independently, so there is no
//! ownership cycle between the credential and its derived index (§9).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::canonical::{canonical_object, field, optional_field};
use crate::constraints::ConstraintMap;
use crate::identifiers::{CredentialId, GateId, IssuerId, SubjectId};

/// One claim: a permission key plus the per-claim constraints that scope it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claim {
    pub permission_key: String,
    #[serde(default)]
    pub constraints: ConstraintMap,
}

/// A signed credential, as presented by a caller on a tool/RPC call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub credential_id: CredentialId,
    pub issuer_id: IssuerId,
    pub subject_id: SubjectId,
    pub gate_id: GateId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub claims: Vec<Claim>,
    #[serde(default)]
    pub constraints: ConstraintMap,
    /// Gate id -> pinned catalog version.
    #[serde(default)]
    pub catalog_version_pin: HashMap<String, u64>,
    /// Hex-encoded Ed25519 signature over the canonical payload, `0x` prefix optional.
    pub signature: String,

    /// Derived at load time; never serialized, never mutated independently.
    #[serde(skip)]
    claims_by_key: HashMap<String, usize>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    #[error("expires_at must be strictly after issued_at")]
    NonPositiveValidityWindow,
}

impl Credential {
    /// Load a credential, building its claims-by-key index. Rejects a credential
    /// whose `expires_at` is not strictly after `issued_at` (§3 invariant).
    pub fn load(mut raw: Credential) -> Result<Self, CredentialError> {
        if raw.expires_at <= raw.issued_at {
            return Err(CredentialError::NonPositiveValidityWindow);
        }
        raw.claims_by_key = build_claims_index(&raw.claims);
        Ok(raw)
    }

    /// Construct a credential from its public fields, deriving the claims index.
    /// `claims_by_key` is a private, derived field, so callers outside this module
    /// build credentials through here rather than a struct literal.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        credential_id: CredentialId,
        issuer_id: IssuerId,
        subject_id: SubjectId,
        gate_id: GateId,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        claims: Vec<Claim>,
        constraints: ConstraintMap,
        catalog_version_pin: HashMap<String, u64>,
        signature: String,
    ) -> Result<Self, CredentialError> {
        Self::load(Credential {
            credential_id,
            issuer_id,
            subject_id,
            gate_id,
            issued_at,
            expires_at,
            claims,
            constraints,
            catalog_version_pin,
            signature,
            claims_by_key: HashMap::new(),
        })
    }

    /// O(1) lookup of a claim by permission key.
    pub fn claim(&self, permission_key: &str) -> Option<&Claim> {
        self.claims_by_key
            .get(permission_key)
            .and_then(|idx| self.claims.get(*idx))
    }

    pub fn has_claim(&self, permission_key: &str) -> bool {
        self.claims_by_key.contains_key(permission_key)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        // Strict `<`: a credential expiring exactly now is treated as expired.
        now >= self.expires_at
    }

    /// The exact byte sequence that was (or must be) signed, per §4.4's field order.
    pub fn canonical_payload(&self) -> String {
        let pin = if self.catalog_version_pin.is_empty() {
            None
        } else {
            let mut sorted: Vec<(&String, &u64)> = self.catalog_version_pin.iter().collect();
            sorted.sort_by_key(|(k, _)| k.clone());
            Some(json!(sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect::<HashMap<_, _>>()))
        };

        let claims_json: Vec<Value> = self
            .claims
            .iter()
            .map(|c| {
                json!({
                    "permission_key": c.permission_key,
                    "constraints": c.constraints,
                })
            })
            .collect();

        canonical_object(&[
            field("credential_id", json!(self.credential_id.0)),
            field("issuer_id", json!(self.issuer_id.0)),
            field("subject_id", json!(self.subject_id.0)),
            field("gate_id", json!(self.gate_id.0)),
            field("claims", json!(claims_json)),
            field("constraints", json!(self.constraints)),
            field("expires_at", json!(self.expires_at.to_rfc3339())),
            field("issued_at", json!(self.issued_at.to_rfc3339())),
            optional_field("catalog_version_pin", pin),
        ])
    }
}

fn build_claims_index(claims: &[Claim]) -> HashMap<String, usize> {
    let mut index = HashMap::with_capacity(claims.len());
    for (i, claim) in claims.iter().enumerate() {
        index.insert(claim.permission_key.clone(), i);
    }
    index
}
