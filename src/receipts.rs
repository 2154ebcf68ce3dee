//! Receipt Issuer / Verifier (§4.9): signed consumption attestations.
//!
//! `issue()` takes a signing callback rather than owning a key directly —
//! the gate itself never needs to hold (or even know the shape of) private
//! key material, only a place to hand bytes to and get a signature back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::canonical::{canonical_object, field, optional_field};
use crate::constraints::{ConstraintMap, KEY_PLATFORM_FEE_BASIS_POINTS, KEY_PRICING_MODEL,
    KEY_PRICING_PER_CALL_CENTS, KEY_PRICING_PER_MINUTE_CENTS};
use crate::errors::GateError;
use crate::identifiers::{CredentialId, GateId, ReceiptId, SubjectId};

/// Signs arbitrary bytes under a given key id. Implemented over whatever key
/// material the host holds; the gate only ever sees the callback.
pub trait ReceiptSigner {
    fn key_id(&self) -> String;
    fn sign(&self, payload: &[u8]) -> String;
}

pub trait ReceiptVerifierKey {
    fn verify(&self, payload: &[u8], signature_hex: &str) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consumption {
    pub units: u64,
    pub cost_cents: i64,
    pub platform_fee_cents: i64,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proof {
    pub key_id: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionReceipt {
    #[serde(rename = "type")]
    pub receipt_type: String,
    pub receipt_id: ReceiptId,
    pub gate_id: GateId,
    pub subject_id: SubjectId,
    pub credential_id: CredentialId,
    pub permission_key: String,
    pub catalog_version: u64,
    pub request_nonce: Option<String>,
    pub effective_constraints: ConstraintMap,
    pub consumption: Consumption,
    pub proof: Proof,
}

pub struct IssueParams<'a> {
    pub gate_id: GateId,
    pub subject_id: SubjectId,
    pub credential_id: CredentialId,
    pub permission_key: String,
    pub catalog_version: u64,
    pub effective_constraints: ConstraintMap,
    pub request_nonce: Option<String>,
    pub duration_ms: Option<u64>,
    pub units: Option<u64>,
    pub signer: &'a dyn ReceiptSigner,
    pub now: DateTime<Utc>,
}

/// `cost_cents = per_minute_cents * ceil(duration_ms / 60_000)` when the
/// pricing model is `per_minute` and a duration is known; otherwise
/// `per_call_cents * units`; otherwise zero.
fn compute_cost_cents(effective: &ConstraintMap, duration_ms: Option<u64>, units: u64) -> i64 {
    let model = effective.get(KEY_PRICING_MODEL).and_then(|v| v.as_str());

    if model == Some("per_minute") {
        if let Some(duration_ms) = duration_ms {
            let per_minute_cents = effective
                .get(KEY_PRICING_PER_MINUTE_CENTS)
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let minutes = duration_ms.div_ceil(60_000);
            return per_minute_cents * minutes as i64;
        }
    }

    let per_call_cents = effective
        .get(KEY_PRICING_PER_CALL_CENTS)
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    per_call_cents * units as i64
}

/// `ceil(cost_cents * basis_points / 10_000)`. Ceiling rounding is normative (§4.9).
fn compute_platform_fee_cents(effective: &ConstraintMap, cost_cents: i64) -> i64 {
    let basis_points = effective
        .get(KEY_PLATFORM_FEE_BASIS_POINTS)
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let numerator = cost_cents * basis_points;
    numerator.div_ceil(10_000)
}

fn canonical_payload(receipt_without_proof: &ConsumptionReceiptFields<'_>) -> String {
    canonical_object(&[
        field("type", json!("consumption")),
        field("receipt_id", json!(receipt_without_proof.receipt_id.0)),
        field("gate_id", json!(receipt_without_proof.gate_id.0)),
        field("subject_id", json!(receipt_without_proof.subject_id.0)),
        field("credential_id", json!(receipt_without_proof.credential_id.0)),
        field("permission_key", json!(receipt_without_proof.permission_key)),
        field("catalog_version", json!(receipt_without_proof.catalog_version)),
        optional_field(
            "request_nonce",
            receipt_without_proof.request_nonce.clone().map(Value::String),
        ),
        field("effective_constraints", json!(receipt_without_proof.effective_constraints)),
        field(
            "consumption",
            json!({
                "units": receipt_without_proof.consumption.units,
                "cost_cents": receipt_without_proof.consumption.cost_cents,
                "platform_fee_cents": receipt_without_proof.consumption.platform_fee_cents,
                "timestamp": receipt_without_proof.consumption.timestamp.to_rfc3339(),
                "duration_ms": receipt_without_proof.consumption.duration_ms,
            }),
        ),
    ])
}

struct ConsumptionReceiptFields<'a> {
    receipt_id: &'a ReceiptId,
    gate_id: &'a GateId,
    subject_id: &'a SubjectId,
    credential_id: &'a CredentialId,
    permission_key: &'a str,
    catalog_version: u64,
    request_nonce: &'a Option<String>,
    effective_constraints: &'a ConstraintMap,
    consumption: &'a Consumption,
}

pub fn issue(params: IssueParams<'_>) -> ConsumptionReceipt {
    let units = params.units.unwrap_or(1);
    let cost_cents = compute_cost_cents(&params.effective_constraints, params.duration_ms, units);
    let platform_fee_cents = compute_platform_fee_cents(&params.effective_constraints, cost_cents);

    let receipt_id = ReceiptId::new();
    let consumption = Consumption {
        units,
        cost_cents,
        platform_fee_cents,
        timestamp: params.now,
        duration_ms: params.duration_ms,
    };

    let payload = canonical_payload(&ConsumptionReceiptFields {
        receipt_id: &receipt_id,
        gate_id: &params.gate_id,
        subject_id: &params.subject_id,
        credential_id: &params.credential_id,
        permission_key: &params.permission_key,
        catalog_version: params.catalog_version,
        request_nonce: &params.request_nonce,
        effective_constraints: &params.effective_constraints,
        consumption: &consumption,
    });

    let signature = params.signer.sign(payload.as_bytes());

    ConsumptionReceipt {
        receipt_type: "consumption".to_string(),
        receipt_id,
        gate_id: params.gate_id,
        subject_id: params.subject_id,
        credential_id: params.credential_id,
        permission_key: params.permission_key,
        catalog_version: params.catalog_version,
        request_nonce: params.request_nonce,
        effective_constraints: params.effective_constraints,
        consumption,
        proof: Proof {
            key_id: params.signer.key_id(),
            signature,
        },
    }
}

/// Re-derive the canonical payload of an already-issued receipt (proof excluded).
fn receipt_payload(receipt: &ConsumptionReceipt) -> String {
    canonical_payload(&ConsumptionReceiptFields {
        receipt_id: &receipt.receipt_id,
        gate_id: &receipt.gate_id,
        subject_id: &receipt.subject_id,
        credential_id: &receipt.credential_id,
        permission_key: &receipt.permission_key,
        catalog_version: receipt.catalog_version,
        request_nonce: &receipt.request_nonce,
        effective_constraints: &receipt.effective_constraints,
        consumption: &receipt.consumption,
    })
}

pub fn verify(
    receipt: &ConsumptionReceipt,
    expected_nonce: Option<&str>,
    verifier_key: &dyn ReceiptVerifierKey,
) -> Result<(), GateError> {
    if let Some(expected) = expected_nonce {
        if receipt.request_nonce.as_deref() != Some(expected) {
            return Err(GateError::ReceiptInvalid {
                reason: "nonce_mismatch".to_string(),
            });
        }
    }

    let payload = receipt_payload(receipt);
    if !verifier_key.verify(payload.as_bytes(), &receipt.proof.signature) {
        return Err(GateError::ReceiptInvalid {
            reason: "signature_mismatch".to_string(),
        });
    }

    let expected_cost = compute_cost_cents(
        &receipt.effective_constraints,
        receipt.consumption.duration_ms,
        receipt.consumption.units,
    );
    if expected_cost != receipt.consumption.cost_cents {
        return Err(GateError::ReceiptInvalid {
            reason: "cost_mismatch".to_string(),
        });
    }

    let expected_fee = compute_platform_fee_cents(&receipt.effective_constraints, expected_cost);
    if expected_fee != receipt.consumption.platform_fee_cents {
        return Err(GateError::ReceiptInvalid {
            reason: "platform_fee_mismatch".to_string(),
        });
    }

    Ok(())
}
