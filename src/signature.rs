//! Ed25519 signature verification over canonical credential payloads (§4.4).
//!
//! Verification is synchronous and allocation-light: the public key comes from a
//! pre-parsed cache snapshot (no per-call lookup I/O), matching the hot-path
//! constraint in §5 that nothing here may block or allocate beyond a small,
//! fixed budget.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::credential::Credential;
use crate::identifiers::IssuerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Valid,
    UnknownIssuer,
    Invalid,
}

/// Verify `credential`'s signature against the issuer public key found in `keys`.
/// Mirrors §4.4/§4.6 step 2-3: unknown issuer and invalid signature are distinct
/// outcomes so the pipeline can attach the right denial code.
pub fn verify(
    credential: &Credential,
    keys: &std::collections::HashMap<IssuerId, VerifyingKey>,
) -> SignatureCheck {
    let Some(public_key) = keys.get(&credential.issuer_id) else {
        return SignatureCheck::UnknownIssuer;
    };

    let Ok(signature) = decode_signature(&credential.signature) else {
        return SignatureCheck::Invalid;
    };

    let payload = credential.canonical_payload();
    match public_key.verify(payload.as_bytes(), &signature) {
        Ok(()) => SignatureCheck::Valid,
        Err(_) => SignatureCheck::Invalid,
    }
}

fn decode_signature(hex_signature: &str) -> Result<Signature, ()> {
    let trimmed = hex_signature
        .strip_prefix("0x")
        .or_else(|| hex_signature.strip_prefix("0X"))
        .unwrap_or(hex_signature);
    let bytes = hex::decode(trimmed).map_err(|_| ())?;
    let array: [u8; 64] = bytes.try_into().map_err(|_| ())?;
    Ok(Signature::from_bytes(&array))
}
