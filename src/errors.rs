//! Unified error handling for the permission gate.
//!
//! Two error types exist for two different purposes: [`DenialCode`] is a stable,
//! serializable reason code attached to a single call's verification result, while
//! [`GateError`] covers operational failures (bad configuration, malformed input,
//! cache refresh transport errors) that are not tied to a specific authorization
//! decision.

use serde::{Deserialize, Serialize};

/// Stable denial reason codes. Every variant is a wire constant (see `Display`);
/// renaming a variant is a breaking wire change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialCode {
    PassportMissing,
    InvalidSignature,
    PassportExpired,
    PassportRevoked,
    IssuerNotAllowed,
    CatalogVersionDeprecated,
    CatalogVersionUnknown,
    PermissionDenied,
    ConstraintViolated,
    ApprovalRequired,
    RateLimited,
    SessionInvalid,
    AntiDowngrade,
    StaleRevocationData,
}

impl DenialCode {
    /// The stable wire string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PassportMissing => "passport_missing",
            Self::InvalidSignature => "invalid_signature",
            Self::PassportExpired => "passport_expired",
            Self::PassportRevoked => "passport_revoked",
            Self::IssuerNotAllowed => "issuer_not_allowed",
            Self::CatalogVersionDeprecated => "catalog_version_deprecated",
            Self::CatalogVersionUnknown => "catalog_version_unknown",
            Self::PermissionDenied => "permission_denied",
            Self::ConstraintViolated => "constraint_violated",
            Self::ApprovalRequired => "approval_required",
            Self::RateLimited => "rate_limited",
            Self::SessionInvalid => "session_invalid",
            Self::AntiDowngrade => "anti_downgrade",
            Self::StaleRevocationData => "stale_revocation_data",
        }
    }
}

impl std::fmt::Display for DenialCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational error type for fallible gate operations that are not a per-call
/// verification decision (config, normalization, receipt verification, cache I/O).
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum GateError {
    /// Malformed or out-of-domain input.
    #[error("invalid: {message}")]
    Invalid { message: String },

    /// A decimal string could not be normalized.
    #[error("normalize error: {0}")]
    Normalize(#[from] crate::normalize::NormalizeError),

    /// Signature verification failed outside the hot path (e.g. receipt verify).
    #[error("signature mismatch: {message}")]
    SignatureMismatch { message: String },

    /// Receipt verification failed for a specific field.
    #[error("receipt invalid: {reason}")]
    ReceiptInvalid { reason: String },

    /// Background refresh or upstream authority call failed.
    #[error("upstream error: {message}")]
    Upstream { message: String },

    /// Constraint merge encountered a type mismatch.
    #[error("constraint type error: {details}")]
    ConstraintType { details: String },
}

impl GateError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Error category, for log correlation.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "invalid",
            Self::Normalize(_) => "normalize",
            Self::SignatureMismatch { .. } => "signature",
            Self::ReceiptInvalid { .. } => "receipt",
            Self::Upstream { .. } => "upstream",
            Self::ConstraintType { .. } => "constraint_type",
        }
    }
}

pub type GateResult<T> = std::result::Result<T, GateError>;
