//! Verification Pipeline (§4.6): the hot-path sequence of checks that turns
//! an optional credential, an action, and a request context into a
//! permit/deny decision.
//!
//! A single free function over borrowed snapshots — no I/O, no shared
//! mutable state beyond what the caller already holds locks on — so it is
//! trivially reentrant and deterministic for a fixed set of inputs (§5, §8).

use std::time::Instant;

use crate::cache::{CacheStore, FailMode};
use crate::constraints::{self, ConstraintMap, RequestContext, Verdict, KEY_COST_MAX_CUMULATIVE};
use crate::cost_tracker::CostTracker;
use crate::credential::Credential;
use crate::errors::DenialCode;
use crate::rate_limit::{RateLimitDecision, RateLimiter};

/// Policy governing calls with no credential presented at all.
#[derive(Debug, Clone)]
pub struct AnonymousPolicy {
    pub enabled: bool,
    pub allowed_actions: Vec<String>,
}

impl AnonymousPolicy {
    pub fn allows(&self, action: &str) -> bool {
        self.enabled && self.allowed_actions.iter().any(|a| a == action)
    }
}

#[derive(Debug, Clone)]
pub struct Denial {
    pub code: DenialCode,
    pub message: String,
    pub upgrade_template: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Permit,
    Deny,
}

#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub decision: Decision,
    pub constraint_decision: Verdict,
    pub effective_constraints: ConstraintMap,
    pub denial: Option<Denial>,
    pub reason_codes: Vec<DenialCode>,
    pub obligations: Vec<String>,
    /// True when every cache entry this call consulted was fresh (§4.6, §9).
    pub confident: bool,
}

impl VerifyResult {
    fn deny(code: DenialCode, message: impl Into<String>, confident: bool) -> Self {
        Self {
            decision: Decision::Deny,
            constraint_decision: Verdict::Block,
            effective_constraints: ConstraintMap::new(),
            denial: Some(Denial {
                code,
                message: message.into(),
                upgrade_template: None,
            }),
            reason_codes: vec![code],
            obligations: Vec::new(),
            confident,
        }
    }

    fn with_upgrade_template(mut self, template: Option<String>) -> Self {
        if let Some(denial) = &mut self.denial {
            denial.upgrade_template = template;
        }
        self
    }
}

pub struct VerifyInput<'a> {
    pub credential: Option<&'a Credential>,
    pub action: &'a str,
    pub context: &'a RequestContext,
    pub anonymous_policy: Option<&'a AnonymousPolicy>,
    pub source_id: Option<&'a str>,
}

/// Run the full §4.6 sequence. Both clocks are threaded through explicitly —
/// `now` (monotonic, for cache freshness) and `wall_now` (wall-clock, for
/// expiry comparisons) — so the pipeline stays a pure function of its
/// inputs (freeze-time-safe for tests, §8 determinism property).
pub fn verify(
    input: &VerifyInput<'_>,
    cache: &CacheStore,
    rate_limiter: &RateLimiter,
    cost_tracker: &CostTracker,
    now: Instant,
    wall_now: chrono::DateTime<chrono::Utc>,
) -> VerifyResult {
    let mut confident = true;

    // Step 1: no credential presented.
    let Some(credential) = input.credential else {
        let allowed = input
            .anonymous_policy
            .map(|policy| policy.allows(input.action))
            .unwrap_or(false);

        if !allowed {
            return VerifyResult::deny(
                DenialCode::PassportMissing,
                "no credential presented and anonymous access is not permitted for this action",
                confident,
            );
        }

        let source = input.source_id.unwrap_or("anonymous");
        return match rate_limiter.check_and_increment(input.action, source, now) {
            RateLimitDecision::Allowed { .. } => VerifyResult {
                decision: Decision::Permit,
                constraint_decision: Verdict::Permit,
                effective_constraints: ConstraintMap::new(),
                denial: None,
                reason_codes: Vec::new(),
                obligations: Vec::new(),
                confident,
            },
            RateLimitDecision::Limited { .. } => {
                VerifyResult::deny(DenialCode::RateLimited, "anonymous rate limit exceeded", confident)
            }
        };
    };

    // Step 2: issuer known. The anti-downgrade invariant means every branch
    // below this point is a hard BLOCK — there is no falling back to the
    // anonymous path once a credential has been presented.
    let issuer_keys = cache.read_issuer_keys(now);
    if let Some(read) = &issuer_keys {
        confident &= read.fresh;
    }
    let known_issuer = issuer_keys
        .as_ref()
        .map(|read| read.value.contains_key(&credential.issuer_id))
        .unwrap_or(false);
    if !known_issuer {
        return VerifyResult::deny(
            DenialCode::IssuerNotAllowed,
            format!("issuer '{}' is not recognized", credential.issuer_id),
            confident,
        );
    }

    // Step 3: signature valid.
    let keys = &issuer_keys.expect("known_issuer implies a present snapshot").value;
    if crate::signature::verify(credential, keys) != crate::signature::SignatureCheck::Valid {
        return VerifyResult::deny(DenialCode::InvalidSignature, "credential signature is invalid", confident);
    }

    // Step 4: not expired.
    if credential.is_expired(wall_now) {
        return VerifyResult::deny(DenialCode::PassportExpired, "credential has expired", confident);
    }

    // Step 5: not revoked. Under fail_closed, stale or missing revocation
    // data is itself a denial — a confident=false "permit" would let an
    // actually-revoked credential through while the cache is unreachable.
    let revocations = cache.read_revocations(input.action, now);
    match cache.fail_mode_for(input.action) {
        FailMode::FailClosed => {
            let fresh = revocations.as_ref().map(|read| read.fresh).unwrap_or(false);
            if !fresh {
                return VerifyResult::deny(
                    DenialCode::StaleRevocationData,
                    "revocation data is stale or unavailable and this gate fails closed",
                    false,
                );
            }
        }
        FailMode::FailOpen => {}
    }
    let revoked = revocations
        .as_ref()
        .map(|read| read.value.contains(&credential.credential_id))
        .unwrap_or(false);
    if revoked {
        return VerifyResult::deny(DenialCode::PassportRevoked, "credential has been revoked", confident);
    }

    // Step 6 & 7: catalog version resolution and action-in-catalog.
    let catalog_read = cache.read_catalog(now);
    if let Some(read) = &catalog_read {
        confident &= read.fresh;
    }
    let Some(catalog_read) = catalog_read else {
        return VerifyResult::deny(DenialCode::PermissionDenied, "no catalog is available", confident);
    };

    let pin = credential
        .catalog_version_pin
        .get(catalog_read.value.gate_id.as_str())
        .copied();
    let resolved = catalog_read.value.resolve(pin);
    let version = match resolved {
        crate::catalog::ResolvedVersion::Deprecated => {
            return VerifyResult::deny(
                DenialCode::CatalogVersionDeprecated,
                "credential is pinned to a catalog version older than the gate's minimum compatible version",
                confident,
            );
        }
        crate::catalog::ResolvedVersion::Version(v) => v,
    };

    let Some(permission) = version.permission(input.action) else {
        return VerifyResult::deny(
            DenialCode::PermissionDenied,
            format!("action '{}' is not in the catalog", input.action),
            confident,
        );
    };

    // Step 8: action in credential claims.
    let Some(claim) = credential.claim(input.action) else {
        return VerifyResult::deny(
            DenialCode::PermissionDenied,
            format!("credential does not grant '{}'", input.action),
            confident,
        )
        .with_upgrade_template(permission.upgrade_template.clone());
    };

    // Step 9: constraint evaluation.
    let effective = match constraints::merge(&permission.default_constraints, &claim.constraints) {
        Ok(effective) => effective,
        Err(_) => {
            return VerifyResult::deny(
                DenialCode::ConstraintViolated,
                "constraint merge failed: incompatible constraint types",
                confident,
            );
        }
    };

    let evaluation = constraints::evaluate(&effective, input.action, input.context);
    match evaluation.verdict {
        Verdict::Block => {
            let mut result = VerifyResult::deny(
                DenialCode::ConstraintViolated,
                "one or more constraints were violated",
                confident,
            );
            result.reason_codes = evaluation.reason_codes;
            result.obligations = evaluation.obligations;
            result.effective_constraints = evaluation.effective_constraints;
            return result;
        }
        Verdict::Suspend => {
            let mut result = VerifyResult::deny(
                DenialCode::ApprovalRequired,
                "this call requires approval before it can proceed",
                confident,
            );
            result.constraint_decision = Verdict::Suspend;
            result.reason_codes = evaluation.reason_codes;
            result.obligations = evaluation.obligations;
            result.effective_constraints = evaluation.effective_constraints;
            return result;
        }
        Verdict::Permit => {}
    }

    // Step 9b: cumulative cost limit. Enforced outside constraints::evaluate
    // since it is the one cost check with cross-call state; `amount_canonical`
    // has already passed the per-action max at this point.
    if let Some(max_cumulative) = evaluation
        .effective_constraints
        .get(KEY_COST_MAX_CUMULATIVE)
        .and_then(|v| v.as_i64())
    {
        let amount = input
            .context
            .get("amount_canonical")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let subject = credential.credential_id.to_string();
        if !cost_tracker.check_and_add(input.action, &subject, amount, max_cumulative) {
            let mut result = VerifyResult::deny(
                DenialCode::ConstraintViolated,
                "cumulative cost limit exceeded for this credential and action",
                confident,
            );
            result.effective_constraints = evaluation.effective_constraints;
            return result;
        }
    }

    // Step 10: rate limit.
    let subject = credential.credential_id.to_string();
    match rate_limiter.check_and_increment(input.action, &subject, now) {
        RateLimitDecision::Allowed { .. } => VerifyResult {
            decision: Decision::Permit,
            constraint_decision: Verdict::Permit,
            effective_constraints: evaluation.effective_constraints,
            denial: None,
            reason_codes: evaluation.reason_codes,
            obligations: evaluation.obligations,
            confident,
        },
        RateLimitDecision::Limited { .. } => {
            let mut result = VerifyResult::deny(DenialCode::RateLimited, "rate limit exceeded", confident);
            result.effective_constraints = evaluation.effective_constraints;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::catalog::{Catalog, CatalogVersion, PermissionEntry, RiskLevel};
    use crate::constraints::{ConstraintMap, KEY_COST_MAX_PER_ACTION};
    use crate::credential::Claim;
    use crate::identifiers::{CredentialId, GateId, IssuerId, SubjectId};
    use chrono::Utc;
    use ed25519_dalek::{Signer, SigningKey};
    use serde_json::json;
    use std::collections::HashMap;

    fn setup() -> (CacheStore, RateLimiter, SigningKey, IssuerId) {
        let cache = CacheStore::with_defaults();
        let rate_limiter = RateLimiter::with_default(std::time::Duration::from_secs(60), 100);
        let signing_key = SigningKey::from_bytes(&[11u8; 32]);
        let issuer = IssuerId::new("uniplex");

        let mut keys = HashMap::new();
        keys.insert(issuer.clone(), signing_key.verifying_key());
        cache.replace_issuer_keys(keys, Instant::now());

        let mut default_constraints = ConstraintMap::new();
        default_constraints.insert(KEY_COST_MAX_PER_ACTION.to_string(), json!(1000));

        let catalog = Catalog {
            gate_id: GateId::new("flights"),
            min_compatible_version: 1,
            current: CatalogVersion::new(
                1,
                vec![PermissionEntry {
                    permission_key: "flights:book".to_string(),
                    display_name: "Book a flight".to_string(),
                    risk_level: RiskLevel::Medium,
                    default_constraints,
                    required_constraint_keys: Vec::new(),
                    upgrade_template: Some("request a higher-limit credential".to_string()),
                }],
                Utc::now(),
            ),
            retained: HashMap::new(),
        };
        cache.replace_catalog(catalog, Instant::now());
        cache.replace_revocations(std::collections::HashSet::new(), Instant::now());

        (cache, rate_limiter, signing_key, issuer)
    }

    fn signed_credential(signing_key: &SigningKey, issuer: IssuerId, claims: Vec<Claim>) -> Credential {
        let now = Utc::now();
        let mut credential = Credential::new(
            CredentialId::new(),
            issuer,
            SubjectId::new("agent-1"),
            GateId::new("flights"),
            now,
            now + chrono::Duration::hours(1),
            claims,
            ConstraintMap::new(),
            HashMap::new(),
            String::new(),
        )
        .unwrap();
        let payload = credential.canonical_payload();
        let sig = signing_key.sign(payload.as_bytes());
        credential.signature = hex::encode(sig.to_bytes());
        credential
    }

    #[test]
    fn happy_path_permits() {
        let (cache, rate_limiter, signing_key, issuer) = setup();
        let cost_tracker = CostTracker::new();
        let credential = signed_credential(
            &signing_key,
            issuer,
            vec![Claim {
                permission_key: "flights:book".to_string(),
                constraints: ConstraintMap::new(),
            }],
        );
        let mut context = RequestContext::new();
        context.insert("amount_canonical".to_string(), json!(500));

        let result = verify(
            &VerifyInput {
                credential: Some(&credential),
                action: "flights:book",
                context: &context,
                anonymous_policy: None,
                source_id: None,
            },
            &cache,
            &rate_limiter,
            &cost_tracker,
            Instant::now(),
            Utc::now(),
        );

        assert_eq!(result.decision, Decision::Permit);
        assert!(result.confident);
    }

    #[test]
    fn cost_over_merged_max_blocks() {
        let (cache, rate_limiter, signing_key, issuer) = setup();
        let cost_tracker = CostTracker::new();
        let credential = signed_credential(
            &signing_key,
            issuer,
            vec![Claim {
                permission_key: "flights:book".to_string(),
                constraints: ConstraintMap::new(),
            }],
        );
        let mut context = RequestContext::new();
        context.insert("amount_canonical".to_string(), json!(5000));

        let result = verify(
            &VerifyInput {
                credential: Some(&credential),
                action: "flights:book",
                context: &context,
                anonymous_policy: None,
                source_id: None,
            },
            &cache,
            &rate_limiter,
            &cost_tracker,
            Instant::now(),
            Utc::now(),
        );

        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.denial.unwrap().code, DenialCode::ConstraintViolated);
    }

    #[test]
    fn expired_credential_never_falls_back_to_anonymous() {
        let (cache, rate_limiter, signing_key, issuer) = setup();
        let cost_tracker = CostTracker::new();
        let now = Utc::now();
        let mut credential = Credential::new(
            CredentialId::new(),
            issuer,
            SubjectId::new("agent-1"),
            GateId::new("flights"),
            now - chrono::Duration::hours(2),
            now - chrono::Duration::hours(1),
            vec![Claim {
                permission_key: "flights:book".to_string(),
                constraints: ConstraintMap::new(),
            }],
            ConstraintMap::new(),
            HashMap::new(),
            String::new(),
        )
        .unwrap();
        let payload = credential.canonical_payload();
        let sig = signing_key.sign(payload.as_bytes());
        credential.signature = hex::encode(sig.to_bytes());

        let policy = AnonymousPolicy {
            enabled: true,
            allowed_actions: vec!["flights:book".to_string()],
        };
        let context = RequestContext::new();

        let result = verify(
            &VerifyInput {
                credential: Some(&credential),
                action: "flights:book",
                context: &context,
                anonymous_policy: Some(&policy),
                source_id: Some("source-1"),
            },
            &cache,
            &rate_limiter,
            &cost_tracker,
            Instant::now(),
            Utc::now(),
        );

        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.denial.unwrap().code, DenialCode::PassportExpired);
    }

    #[test]
    fn unknown_issuer_blocks_even_with_anonymous_policy_enabled() {
        let (cache, rate_limiter, signing_key, _issuer) = setup();
        let cost_tracker = CostTracker::new();
        let credential = signed_credential(
            &signing_key,
            IssuerId::new("someone-else"),
            vec![Claim {
                permission_key: "flights:book".to_string(),
                constraints: ConstraintMap::new(),
            }],
        );
        let policy = AnonymousPolicy {
            enabled: true,
            allowed_actions: vec!["flights:book".to_string()],
        };
        let context = RequestContext::new();

        let result = verify(
            &VerifyInput {
                credential: Some(&credential),
                action: "flights:book",
                context: &context,
                anonymous_policy: Some(&policy),
                source_id: Some("source-1"),
            },
            &cache,
            &rate_limiter,
            &cost_tracker,
            Instant::now(),
            Utc::now(),
        );

        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.denial.unwrap().code, DenialCode::IssuerNotAllowed);
    }

    #[test]
    fn no_credential_and_disabled_anonymous_denies_passport_missing() {
        let (cache, rate_limiter, _signing_key, _issuer) = setup();
        let cost_tracker = CostTracker::new();
        let context = RequestContext::new();
        let result = verify(
            &VerifyInput {
                credential: None,
                action: "flights:book",
                context: &context,
                anonymous_policy: None,
                source_id: None,
            },
            &cache,
            &rate_limiter,
            &cost_tracker,
            Instant::now(),
            Utc::now(),
        );
        assert_eq!(result.denial.unwrap().code, DenialCode::PassportMissing);
    }

    #[test]
    fn missing_claim_surfaces_upgrade_template() {
        let (cache, rate_limiter, signing_key, issuer) = setup();
        let cost_tracker = CostTracker::new();
        let credential = signed_credential(&signing_key, issuer, vec![]);
        let context = RequestContext::new();

        let result = verify(
            &VerifyInput {
                credential: Some(&credential),
                action: "flights:book",
                context: &context,
                anonymous_policy: None,
                source_id: None,
            },
            &cache,
            &rate_limiter,
            &cost_tracker,
            Instant::now(),
            Utc::now(),
        );

        let denial = result.denial.unwrap();
        assert_eq!(denial.code, DenialCode::PermissionDenied);
        assert_eq!(
            denial.upgrade_template.as_deref(),
            Some("request a higher-limit credential")
        );
    }

    #[test]
    fn rate_limit_exceeded_blocks() {
        let (cache, _rate_limiter, signing_key, issuer) = setup();
        let cost_tracker = CostTracker::new();
        // Use a fresh rate limiter with a limit of 1 for this test.
        let rate_limiter = RateLimiter::with_default(std::time::Duration::from_secs(60), 1);
        let credential = signed_credential(
            &signing_key,
            issuer,
            vec![Claim {
                permission_key: "flights:book".to_string(),
                constraints: ConstraintMap::new(),
            }],
        );
        let mut context = RequestContext::new();
        context.insert("amount_canonical".to_string(), json!(10));
        let now = Instant::now();

        let first = verify(
            &VerifyInput {
                credential: Some(&credential),
                action: "flights:book",
                context: &context,
                anonymous_policy: None,
                source_id: None,
            },
            &cache,
            &rate_limiter,
            &cost_tracker,
            now,
            Utc::now(),
        );
        assert_eq!(first.decision, Decision::Permit);

        let second = verify(
            &VerifyInput {
                credential: Some(&credential),
                action: "flights:book",
                context: &context,
                anonymous_policy: None,
                source_id: None,
            },
            &cache,
            &rate_limiter,
            &cost_tracker,
            now,
            Utc::now(),
        );
        assert_eq!(second.decision, Decision::Deny);
        assert_eq!(second.denial.unwrap().code, DenialCode::RateLimited);
    }

    #[test]
    fn fail_closed_with_no_revocation_snapshot_denies() {
        let rate_limiter = RateLimiter::with_default(std::time::Duration::from_secs(60), 100);
        let cost_tracker = CostTracker::new();
        let signing_key = SigningKey::from_bytes(&[11u8; 32]);
        let issuer = IssuerId::new("uniplex");

        // Simulate a gate that has never completed a revocation refresh:
        // no snapshot has ever been written, so any read is "not fresh".
        let cache = CacheStore::new(
            std::time::Duration::from_secs(300),
            std::time::Duration::from_secs(60),
            std::time::Duration::from_secs(300),
            FailMode::FailClosed,
            HashMap::new(),
        );
        cache.replace_catalog(
            cache_catalog_for_test(),
            Instant::now(),
        );
        let mut keys = HashMap::new();
        keys.insert(issuer.clone(), signing_key.verifying_key());
        cache.replace_issuer_keys(keys, Instant::now());

        let credential = signed_credential(
            &signing_key,
            issuer,
            vec![Claim {
                permission_key: "flights:book".to_string(),
                constraints: ConstraintMap::new(),
            }],
        );
        let context = RequestContext::new();

        let result = verify(
            &VerifyInput {
                credential: Some(&credential),
                action: "flights:book",
                context: &context,
                anonymous_policy: None,
                source_id: None,
            },
            &cache,
            &rate_limiter,
            &cost_tracker,
            Instant::now(),
            Utc::now(),
        );

        assert_eq!(result.decision, Decision::Deny);
        assert_eq!(result.denial.unwrap().code, DenialCode::StaleRevocationData);
        assert!(!result.confident);
    }

    #[test]
    fn fail_open_with_no_revocation_snapshot_still_permits() {
        let cache = CacheStore::new(
            std::time::Duration::from_secs(300),
            std::time::Duration::from_secs(60),
            std::time::Duration::from_secs(300),
            FailMode::FailOpen,
            HashMap::new(),
        );
        let rate_limiter = RateLimiter::with_default(std::time::Duration::from_secs(60), 100);
        let cost_tracker = CostTracker::new();
        let signing_key = SigningKey::from_bytes(&[11u8; 32]);
        let issuer = IssuerId::new("uniplex");
        let mut keys = HashMap::new();
        keys.insert(issuer.clone(), signing_key.verifying_key());
        cache.replace_issuer_keys(keys, Instant::now());
        cache.replace_catalog(cache_catalog_for_test(), Instant::now());

        let credential = signed_credential(
            &signing_key,
            issuer,
            vec![Claim {
                permission_key: "flights:book".to_string(),
                constraints: ConstraintMap::new(),
            }],
        );
        let context = RequestContext::new();

        let result = verify(
            &VerifyInput {
                credential: Some(&credential),
                action: "flights:book",
                context: &context,
                anonymous_policy: None,
                source_id: None,
            },
            &cache,
            &rate_limiter,
            &cost_tracker,
            Instant::now(),
            Utc::now(),
        );

        assert_eq!(result.decision, Decision::Permit);
    }

    #[test]
    fn cumulative_cost_limit_blocks_repeat_calls_past_the_cap() {
        let (cache, rate_limiter, signing_key, issuer) = setup();
        let cost_tracker = CostTracker::new();

        let mut claim_constraints = ConstraintMap::new();
        claim_constraints.insert(crate::constraints::KEY_COST_MAX_CUMULATIVE.to_string(), json!(900));
        let credential = signed_credential(
            &signing_key,
            issuer,
            vec![Claim {
                permission_key: "flights:book".to_string(),
                constraints: claim_constraints,
            }],
        );
        let mut context = RequestContext::new();
        context.insert("amount_canonical".to_string(), json!(500));
        let now = Instant::now();

        let first = verify(
            &VerifyInput {
                credential: Some(&credential),
                action: "flights:book",
                context: &context,
                anonymous_policy: None,
                source_id: None,
            },
            &cache,
            &rate_limiter,
            &cost_tracker,
            now,
            Utc::now(),
        );
        assert_eq!(first.decision, Decision::Permit);

        // Second call of 500 would bring the running total to 1000 > 900.
        let second = verify(
            &VerifyInput {
                credential: Some(&credential),
                action: "flights:book",
                context: &context,
                anonymous_policy: None,
                source_id: None,
            },
            &cache,
            &rate_limiter,
            &cost_tracker,
            now,
            Utc::now(),
        );
        assert_eq!(second.decision, Decision::Deny);
        assert_eq!(second.denial.unwrap().code, DenialCode::ConstraintViolated);
    }

    fn cache_catalog_for_test() -> Catalog {
        let mut default_constraints = ConstraintMap::new();
        default_constraints.insert(KEY_COST_MAX_PER_ACTION.to_string(), json!(1000));
        Catalog {
            gate_id: GateId::new("flights"),
            min_compatible_version: 1,
            current: CatalogVersion::new(
                1,
                vec![PermissionEntry {
                    permission_key: "flights:book".to_string(),
                    display_name: "Book a flight".to_string(),
                    risk_level: RiskLevel::Medium,
                    default_constraints,
                    required_constraint_keys: Vec::new(),
                    upgrade_template: Some("request a higher-limit credential".to_string()),
                }],
                Utc::now(),
            ),
            retained: HashMap::new(),
        }
    }
}
