//! Typed constraint registry, merge rules, and the three-valued evaluator.
//!
//! A constraint mapping is `{ key -> value }` where the key's *type* — limit, term,
//! or policy — determines how catalog and credential values combine (§3) and whether
//! the key can ever produce a verdict (§4.3). `merge` and `evaluate` are both pure
//! functions: no I/O, no shared state, safe to fuzz and property-test directly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DenialCode, GateError};

/// Canonical name for the per-action cost cap. `core:cost:max` is accepted as a
/// deprecated alias on read but never produced, and a mapping carrying both is
/// rejected rather than silently merged (§9 open question resolution).
pub const KEY_COST_MAX_PER_ACTION: &str = "core:cost:max_per_action";
pub const KEY_COST_MAX_PER_ACTION_DEPRECATED: &str = "core:cost:max";
pub const KEY_COST_MAX_CUMULATIVE: &str = "core:cost:max_cumulative";
pub const KEY_RATE_PER_MINUTE: &str = "core:rate:per_minute";
pub const KEY_RATE_PER_HOUR: &str = "core:rate:per_hour";
pub const KEY_RATE_PER_DAY: &str = "core:rate:per_day";

pub const KEY_PRICING_PER_CALL_CENTS: &str = "core:pricing:per_call_cents";
pub const KEY_PRICING_PER_MINUTE_CENTS: &str = "core:pricing:per_minute_cents";
pub const KEY_PRICING_CURRENCY: &str = "core:pricing:currency";
pub const KEY_PRICING_FREE_TIER_CALLS: &str = "core:pricing:free_tier_calls";
pub const KEY_PRICING_MODEL: &str = "core:pricing:model";
pub const KEY_SLA_UPTIME: &str = "core:sla:uptime";
pub const KEY_SLA_RESPONSE_TIME: &str = "core:sla:response_time_ms";
pub const KEY_PLATFORM_FEE_BASIS_POINTS: &str = "core:platform_fee:basis_points";

pub const KEY_APPROVAL_REQUIRED: &str = "core:approval:required";
pub const KEY_ACTION_ALLOWLIST: &str = "core:scope:action_allowlist";
pub const KEY_ACTION_BLOCKLIST: &str = "core:scope:action_blocklist";
pub const KEY_DOMAIN_ALLOWLIST: &str = "core:scope:domain_allowlist";
pub const KEY_DOMAIN_BLOCKLIST: &str = "core:scope:domain_blocklist";
pub const KEY_OPERATING_HOURS: &str = "core:temporal:operating_hours";
pub const KEY_BLACKOUT_WINDOWS: &str = "core:temporal:blackout_windows";
pub const KEY_DATA_READ_ONLY: &str = "core:data:read_only";
pub const KEY_DATA_NO_PII_EXPORT: &str = "core:data:no_pii_export";

/// Classification of a constraint key, governing merge semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// A numeric usage bound; effective value is `min(catalog, credential)`.
    Limit,
    /// A commercial/agreement-only fact; catalog is always authoritative.
    Term,
    /// A boolean/list policy toggle; forwarded from whichever side sets it.
    Policy,
}

/// Resolve a key's type. Unknown keys are treated as forward-compatible policy
/// values (§4.3: "unknown keys -> pass credential value through").
pub fn key_type(key: &str) -> KeyType {
    match key {
        KEY_COST_MAX_PER_ACTION
        | KEY_COST_MAX_PER_ACTION_DEPRECATED
        | KEY_COST_MAX_CUMULATIVE
        | KEY_RATE_PER_MINUTE
        | KEY_RATE_PER_HOUR
        | KEY_RATE_PER_DAY => KeyType::Limit,

        KEY_PRICING_PER_CALL_CENTS
        | KEY_PRICING_PER_MINUTE_CENTS
        | KEY_PRICING_CURRENCY
        | KEY_PRICING_FREE_TIER_CALLS
        | KEY_PRICING_MODEL
        | KEY_SLA_UPTIME
        | KEY_SLA_RESPONSE_TIME
        | KEY_PLATFORM_FEE_BASIS_POINTS => KeyType::Term,

        _ => KeyType::Policy,
    }
}

/// A typed constraint mapping. Backed by a `BTreeMap` so iteration order (and thus
/// debug output) is stable.
pub type ConstraintMap = BTreeMap<String, Value>;

/// Merge catalog-default constraints with a credential's per-claim constraints.
///
/// - `limit` keys: elementwise `min` over numeric values, present-on-one-side wins.
/// - `term` keys: catalog value always wins; credential value is discarded.
/// - other keys: credential value passes through if present, else catalog value.
pub fn merge(catalog: &ConstraintMap, credential: &ConstraintMap) -> Result<ConstraintMap, GateError> {
    if catalog.contains_key(KEY_COST_MAX_PER_ACTION)
        && catalog.contains_key(KEY_COST_MAX_PER_ACTION_DEPRECATED)
    {
        return Err(GateError::ConstraintType {
            details: format!(
                "catalog defines both {KEY_COST_MAX_PER_ACTION} and the deprecated {KEY_COST_MAX_PER_ACTION_DEPRECATED}"
            ),
        });
    }

    let mut effective = ConstraintMap::new();
    let mut keys: Vec<&String> = catalog.keys().chain(credential.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        let catalog_value = catalog.get(key);
        let credential_value = credential.get(key);

        let merged = match key_type(key) {
            KeyType::Limit => merge_limit(key, catalog_value, credential_value)?,
            KeyType::Term => catalog_value.or(credential_value).cloned(),
            KeyType::Policy => credential_value.or(catalog_value).cloned(),
        };

        if let Some(value) = merged {
            effective.insert(key.clone(), value);
        }
    }

    Ok(effective)
}

fn merge_limit(
    key: &str,
    catalog_value: Option<&Value>,
    credential_value: Option<&Value>,
) -> Result<Option<Value>, GateError> {
    let as_i64 = |v: &Value| -> Result<i64, GateError> {
        v.as_i64().ok_or_else(|| GateError::ConstraintType {
            details: format!("limit key {key} has a non-numeric value: {v}"),
        })
    };

    match (catalog_value, credential_value) {
        (Some(c), Some(d)) => Ok(Some(Value::from(as_i64(c)?.min(as_i64(d)?)))),
        (Some(c), None) => Ok(Some(c.clone())),
        (None, Some(d)) => Ok(Some(d.clone())),
        (None, None) => Ok(None),
    }
}

/// A per-category authorization verdict. Ordered so the aggregate decision is
/// `max()` under `BLOCK > SUSPEND > PERMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Permit,
    Suspend,
    Block,
}

/// Result of evaluating one category of constraints.
#[derive(Debug, Clone)]
pub struct CategoryResult {
    pub verdict: Verdict,
    pub reason_codes: Vec<DenialCode>,
    pub obligations: Vec<String>,
}

impl CategoryResult {
    fn permit() -> Self {
        Self {
            verdict: Verdict::Permit,
            reason_codes: Vec::new(),
            obligations: Vec::new(),
        }
    }
}

/// Request-time context extracted from tool inputs (e.g. `amount_canonical`).
pub type RequestContext = BTreeMap<String, Value>;

/// Aggregate result of `evaluate`.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub verdict: Verdict,
    pub reason_codes: Vec<DenialCode>,
    pub obligations: Vec<String>,
    pub effective_constraints: ConstraintMap,
}

/// Evaluate effective constraints against an action and request context, in the
/// fixed category order from §4.3: temporal, scope, rate (delegated to the caller —
/// see [`crate::rate_limit`]), cost, approval, data.
///
/// Rate limiting is intentionally NOT evaluated here: it is the one category with
/// cross-call state, and lives in [`crate::rate_limit::RateLimiter`] so this function
/// stays pure. The verification pipeline folds the rate limiter's verdict into the
/// same `max()` aggregation this function would otherwise perform.
pub fn evaluate(
    effective: &ConstraintMap,
    action: &str,
    context: &RequestContext,
) -> EvaluationResult {
    let categories = [
        temporal(effective, context),
        scope(effective, action),
        cost(effective, context),
        approval(effective),
        data(effective, context),
    ];

    let mut verdict = Verdict::Permit;
    let mut reason_codes = Vec::new();
    let mut obligations = Vec::new();

    for category in categories {
        if category.verdict > verdict {
            verdict = category.verdict;
        }
        reason_codes.extend(category.reason_codes);
        obligations.extend(category.obligations);
    }
    obligations.sort();
    obligations.dedup();

    EvaluationResult {
        verdict,
        reason_codes,
        obligations,
        effective_constraints: effective.clone(),
    }
}

fn temporal(effective: &ConstraintMap, context: &RequestContext) -> CategoryResult {
    if let Some(windows) = effective.get(KEY_BLACKOUT_WINDOWS).and_then(|v| v.as_array()) {
        if let Some(now) = context.get("request_time_rfc3339").and_then(|v| v.as_str()) {
            for window in windows {
                if let (Some(start), Some(end)) = (
                    window.get("start").and_then(|v| v.as_str()),
                    window.get("end").and_then(|v| v.as_str()),
                ) {
                    if start <= now && now <= end {
                        return CategoryResult {
                            verdict: Verdict::Block,
                            reason_codes: vec![DenialCode::ConstraintViolated],
                            obligations: Vec::new(),
                        };
                    }
                }
            }
        }
    }
    CategoryResult::permit()
}

fn scope(effective: &ConstraintMap, action: &str) -> CategoryResult {
    if let Some(blocklist) = effective.get(KEY_ACTION_BLOCKLIST).and_then(|v| v.as_array()) {
        if blocklist.iter().any(|v| v.as_str() == Some(action)) {
            return blocked();
        }
    }
    if let Some(allowlist) = effective.get(KEY_ACTION_ALLOWLIST).and_then(|v| v.as_array()) {
        if !allowlist.iter().any(|v| v.as_str() == Some(action)) {
            return blocked();
        }
    }
    CategoryResult::permit()
}

fn cost(effective: &ConstraintMap, context: &RequestContext) -> CategoryResult {
    let Some(amount) = context.get("amount_canonical").and_then(|v| v.as_i64()) else {
        return CategoryResult::permit();
    };
    let max_per_action = effective
        .get(KEY_COST_MAX_PER_ACTION)
        .or_else(|| effective.get(KEY_COST_MAX_PER_ACTION_DEPRECATED))
        .and_then(|v| v.as_i64());

    if let Some(max) = max_per_action {
        if amount > max {
            return blocked();
        }
    }
    CategoryResult::permit()
}

fn approval(effective: &ConstraintMap) -> CategoryResult {
    if effective
        .get(KEY_APPROVAL_REQUIRED)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        return CategoryResult {
            verdict: Verdict::Suspend,
            reason_codes: vec![DenialCode::ApprovalRequired],
            obligations: vec!["require_approval".to_string()],
        };
    }
    CategoryResult::permit()
}

fn data(effective: &ConstraintMap, context: &RequestContext) -> CategoryResult {
    let read_only = effective
        .get(KEY_DATA_READ_ONLY)
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if read_only && context.get("write").and_then(|v| v.as_bool()).unwrap_or(false) {
        return blocked();
    }

    let no_pii_export = effective
        .get(KEY_DATA_NO_PII_EXPORT)
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if no_pii_export
        && context
            .get("contains_pii")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    {
        return blocked();
    }
    CategoryResult::permit()
}

fn blocked() -> CategoryResult {
    CategoryResult {
        verdict: Verdict::Block,
        reason_codes: vec![DenialCode::ConstraintViolated],
        obligations: Vec::new(),
    }
}
