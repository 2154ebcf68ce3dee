//! Tool Wrapper (§4.8): the seam between the host's tool-invocation surface
//! and the verification pipeline. Holds a small registry of tool
//! definitions, extracts constraint values out of call arguments via a
//! minimal JSON-path walker, normalizes them, and invokes the handler on
//! permit.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::warn;

use crate::cache::CacheStore;
use crate::catalog::RiskLevel;
use crate::constraints::RequestContext;
use crate::cost_tracker::CostTracker;
use crate::credential::Credential;
use crate::errors::GateError;
use crate::identifiers::SessionId;
use crate::normalize::{self, RoundingMode};
use crate::pipeline::{self, AnonymousPolicy, Decision, VerifyInput, VerifyResult};
use crate::rate_limit::RateLimiter;

/// Where a constraint mapping's raw value comes from.
#[derive(Debug, Clone)]
pub enum MappingSource {
    Fixed(Value),
    Input { json_path: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    None,
    DollarsToCents,
}

#[derive(Debug, Clone)]
pub struct ConstraintMapping {
    pub constraint_key: String,
    pub source: MappingSource,
    pub transform: Transform,
    /// Defaults to 2/strict, matching `dollars_to_cents`'s default in §4.8.
    pub precision: u32,
    pub mode: RoundingMode,
}

impl ConstraintMapping {
    pub fn fixed(constraint_key: impl Into<String>, value: Value) -> Self {
        Self {
            constraint_key: constraint_key.into(),
            source: MappingSource::Fixed(value),
            transform: Transform::None,
            precision: 2,
            mode: RoundingMode::Strict,
        }
    }

    pub fn dollars_to_cents(constraint_key: impl Into<String>, json_path: impl Into<String>) -> Self {
        Self {
            constraint_key: constraint_key.into(),
            source: MappingSource::Input {
                json_path: json_path.into(),
            },
            transform: Transform::DollarsToCents,
            precision: 2,
            mode: RoundingMode::Strict,
        }
    }
}

pub type ToolHandler = Box<dyn Fn(Value) -> Result<Value, GateError> + Send + Sync>;

pub struct ToolDefinition {
    pub name: String,
    pub required_permission: String,
    pub risk_level: RiskLevel,
    pub input_schema: Value,
    pub constraint_mappings: Vec<ConstraintMapping>,
    pub handler: ToolHandler,
}

/// A minimal dotted-path walker (`$.a.b`, `a.b`), not a full JSONPath engine
/// (out of scope — §4.8's mappings only ever need direct/nested field
/// lookups).
fn extract_json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix("$.").or_else(|| path.strip_prefix('$')).unwrap_or(path);
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = current.get(segment)?;
    }
    Some(current)
}

fn apply_transform(mapping: &ConstraintMapping, raw: &Value) -> Option<Value> {
    match mapping.transform {
        Transform::None => Some(raw.clone()),
        Transform::DollarsToCents => {
            let text = match raw {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            normalize::normalize(&text, mapping.precision, mapping.mode)
                .ok()
                .map(Value::from)
        }
    }
}

pub struct CallOutcome {
    pub tool: String,
    pub verify: VerifyResult,
    pub handler_result: Option<Result<Value, GateError>>,
    pub duration: Option<Duration>,
}

pub struct ToolWrapper {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolWrapper {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// Alternative tool names with a non-critical risk level, for denial
    /// suggestions (§4.8). Drawn entirely from the in-process registry, so
    /// the "bounded ~500ms" budget in §5 is moot here — there is no I/O to
    /// race against; it only matters once suggestions are sourced from a
    /// remote catalog, which is out of scope for this module.
    pub fn suggestions(&self, exclude: &str) -> Vec<String> {
        self.tools
            .values()
            .filter(|t| t.name != exclude && t.risk_level != RiskLevel::Critical)
            .map(|t| t.name.clone())
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn call(
        &self,
        tool_name: &str,
        arguments: &Value,
        credential: Option<&Credential>,
        session_id: Option<&SessionId>,
        anonymous_policy: Option<&AnonymousPolicy>,
        source_id: Option<&str>,
        cache: &CacheStore,
        rate_limiter: &RateLimiter,
        cost_tracker: &CostTracker,
        now: Instant,
        wall_now: chrono::DateTime<chrono::Utc>,
    ) -> Result<CallOutcome, GateError> {
        let _ = session_id;
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| GateError::invalid(format!("unknown tool '{tool_name}'")))?;

        let mut context = RequestContext::new();
        for mapping in &tool.constraint_mappings {
            let raw = match &mapping.source {
                MappingSource::Fixed(value) => Some(value.clone()),
                MappingSource::Input { json_path } => {
                    extract_json_path(arguments, json_path).cloned()
                }
            };

            let Some(raw) = raw else {
                warn!(tool = tool_name, key = %mapping.constraint_key, "constraint mapping input missing, skipping");
                continue;
            };

            let Some(normalized) = apply_transform(mapping, &raw) else {
                warn!(tool = tool_name, key = %mapping.constraint_key, "constraint mapping transform failed, skipping");
                continue;
            };

            context.insert(mapping.constraint_key.clone(), normalized.clone());
            if mapping.constraint_key.contains("cost") || mapping.constraint_key.contains("price") {
                context.insert("amount_canonical".to_string(), normalized);
            }
        }

        let verify = pipeline::verify(
            &VerifyInput {
                credential,
                action: &tool.required_permission,
                context: &context,
                anonymous_policy,
                source_id,
            },
            cache,
            rate_limiter,
            cost_tracker,
            now,
            wall_now,
        );

        if verify.decision != Decision::Permit {
            return Ok(CallOutcome {
                tool: tool_name.to_string(),
                verify,
                handler_result: None,
                duration: None,
            });
        }

        let start = Instant::now();
        let handler_result = (tool.handler)(arguments.clone());
        let duration = start.elapsed();

        Ok(CallOutcome {
            tool: tool_name.to_string(),
            verify,
            handler_result: Some(handler_result),
            duration: Some(duration),
        })
    }
}

impl Default for ToolWrapper {
    fn default() -> Self {
        Self::new()
    }
}
