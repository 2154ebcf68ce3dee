//! `GateConfig` (§6): the gate's recognized configuration surface.
//!
//! This is a pure data shape with `serde::Deserialize` so a host can load it
//! from whatever format it prefers (file, env-derived JSON, etc.); parsing
//! environment variables or config files is out of scope here (§1) — each
//! field doc-comments the `UNIPLEX_*` environment variable it corresponds to
//! 1:1, for the host to wire up.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cache::FailMode;

fn default_api_url() -> String {
    "https://api.uniplex.ai".to_string()
}

fn default_catalog_max_age_minutes() -> u64 {
    5
}

fn default_revocation_max_age_minutes() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeDefaultConfig {
    pub enabled: bool,
    pub auto_issue: bool,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub constraints: crate::constraints::ConstraintMap,
    /// ISO-8601 duration string (e.g. `PT15M`); parsing is a host concern.
    pub max_lifetime: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailModeConfig {
    FailOpen,
    FailClosed,
}

impl From<FailModeConfig> for FailMode {
    fn from(value: FailModeConfig) -> Self {
        match value {
            FailModeConfig::FailOpen => FailMode::FailOpen,
            FailModeConfig::FailClosed => FailMode::FailClosed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailModeOverrideConfig {
    pub fail_mode: FailModeConfig,
    pub revocation_max_age_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_catalog_max_age_minutes")]
    pub catalog_max_age_minutes: u64,
    #[serde(default = "default_revocation_max_age_minutes")]
    pub revocation_max_age_minutes: u64,
    pub fail_mode: FailModeConfig,
    #[serde(default)]
    pub fail_mode_overrides: HashMap<String, FailModeOverrideConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    Full,
    Sampled,
    SessionDigest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,
    #[serde(default)]
    pub log_inputs: bool,
    #[serde(default)]
    pub log_outputs: bool,
    pub webhook_url: Option<String>,
    pub mode: AuditMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommerceConfig {
    pub enabled: bool,
    pub issue_receipts: bool,
    pub signing_key_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymousConfig {
    pub enabled: bool,
    #[serde(default)]
    pub allowed_actions: Vec<String>,
    #[serde(default)]
    pub read_only: bool,
    pub rate_limit_per_minute: Option<u64>,
    pub rate_limit_per_hour: Option<u64>,
    pub upgrade_message: Option<String>,
}

impl AnonymousConfig {
    /// Translate the configured per-minute/per-hour caps into a single
    /// `(window, max)` pair for [`crate::rate_limit::RateLimiter::register`],
    /// preferring the per-minute cap when both are set.
    pub fn rate_limit(&self) -> Option<(std::time::Duration, u64)> {
        if let Some(max) = self.rate_limit_per_minute {
            return Some((std::time::Duration::from_secs(60), max));
        }
        if let Some(max) = self.rate_limit_per_hour {
            return Some((std::time::Duration::from_secs(3600), max));
        }
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestModeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// A pre-signed credential to use in place of pipeline verification,
    /// for host-side integration tests.
    pub mock_passport: Option<crate::credential::Credential>,
}

/// The gate's full recognized configuration surface, 1:1 with the
/// `UNIPLEX_*` environment variables (`gate_id` -> `UNIPLEX_GATE_ID`,
/// `uniplex_api_url` -> `UNIPLEX_API_URL`, and so on for every root key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub gate_id: String,
    #[serde(default = "default_api_url")]
    pub uniplex_api_url: String,
    pub gate_secret: Option<String>,
    pub signing_key_id: Option<String>,

    pub safe_default: Option<SafeDefaultConfig>,
    #[serde(default)]
    pub trusted_issuers: Vec<String>,
    #[serde(default)]
    pub trust_networks: Vec<String>,

    pub cache: CacheConfig,
    pub audit: Option<AuditConfig>,
    pub commerce: Option<CommerceConfig>,
    pub anonymous: Option<AnonymousConfig>,
    pub test_mode: Option<TestModeConfig>,
}
