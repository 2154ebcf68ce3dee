//! uniplex-gate: a local permission gate for tool/RPC calls.
//!
//! Sits in front of tool handlers and decides, per call, whether a presented
//! credential authorizes the action under its declared constraints,
//! producing a signed, tamper-evident decision and (optionally) a
//! consumption receipt. The hot path ([`pipeline::verify`]) never performs
//! I/O; everything it reads comes from cache snapshots maintained by a
//! background refresher.

pub mod billing;
pub mod cache;
pub mod canonical;
pub mod catalog;
pub mod config;
pub mod constraints;
pub mod cost_tracker;
pub mod credential;
pub mod errors;
pub mod identifiers;
pub mod normalize;
pub mod pipeline;
pub mod rate_limit;
pub mod receipts;
pub mod refresh;
pub mod session;
pub mod signature;
pub mod wrapper;

pub use cache::{CacheStore, FailMode};
pub use catalog::{Catalog, CatalogVersion, PermissionEntry, RiskLevel};
pub use config::GateConfig;
pub use constraints::{ConstraintMap, Verdict};
pub use cost_tracker::CostTracker;
pub use credential::Credential;
pub use errors::{DenialCode, GateError, GateResult};
pub use identifiers::{CredentialId, GateId, IssuerId, ReceiptId, SessionId, SubjectId};
pub use pipeline::{verify, AnonymousPolicy, Decision, VerifyInput, VerifyResult};
pub use rate_limit::RateLimiter;
pub use receipts::ConsumptionReceipt;
pub use session::SessionStore;
pub use wrapper::{ToolDefinition, ToolWrapper};

/// Initialize a default `tracing` subscriber reading `RUST_LOG`. This crate
/// has no binary of its own (hosting a tool server is out of scope), so this
/// is exposed for the host process to call once at startup.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
