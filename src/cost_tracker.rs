//! Cumulative Cost Tracker (§4.3, §9): enforces `core:cost:max_cumulative`
//! across repeated calls by the same credential against the same action.
//!
//! Modeled as a separate tracker with the same lifetime as
//! [`crate::rate_limit::RateLimiter`] — process-local, eventually consistent —
//! rather than a field on the credential, since the credential is immutable
//! after loading.

use std::collections::HashMap;

use parking_lot::Mutex;

pub struct CostTracker {
    totals: Mutex<HashMap<(String, String), i64>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self {
            totals: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically check whether `amount` would push the running total for
    /// `(action, credential)` past `max`, and if not, commit it. Returns
    /// `true` when the call is admitted. A rejected call does not mutate the
    /// running total.
    pub fn check_and_add(&self, action: &str, credential: &str, amount: i64, max: i64) -> bool {
        let mut totals = self.totals.lock();
        let key = (action.to_string(), credential.to_string());
        let entry = totals.entry(key).or_insert(0);
        if *entry + amount > max {
            return false;
        }
        *entry += amount;
        true
    }

    pub fn reset(&self, action: &str, credential: &str) {
        self.totals
            .lock()
            .remove(&(action.to_string(), credential.to_string()));
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}
