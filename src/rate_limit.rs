//! Rate Limiter (§4.5): fixed-window token bucket keyed by `(action,
//! credential_id_or_source_id)`.
//!
//! A counter-map guarded by a single mutex, generalized to a bucket with an
//! explicit `reset_at` instead of an unbounded counter. Per §4.5, a
//! `(max, window)` pair is registered per action at startup; an action with
//! no registration falls back to the limiter's default pair, if any, and is
//! otherwise left unlimited.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    reset_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u64 },
    Limited { retry_after: Duration },
}

pub struct RateLimiter {
    buckets: Mutex<HashMap<(String, String), Bucket>>,
    limits: HashMap<String, (Duration, u64)>,
    default_limit: Option<(Duration, u64)>,
}

impl RateLimiter {
    /// Build a limiter from a per-action `(window, max)` registration table,
    /// with no fallback for actions outside it.
    pub fn new(limits: HashMap<String, (Duration, u64)>) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            limits,
            default_limit: None,
        }
    }

    /// Build a limiter with a single `(window, max)` pair applied to every
    /// action that isn't otherwise registered via [`RateLimiter::register`].
    pub fn with_default(window: Duration, limit: u64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            limits: HashMap::new(),
            default_limit: Some((window, limit)),
        }
    }

    /// Register (or overwrite) the `(window, max)` pair for one action.
    pub fn register(&mut self, action: impl Into<String>, window: Duration, limit: u64) {
        self.limits.insert(action.into(), (window, limit));
    }

    fn limit_for(&self, action: &str) -> Option<(Duration, u64)> {
        self.limits.get(action).copied().or(self.default_limit)
    }

    /// Check-and-increment: atomically rolls a new window if the previous one
    /// has elapsed, then either admits the call (incrementing the count) or
    /// reports how long until the window resets. An action with no
    /// registered or default limit is always allowed.
    pub fn check_and_increment(&self, action: &str, subject: &str, now: Instant) -> RateLimitDecision {
        let Some((window, limit)) = self.limit_for(action) else {
            return RateLimitDecision::Allowed { remaining: u64::MAX };
        };

        let mut buckets = self.buckets.lock();
        let key = (action.to_string(), subject.to_string());
        let bucket = buckets.entry(key).or_insert(Bucket {
            count: 0,
            reset_at: now + window,
        });

        if now >= bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now + window;
        }

        if bucket.count >= limit {
            return RateLimitDecision::Limited {
                retry_after: bucket.reset_at.saturating_duration_since(now),
            };
        }

        bucket.count += 1;
        RateLimitDecision::Allowed {
            remaining: limit - bucket.count,
        }
    }

    pub fn reset(&self, action: &str, subject: &str) {
        self.buckets
            .lock()
            .remove(&(action.to_string(), subject.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_then_limits() {
        let limiter = RateLimiter::with_default(Duration::from_secs(60), 2);
        let now = Instant::now();
        assert_eq!(
            limiter.check_and_increment("flights:search", "cred-1", now),
            RateLimitDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check_and_increment("flights:search", "cred-1", now),
            RateLimitDecision::Allowed { remaining: 0 }
        );
        match limiter.check_and_increment("flights:search", "cred-1", now) {
            RateLimitDecision::Limited { retry_after } => {
                assert!(retry_after <= Duration::from_secs(60));
            }
            other => panic!("expected limited, got {other:?}"),
        }
    }

    #[test]
    fn window_resets_after_elapsed_time() {
        let limiter = RateLimiter::with_default(Duration::from_secs(60), 1);
        let now = Instant::now();
        assert!(matches!(
            limiter.check_and_increment("flights:search", "cred-1", now),
            RateLimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_and_increment("flights:search", "cred-1", now),
            RateLimitDecision::Limited { .. }
        ));

        let later = now + Duration::from_secs(61);
        assert!(matches!(
            limiter.check_and_increment("flights:search", "cred-1", later),
            RateLimitDecision::Allowed { .. }
        ));
    }

    #[test]
    fn distinct_subjects_have_independent_buckets() {
        let limiter = RateLimiter::with_default(Duration::from_secs(60), 1);
        let now = Instant::now();
        assert!(matches!(
            limiter.check_and_increment("flights:search", "cred-1", now),
            RateLimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_and_increment("flights:search", "cred-2", now),
            RateLimitDecision::Allowed { .. }
        ));
    }

    #[test]
    fn distinct_actions_have_independent_buckets() {
        let limiter = RateLimiter::with_default(Duration::from_secs(60), 1);
        let now = Instant::now();
        assert!(matches!(
            limiter.check_and_increment("flights:search", "cred-1", now),
            RateLimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_and_increment("flights:book", "cred-1", now),
            RateLimitDecision::Allowed { .. }
        ));
    }

    #[test]
    fn reset_clears_the_bucket() {
        let limiter = RateLimiter::with_default(Duration::from_secs(60), 1);
        let now = Instant::now();
        limiter.check_and_increment("flights:search", "cred-1", now);
        limiter.reset("flights:search", "cred-1");
        assert!(matches!(
            limiter.check_and_increment("flights:search", "cred-1", now),
            RateLimitDecision::Allowed { .. }
        ));
    }

    #[test]
    fn per_action_registration_overrides_other_actions_limits() {
        let mut limiter = RateLimiter::new(HashMap::new());
        limiter.register("flights:book", Duration::from_secs(60), 1);
        let now = Instant::now();
        assert!(matches!(
            limiter.check_and_increment("flights:book", "cred-1", now),
            RateLimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_and_increment("flights:book", "cred-1", now),
            RateLimitDecision::Limited { .. }
        ));

        // Unregistered action with no default limit is always allowed.
        for _ in 0..5 {
            assert!(matches!(
                limiter.check_and_increment("flights:search", "cred-1", now),
                RateLimitDecision::Allowed { .. }
            ));
        }
    }

    #[test]
    fn registered_action_overrides_default_limit() {
        let mut limiter = RateLimiter::with_default(Duration::from_secs(60), 100);
        limiter.register("flights:book", Duration::from_secs(60), 1);
        let now = Instant::now();
        assert!(matches!(
            limiter.check_and_increment("flights:book", "cred-1", now),
            RateLimitDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_and_increment("flights:book", "cred-1", now),
            RateLimitDecision::Limited { .. }
        ));
    }
}
