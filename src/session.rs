//! Session Store (§4.7): a session-id to at-most-one-bound-credential map.
//!
//! A `parking_lot::RwLock<HashMap<SessionId, Session>>`. Lifetime policy
//! (when to evict) is caller-defined per §3, so this module exposes a
//! `sweep` the caller can schedule rather than an internal timer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::credential::Credential;
use crate::identifiers::SessionId;

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub credential: Option<Credential>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    fn new(session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            credential: None,
            created_at: now,
            last_activity_at: now,
        }
    }
}

/// Bootstraps an anonymous session with a network-issued safe-default
/// credential. Kept as a trait object so the session store's hot path never
/// depends on an async runtime directly (§5).
pub trait SafeDefaultIssuer {
    fn issue_safe_default(&self, session_id: &SessionId) -> Option<Credential>;
}

pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a session, creating a fresh (credential-less) one if absent.
    /// If `issuer` is given and the session is new, its safe-default
    /// credential is bound immediately; `issuer` is never consulted for an
    /// existing session, so the network call happens at most once.
    pub fn get_or_create(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
        issuer: Option<&dyn SafeDefaultIssuer>,
    ) -> Session {
        {
            let sessions = self.sessions.read();
            if let Some(existing) = sessions.get(&session_id) {
                return existing.clone();
            }
        }

        let mut session = Session::new(session_id.clone(), now);
        if let Some(issuer) = issuer {
            session.credential = issuer.issue_safe_default(&session_id);
        }

        let mut sessions = self.sessions.write();
        sessions
            .entry(session_id)
            .or_insert(session)
            .clone()
    }

    /// Bind (or replace) the credential on a session, touching `last_activity_at`.
    pub fn bind_credential(&self, session_id: &SessionId, credential: Credential, now: DateTime<Utc>) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(session_id) {
            session.credential = Some(credential);
            session.last_activity_at = now;
        }
    }

    pub fn touch(&self, session_id: &SessionId, now: DateTime<Utc>) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get_mut(session_id) {
            session.last_activity_at = now;
        }
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &SessionId) {
        self.sessions.write().remove(session_id);
    }

    /// Evict sessions whose `last_activity_at` is older than `max_idle`. The
    /// caller decides when (and whether) to call this — no internal timer.
    pub fn sweep_inactive(&self, now: DateTime<Utc>, max_idle: chrono::Duration) {
        self.sessions
            .write()
            .retain(|_, session| now - session.last_activity_at < max_idle);
    }

    /// Clear the bound credential on any session whose credential has passed
    /// its own `expires_at`. Distinct from [`Self::sweep_inactive`]: a session
    /// can be active while the credential bound to it has expired, and the
    /// session itself should survive with no credential rather than be evicted.
    pub fn clear_expired_credentials(&self, now: DateTime<Utc>) {
        for session in self.sessions.write().values_mut() {
            if session
                .credential
                .as_ref()
                .is_some_and(|credential| credential.is_expired(now))
            {
                session.credential = None;
            }
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysNone;
    impl SafeDefaultIssuer for AlwaysNone {
        fn issue_safe_default(&self, _session_id: &SessionId) -> Option<Credential> {
            None
        }
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = SessionStore::new();
        let id = SessionId::new();
        let now = Utc::now();
        let first = store.get_or_create(id.clone(), now, None);
        let second = store.get_or_create(id.clone(), now, None);
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn existing_session_never_calls_the_issuer_again() {
        struct CountingIssuer(std::sync::atomic::AtomicUsize);
        impl SafeDefaultIssuer for CountingIssuer {
            fn issue_safe_default(&self, _session_id: &SessionId) -> Option<Credential> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                None
            }
        }

        let store = SessionStore::new();
        let issuer = CountingIssuer(std::sync::atomic::AtomicUsize::new(0));
        let id = SessionId::new();
        let now = Utc::now();
        store.get_or_create(id.clone(), now, Some(&issuer));
        store.get_or_create(id.clone(), now, Some(&issuer));
        assert_eq!(issuer.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn a_session_holds_at_most_one_credential_replacement_permitted() {
        let store = SessionStore::new();
        let id = SessionId::new();
        let now = Utc::now();
        store.get_or_create(id.clone(), now, None);

        let a = sample_credential(now);
        let b = sample_credential(now);
        store.bind_credential(&id, a.clone(), now);
        store.bind_credential(&id, b.clone(), now);

        let session = store.get(&id).unwrap();
        assert_eq!(session.credential.unwrap().credential_id, b.credential_id);
    }

    #[test]
    fn sweep_inactive_evicts_old_sessions() {
        let store = SessionStore::new();
        let id = SessionId::new();
        let now = Utc::now();
        store.get_or_create(id.clone(), now, None);

        store.sweep_inactive(now + chrono::Duration::hours(2), chrono::Duration::hours(1));
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn clear_expired_credentials_clears_only_expired_ones_and_keeps_the_session() {
        let store = SessionStore::new();
        let now = Utc::now();

        let expired_id = SessionId::new();
        store.get_or_create(expired_id.clone(), now, None);
        store.bind_credential(&expired_id, sample_credential(now), now);

        let live_id = SessionId::new();
        store.get_or_create(live_id.clone(), now, None);
        store.bind_credential(&live_id, sample_credential_expiring_in(now, chrono::Duration::hours(4)), now);

        // The expired credential's own expires_at is `now + 1h`; check well past it.
        let later = now + chrono::Duration::hours(2);
        store.clear_expired_credentials(later);

        let expired_session = store.get(&expired_id).unwrap();
        assert!(expired_session.credential.is_none());

        // Still present with its credential intact: a still-valid credential
        // must not be cleared, and clearing one must not evict its session.
        let live_session = store.get(&live_id).unwrap();
        assert!(live_session.credential.is_some());
    }

    fn sample_credential(now: DateTime<Utc>) -> Credential {
        sample_credential_expiring_in(now, chrono::Duration::hours(1))
    }

    fn sample_credential_expiring_in(now: DateTime<Utc>, ttl: chrono::Duration) -> Credential {
        use crate::constraints::ConstraintMap;
        use crate::credential::Claim;
        use crate::identifiers::{CredentialId, GateId, IssuerId, SubjectId};
        use std::collections::HashMap as StdHashMap;

        Credential::new(
            CredentialId::new(),
            IssuerId::new("uniplex"),
            SubjectId::new("agent-1"),
            GateId::new("flights"),
            now,
            now + ttl,
            vec![Claim {
                permission_key: "flights:search".to_string(),
                constraints: ConstraintMap::new(),
            }],
            ConstraintMap::new(),
            StdHashMap::new(),
            "deadbeef".to_string(),
        )
        .unwrap()
    }
}
