//! The session store: every session created by a redemption.
//!
//! Sessions are immutable once stored. They are only ever inserted (by
//! redemption) and removed (by [`SessionStore::sweep`]), so readers need
//! nothing beyond the table lock, held for a single map operation.
//!
//! # Validity is checked at read time
//!
//! A session is live iff `now < valid_until`. The reaper deletes expired
//! entries to free memory, but it is never the source of truth: an expired
//! session that hasn't been swept yet is still reported as not live by
//! [`SessionStore::is_live`] and [`SessionStore::get_live`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::deadline;
use crate::{Clock, RandomSource, SessionError, SessionId, Target, lock};

/// An authenticated, time-boxed grant to reach one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The session id carried in the client's cookie.
    pub id: SessionId,
    /// Copied from the link that created this session.
    pub target: Target,
    /// The session is valid strictly before this instant.
    pub valid_until: DateTime<Utc>,
}

impl Session {
    /// Returns `true` if the session is still valid at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_until
    }
}

/// Owns every session, keyed by id.
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new(clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            clock,
            random,
        }
    }

    /// Creates a session for `target` valid for `duration` from now.
    ///
    /// # Errors
    /// [`SessionError::Entropy`] or [`SessionError::Collision`], both
    /// fatal.
    pub fn create(
        &self,
        target: Target,
        duration: Duration,
    ) -> Result<Session, SessionError> {
        self.create_with(|_| Ok((target, duration, ())))
            .map(|(session, ())| session)
    }

    /// Mints a fresh id and stores the session `grant` describes for it,
    /// passing `grant`'s extra output back alongside the session.
    ///
    /// `grant` runs under the table lock, after the id is known to be
    /// free, so once it succeeds the insert can't fail. If it fails
    /// nothing is stored.
    pub(crate) fn create_with<F, T>(&self, grant: F) -> Result<(Session, T), SessionError>
    where
        F: FnOnce(&SessionId) -> Result<(Target, Duration, T), SessionError>,
    {
        let id = SessionId::generate(self.random.as_ref())?;

        let mut sessions = lock(&self.sessions);
        let Entry::Vacant(slot) = sessions.entry(id) else {
            tracing::error!("session id collision");
            return Err(SessionError::Collision("session id"));
        };
        let (target, duration, extra) = grant(slot.key())?;
        let session = Session {
            id: slot.key().clone(),
            target,
            valid_until: deadline(self.clock.now(), duration),
        };
        slot.insert(session.clone());
        Ok((session, extra))
    }

    /// Looks up a session by id, live or not.
    pub fn get(&self, id: &str) -> Option<Session> {
        lock(&self.sessions).get(id).cloned()
    }

    /// Returns `true` if `session` is valid right now.
    pub fn is_live(&self, session: &Session) -> bool {
        session.is_live_at(self.clock.now())
    }

    /// Looks up a session and returns it only if it is still live.
    pub fn get_live(&self, id: &str) -> Option<Session> {
        self.get(id).filter(|session| self.is_live(session))
    }

    /// Removes every session whose `valid_until` has passed. Returns how
    /// many were removed.
    ///
    /// "Now" is read once, before the table is locked. A session inserted
    /// while the sweep waits for the lock has `valid_until` later than
    /// that instant (for any positive duration), so it is always kept.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = lock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|_, session| session.is_live_at(now));
        before - sessions.len()
    }

    /// Number of stored sessions, live or not.
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, OsRandom};

    fn store() -> (SessionStore, ManualClock) {
        let clock = ManualClock::starting_now();
        let store = SessionStore::new(Arc::new(clock.clone()), Arc::new(OsRandom));
        (store, clock)
    }

    fn target() -> Target {
        Target::parse("example.com", false).unwrap()
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_create_sets_valid_until_from_duration() {
        let (store, clock) = store();
        let start = clock.now();

        let session = store.create(target(), MINUTE).expect("should create");

        assert_eq!(session.valid_until - start, chrono::TimeDelta::seconds(60));
        assert_eq!(session.target, target());
        assert_eq!(store.get(session.id.as_str()), Some(session));
    }

    #[test]
    fn test_create_ids_are_unique() {
        let (store, _) = store();
        let a = store.create(target(), MINUTE).unwrap();
        let b = store.create(target(), MINUTE).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_get_unknown_returns_none() {
        let (store, _) = store();
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_is_live_true_strictly_before_valid_until() {
        let (store, clock) = store();
        let session = store.create(target(), MINUTE).unwrap();

        clock.advance(Duration::from_secs(59));
        assert!(store.is_live(&session));

        clock.advance(Duration::from_secs(1));
        assert!(!store.is_live(&session), "valid_until itself is not live");
    }

    #[test]
    fn test_get_live_hides_expired_but_unswept_session() {
        let (store, clock) = store();
        let session = store.create(target(), MINUTE).unwrap();

        clock.advance(Duration::from_secs(61));

        assert!(store.get(session.id.as_str()).is_some(), "not swept yet");
        assert!(store.get_live(session.id.as_str()).is_none());
    }

    #[test]
    fn test_sweep_removes_expired_and_keeps_live() {
        let (store, clock) = store();
        let short = store.create(target(), MINUTE).unwrap();
        let long = store.create(target(), 10 * MINUTE).unwrap();

        clock.advance(2 * MINUTE);
        let removed = store.sweep();

        assert_eq!(removed, 1);
        assert!(store.get(short.id.as_str()).is_none());
        assert!(store.get(long.id.as_str()).is_some());
    }

    #[test]
    fn test_sweep_on_empty_store_removes_nothing() {
        let (store, _) = store();
        assert_eq!(store.sweep(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_never_removes_live_sessions() {
        let (store, _) = store();
        for _ in 0..10 {
            store.create(target(), MINUTE).unwrap();
        }
        assert_eq!(store.sweep(), 0);
        assert_eq!(store.len(), 10);
    }
}
