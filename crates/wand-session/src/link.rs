//! Issued links and the registry that owns them.
//!
//! # Locking
//!
//! Two tiers, so redeeming link A never waits on redeeming link B:
//!
//! ```text
//! LinkRegistry.links   Mutex<HashMap<token, Arc<Link>>>   insert / lookup / purge
//!        │
//!        └── Link.usage   Mutex<LinkUsage>                 check-and-decrement
//! ```
//!
//! The table lock is held only long enough to clone an `Arc<Link>` out of
//! the map. The check-and-decrement happens under the link's own lock,
//! which is what stops two concurrent redemptions from both seeing
//! `remaining_uses == 1` and both succeeding.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    AuthError, Clock, LinkToken, RandomSource, SessionError, SessionId, Target,
    lock,
};

/// Everything needed to store a new link. The token is generated by
/// [`LinkRegistry::create`].
#[derive(Debug, Clone)]
pub struct NewLink {
    /// Where sessions created from this link will be proxied.
    pub target: Target,
    /// How many times the link may be redeemed.
    pub remaining_uses: u32,
    /// After this instant, redemption is refused no matter what.
    pub expires_at: DateTime<Utc>,
    /// How long each session created from this link stays valid.
    pub session_duration: Duration,
}

/// The mutable half of a link. Only touched under `Link::usage`.
#[derive(Debug)]
struct LinkUsage {
    remaining_uses: u32,
    redeemed_sessions: Vec<SessionId>,
}

/// A not-yet (or partially) redeemed invitation.
///
/// Token, target, expiry and session duration never change after
/// creation. Remaining uses and the redemption audit trail change only
/// through [`consume`](Self::consume).
#[derive(Debug)]
pub struct Link {
    token: LinkToken,
    target: Target,
    expires_at: DateTime<Utc>,
    session_duration: Duration,
    usage: Mutex<LinkUsage>,
}

impl Link {
    pub fn token(&self) -> &LinkToken {
        &self.token
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn session_duration(&self) -> Duration {
        self.session_duration
    }

    /// Uses left right now. May be stale as soon as it's returned.
    pub fn remaining_uses(&self) -> u32 {
        lock(&self.usage).remaining_uses
    }

    /// Session ids created from this link, oldest first.
    pub fn redeemed_sessions(&self) -> Vec<SessionId> {
        lock(&self.usage).redeemed_sessions.clone()
    }

    /// Returns `true` once `now` has reached `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Atomically checks expiry and remaining uses, then spends one use
    /// on `session_id`.
    ///
    /// Expiry is checked first: an expired link reports
    /// [`AuthError::Expired`] even if it also has no uses left. On any
    /// error nothing is mutated.
    pub fn consume(
        &self,
        now: DateTime<Utc>,
        session_id: &SessionId,
    ) -> Result<(), AuthError> {
        let mut usage = lock(&self.usage);
        if self.is_expired_at(now) {
            return Err(AuthError::Expired);
        }
        if usage.remaining_uses == 0 {
            return Err(AuthError::Exhausted);
        }
        usage.remaining_uses -= 1;
        usage.redeemed_sessions.push(session_id.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LinkRegistry
// ---------------------------------------------------------------------------

/// Owns every issued link, keyed by token.
///
/// Constructed once at startup and shared behind an `Arc`; there is no
/// global table.
pub struct LinkRegistry {
    links: Mutex<HashMap<LinkToken, Arc<Link>>>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl LinkRegistry {
    /// Creates an empty registry.
    pub fn new(clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>) -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
            clock,
            random,
        }
    }

    /// Generates a fresh token, stores the link under it, and returns
    /// the token.
    ///
    /// # Errors
    /// - [`SessionError::Entropy`] if the random source fails
    /// - [`SessionError::Collision`] if the token is already taken
    ///
    /// Both are fatal; neither is retried here.
    pub fn create(&self, new: NewLink) -> Result<LinkToken, SessionError> {
        let token = LinkToken::generate(self.random.as_ref())?;
        let link = Arc::new(Link {
            token: token.clone(),
            target: new.target,
            expires_at: new.expires_at,
            session_duration: new.session_duration,
            usage: Mutex::new(LinkUsage {
                remaining_uses: new.remaining_uses,
                redeemed_sessions: Vec::new(),
            }),
        });

        let inserted = match lock(&self.links).entry(token.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&link));
                true
            }
        };
        if !inserted {
            tracing::error!(%token, "link token collision");
            return Err(SessionError::Collision("link token"));
        }

        tracing::info!(
            %token,
            target = %link.target,
            uses = new.remaining_uses,
            expires_at = %link.expires_at,
            "link created"
        );
        Ok(token)
    }

    /// Looks up a link by token.
    pub fn lookup(&self, token: &str) -> Option<Arc<Link>> {
        lock(&self.links).get(token).cloned()
    }

    /// Spends one use of the link at `token` on `session_id`.
    ///
    /// The check and the decrement are one atomic step per link (see
    /// [`Link::consume`]). Returns the link so the caller can read its
    /// target and session duration.
    ///
    /// # Errors
    /// [`AuthError::NotFound`], [`AuthError::Expired`] or
    /// [`AuthError::Exhausted`]; state is untouched on error.
    pub fn consume(
        &self,
        token: &str,
        session_id: &SessionId,
    ) -> Result<Arc<Link>, AuthError> {
        let link = self.lookup(token).ok_or(AuthError::NotFound)?;
        link.consume(self.clock.now(), session_id)?;
        Ok(link)
    }

    /// Removes every link whose expiry has passed. Returns how many
    /// were removed.
    ///
    /// Expired links can never be redeemed, so this only reclaims memory.
    /// Afterwards a stale token reports `NotFound` instead of `Expired`.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut links = lock(&self.links);
        let before = links.len();
        links.retain(|_, link| !link.is_expired_at(now));
        before - links.len()
    }

    /// Number of stored links, redeemable or not.
    pub fn len(&self) -> usize {
        lock(&self.links).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.links).is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, OsRandom};

    // -- Helpers ----------------------------------------------------------

    fn registry() -> (LinkRegistry, ManualClock) {
        let clock = ManualClock::starting_now();
        let registry =
            LinkRegistry::new(Arc::new(clock.clone()), Arc::new(OsRandom));
        (registry, clock)
    }

    fn new_link(clock: &ManualClock, uses: u32, lasts: Duration) -> NewLink {
        NewLink {
            target: Target::parse("example.com", false).unwrap(),
            remaining_uses: uses,
            expires_at: crate::clock::deadline(clock.now(), lasts),
            session_duration: Duration::from_secs(1800),
        }
    }

    fn sid() -> SessionId {
        SessionId::generate(&OsRandom).unwrap()
    }

    /// Always yields the same bytes, so the second token collides.
    struct StuckRandom;

    impl RandomSource for StuckRandom {
        fn fill(&self, buf: &mut [u8]) -> Result<(), SessionError> {
            buf.fill(7);
            Ok(())
        }
    }

    // =====================================================================
    // create() / lookup()
    // =====================================================================

    #[test]
    fn test_create_stores_link_with_given_fields() {
        let (reg, clock) = registry();
        let fresh = new_link(&clock, 3, Duration::from_secs(300));

        let token = reg.create(fresh.clone()).expect("should create");
        let link = reg.lookup(token.as_str()).expect("should be stored");

        assert_eq!(link.token(), &token);
        assert_eq!(link.target(), &fresh.target);
        assert_eq!(link.remaining_uses(), 3);
        assert_eq!(link.expires_at(), fresh.expires_at);
        assert_eq!(link.session_duration(), fresh.session_duration);
        assert!(link.redeemed_sessions().is_empty());
    }

    #[test]
    fn test_create_repeated_token_returns_collision() {
        let clock = ManualClock::starting_now();
        let reg = LinkRegistry::new(Arc::new(clock.clone()), Arc::new(StuckRandom));
        reg.create(new_link(&clock, 1, Duration::from_secs(60))).unwrap();

        let result = reg.create(new_link(&clock, 1, Duration::from_secs(60)));

        assert!(matches!(result, Err(SessionError::Collision(_))));
        assert_eq!(reg.len(), 1, "the colliding link must not replace the first");
    }

    #[test]
    fn test_lookup_unknown_token_returns_none() {
        let (reg, _) = registry();
        assert!(reg.lookup("nope").is_none());
    }

    // =====================================================================
    // consume()
    // =====================================================================

    #[test]
    fn test_consume_decrements_and_records_session() {
        let (reg, clock) = registry();
        let token = reg.create(new_link(&clock, 2, Duration::from_secs(60))).unwrap();
        let session = sid();

        let link = reg.consume(token.as_str(), &session).expect("should consume");

        assert_eq!(link.remaining_uses(), 1);
        assert_eq!(link.redeemed_sessions(), vec![session]);
    }

    #[test]
    fn test_consume_n_uses_then_exhausted() {
        let (reg, clock) = registry();
        let token = reg.create(new_link(&clock, 3, Duration::from_secs(60))).unwrap();

        for _ in 0..3 {
            reg.consume(token.as_str(), &sid()).expect("use should succeed");
        }
        let result = reg.consume(token.as_str(), &sid());

        assert_eq!(result.err(), Some(AuthError::Exhausted));
        let link = reg.lookup(token.as_str()).unwrap();
        assert_eq!(link.remaining_uses(), 0);
        assert_eq!(link.redeemed_sessions().len(), 3);
    }

    #[test]
    fn test_consume_after_expiry_returns_expired_despite_uses() {
        let (reg, clock) = registry();
        let token = reg.create(new_link(&clock, 5, Duration::from_secs(1))).unwrap();

        clock.advance(Duration::from_secs(2));
        let result = reg.consume(token.as_str(), &sid());

        assert_eq!(result.err(), Some(AuthError::Expired));
        assert_eq!(reg.lookup(token.as_str()).unwrap().remaining_uses(), 5);
    }

    #[test]
    fn test_consume_exactly_at_expiry_returns_expired() {
        let (reg, clock) = registry();
        let token = reg.create(new_link(&clock, 1, Duration::from_secs(10))).unwrap();

        clock.advance(Duration::from_secs(10));

        assert_eq!(
            reg.consume(token.as_str(), &sid()).err(),
            Some(AuthError::Expired)
        );
    }

    #[test]
    fn test_consume_expired_and_exhausted_reports_expired() {
        let (reg, clock) = registry();
        let token = reg.create(new_link(&clock, 1, Duration::from_secs(10))).unwrap();
        reg.consume(token.as_str(), &sid()).unwrap();

        clock.advance(Duration::from_secs(11));

        assert_eq!(
            reg.consume(token.as_str(), &sid()).err(),
            Some(AuthError::Expired)
        );
    }

    #[test]
    fn test_consume_unknown_token_returns_not_found() {
        let (reg, _) = registry();
        assert_eq!(reg.consume("missing", &sid()).err(), Some(AuthError::NotFound));
    }

    #[test]
    fn test_consume_zero_use_link_is_exhausted_immediately() {
        let (reg, clock) = registry();
        let token = reg.create(new_link(&clock, 0, Duration::from_secs(60))).unwrap();

        assert_eq!(
            reg.consume(token.as_str(), &sid()).err(),
            Some(AuthError::Exhausted)
        );
    }

    // =====================================================================
    // purge_expired()
    // =====================================================================

    #[test]
    fn test_purge_expired_removes_only_expired_links() {
        let (reg, clock) = registry();
        let short = reg.create(new_link(&clock, 1, Duration::from_secs(30))).unwrap();
        let long = reg.create(new_link(&clock, 1, Duration::from_secs(600))).unwrap();

        clock.advance(Duration::from_secs(60));
        let removed = reg.purge_expired();

        assert_eq!(removed, 1);
        assert!(reg.lookup(short.as_str()).is_none());
        assert!(reg.lookup(long.as_str()).is_some());
        assert_eq!(
            reg.consume(short.as_str(), &sid()).err(),
            Some(AuthError::NotFound)
        );
    }
}
