//! Redemption: exchanging a link token for a session.
//!
//! This is the only path by which a [`Session`](crate::Session) comes into
//! existence. The steps, in order:
//!
//! ```text
//! lookup(token) ──none──→ NotFound
//!      │
//! mint session id, reserve its slot        (session table locked)
//!      │
//! link.consume(now, id) ──→ Expired / Exhausted   (atomic per link)
//!      │
//! store session { link.target, link.session_duration }
//!      │
//! Grant { session_id, target, valid_until }
//! ```
//!
//! A use is spent only once the session's slot is reserved, so a failed
//! mint never burns a use and a spent use always has its session. Lock
//! order is session table, then link; nothing takes them the other way
//! round.
//!
//! The session is in the store before `redeem` returns, so any task that
//! receives the grant can immediately resolve it.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{AuthError, LinkRegistry, SessionError, SessionId, SessionStore, Target};

/// What a successful redemption hands back to the caller, enough to set
/// a cookie whose expiry matches the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub session_id: SessionId,
    pub target: Target,
    pub valid_until: DateTime<Utc>,
}

/// Orchestrates redemption across the link registry and session store.
pub struct AuthCoordinator {
    links: Arc<LinkRegistry>,
    sessions: Arc<SessionStore>,
}

impl AuthCoordinator {
    pub fn new(links: Arc<LinkRegistry>, sessions: Arc<SessionStore>) -> Self {
        Self { links, sessions }
    }

    /// Redeems `token` for a new session.
    ///
    /// # Errors
    /// - [`SessionError::Auth`] with the exact reason the link was refused
    ///   ([`AuthError::NotFound`], [`AuthError::Expired`],
    ///   [`AuthError::Exhausted`])
    /// - [`SessionError::Entropy`] / [`SessionError::Collision`] if a
    ///   session id could not be minted (fatal); no use is spent
    pub fn redeem(&self, token: &str) -> Result<Grant, SessionError> {
        if self.links.lookup(token).is_none() {
            tracing::warn!(reason = ?AuthError::NotFound, "redemption refused");
            return Err(AuthError::NotFound.into());
        }

        let (session, link) = self.sessions.create_with(|session_id| {
            let link = self.links.consume(token, session_id).map_err(|reason| {
                tracing::warn!(?reason, "redemption refused");
                SessionError::from(reason)
            })?;
            Ok((link.target().clone(), link.session_duration(), link))
        })?;

        tracing::info!(
            token = %link.token(),
            session_id = %session.id,
            target = %session.target,
            valid_until = %session.valid_until,
            "link redeemed"
        );

        Ok(Grant {
            session_id: session.id,
            target: session.target,
            valid_until: session.valid_until,
        })
    }
}
