//! Link and session lifecycle for wand.
//!
//! This crate owns the only state wand keeps: the table of issued links
//! and the table of live sessions. It handles:
//!
//! 1. **Issuance storage**: generating unguessable link tokens and
//!    remembering what each one grants ([`LinkRegistry`])
//! 2. **Redemption**: trading a link token for a session, exactly as many
//!    times as the link allows ([`AuthCoordinator`])
//! 3. **Session tracking**: answering "is this session id still good, and
//!    where does it point?" ([`SessionStore`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Issuance / Proxy layers (above)  ← create links, redeem tokens, resolve cookies
//!     ↕
//! Session layer (this crate)       ← link + session tables, expiry math
//!     ↕
//! Clock / RandomSource (leaves)    ← wall time, OS randomness
//! ```
//!
//! All state is process-lifetime only. A restart forgets every link and
//! every session.

mod auth;
mod clock;
mod error;
mod link;
mod store;
mod target;
mod token;

pub use auth::{AuthCoordinator, Grant};
pub use clock::{Clock, ManualClock, SystemClock, deadline};
pub use error::{AuthError, SessionError, TargetError};
pub use link::{Link, LinkRegistry, NewLink};
pub use store::{Session, SessionStore};
pub use target::Target;
pub use token::{
    LinkToken, OsRandom, RandomSource, SessionId, TOKEN_BYTES, TOKEN_LEN,
    is_token_shaped,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a table, recovering it if a previous holder panicked.
///
/// Every critical section in this crate is a plain map or counter update
/// with no panic point between reading and writing, so a poisoned table
/// is still consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
