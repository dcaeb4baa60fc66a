//! Wall-clock time source.
//!
//! Link expiry and session validity are absolute timestamps, and the
//! session cookie carries the same timestamp in its `Expires` attribute,
//! so wand reasons in wall time (`DateTime<Utc>`) rather than `Instant`.
//!
//! Everything that needs "now" asks a [`Clock`] instead of calling
//! `Utc::now()` directly. Production uses [`SystemClock`]; tests use
//! [`ManualClock`] and move time forward explicitly, which keeps expiry
//! tests fast and deterministic.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::lock;

/// Supplies the current time.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can hand one clone to
/// the stores and keep another to call [`advance`](Self::advance) on.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Creates a clock frozen at the current system time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now = deadline(*now, by);
    }

    /// Jumps the clock to `at` (forwards or backwards).
    pub fn set(&self, at: DateTime<Utc>) {
        *lock(&self.now) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// `now + duration`, saturating at the largest representable time
/// instead of panicking on overflow.
pub fn deadline(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
