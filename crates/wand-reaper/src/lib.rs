//! Periodic expiry sweeps for wand.
//!
//! The reaper is one long-lived background task that evicts expired
//! sessions (and, when enabled, expired links) on a fixed interval. It is
//! purely a memory-reclamation job: session validity is always checked at
//! read time, so a late or failed sweep never lets an expired session
//! through.
//!
//! # Lifecycle
//!
//! ```text
//! ExpiryReaper::new(config, sessions)
//!     .with_links(links)        // optional
//!     .spawn()  ──→ ReaperHandle
//!                       │
//!            every `interval`: sweep sessions, then links
//!                       │
//!           handle.shutdown().await ──→ ReaperMetrics
//! ```
//!
//! Each sweep runs in its own task. A panicking sweep is caught through
//! its join handle, logged, counted in [`ReaperMetrics::failures`], and
//! the loop carries on at the next tick.
//!
//! Dropping the [`ReaperHandle`] without calling
//! [`shutdown`](ReaperHandle::shutdown) also stops the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, trace, warn};
use wand_session::{LinkRegistry, SessionStore};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Reaper schedule and scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Time between sweeps. Default: one minute.
    pub interval: Duration,
    /// Also evict links whose expiry has passed. Default: `false`, expired
    /// links are left in the registry and refused at redemption.
    pub evict_expired_links: bool,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            evict_expired_links: false,
        }
    }
}

impl ReaperConfig {
    /// Shortest permitted interval.
    pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

    /// Longest permitted interval.
    pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

    /// Create a config with a specific interval and default scope.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`ExpiryReaper::new`]. An interval below
    /// [`Self::MIN_INTERVAL`] (including zero, which `tokio::time::interval`
    /// rejects) is raised to it; one above [`Self::MAX_INTERVAL`] is
    /// lowered to it.
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval = ?self.interval,
                min = ?Self::MIN_INTERVAL,
                "reap interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        if self.interval > Self::MAX_INTERVAL {
            warn!(
                interval = ?self.interval,
                max = ?Self::MAX_INTERVAL,
                "reap interval above maximum, clamping"
            );
            self.interval = Self::MAX_INTERVAL;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Sweep targets
// ---------------------------------------------------------------------------

/// A table the reaper can clear expired entries from.
pub trait Sweep: Send + Sync + 'static {
    /// Removes expired entries and returns how many were removed.
    fn sweep_expired(&self) -> usize;
}

impl Sweep for SessionStore {
    fn sweep_expired(&self) -> usize {
        self.sweep()
    }
}

impl Sweep for LinkRegistry {
    fn sweep_expired(&self) -> usize {
        self.purge_expired()
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Counters accumulated over the reaper's lifetime, returned by
/// [`ReaperHandle::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaperMetrics {
    /// Intervals that fired.
    pub ticks: u64,
    /// Sessions removed across all sweeps.
    pub sessions_evicted: u64,
    /// Links removed across all sweeps.
    pub links_evicted: u64,
    /// Sweeps that panicked or were cancelled.
    pub failures: u64,
}

// ---------------------------------------------------------------------------
// Reaper
// ---------------------------------------------------------------------------

/// Builder for the background sweep task.
pub struct ExpiryReaper {
    config: ReaperConfig,
    sessions: Arc<dyn Sweep>,
    links: Option<Arc<dyn Sweep>>,
}

impl ExpiryReaper {
    pub fn new(config: ReaperConfig, sessions: Arc<dyn Sweep>) -> Self {
        Self {
            config: config.validated(),
            sessions,
            links: None,
        }
    }

    /// Registers the link table. It is only swept when
    /// [`ReaperConfig::evict_expired_links`] is set.
    pub fn with_links(mut self, links: Arc<dyn Sweep>) -> Self {
        self.links = Some(links);
        self
    }

    /// Starts the loop on the current Tokio runtime.
    ///
    /// The first sweep happens one full interval after spawning.
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        debug!(
            interval = ?self.config.interval,
            evict_links = self.config.evict_expired_links,
            "expiry reaper started"
        );
        let task = tokio::spawn(self.run(shutdown_rx));
        ReaperHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) -> ReaperMetrics {
        let period = self.config.interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let links = match (&self.links, self.config.evict_expired_links) {
            (Some(links), true) => Some(Arc::clone(links)),
            _ => None,
        };
        let mut metrics = ReaperMetrics::default();

        loop {
            tokio::select! {
                biased;
                // Err means the handle was dropped; stop either way.
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            metrics.ticks += 1;

            if let Some(evicted) = sweep_in_task(&self.sessions, "sessions", &mut metrics).await {
                metrics.sessions_evicted += evicted;
            }
            if let Some(links) = &links {
                if let Some(evicted) = sweep_in_task(links, "links", &mut metrics).await {
                    metrics.links_evicted += evicted;
                }
            }
        }

        debug!(
            ticks = metrics.ticks,
            sessions_evicted = metrics.sessions_evicted,
            links_evicted = metrics.links_evicted,
            failures = metrics.failures,
            "expiry reaper stopped"
        );
        metrics
    }
}

/// Runs one sweep in a separate task so a panic stays contained.
async fn sweep_in_task(
    table: &Arc<dyn Sweep>,
    name: &'static str,
    metrics: &mut ReaperMetrics,
) -> Option<u64> {
    let table = Arc::clone(table);
    match tokio::spawn(async move { table.sweep_expired() }).await {
        Ok(0) => {
            trace!(table = name, "sweep found nothing to evict");
            Some(0)
        }
        Ok(evicted) => {
            debug!(table = name, evicted, "swept expired entries");
            Some(evicted as u64)
        }
        Err(e) => {
            metrics.failures += 1;
            error!(table = name, error = %e, "sweep failed, retrying next tick");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Owner's handle to a running reaper.
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<ReaperMetrics>,
}

impl ReaperHandle {
    /// Stops the loop and waits for it to exit.
    ///
    /// A sweep already in progress is allowed to finish.
    pub async fn shutdown(self) -> ReaperMetrics {
        // The receiver only goes away if the task already ended.
        let _ = self.shutdown_tx.send(true);
        match self.task.await {
            Ok(metrics) => metrics,
            Err(e) => {
                error!(error = %e, "expiry reaper task ended abnormally");
                ReaperMetrics::default()
            }
        }
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
