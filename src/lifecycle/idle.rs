//! Idle tracking and automatic shutdown.

use crate::db::{ConnectionPool, Driver};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Process-wide timestamp of the last request arrival or query completion.
#[derive(Debug, Clone)]
pub struct ActivityClock {
    last: Arc<Mutex<Instant>>,
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Record activity now.
    pub fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last.lock()
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }
}

/// How an [`IdleShutdownManager`] run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The idle timeout elapsed; the pool was shut down and the token cancelled.
    Fired { idle_for: Duration },
    /// The shutdown token was cancelled elsewhere first.
    Cancelled,
}

/// Shuts the pool down and cancels the process shutdown token once no
/// request has been seen for `idle_timeout`. Never fires while a lease is
/// outstanding.
pub struct IdleShutdownManager<D: Driver> {
    pool: Arc<ConnectionPool<D>>,
    clock: ActivityClock,
    idle_timeout: Duration,
    check_interval: Duration,
}

impl<D: Driver> IdleShutdownManager<D> {
    pub fn new(
        pool: Arc<ConnectionPool<D>>,
        clock: ActivityClock,
        idle_timeout: Duration,
        check_interval: Duration,
    ) -> Self {
        Self {
            pool,
            clock,
            idle_timeout,
            check_interval,
        }
    }

    /// Run the manager on a background task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<IdleOutcome> {
        tokio::spawn(self.run(shutdown))
    }

    /// Check periodically until the idle timeout fires or `shutdown` is cancelled.
    /// Fires at most once.
    pub async fn run(self, shutdown: CancellationToken) -> IdleOutcome {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            idle_timeout_secs = self.idle_timeout.as_secs(),
            check_interval_secs = self.check_interval.as_secs(),
            "Idle shutdown manager started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Idle shutdown manager stopping");
                    return IdleOutcome::Cancelled;
                }
                _ = ticker.tick() => {}
            }

            let idle_for = self.clock.idle_for();
            let leased = self.pool.status().leased;
            if idle_for > self.idle_timeout && leased > 0 {
                debug!(idle_secs = idle_for.as_secs(), leased = leased, "Idle timeout reached with leases out, waiting");
                continue;
            }
            if idle_for > self.idle_timeout {
                info!(idle_secs = idle_for.as_secs(), "Idle timeout reached, shutting down");
                self.pool.shutdown().await;
                shutdown.cancel();
                return IdleOutcome::Fired { idle_for };
            }
            debug!(idle_secs = idle_for.as_secs(), "Idle check");
        }
    }
}
