//! Periodic health sweeps of the connection pool.

use crate::db::{ConnectionPool, Driver};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Sweeps the pool at a fixed interval.
///
/// Holds only a weak pool reference and exits once the pool is dropped or
/// closed, or when the shutdown token is cancelled.
pub struct HealthMonitor<D: Driver> {
    pool: Weak<ConnectionPool<D>>,
    interval: Duration,
}

impl<D: Driver> HealthMonitor<D> {
    pub fn new(pool: &Arc<ConnectionPool<D>>, interval: Duration) -> Self {
        Self {
            pool: Arc::downgrade(pool),
            interval,
        }
    }

    /// Run the monitor on a background task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; a fresh pool needs no sweep.
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "Health monitor started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Health monitor stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            // Try to upgrade weak reference - exit if pool was dropped
            let Some(pool) = self.pool.upgrade() else {
                info!("Connection pool dropped, health monitor exiting");
                return;
            };
            if pool.is_closed() {
                info!("Connection pool closed, health monitor exiting");
                return;
            }

            let report = pool.health_sweep().await;
            debug!(probed = report.probed, evicted = report.evicted, "Health sweep tick");

            // Drop strong reference before sleeping to allow pool deallocation
            drop(pool);
        }
    }
}
