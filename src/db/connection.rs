//! A single authenticated connection with reconnect and probe support.

use crate::db::driver::{Driver, DriverSession};
use crate::error::{DbError, DbResult};
use crate::models::RowSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default number of reconnect attempts after the first failure.
pub const DEFAULT_RECONNECT_RETRIES: u32 = 3;

/// Default delay before the first reconnect attempt (doubles each attempt).
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Statement used for liveness probes.
pub const PROBE_SQL: &str = "SELECT 1";

/// Pool-assigned connection identifier. Monotonically increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Retry budget for opening a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RECONNECT_RETRIES,
            base_delay: DEFAULT_RECONNECT_BASE_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before retry number `attempt` (0-based): base, 2*base, 4*base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// One session to the remote engine plus its liveness bookkeeping.
pub struct Connection<D: Driver> {
    id: ConnectionId,
    driver: Arc<D>,
    handle: Option<D::Session>,
    policy: ReconnectPolicy,
    alive: bool,
    last_used: Instant,
    last_probed: Instant,
}

impl<D: Driver> std::fmt::Debug for Connection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("driver", &self.driver.name())
            .field("open", &self.handle.is_some())
            .field("alive", &self.alive)
            .field("since_last_use", &self.last_used.elapsed())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Connection<D> {
    /// Open a new connection, retrying authentication and network failures
    /// according to `policy`.
    pub async fn open(id: ConnectionId, driver: Arc<D>, policy: ReconnectPolicy) -> DbResult<Self> {
        let handle = connect_with_retry(driver.as_ref(), &policy, id).await?;
        let now = Instant::now();
        info!(connection_id = %id, driver = driver.name(), "Opened connection");
        Ok(Self {
            id,
            driver,
            handle: Some(handle),
            policy,
            alive: true,
            last_used: now,
            last_probed: now,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether a session handle is currently held.
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether the connection was verified within `window`.
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.alive && self.last_probed.elapsed() <= window
    }

    /// Record that the connection was just handed back to the pool.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Run a statement, opening the session first if it was closed.
    pub async fn execute(&mut self, sql: &str) -> DbResult<RowSet> {
        if self.handle.is_none() {
            self.reconnect().await?;
        }
        let Some(handle) = self.handle.as_mut() else {
            return Err(DbError::internal("connection handle missing after reconnect"));
        };

        debug!(connection_id = %self.id, sql = %sql, "Executing statement");
        let result = handle.execute(sql).await;
        match &result {
            Ok(_) => {
                self.alive = true;
                self.last_probed = Instant::now();
            }
            Err(DbError::Engine { .. }) => {}
            Err(_) => self.alive = false,
        }
        result
    }

    /// Trivial round-trip returning a liveness signal. Never fails.
    ///
    /// A closed connection is reported dead without reconnecting.
    pub async fn probe(&mut self) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            self.alive = false;
            return false;
        };

        let ok = match handle.execute(PROBE_SQL).await {
            Ok(_) => true,
            Err(err) => {
                debug!(connection_id = %self.id, error = %err, "Probe failed");
                false
            }
        };
        self.alive = ok;
        self.last_probed = Instant::now();
        ok
    }

    /// Drop the current session (if any) and open a new one under the
    /// reconnect policy. On failure the connection is left closed.
    pub async fn reconnect(&mut self) -> DbResult<()> {
        self.close().await;
        warn!(connection_id = %self.id, "Reconnecting");
        let handle = connect_with_retry(self.driver.as_ref(), &self.policy, self.id).await?;
        self.handle = Some(handle);
        self.alive = true;
        self.last_probed = Instant::now();
        Ok(())
    }

    /// Close the session. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close().await;
            debug!(connection_id = %self.id, "Closed connection");
        }
        self.alive = false;
    }
}

/// Connect, retrying `Authentication` and `Network` failures with
/// exponential backoff until the policy's budget is spent.
async fn connect_with_retry<D: Driver>(
    driver: &D,
    policy: &ReconnectPolicy,
    id: ConnectionId,
) -> DbResult<D::Session> {
    let mut attempt = 0;
    loop {
        match driver.connect().await {
            Ok(session) => return Ok(session),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                attempt += 1;
                warn!(
                    connection_id = %id,
                    attempt = attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Connect failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                warn!(connection_id = %id, attempts = attempt + 1, error = %err, "Connect failed");
                return Err(err);
            }
        }
    }
}
