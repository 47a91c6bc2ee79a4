//! Connection pool management.
//!
//! The pool owns a bounded, lazily-populated set of [`PoolEntry`] values
//! (a connection plus its session context). Entries are lent out exclusively
//! through [`PooledSession`] guards which return them on every exit path.
//!
//! Capacity is enforced with a semaphore holding `max_size` permits: every
//! lease holds one, and so does the health sweeper while it probes an entry.
//! All bookkeeping happens under a single short `parking_lot` critical section
//! that never spans a network round-trip.

use crate::db::connection::{Connection, ConnectionId, ReconnectPolicy};
use crate::db::driver::Driver;
use crate::error::{DbError, DbResult};
use crate::models::{RowSet, SessionSnapshot, SessionState};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Default maximum number of live connections.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Default time to wait for a free connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default window in which a verified connection is lent without re-probing.
pub const DEFAULT_PROBE_FRESHNESS: Duration = Duration::from_secs(300);

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    pub acquire_timeout: Duration,
    pub probe_freshness: Duration,
    pub reconnect: ReconnectPolicy,
    /// Context every new connection starts with.
    pub session_defaults: SessionState,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            probe_freshness: DEFAULT_PROBE_FRESHNESS,
            reconnect: ReconnectPolicy::default(),
            session_defaults: SessionState::default(),
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
pub struct PoolStatus {
    /// Live connections (idle + leased)
    pub size: usize,
    pub idle: usize,
    pub leased: usize,
    pub max_size: usize,
    pub closed: bool,
}

/// Outcome of one health sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub evicted: usize,
}

/// Allocation unit of the pool: a connection and its session context.
pub struct PoolEntry<D: Driver> {
    connection: Connection<D>,
    session: SessionState,
    unhealthy: bool,
}

impl<D: Driver> std::fmt::Debug for PoolEntry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolEntry")
            .field("connection", &self.connection)
            .field("session", &self.session)
            .field("unhealthy", &self.unhealthy)
            .finish()
    }
}

impl<D: Driver> PoolEntry<D> {
    fn new(connection: Connection<D>, session: SessionState) -> Self {
        Self {
            connection,
            session,
            unhealthy: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    fn needs_probe(&self, freshness: Duration) -> bool {
        self.unhealthy || !self.connection.is_fresh(freshness)
    }

    /// Reconnect and replay the tracked session context on the new session.
    async fn reconnect_and_restore(&mut self) -> DbResult<()> {
        self.connection.reconnect().await?;
        for statement in self.session.restore_statements() {
            self.connection.execute(&statement).await?;
        }
        info!(connection_id = %self.id(), "Session context restored after reconnect");
        Ok(())
    }
}

struct PoolState<D: Driver> {
    idle: BTreeMap<ConnectionId, PoolEntry<D>>,
    /// Idle entries, leased entries, and entries being opened or swept.
    live: usize,
}

enum Slot<D: Driver> {
    Reuse(PoolEntry<D>),
    Create,
}

/// Bounded pool of engine sessions.
pub struct ConnectionPool<D: Driver> {
    driver: Arc<D>,
    config: PoolConfig,
    state: Mutex<PoolState<D>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl<D: Driver> std::fmt::Debug for ConnectionPool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("driver", &self.driver.name())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> ConnectionPool<D> {
    /// Create an empty pool. Connections are opened lazily on first acquire.
    pub fn new(driver: D, config: PoolConfig) -> Arc<Self> {
        let max_size = config.max_size.max(1);
        Arc::new(Self {
            driver: Arc::new(driver),
            config: PoolConfig { max_size, ..config },
            state: Mutex::new(PoolState {
                idle: BTreeMap::new(),
                live: 0,
            }),
            permits: Arc::new(Semaphore::new(max_size)),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Lease an entry, reusing the lowest-id idle one or opening a new one.
    ///
    /// Waits up to `acquire_timeout` when every entry is leased and the pool
    /// is at capacity, then fails with `ConnectionUnavailable`. Never lends
    /// an entry that is already leased.
    pub async fn acquire(self: &Arc<Self>) -> DbResult<PooledSession<D>> {
        if self.is_closed() {
            return Err(DbError::PoolClosed);
        }

        let permit = match tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DbError::PoolClosed),
            Err(_) => {
                warn!(
                    max_size = self.config.max_size,
                    timeout_secs = self.config.acquire_timeout.as_secs(),
                    "Timed out waiting for a free connection"
                );
                return Err(DbError::connection_unavailable(
                    format!(
                        "all {} connections busy for {}s",
                        self.config.max_size,
                        self.config.acquire_timeout.as_secs()
                    ),
                    "Retry once running queries finish, or raise --pool-size",
                ));
            }
        };

        loop {
            // Scan and lease atomically; the probe or open happens outside the lock.
            let slot = {
                let mut state = self.state.lock();
                if self.is_closed() {
                    return Err(DbError::PoolClosed);
                }
                match state.idle.pop_first() {
                    Some((_, entry)) => Slot::Reuse(entry),
                    None => {
                        state.live += 1;
                        Slot::Create
                    }
                }
            };

            // From here until the lease exists, a dropped future must give the
            // slot back; the reservation does that.
            match slot {
                Slot::Reuse(entry) => {
                    let mut reserved = Reservation::new(self, Some(entry));
                    if let Some(entry) = reserved.entry.as_mut() {
                        if entry.needs_probe(self.config.probe_freshness) {
                            if !entry.connection.probe().await {
                                warn!(connection_id = %entry.id(), "Evicting connection that failed its probe");
                                drop(reserved);
                                continue;
                            }
                            entry.unhealthy = false;
                        }
                    }
                    if let Some(entry) = reserved.keep() {
                        debug!(connection_id = %entry.id(), "Leased idle connection");
                        return Ok(PooledSession::new(Arc::clone(self), entry, permit));
                    }
                }
                Slot::Create => {
                    let reserved = Reservation::new(self, None);
                    let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
                    let connection =
                        Connection::open(id, Arc::clone(&self.driver), self.config.reconnect)
                            .await?;
                    reserved.keep();
                    let entry = PoolEntry::new(connection, self.config.session_defaults.clone());
                    debug!(connection_id = %id, "Leased new connection");
                    return Ok(PooledSession::new(Arc::clone(self), entry, permit));
                }
            }
        }
    }

    /// Probe every idle entry; close and remove the ones that fail and the
    /// ones marked unhealthy. Leased entries are never touched.
    pub async fn health_sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        if self.is_closed() {
            return report;
        }

        let candidates: Vec<ConnectionId> = self.state.lock().idle.keys().copied().collect();

        for id in candidates {
            // An unavailable permit means the pool is saturated; skip rather than wait.
            let Ok(_permit) = self.permits.try_acquire() else {
                continue;
            };
            let taken = { self.state.lock().idle.remove(&id) };
            let Some(mut entry) = taken else {
                continue;
            };

            let healthy = if entry.unhealthy {
                false
            } else {
                report.probed += 1;
                entry.connection.probe().await
            };

            if healthy {
                if let Some(mut stale) = self.check_in(entry) {
                    stale.connection.close().await;
                }
            } else {
                warn!(connection_id = %id, "Health sweep evicting connection");
                report.evicted += 1;
                self.evict(entry).await;
            }
        }

        if report.evicted > 0 {
            info!(
                probed = report.probed,
                evicted = report.evicted,
                "Health sweep finished"
            );
        } else {
            debug!(probed = report.probed, "Health sweep finished");
        }
        report
    }

    /// Close every entry and make the pool terminal.
    ///
    /// Idle entries are closed now. Leased entries refuse further statements
    /// and are closed when their lease returns.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();

        let drained: Vec<PoolEntry<D>> = {
            let mut state = self.state.lock();
            let idle = std::mem::take(&mut state.idle);
            state.live -= idle.len();
            idle.into_values().collect()
        };

        info!(closing = drained.len(), "Shutting down connection pool");
        for mut entry in drained {
            entry.connection.close().await;
        }
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            size: state.live,
            idle: state.idle.len(),
            leased: state.live.saturating_sub(state.idle.len()),
            max_size: self.config.max_size,
            closed: self.is_closed(),
        }
    }

    /// Return an entry to the idle set. Hands back entries that must be
    /// closed instead (pool closed or session gone).
    fn check_in(&self, mut entry: PoolEntry<D>) -> Option<PoolEntry<D>> {
        entry.connection.touch();
        let mut state = self.state.lock();
        if self.is_closed() || !entry.connection.is_open() {
            state.live -= 1;
            return Some(entry);
        }
        state.idle.insert(entry.id(), entry);
        None
    }

    async fn evict(&self, mut entry: PoolEntry<D>) {
        self.state.lock().live -= 1;
        entry.connection.close().await;
    }
}

/// One unit of `live` capacity claimed by `acquire` while it probes or
/// opens a connection outside the lock.
///
/// Dropped without [`keep`](Self::keep), on failure or when the acquire
/// future is cancelled, it releases the capacity and closes the held entry.
struct Reservation<'a, D: Driver> {
    pool: &'a ConnectionPool<D>,
    entry: Option<PoolEntry<D>>,
    kept: bool,
}

impl<'a, D: Driver> Reservation<'a, D> {
    fn new(pool: &'a ConnectionPool<D>, entry: Option<PoolEntry<D>>) -> Self {
        Self {
            pool,
            entry,
            kept: false,
        }
    }

    /// Keep the capacity for a lease, handing back the held entry.
    fn keep(mut self) -> Option<PoolEntry<D>> {
        self.kept = true;
        self.entry.take()
    }
}

impl<D: Driver> Drop for Reservation<'_, D> {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        self.pool.state.lock().live -= 1;
        if let Some(entry) = self.entry.take() {
            close_detached(entry);
        }
    }
}

/// Close an entry from a synchronous context.
fn close_detached<D: Driver>(mut entry: PoolEntry<D>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                entry.connection.close().await;
            });
        }
        Err(_) => {
            debug!(connection_id = %entry.id(), "No runtime available, dropping connection without logout");
        }
    }
}

/// Exclusive lease on one [`PoolEntry`].
///
/// Returns the entry to the pool on [`release`](Self::release) or drop.
pub struct PooledSession<D: Driver> {
    pool: Arc<ConnectionPool<D>>,
    entry: Option<PoolEntry<D>>,
    // Dropped after `entry` is checked in, so a waiter woken by the permit
    // finds the entry idle.
    _permit: OwnedSemaphorePermit,
}

impl<D: Driver> std::fmt::Debug for PooledSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> PooledSession<D> {
    fn new(pool: Arc<ConnectionPool<D>>, entry: PoolEntry<D>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            pool,
            entry: Some(entry),
            _permit: permit,
        }
    }

    fn entry(&self) -> DbResult<&PoolEntry<D>> {
        self.entry
            .as_ref()
            .ok_or_else(|| DbError::internal("lease already released"))
    }

    fn entry_mut(&mut self) -> DbResult<&mut PoolEntry<D>> {
        self.entry
            .as_mut()
            .ok_or_else(|| DbError::internal("lease already released"))
    }

    /// Id of the leased connection.
    pub fn id(&self) -> ConnectionId {
        self.entry
            .as_ref()
            .map(PoolEntry::id)
            .unwrap_or(ConnectionId(0))
    }

    /// Copy of the leased entry's session context.
    pub fn snapshot(&self) -> SessionSnapshot {
        match self.entry() {
            Ok(entry) => SessionSnapshot {
                connection_id: Some(entry.id().0),
                ..entry.session.snapshot()
            },
            Err(_) => SessionState::default().snapshot(),
        }
    }

    pub fn session(&self) -> DbResult<&SessionState> {
        self.entry().map(|entry| &entry.session)
    }

    pub fn session_mut(&mut self) -> DbResult<&mut SessionState> {
        self.entry_mut().map(|entry| &mut entry.session)
    }

    /// Run one statement on the leased connection.
    ///
    /// An expired session is reconnected, its context restored, and the
    /// statement re-run once. Refuses with `PoolClosed` after shutdown.
    pub async fn run(&mut self, sql: &str) -> DbResult<RowSet> {
        let entry = self.open_entry()?;

        match entry.connection.execute(sql).await {
            Err(DbError::SessionExpired { message }) => {
                warn!(connection_id = %entry.id(), reason = %message, "Session expired, reconnecting");
                if let Err(err) = entry.reconnect_and_restore().await {
                    return Err(DbError::connection_unavailable(
                        format!("reconnect after session expiry failed: {}", err),
                        "Check credentials and network, then retry",
                    ));
                }
                entry.connection.execute(sql).await
            }
            other => other,
        }
    }

    /// Run one statement without session recovery.
    ///
    /// Statements inside an open transaction must use this: a reconnect would
    /// silently drop the transaction, so `SessionExpired` is returned as is.
    pub async fn run_once(&mut self, sql: &str) -> DbResult<RowSet> {
        self.open_entry()?.connection.execute(sql).await
    }

    fn open_entry(&mut self) -> DbResult<&mut PoolEntry<D>> {
        if self.pool.is_closed() {
            return Err(DbError::PoolClosed);
        }
        self.entry_mut()
    }

    /// Flag the connection for re-probing (acquire) or eviction (sweep),
    /// e.g. after a round-trip was abandoned on timeout.
    pub fn mark_unhealthy(&mut self) {
        if let Some(entry) = self.entry.as_mut() {
            entry.unhealthy = true;
        }
    }

    /// Return the entry to the pool.
    pub fn release(mut self) {
        self.check_in();
    }

    fn check_in(&mut self) {
        if let Some(entry) = self.entry.take() {
            let id = entry.id();
            if let Some(stale) = self.pool.check_in(entry) {
                debug!(connection_id = %id, "Closing returned connection");
                close_detached(stale);
            }
        }
    }
}

impl<D: Driver> Drop for PooledSession<D> {
    fn drop(&mut self) {
        self.check_in();
    }
}
