//! Request-facing query service shared by both transports.
//!
//! The handler records activity, leases a pool entry, runs the executor and
//! returns the lease. Pool failures (exhaustion, shutdown, login failures)
//! are folded into failed [`QueryResult`]s so callers always get a value back.

use crate::db::{ConnectionPool, Driver, PoolStatus, QueryExecutor};
use crate::error::DbResult;
use crate::lifecycle::ActivityClock;
use crate::models::{QueryRequest, QueryResult, SessionSnapshot};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Overall daemon health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// At least one live Snowflake session
    Healthy,
    /// Running, but no session has been opened yet (or all were evicted)
    Degraded,
    /// Shutdown requested or in progress
    ShuttingDown,
}

/// Output of the health operation.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
    /// Live pooled sessions
    pub connection_count: usize,
    /// Query requests currently executing
    pub active_queries: usize,
    /// Seconds since the last request
    pub idle_seconds: u64,
    pub pool: PoolStatus,
}

/// Output of the shutdown operation.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ShutdownAck {
    pub status: HealthStatus,
    pub message: String,
}

/// Decrements the in-flight counter on every exit path.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handler for query, session, health and shutdown operations.
pub struct QueryToolHandler<D: Driver> {
    pool: Arc<ConnectionPool<D>>,
    executor: QueryExecutor,
    clock: ActivityClock,
    shutdown: CancellationToken,
    started: Instant,
    active_queries: AtomicUsize,
}

impl<D: Driver> std::fmt::Debug for QueryToolHandler<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryToolHandler")
            .field("pool", &self.pool)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> QueryToolHandler<D> {
    pub fn new(
        pool: Arc<ConnectionPool<D>>,
        executor: QueryExecutor,
        clock: ActivityClock,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pool,
            executor,
            clock,
            shutdown,
            started: Instant::now(),
            active_queries: AtomicUsize::new(0),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<D>> {
        &self.pool
    }

    pub fn clock(&self) -> &ActivityClock {
        &self.clock
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Execute a query on a leased session. Arrival and completion both
    /// count as activity.
    pub async fn query(&self, request: QueryRequest) -> QueryResult {
        self.clock.touch();
        let _in_flight = InFlight::enter(&self.active_queries);
        let start = Instant::now();

        let mut session = match self.pool.acquire().await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "Could not lease a connection");
                return QueryResult::from_error(&err, start.elapsed().as_millis() as u64);
            }
        };

        let result = self.executor.execute(&request, &mut session).await;
        info!(
            connection_id = %session.id(),
            success = result.success,
            rows = result.row_count(),
            execution_time_ms = result.execution_time_ms,
            "Query executed"
        );
        session.release();
        self.clock.touch();
        result
    }

    /// Snapshot the session context of a leased entry.
    pub async fn session(&self) -> DbResult<SessionSnapshot> {
        self.clock.touch();
        let session = self.pool.acquire().await?;
        let snapshot = session.snapshot();
        session.release();
        Ok(snapshot)
    }

    /// Report daemon health. Does not count as activity.
    pub fn health(&self) -> HealthReport {
        let pool = self.pool.status();
        let status = if pool.closed || self.shutdown.is_cancelled() {
            HealthStatus::ShuttingDown
        } else if pool.size == 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            uptime_seconds: self.started.elapsed().as_secs(),
            connection_count: pool.size,
            active_queries: self.active_queries.load(Ordering::SeqCst),
            idle_seconds: self.clock.idle_for().as_secs(),
            pool,
        }
    }

    /// Request an orderly shutdown of the daemon.
    pub fn shutdown(&self) -> ShutdownAck {
        info!("Shutdown requested");
        self.shutdown.cancel();
        ShutdownAck {
            status: HealthStatus::ShuttingDown,
            message: "Daemon is shutting down".to_string(),
        }
    }
}
