//! Query execution engine.
//!
//! The executor runs one [`QueryRequest`] against one leased pool entry:
//! validate → inject a row limit → execute (optionally inside a transaction)
//! → track context changes → shape the [`QueryResult`]. It never returns an
//! error to its caller; every failure becomes a result with `success: false`.

use crate::db::driver::Driver;
use crate::db::hints;
use crate::db::pool::PooledSession;
use crate::error::{DbError, DbResult, FailureKind};
use crate::models::{
    DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT, QueryRequest, QueryResult,
    RowSet,
};
use crate::tools::sql_validator::{ClassPolicy, validate};
use std::time::Duration;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

/// Query executor bound to a statement policy.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    policy: ClassPolicy,
    default_timeout: Duration,
    default_limit: u32,
}

impl QueryExecutor {
    /// Create a new query executor with default settings.
    pub fn new(policy: ClassPolicy) -> Self {
        Self {
            policy,
            default_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            default_limit: DEFAULT_ROW_LIMIT,
        }
    }

    /// Create a new query executor with custom settings.
    pub fn with_defaults(policy: ClassPolicy, timeout_secs: u64, row_limit: u32) -> Self {
        Self {
            policy,
            default_timeout: Duration::from_secs(timeout_secs.max(1)),
            default_limit: row_limit.clamp(1, MAX_ROW_LIMIT),
        }
    }

    pub fn policy(&self) -> &ClassPolicy {
        &self.policy
    }

    /// Execute a request on a leased entry.
    pub async fn execute<D: Driver>(
        &self,
        request: &QueryRequest,
        session: &mut PooledSession<D>,
    ) -> QueryResult {
        let start = Instant::now();
        let outcome = self.run(request, session).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(rowset) => {
                debug!(
                    connection_id = %session.id(),
                    rows = rowset.rows.len(),
                    elapsed_ms = elapsed_ms,
                    "Query succeeded"
                );
                QueryResult::success(rowset, elapsed_ms)
            }
            Err(err) => {
                match err.kind() {
                    FailureKind::ValidationRejected | FailureKind::InvalidInput => {
                        debug!(sql = %request.sql, error = %err, "Query rejected")
                    }
                    _ => warn!(
                        connection_id = %session.id(),
                        sql = %request.sql,
                        error = %err,
                        "Query failed"
                    ),
                }
                QueryResult::failure(
                    err.kind(),
                    hints::describe_failure(&err, &request.sql),
                    elapsed_ms,
                )
            }
        }
    }

    async fn run<D: Driver>(
        &self,
        request: &QueryRequest,
        session: &mut PooledSession<D>,
    ) -> DbResult<RowSet> {
        let classification = validate(&request.sql, &self.policy)?;
        let query_timeout =
            Duration::from_secs(request.effective_timeout(self.default_timeout.as_secs()));

        let limit = request
            .effective_limit(self.default_limit)
            .filter(|_| classification.needs_limit());
        let sql = match limit {
            Some(limit) => inject_limit(&classification.body, limit),
            None => request.sql.clone(),
        };

        debug!(
            connection_id = %session.id(),
            keyword = %classification.keyword,
            sql = %sql,
            timeout_secs = query_timeout.as_secs(),
            "Executing query"
        );

        let rowset = if request.transaction && classification.class.is_write() {
            run_in_transaction(session, &sql, query_timeout).await?
        } else {
            round_trip(session, &sql, query_timeout).await?
        };

        if let Some(change) = &classification.context {
            session.session_mut()?.apply(change);
            info!(
                connection_id = %session.id(),
                dimension = %change.dimension,
                name = %change.name,
                "Session context updated"
            );
        }

        Ok(rowset)
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new(ClassPolicy::read_only())
    }
}

/// Append a row limit to a statement body that has no terminator.
pub fn inject_limit(body: &str, limit: u32) -> String {
    format!("{} LIMIT {}", body, limit)
}

/// Upper bound for the ROLLBACK issued after a failed transaction.
const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// One bounded round-trip. On timeout the lease is flagged unhealthy.
async fn round_trip<D: Driver>(
    session: &mut PooledSession<D>,
    sql: &str,
    limit: Duration,
) -> DbResult<RowSet> {
    let outcome = timeout(limit, session.run(sql)).await;
    match outcome {
        Ok(result) => result,
        Err(_) => Err(abandoned(session, "query execution", limit)),
    }
}

fn abandoned<D: Driver>(session: &mut PooledSession<D>, operation: &str, limit: Duration) -> DbError {
    session.mark_unhealthy();
    warn!(
        connection_id = %session.id(),
        timeout_secs = limit.as_secs(),
        "Statement timed out, connection marked unhealthy"
    );
    DbError::timeout(operation, limit.as_secs())
}

/// BEGIN, run, COMMIT under one deadline. Any failure after BEGIN issues
/// ROLLBACK and returns the original error.
///
/// None of these statements recover an expired session: the transaction
/// died with it, so expiry is reported as a failure.
async fn run_in_transaction<D: Driver>(
    session: &mut PooledSession<D>,
    sql: &str,
    limit: Duration,
) -> DbResult<RowSet> {
    let deadline = Instant::now() + limit;

    let begin = timeout_at(deadline, session.run_once("BEGIN")).await;
    match begin {
        Ok(result) => result?,
        Err(_) => return Err(abandoned(session, "transaction", limit)),
    };

    let body = timeout_at(deadline, commit_after(session, sql)).await;
    let outcome = match body {
        Ok(result) => result,
        Err(_) => Err(abandoned(session, "transaction", limit)),
    };

    if let Err(err) = &outcome {
        let rollback = timeout(ROLLBACK_TIMEOUT.min(limit), session.run_once("ROLLBACK")).await;
        match rollback {
            Ok(Ok(_)) => debug!(connection_id = %session.id(), "Transaction rolled back"),
            Ok(Err(rollback_err)) => warn!(
                connection_id = %session.id(),
                error = %rollback_err,
                original_error = %err,
                "Rollback failed"
            ),
            Err(_) => {
                session.mark_unhealthy();
                warn!(connection_id = %session.id(), original_error = %err, "Rollback timed out");
            }
        }
    }
    outcome
}

async fn commit_after<D: Driver>(session: &mut PooledSession<D>, sql: &str) -> DbResult<RowSet> {
    let rowset = session.run_once(sql).await?;
    session.run_once("COMMIT").await?;
    Ok(rowset)
}
