//! Scripted in-process driver shared by the integration tests.
//!
//! Every statement is recorded together with the number of the session that
//! ran it. Connect outcomes, statement failures and delays are scripted up
//! front through [`Script`].

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::json;
use snowflake_daemon::db::{
    ConnectionPool, Driver, DriverSession, PoolConfig, ReconnectPolicy,
};
use snowflake_daemon::error::{DbError, DbResult};
use snowflake_daemon::models::{ColumnMetadata, RowSet, SessionState};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// A statement failure that fires for statements containing `pattern`.
struct Failure {
    pattern: String,
    error: DbError,
    remaining: usize,
}

#[derive(Default)]
struct ScriptState {
    connect_attempts: usize,
    sessions_opened: u64,
    sessions_closed: usize,
    connect_failures: VecDeque<DbError>,
    failures: Vec<Failure>,
    delays: Vec<(String, Duration)>,
    probes_fail: bool,
    statements: Vec<(u64, String)>,
}

/// Shared handle to the script. Clone it before handing the driver to a pool.
#[derive(Clone, Default)]
pub struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver(&self) -> ScriptedDriver {
        ScriptedDriver {
            script: self.clone(),
        }
    }

    /// Fail the next `count` connect attempts with `error`.
    pub fn fail_connects(&self, count: usize, error: DbError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.connect_failures.push_back(error.clone());
        }
    }

    /// Fail the next `times` statements containing `pattern`.
    pub fn fail_statement(&self, pattern: &str, error: DbError, times: usize) {
        self.state.lock().failures.push(Failure {
            pattern: pattern.to_string(),
            error,
            remaining: times,
        });
    }

    /// Sleep before answering statements containing `pattern`.
    pub fn delay_statement(&self, pattern: &str, delay: Duration) {
        self.state
            .lock()
            .delays
            .push((pattern.to_string(), delay));
    }

    /// Make every liveness probe (`SELECT 1`) fail from now on.
    pub fn fail_probes(&self, fail: bool) {
        self.state.lock().probes_fail = fail;
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    pub fn sessions_opened(&self) -> u64 {
        self.state.lock().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.lock().sessions_closed
    }

    /// Every statement sent, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state
            .lock()
            .statements
            .iter()
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    /// Statements sent, excluding liveness probes.
    pub fn user_statements(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|sql| sql != "SELECT 1")
            .collect()
    }

    /// Statements run on the given session number (1-based, in open order).
    pub fn statements_on(&self, session: u64) -> Vec<String> {
        self.state
            .lock()
            .statements
            .iter()
            .filter(|(n, _)| *n == session)
            .map(|(_, sql)| sql.clone())
            .collect()
    }
}

pub struct ScriptedDriver {
    script: Script,
}

pub struct ScriptedSession {
    number: u64,
    script: Script,
}

impl Driver for ScriptedDriver {
    type Session = ScriptedSession;

    async fn connect(&self) -> DbResult<ScriptedSession> {
        let number = {
            let mut state = self.script.state.lock();
            state.connect_attempts += 1;
            if let Some(err) = state.connect_failures.pop_front() {
                return Err(err);
            }
            state.sessions_opened += 1;
            state.sessions_opened
        };
        Ok(ScriptedSession {
            number,
            script: self.script.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

impl DriverSession for ScriptedSession {
    async fn execute(&mut self, sql: &str) -> DbResult<RowSet> {
        let (delay, outcome) = {
            let mut state = self.script.state.lock();
            state.statements.push((self.number, sql.to_string()));

            let delay = state
                .delays
                .iter()
                .find(|(pattern, _)| sql.contains(pattern.as_str()))
                .map(|(_, delay)| *delay);

            let outcome = if sql == "SELECT 1" && state.probes_fail {
                Err(DbError::network("probe refused"))
            } else if let Some(failure) = state
                .failures
                .iter_mut()
                .find(|f| f.remaining > 0 && sql.contains(f.pattern.as_str()))
            {
                failure.remaining -= 1;
                Err(failure.error.clone())
            } else {
                Ok(RowSet::new(
                    vec![ColumnMetadata::new("VALUE", "fixed", false)],
                    vec![vec![json!(1)]],
                ))
            };
            (delay, outcome)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    async fn close(&mut self) {
        self.script.state.lock().sessions_closed += 1;
    }
}

/// Pool settings for tests: no backoff surprises, short acquire timeout.
pub fn test_config(max_size: usize) -> PoolConfig {
    PoolConfig {
        max_size,
        acquire_timeout: Duration::from_secs(2),
        probe_freshness: Duration::from_secs(300),
        reconnect: ReconnectPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        },
        session_defaults: SessionState::default(),
    }
}

pub fn scripted_pool(script: &Script, config: PoolConfig) -> Arc<ConnectionPool<ScriptedDriver>> {
    ConnectionPool::new(script.driver(), config)
}
