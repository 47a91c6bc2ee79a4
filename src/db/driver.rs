//! Engine driver abstraction.
//!
//! A [`Driver`] opens authenticated sessions against the remote engine, and a
//! [`DriverSession`] runs one statement at a time on such a session. The pool
//! and executor only ever talk to these traits, so tests can substitute a
//! scripted in-process driver for the Snowflake one.

use crate::error::DbResult;
use crate::models::RowSet;
use std::future::Future;

/// Factory for authenticated engine sessions.
pub trait Driver: Send + Sync + 'static {
    /// Session type produced by this driver.
    type Session: DriverSession;

    /// Open a new session using the driver's credentials and session defaults.
    ///
    /// Fails with `Authentication`, `Network` or `Configuration`.
    fn connect(&self) -> impl Future<Output = DbResult<Self::Session>> + Send;

    /// Short driver name for logging.
    fn name(&self) -> &'static str;
}

/// One open session on the remote engine.
pub trait DriverSession: Send + 'static {
    /// Run a single statement and return its rows.
    ///
    /// Remote rejections surface as `Engine`, expired sessions as
    /// `SessionExpired`.
    fn execute(&mut self, sql: &str) -> impl Future<Output = DbResult<RowSet>> + Send;

    /// Best-effort logout. Must not fail.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
