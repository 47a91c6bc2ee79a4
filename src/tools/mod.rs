//! Request handling.
//!
//! - `query`: the query/session/health/shutdown service used by both transports
//! - `sql_validator`: statement classification and policy enforcement

pub mod query;
pub mod sql_validator;

pub use query::{HealthReport, HealthStatus, QueryToolHandler, ShutdownAck};
pub use sql_validator::{ClassPolicy, Classification, StatementClass};
