//! Data models for the Snowflake daemon.
//!
//! This module re-exports all model types used throughout the application.

pub mod query;
pub mod session;

// Re-export commonly used types
pub use query::{
    ColumnMetadata, DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_ROW_LIMIT, MAX_QUERY_TIMEOUT_SECS, MAX_ROW_LIMIT, QueryRequest,
    QueryResult, RowSet,
};
pub use session::{ContextChange, ContextDimension, SessionSnapshot, SessionState};
