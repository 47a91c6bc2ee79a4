//! Snowflake Daemon Library
//!
//! Keeps authenticated Snowflake sessions alive in a pool and serves queries
//! against them over a local HTTP API or MCP stdio, with a read-only guard,
//! automatic row limits and session context that survives reconnects.

pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::DbError;
pub use mcp::DaemonService;
