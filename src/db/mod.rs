//! Database access layer.
//!
//! This module provides:
//! - The driver seam to the remote engine and the Snowflake driver
//! - Connections with reconnect/backoff and liveness probes
//! - The connection pool and its lease guard
//! - Query execution and error hints

pub mod connection;
pub mod driver;
pub mod executor;
pub mod hints;
pub mod pool;
pub mod snowflake;

pub use connection::{Connection, ConnectionId, ReconnectPolicy};
pub use driver::{Driver, DriverSession};
pub use executor::QueryExecutor;
pub use pool::{ConnectionPool, PoolConfig, PoolStatus, PooledSession, SweepReport};
pub use snowflake::{SnowflakeCredentials, SnowflakeDriver};
