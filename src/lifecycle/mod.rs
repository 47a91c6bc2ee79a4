//! Background lifecycle tasks.
//!
//! - [`HealthMonitor`]: periodic health sweeps of idle pool entries
//! - [`IdleShutdownManager`]: shuts the daemon down after a period without requests

pub mod health;
pub mod idle;

pub use health::HealthMonitor;
pub use idle::{ActivityClock, IdleOutcome, IdleShutdownManager};
