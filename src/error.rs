//! Error types for the Snowflake daemon.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each error variant provides actionable messages so callers (and the AI assistants
//! driving them) can understand and recover from error conditions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Query rejected: {keyword} - {reason}")]
    ValidationRejected { keyword: String, reason: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Connection unavailable: {message}")]
    ConnectionUnavailable { message: String, suggestion: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Session expired: {message}")]
    SessionExpired { message: String },

    #[error("{message}")]
    Engine {
        message: String,
        /// Snowflake error code, e.g. "002003" for a missing object
        code: Option<String>,
        /// e.g. "42S02" for undefined table
        sql_state: Option<String>,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Failure class reported alongside a failed query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ValidationRejected,
    InvalidInput,
    ConnectionUnavailable,
    Authentication,
    Network,
    Engine,
    Timeout,
    PoolClosed,
    Internal,
}

impl DbError {
    /// Create a validation rejection for the offending keyword.
    pub fn validation_rejected(keyword: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationRejected {
            keyword: keyword.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a connection unavailable error with a helpful suggestion.
    pub fn connection_unavailable(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::ConnectionUnavailable {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a session expired error.
    pub fn session_expired(message: impl Into<String>) -> Self {
        Self::SessionExpired {
            message: message.into(),
        }
    }

    /// Create an engine error with optional Snowflake code and SQL state.
    pub fn engine(
        message: impl Into<String>,
        code: Option<String>,
        sql_state: Option<String>,
    ) -> Self {
        Self::Engine {
            message: message.into(),
            code,
            sql_state,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectionUnavailable { suggestion, .. } => Some(suggestion),
            Self::Authentication { .. } => {
                Some("Verify SNOWFLAKE_USER and SNOWFLAKE_PASSWORD for the configured account")
            }
            Self::Network { .. } => Some("Check network connectivity and the account identifier"),
            Self::Timeout { .. } => {
                Some("Consider increasing timeout_secs or adding filters to the query")
            }
            Self::PoolClosed => Some("The daemon is shutting down; start it again to continue"),
            _ => None,
        }
    }

    /// Check if this error may succeed on a fresh authentication attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::Network { .. })
    }

    /// Failure class of this error as reported in query results.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ValidationRejected { .. } => FailureKind::ValidationRejected,
            Self::InvalidInput { .. } => FailureKind::InvalidInput,
            Self::ConnectionUnavailable { .. } => FailureKind::ConnectionUnavailable,
            Self::Authentication { .. } => FailureKind::Authentication,
            Self::Network { .. } | Self::SessionExpired { .. } => FailureKind::Network,
            Self::Engine { .. } => FailureKind::Engine,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::PoolClosed => FailureKind::PoolClosed,
            Self::Configuration { .. } | Self::Internal { .. } => FailureKind::Internal,
        }
    }
}

/// Convert reqwest errors to DbError.
impl From<reqwest::Error> for DbError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DbError::network(format!("Request timed out: {}", err))
        } else if err.is_connect() || err.is_request() {
            DbError::network(format!("Failed to reach Snowflake: {}", err))
        } else if err.is_decode() {
            DbError::internal(format!("Unexpected response from Snowflake: {}", err))
        } else if err.is_builder() {
            DbError::configuration(format!("Invalid request: {}", err))
        } else {
            DbError::network(err.to_string())
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Build suggestion data as JSON value.
fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

/// Convert DbError to MCP ErrorData for semantic error categorization.
/// Includes the suggestion field in the `data` object when available.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        match &err {
            DbError::ValidationRejected { .. } | DbError::InvalidInput { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), suggestion_data(err.suggestion()))
            }

            DbError::Engine {
                message, sql_state, ..
            } => {
                let msg = match sql_state {
                    Some(state) => format!("{} (SQLSTATE: {})", message, state),
                    None => message.clone(),
                };
                rmcp::ErrorData::invalid_params(msg, None)
            }

            _ => rmcp::ErrorData::internal_error(err.to_string(), suggestion_data(err.suggestion())),
        }
    }
}
