//! Query-related data models.
//!
//! This module defines types for SQL query requests and results.

use crate::error::{DbError, FailureKind};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default row limit injected into unbounded SELECT queries.
pub const DEFAULT_ROW_LIMIT: u32 = 100;

/// Maximum allowed row limit.
pub const MAX_ROW_LIMIT: u32 = 10000;

/// Default query timeout in seconds. Generous enough for a suspended warehouse to resume.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 300;

/// Maximum query timeout in seconds.
pub const MAX_QUERY_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryRequest {
    /// SQL statement to execute. Exactly one statement per request.
    pub sql: String,
    /// Row limit appended to SELECT/WITH queries without LIMIT. Default: 100, max: 10000.
    /// 0 sends the statement without an injected limit.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Wrap a write statement in BEGIN/COMMIT, rolling back on failure. Default: false
    #[serde(default)]
    pub transaction: bool,
    /// Timeout in seconds. Default: daemon query timeout, max: 3600.
    /// A transactional write spends it on BEGIN, the statement and COMMIT together.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl QueryRequest {
    /// Create a new query request with default options.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            limit: None,
            transaction: false,
            timeout_secs: None,
        }
    }

    /// Set the row limit.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Request a transaction wrapper.
    pub fn with_transaction(mut self) -> Self {
        self.transaction = true;
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// Row limit to inject, clamped to the maximum. `None` when the caller
    /// asked for no limit with `limit: 0`.
    pub fn effective_limit(&self, default: u32) -> Option<u32> {
        match self.limit {
            Some(0) => None,
            Some(limit) => Some(limit.min(MAX_ROW_LIMIT)),
            None => Some(default.clamp(1, MAX_ROW_LIMIT)),
        }
    }

    /// Get the effective timeout in seconds (with bounds checking).
    pub fn effective_timeout(&self, default: u64) -> u64 {
        self.timeout_secs
            .unwrap_or(default)
            .clamp(1, MAX_QUERY_TIMEOUT_SECS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnMetadata {
    pub name: String,
    /// Snowflake type (e.g., "fixed", "text", "timestamp_ntz")
    pub type_name: String,
    pub nullable: bool,
}

impl ColumnMetadata {
    /// Create new column metadata.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

/// Rows and columns returned by one engine round-trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Vec<JsonValue>>,
    /// Rows beyond `rows` exist on the engine side but were not fetched.
    pub truncated: bool,
    /// Engine-reported total row count, when it differs from what was read.
    pub total_rows: Option<u64>,
}

impl RowSet {
    pub fn new(columns: Vec<ColumnMetadata>, rows: Vec<Vec<JsonValue>>) -> Self {
        Self {
            columns,
            rows,
            truncated: false,
            total_rows: None,
        }
    }

    /// Mark the row set as a prefix of a larger result.
    pub fn truncated(mut self, total_rows: Option<u64>) -> Self {
        self.truncated = true;
        self.total_rows = total_rows;
        self
    }
}

/// Outcome of one query request.
///
/// Either `rows` and `columns` are populated (success) or `error` is (failure),
/// never both. Construct through [`QueryResult::success`] and
/// [`QueryResult::failure`] to keep it that way.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<JsonValue>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<ColumnMetadata>>,
    /// Rows returned in this result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    /// Set when only the first part of the result was returned
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    /// Total rows reported by Snowflake for a truncated result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create a successful result from an engine row set.
    pub fn success(rowset: RowSet, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            row_count: Some(rowset.rows.len()),
            truncated: rowset.truncated,
            total_rows: rowset.total_rows,
            rows: Some(rowset.rows),
            columns: Some(rowset.columns),
            error: None,
            error_kind: None,
            execution_time_ms,
        }
    }

    /// Create a failed result with an already formatted message.
    pub fn failure(kind: FailureKind, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            rows: None,
            columns: None,
            row_count: None,
            truncated: false,
            total_rows: None,
            error: Some(error.into()),
            error_kind: Some(kind),
            execution_time_ms,
        }
    }

    /// Create a failed result straight from an error.
    pub fn from_error(err: &DbError, execution_time_ms: u64) -> Self {
        Self::failure(err.kind(), err.to_string(), execution_time_ms)
    }

    /// Get the number of rows in the result.
    pub fn row_count(&self) -> usize {
        self.row_count.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_request_defaults() {
        let req = QueryRequest::new("SELECT * FROM users");
        assert_eq!(req.effective_limit(DEFAULT_ROW_LIMIT), Some(DEFAULT_ROW_LIMIT));
        assert_eq!(req.effective_timeout(30), 30);
        assert!(!req.transaction);
    }

    #[test]
    fn test_query_request_bounds() {
        let req = QueryRequest::new("SELECT * FROM users")
            .with_limit(99999)
            .with_timeout(99999);

        assert_eq!(req.effective_limit(DEFAULT_ROW_LIMIT), Some(MAX_ROW_LIMIT));
        assert_eq!(req.effective_timeout(30), MAX_QUERY_TIMEOUT_SECS);
    }

    #[test]
    fn test_zero_limit_disables_injection() {
        let req = QueryRequest::new("SELECT * FROM users").with_limit(0);
        assert_eq!(req.effective_limit(DEFAULT_ROW_LIMIT), None);
        assert_eq!(QueryRequest::new("x").with_limit(1).effective_limit(100), Some(1));
    }

    #[test]
    fn test_query_request_deserializes_with_defaults() {
        let req: QueryRequest = serde_json::from_value(json!({ "sql": "SHOW TABLES" })).unwrap();
        assert_eq!(req.sql, "SHOW TABLES");
        assert!(req.limit.is_none());
        assert!(!req.transaction);
    }

    #[test]
    fn test_success_result_populates_rows_not_error() {
        let rowset = RowSet::new(
            vec![ColumnMetadata::new("N", "fixed", false)],
            vec![vec![json!(1)], vec![json!(2)]],
        );
        let result = QueryResult::success(rowset, 12);
        assert!(result.success);
        assert_eq!(result.row_count(), 2);
        assert!(result.columns.is_some());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_truncated_result_reports_total() {
        let rowset = RowSet::new(vec![ColumnMetadata::new("N", "fixed", false)], vec![vec![json!(1)]])
            .truncated(Some(250_000));
        let json = serde_json::to_value(QueryResult::success(rowset, 3)).unwrap();
        assert_eq!(json["row_count"], 1);
        assert_eq!(json["truncated"], true);
        assert_eq!(json["total_rows"], 250_000);

        let complete = QueryResult::success(RowSet::default(), 1);
        let json = serde_json::to_value(&complete).unwrap();
        assert!(json.get("truncated").is_none());
        assert!(json.get("total_rows").is_none());
    }

    #[test]
    fn test_failure_result_populates_error_not_rows() {
        let result = QueryResult::from_error(&DbError::timeout("query", 5), 5000);
        assert!(!result.success);
        assert!(result.rows.is_none());
        assert!(result.columns.is_none());
        assert_eq!(result.error_kind, Some(FailureKind::Timeout));

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("rows").is_none());
        assert_eq!(json["error_kind"], "timeout");
    }
}
