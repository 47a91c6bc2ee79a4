//! Hints for common Snowflake error messages.
//!
//! Engine errors are matched against a table of known patterns; a match adds a
//! short hint and a few concrete next steps to the message returned to the
//! caller. Short statements are echoed back for context.

use crate::error::DbError;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

/// Statements shorter than this are echoed back under the hint.
const MAX_ECHOED_SQL_LEN: usize = 200;

struct ErrorPattern {
    regex: Regex,
    /// `{match}` is replaced by the first capture group.
    hint: &'static str,
    suggestions: &'static [&'static str],
}

fn pattern(
    regex: &str,
    hint: &'static str,
    suggestions: &'static [&'static str],
) -> ErrorPattern {
    ErrorPattern {
        regex: RegexBuilder::new(regex)
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .expect("error hint pattern must compile"),
        hint,
        suggestions,
    }
}

static PATTERNS: Lazy<Vec<ErrorPattern>> = Lazy::new(|| {
    vec![
        pattern(
            r"SQL compilation error.*Object '([^']+)' does not exist",
            "Object '{match}' does not exist or is not visible to the current role.",
            &[
                "Run SHOW TABLES or SHOW VIEWS to see available objects",
                "Use fully qualified names: database.schema.table",
                "Check the session context with the session tool",
            ],
        ),
        pattern(
            r"SQL compilation error.*No active warehouse selected",
            "No warehouse is selected for query execution.",
            &[
                "Set a warehouse: USE WAREHOUSE your_warehouse",
                "Check available warehouses: SHOW WAREHOUSES",
            ],
        ),
        pattern(
            r"SQL compilation error.*No database selected",
            "No database is selected.",
            &[
                "Set a database: USE DATABASE your_database",
                "Use fully qualified names: database.schema.table",
                "Check available databases: SHOW DATABASES",
            ],
        ),
        pattern(
            r"SQL compilation error.*No schema selected",
            "No schema is selected.",
            &[
                "Set a schema: USE SCHEMA your_schema",
                "Use qualified names: schema.table",
                "Check available schemas: SHOW SCHEMAS",
            ],
        ),
        pattern(
            r"invalid identifier '([^']+)'",
            "Column {match} does not exist in the referenced tables.",
            &[
                "Run DESCRIBE TABLE table_name to see available columns",
                "Unquoted identifiers are stored uppercase; quoted ones are case-sensitive",
            ],
        ),
        pattern(
            r"syntax error line (\d+) at position (\d+)",
            "SQL syntax error on line {match}.",
            &[
                "Check for missing commas, parentheses, or keywords",
                "Make sure quotes and brackets are balanced",
            ],
        ),
        pattern(
            r"SQL access control error.*Insufficient privileges",
            "The current role lacks privileges for this operation.",
            &[
                "Check grants: SHOW GRANTS TO ROLE your_role",
                "Switch to a role with more privileges: USE ROLE role_name",
            ],
        ),
        pattern(
            r"Numeric value '([^']+)' is not recognized",
            "Cannot convert '{match}' to a numeric type.",
            &[
                "Use explicit casting: TRY_CAST(column AS NUMBER)",
                "Verify the input data format matches the column type",
            ],
        ),
        pattern(
            r"Duplicate key value violates unique constraint",
            "A row with the same unique key already exists.",
            &["Use MERGE instead of INSERT if the row might exist"],
        ),
        pattern(
            r"(Session .* has expired|Authentication token has expired)",
            "The Snowflake session expired and could not be renewed.",
            &["Run the query again", "Restart the daemon if this persists"],
        ),
        pattern(
            r"SQL execution error.*Operation not allowed",
            "This operation is not allowed in the current context.",
            &["Check that the operation is supported for this object type"],
        ),
    ]
});

/// Fallback hint for messages no pattern recognises.
fn generic_hint(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    if lower.contains("does not exist") {
        Some("The referenced object does not exist. Try SHOW TABLES, SHOW SCHEMAS, or SHOW DATABASES.")
    } else if lower.contains("syntax") && lower.contains("error") {
        Some("There is a syntax error in the statement. Check for typos or missing commas.")
    } else if lower.contains("permission") || lower.contains("privileges") {
        Some("Permission denied. Try a different role: USE ROLE role_name")
    } else {
        None
    }
}

/// Annotate an error message with a hint when it matches a known pattern.
pub fn enhance_message(message: &str, sql: Option<&str>) -> String {
    let message = message.trim();
    let mut parts = vec![message.to_string()];

    let matched = PATTERNS
        .iter()
        .find_map(|p| p.regex.captures(message).map(|caps| (p, caps)));

    match matched {
        Some((pattern, caps)) => {
            let hint = match caps.get(1) {
                Some(group) => pattern.hint.replace("{match}", group.as_str()),
                None => pattern.hint.to_string(),
            };
            parts.push(format!("Hint: {}", hint));
            if !pattern.suggestions.is_empty() {
                parts.push("Suggestions:".to_string());
                for (i, suggestion) in pattern.suggestions.iter().enumerate() {
                    parts.push(format!("  {}. {}", i + 1, suggestion));
                }
            }
        }
        None => {
            if let Some(hint) = generic_hint(message) {
                parts.push(format!("Hint: {}", hint));
            }
        }
    }

    if let Some(sql) = sql.filter(|s| s.len() < MAX_ECHOED_SQL_LEN) {
        parts.push(format!("Query: {}", sql));
    }
    parts.join("\n")
}

/// Error text for a failed query result.
///
/// Only engine-side failures are annotated; everything else keeps its
/// plain display text.
pub fn describe_failure(err: &DbError, sql: &str) -> String {
    match err {
        DbError::Engine { .. } | DbError::SessionExpired { .. } => {
            enhance_message(&err.to_string(), Some(sql))
        }
        other => other.to_string(),
    }
}
