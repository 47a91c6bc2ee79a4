//! SQL statement classification and policy enforcement.
//!
//! Statements are classified by their first meaningful keyword. Text is run
//! through the [sqlparser](https://docs.rs/sqlparser/) Snowflake tokenizer
//! first, so keywords inside string literals and comments never count. This is
//! still a keyword heuristic, not a parse: anything the classifier does not
//! recognise is `Unknown` and no policy allows it.

use crate::error::{DbError, DbResult};
use crate::models::{ContextChange, ContextDimension};
use sqlparser::dialect::SnowflakeDialect;
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};

/// Write class of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementClass {
    /// SELECT, WITH, SHOW, DESCRIBE/DESC, EXPLAIN
    Read,
    /// INSERT, UPDATE, DELETE, MERGE
    WriteDml,
    /// CREATE, DROP, ALTER, TRUNCATE
    WriteDdl,
    /// USE
    Context,
    /// Anything else
    Unknown,
}

impl StatementClass {
    pub fn is_write(&self) -> bool {
        matches!(self, Self::WriteDml | Self::WriteDdl)
    }

    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "SELECT" | "WITH" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" => Self::Read,
            "INSERT" | "UPDATE" | "DELETE" | "MERGE" => Self::WriteDml,
            "CREATE" | "DROP" | "ALTER" | "TRUNCATE" => Self::WriteDdl,
            "USE" => Self::Context,
            _ => Self::Unknown,
        }
    }
}

/// Rejection reasons for each statement class.
mod error_messages {
    pub const READ_ONLY_DML: &str =
        "Write operations are disabled. Start the daemon with --allow-dml to permit INSERT/UPDATE/DELETE/MERGE.";
    pub const READ_ONLY_DDL: &str =
        "Schema changes are disabled. Start the daemon with --allow-ddl to permit CREATE/DROP/ALTER/TRUNCATE.";
    pub const CONTEXT: &str = "Context changes (USE) are disabled by the current policy.";
    pub const READ: &str = "Read statements are disabled by the current policy.";
    pub const UNKNOWN: &str =
        "Unrecognized statement. Allowed: SELECT, WITH, SHOW, DESCRIBE, EXPLAIN, USE (plus writes when enabled).";
    pub const MULTI_STATEMENT: &str =
        "Multiple statements in one request are not allowed. Send each statement separately.";
}

/// Set of statement classes a caller may run. `Unknown` is never allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassPolicy {
    pub read: bool,
    pub context: bool,
    pub dml: bool,
    pub ddl: bool,
}

impl Default for ClassPolicy {
    fn default() -> Self {
        Self::read_only()
    }
}

impl ClassPolicy {
    /// READ and CONTEXT only.
    pub fn read_only() -> Self {
        Self {
            read: true,
            context: true,
            dml: false,
            ddl: false,
        }
    }

    /// Every known class.
    pub fn read_write() -> Self {
        Self {
            read: true,
            context: true,
            dml: true,
            ddl: true,
        }
    }

    /// Read-only plus the requested write classes.
    pub fn with_writes(allow_dml: bool, allow_ddl: bool) -> Self {
        Self {
            dml: allow_dml,
            ddl: allow_ddl,
            ..Self::read_only()
        }
    }

    pub fn allows(&self, class: StatementClass) -> bool {
        match class {
            StatementClass::Read => self.read,
            StatementClass::Context => self.context,
            StatementClass::WriteDml => self.dml,
            StatementClass::WriteDdl => self.ddl,
            StatementClass::Unknown => false,
        }
    }
}

/// Result of classifying one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub class: StatementClass,
    /// First meaningful keyword, uppercased
    pub keyword: String,
    /// Whether a LIMIT keyword appears outside literals and comments
    pub has_limit: bool,
    /// Context change requested by a `USE` statement
    pub context: Option<ContextChange>,
    /// Statement text without trailing terminator, whitespace or comments
    pub body: String,
}

impl Classification {
    /// Whether the executor should append a row limit.
    pub fn needs_limit(&self) -> bool {
        matches!(self.keyword.as_str(), "SELECT" | "WITH") && !self.has_limit
    }
}

/// Classify a single statement.
///
/// Fails with `InvalidInput` for empty or untokenizable text and with
/// `ValidationRejected` for multi-statement batches.
pub fn classify(sql: &str) -> DbResult<Classification> {
    let tokens = Tokenizer::new(&SnowflakeDialect {}, sql)
        .tokenize_with_location()
        .map_err(|e| DbError::invalid_input(format!("Failed to tokenize SQL statement: {}", e)))?;

    let meaningful: Vec<&TokenWithSpan> = tokens
        .iter()
        .filter(|t| !matches!(t.token, Token::Whitespace(_) | Token::EOF))
        .collect();

    // Drop trailing terminators; anything meaningful after a `;` is a second statement.
    let mut end = meaningful.len();
    while end > 0 && meaningful[end - 1].token == Token::SemiColon {
        end -= 1;
    }
    let statement = &meaningful[..end];
    if statement.is_empty() {
        return Err(DbError::invalid_input("Empty SQL statement"));
    }
    if statement.iter().any(|t| t.token == Token::SemiColon) {
        return Err(DbError::validation_rejected(
            "MULTI-STATEMENT",
            error_messages::MULTI_STATEMENT,
        ));
    }

    let body_end = statement
        .last()
        .and_then(|t| byte_offset(sql, t.span.end))
        .unwrap_or(sql.len());
    let body = sql[..body_end].trim().to_string();

    let first = statement
        .iter()
        .position(|t| !matches!(t.token, Token::LParen));
    let Some(first) = first else {
        return Ok(Classification {
            class: StatementClass::Unknown,
            keyword: "(".to_string(),
            has_limit: false,
            context: None,
            body,
        });
    };

    let keyword = match &statement[first].token {
        Token::Word(word) => word.value.to_ascii_uppercase(),
        other => other.to_string(),
    };
    let class = StatementClass::from_keyword(&keyword);

    let has_limit = statement.iter().any(|t| {
        matches!(&t.token, Token::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case("LIMIT"))
    });

    let context = if class == StatementClass::Context {
        parse_use_target(sql, &tokens, statement[first], body_end)
    } else {
        None
    };

    Ok(Classification {
        class,
        keyword,
        has_limit,
        context,
        body,
    })
}

/// Classify a statement and check it against `policy`.
///
/// # Examples
///
/// ```
/// use snowflake_daemon::tools::sql_validator::{validate, ClassPolicy};
///
/// // SELECT is allowed by default
/// assert!(validate("SELECT * FROM orders", &ClassPolicy::read_only()).is_ok());
///
/// // INSERT is blocked
/// assert!(validate("INSERT INTO orders VALUES (1)", &ClassPolicy::read_only()).is_err());
/// ```
pub fn validate(sql: &str, policy: &ClassPolicy) -> DbResult<Classification> {
    let classification = classify(sql)?;
    if policy.allows(classification.class) {
        return Ok(classification);
    }

    let reason = match classification.class {
        StatementClass::Read => error_messages::READ,
        StatementClass::Context => error_messages::CONTEXT,
        StatementClass::WriteDml => error_messages::READ_ONLY_DML,
        StatementClass::WriteDdl => error_messages::READ_ONLY_DDL,
        StatementClass::Unknown => error_messages::UNKNOWN,
    };
    Err(DbError::validation_rejected(classification.keyword, reason))
}

/// Target of `USE [DATABASE|SCHEMA|WAREHOUSE|ROLE] <name>`. Bare `USE <name>`
/// means database. The name must be a single (possibly qualified) identifier.
fn parse_use_target(
    sql: &str,
    tokens: &[TokenWithSpan],
    use_token: &TokenWithSpan,
    body_end: usize,
) -> Option<ContextChange> {
    let start = tokens.iter().position(|t| std::ptr::eq(t, use_token))? + 1;
    let rest: Vec<&TokenWithSpan> = tokens[start..]
        .iter()
        .take_while(|t| byte_offset(sql, t.span.start).is_some_and(|offset| offset < body_end))
        .collect();

    let first_word = rest.iter().position(|t| !matches!(t.token, Token::Whitespace(_)))?;
    let (dimension, name_tokens) = match &rest[first_word].token {
        Token::Word(word) if word.quote_style.is_none() => {
            match ContextDimension::from_keyword(&word.value) {
                Some(dimension) => (dimension, &rest[first_word + 1..]),
                None => (ContextDimension::Database, &rest[first_word..]),
            }
        }
        _ => (ContextDimension::Database, &rest[first_word..]),
    };

    let name_start = name_tokens
        .iter()
        .position(|t| !matches!(t.token, Token::Whitespace(_)))?;
    let name_tokens = &name_tokens[name_start..];
    let is_identifier = name_tokens
        .iter()
        .all(|t| matches!(t.token, Token::Word(_) | Token::Period));
    if !is_identifier {
        return None;
    }

    let from = byte_offset(sql, name_tokens.first()?.span.start)?;
    let name = sql.get(from..body_end)?.trim();
    if name.is_empty() {
        return None;
    }
    Some(ContextChange {
        dimension,
        name: name.to_string(),
    })
}

/// Convert a 1-based tokenizer location to a byte offset into `sql`.
fn byte_offset(sql: &str, location: Location) -> Option<usize> {
    let (mut line, mut column) = (1u64, 1u64);
    for (idx, ch) in sql.char_indices() {
        if line == location.line && column == location.column {
            return Some(idx);
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line == location.line && column == location.column).then_some(sql.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_of(sql: &str) -> StatementClass {
        classify(sql).unwrap().class
    }

    #[test]
    fn test_read_statements() {
        assert_eq!(class_of("SELECT 1"), StatementClass::Read);
        assert_eq!(class_of("select * from t"), StatementClass::Read);
        assert_eq!(class_of("WITH x AS (SELECT 1) SELECT * FROM x"), StatementClass::Read);
        assert_eq!(class_of("SHOW TABLES"), StatementClass::Read);
        assert_eq!(class_of("DESCRIBE TABLE t"), StatementClass::Read);
        assert_eq!(class_of("desc table t"), StatementClass::Read);
        assert_eq!(class_of("EXPLAIN SELECT 1"), StatementClass::Read);
    }

    #[test]
    fn test_write_statements() {
        assert_eq!(class_of("INSERT INTO t VALUES (1)"), StatementClass::WriteDml);
        assert_eq!(class_of("update t set a = 1"), StatementClass::WriteDml);
        assert_eq!(class_of("DELETE FROM t"), StatementClass::WriteDml);
        assert_eq!(class_of("MERGE INTO t USING s ON t.id = s.id"), StatementClass::WriteDml);
        assert_eq!(class_of("CREATE TABLE t (a INT)"), StatementClass::WriteDdl);
        assert_eq!(class_of("DROP TABLE t"), StatementClass::WriteDdl);
        assert_eq!(class_of("ALTER TABLE t ADD COLUMN b INT"), StatementClass::WriteDdl);
        assert_eq!(class_of("TRUNCATE TABLE t"), StatementClass::WriteDdl);
    }

    #[test]
    fn test_unknown_statements() {
        assert_eq!(class_of("GRANT SELECT ON t TO ROLE r"), StatementClass::Unknown);
        assert_eq!(class_of("CALL my_proc()"), StatementClass::Unknown);
        assert_eq!(class_of("BEGIN"), StatementClass::Unknown);
    }

    #[test]
    fn test_skips_comments_and_parentheses() {
        assert_eq!(class_of("-- note\nSELECT 1"), StatementClass::Read);
        assert_eq!(class_of("/* DROP TABLE t */ SELECT 1"), StatementClass::Read);
        assert_eq!(class_of("  ((SELECT 1))"), StatementClass::Read);
        assert_eq!(class_of("/* hi */ DELETE FROM t"), StatementClass::WriteDml);
    }

    #[test]
    fn test_empty_statement_is_invalid_input() {
        for sql in ["", "   ", ";", "-- only a comment", " ; ; "] {
            let err = classify(sql).unwrap_err();
            assert!(matches!(err, DbError::InvalidInput { .. }), "{sql:?}");
        }
    }

    #[test]
    fn test_multi_statement_rejected() {
        let err = classify("SELECT 1; DROP TABLE t").unwrap_err();
        assert!(matches!(err, DbError::ValidationRejected { .. }));

        // A trailing terminator or comment is not a second statement.
        assert!(classify("SELECT 1;").is_ok());
        assert!(classify("SELECT 1; -- done").is_ok());
        assert!(classify("SELECT ';' AS semi").is_ok());
    }

    #[test]
    fn test_limit_detection_ignores_literals_and_comments() {
        assert!(classify("SELECT * FROM t LIMIT 5").unwrap().has_limit);
        assert!(classify("select * from t limit 5").unwrap().has_limit);
        assert!(!classify("SELECT 'LIMIT 5' FROM t").unwrap().has_limit);
        assert!(!classify("SELECT a FROM t -- LIMIT 5").unwrap().has_limit);
        assert!(!classify("SELECT \"LIMIT\" FROM t").unwrap().has_limit);
    }

    #[test]
    fn test_needs_limit_only_for_select_and_with() {
        assert!(classify("SELECT 1").unwrap().needs_limit());
        assert!(classify("WITH a AS (SELECT 1) SELECT * FROM a").unwrap().needs_limit());
        assert!(!classify("SHOW TABLES").unwrap().needs_limit());
        assert!(!classify("DESCRIBE TABLE t").unwrap().needs_limit());
        assert!(!classify("EXPLAIN SELECT 1").unwrap().needs_limit());
        assert!(!classify("SELECT 1 LIMIT 1").unwrap().needs_limit());
    }

    #[test]
    fn test_body_strips_terminator_and_trailing_comment() {
        assert_eq!(classify("SELECT 1;").unwrap().body, "SELECT 1");
        assert_eq!(classify("SELECT 1 ;  -- done\n").unwrap().body, "SELECT 1");
        assert_eq!(classify("  SELECT 'a;b'  ").unwrap().body, "SELECT 'a;b'");
    }

    #[test]
    fn test_use_targets() {
        let change = classify("USE DATABASE FOO").unwrap().context.unwrap();
        assert_eq!(change.dimension, ContextDimension::Database);
        assert_eq!(change.name, "FOO");

        let change = classify("use warehouse compute_wh;").unwrap().context.unwrap();
        assert_eq!(change.dimension, ContextDimension::Warehouse);
        assert_eq!(change.name, "compute_wh");

        let change = classify("USE SCHEMA sales.public").unwrap().context.unwrap();
        assert_eq!(change.dimension, ContextDimension::Schema);
        assert_eq!(change.name, "sales.public");

        let change = classify("USE ROLE \"Analyst Role\"").unwrap().context.unwrap();
        assert_eq!(change.dimension, ContextDimension::Role);
        assert_eq!(change.name, "\"Analyst Role\"");

        let change = classify("USE analytics").unwrap().context.unwrap();
        assert_eq!(change.dimension, ContextDimension::Database);
        assert_eq!(change.name, "analytics");
    }

    #[test]
    fn test_use_without_simple_target_has_no_context() {
        assert!(classify("USE SECONDARY ROLES ALL").unwrap().context.is_none());
        assert!(classify("USE ROLE").unwrap().context.is_none());
    }

    #[test]
    fn test_policy() {
        let read_only = ClassPolicy::read_only();
        assert!(read_only.allows(StatementClass::Read));
        assert!(read_only.allows(StatementClass::Context));
        assert!(!read_only.allows(StatementClass::WriteDml));
        assert!(!read_only.allows(StatementClass::WriteDdl));
        assert!(!read_only.allows(StatementClass::Unknown));

        let read_write = ClassPolicy::read_write();
        assert!(read_write.allows(StatementClass::WriteDml));
        assert!(read_write.allows(StatementClass::WriteDdl));
        assert!(!read_write.allows(StatementClass::Unknown));

        let dml_only = ClassPolicy::with_writes(true, false);
        assert!(dml_only.allows(StatementClass::WriteDml));
        assert!(!dml_only.allows(StatementClass::WriteDdl));
    }

    #[test]
    fn test_validate_reports_offending_keyword() {
        let err = validate("drop table t", &ClassPolicy::read_only()).unwrap_err();
        match err {
            DbError::ValidationRejected { keyword, reason } => {
                assert_eq!(keyword, "DROP");
                assert!(reason.contains("--allow-ddl"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_keywords_in_literals_do_not_change_class() {
        assert_eq!(class_of("SELECT 'DROP TABLE t'"), StatementClass::Read);
        assert!(validate("SELECT 'DELETE FROM t'", &ClassPolicy::read_only()).is_ok());
    }
}
