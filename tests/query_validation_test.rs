//! Integration tests for statement classification and the read-only guard.

use snowflake_daemon::error::DbError;
use snowflake_daemon::models::ContextDimension;
use snowflake_daemon::tools::sql_validator::{ClassPolicy, StatementClass, classify, validate};

fn rejected_keyword(sql: &str, policy: &ClassPolicy) -> String {
    match validate(sql, policy) {
        Err(DbError::ValidationRejected { keyword, .. }) => keyword,
        other => panic!("expected rejection for {sql:?}, got {other:?}"),
    }
}

#[test]
fn test_read_only_rejects_dml() {
    let policy = ClassPolicy::read_only();
    assert_eq!(rejected_keyword("INSERT INTO users (name) VALUES ('test')", &policy), "INSERT");
    assert_eq!(rejected_keyword("UPDATE users SET name = 'x' WHERE id = 1", &policy), "UPDATE");
    assert_eq!(rejected_keyword("DELETE FROM users WHERE id = 1", &policy), "DELETE");
    assert_eq!(
        rejected_keyword("MERGE INTO t USING s ON t.id = s.id WHEN MATCHED THEN DELETE", &policy),
        "MERGE"
    );
}

#[test]
fn test_read_only_rejects_ddl() {
    let policy = ClassPolicy::read_only();
    assert_eq!(rejected_keyword("CREATE TABLE test (id INT)", &policy), "CREATE");
    assert_eq!(rejected_keyword("DROP TABLE users", &policy), "DROP");
    assert_eq!(rejected_keyword("ALTER TABLE users ADD COLUMN x INT", &policy), "ALTER");
    assert_eq!(rejected_keyword("TRUNCATE TABLE users", &policy), "TRUNCATE");
}

#[test]
fn test_rejection_message_names_the_flag() {
    let err = validate("DELETE FROM users", &ClassPolicy::read_only()).unwrap_err();
    assert!(err.to_string().contains("--allow-dml"));

    let err = validate("DROP TABLE users", &ClassPolicy::read_only()).unwrap_err();
    assert!(err.to_string().contains("--allow-ddl"));
}

#[test]
fn test_unknown_statements_always_rejected() {
    for sql in ["GRANT ROLE r TO USER u", "CALL my_proc()", "PUT file://x @stage", "BEGIN"] {
        assert!(validate(sql, &ClassPolicy::read_write()).is_err(), "{sql}");
    }
}

#[test]
fn test_write_flags_open_only_their_class() {
    let dml_only = ClassPolicy::with_writes(true, false);
    assert!(validate("INSERT INTO t VALUES (1)", &dml_only).is_ok());
    assert!(validate("DROP TABLE t", &dml_only).is_err());

    let ddl_only = ClassPolicy::with_writes(false, true);
    assert!(validate("DROP TABLE t", &ddl_only).is_ok());
    assert!(validate("DELETE FROM t", &ddl_only).is_err());
}

#[test]
fn test_allows_complex_select() {
    let sql = r#"
        SELECT u.name, o.total
        FROM users u
        JOIN orders o ON u.id = o.user_id
        WHERE o.created_at > '2024-01-01'
        ORDER BY o.total DESC
    "#;
    let classification = validate(sql, &ClassPolicy::read_only()).unwrap();
    assert_eq!(classification.class, StatementClass::Read);
    assert!(classification.needs_limit());
}

#[test]
fn test_leading_comments_and_parentheses() {
    let classification = classify("-- top orders\n(SELECT * FROM orders)").unwrap();
    assert_eq!(classification.class, StatementClass::Read);
    assert_eq!(classification.keyword, "SELECT");

    let classification = classify("/* cleanup */ DELETE FROM orders").unwrap();
    assert_eq!(classification.class, StatementClass::WriteDml);
}

#[test]
fn test_keywords_inside_literals_do_not_count() {
    let classification = classify("SELECT 'DROP TABLE users; LIMIT 5' AS note").unwrap();
    assert_eq!(classification.class, StatementClass::Read);
    assert!(!classification.has_limit);
    assert!(classification.needs_limit());
}

#[test]
fn test_quoted_limit_identifier_is_not_a_limit() {
    let classification = classify("SELECT \"LIMIT\" FROM settings").unwrap();
    assert!(!classification.has_limit);
}

#[test]
fn test_semicolon_inside_string_is_single_statement() {
    assert!(validate("SELECT ';' AS sep", &ClassPolicy::read_only()).is_ok());
}

#[test]
fn test_multi_statement_rejected() {
    let err = validate("SELECT 1; SELECT 2", &ClassPolicy::read_only()).unwrap_err();
    assert!(matches!(err, DbError::ValidationRejected { .. }));
}

#[test]
fn test_use_targets() {
    let cases = [
        ("USE WAREHOUSE compute_wh", ContextDimension::Warehouse, "compute_wh"),
        ("use role analyst;", ContextDimension::Role, "analyst"),
        ("USE SCHEMA db.public", ContextDimension::Schema, "db.public"),
        ("USE my_db", ContextDimension::Database, "my_db"),
    ];
    for (sql, dimension, name) in cases {
        let change = classify(sql).unwrap().context.expect(sql);
        assert_eq!(change.dimension, dimension, "{sql}");
        assert_eq!(change.name, name, "{sql}");
    }
}

#[test]
fn test_unicode_statements() {
    let classification = classify("SELECT '中文测试' AS 名称 FROM t").unwrap();
    assert_eq!(classification.class, StatementClass::Read);
    assert_eq!(classification.body, "SELECT '中文测试' AS 名称 FROM t");

    let classification = classify("SELECT 'üöÄ';  ").unwrap();
    assert_eq!(classification.body, "SELECT 'üöÄ'");
}

/// Malformed and hostile inputs must produce an error or a classification,
/// never a panic.
#[test]
fn test_edge_case_inputs_never_panic() {
    let inputs = vec![
        String::new(),
        " ".to_string(),
        "\n\r\t".to_string(),
        "\0".to_string(),
        ";;;".to_string(),
        "'".to_string(),
        "\"unterminated".to_string(),
        "/* open comment".to_string(),
        "'OR 1=1--".to_string(),
        "'; DROP TABLE users--".to_string(),
        "((((".to_string(),
        "USE".to_string(),
        "USE ROLE".to_string(),
        "SELECT".to_string(),
        "üöÄ".repeat(100),
        "SELECT ".to_string() + &"a, ".repeat(5000) + "b",
    ];

    for input in inputs {
        let _ = classify(&input);
        let _ = validate(&input, &ClassPolicy::read_only());
    }
}

#[test]
fn test_injection_attempts_are_rejected() {
    let policy = ClassPolicy::read_only();
    for sql in [
        "SELECT 1; DROP TABLE users",
        "SELECT 1;DELETE FROM users;",
        "'; DROP TABLE users--",
    ] {
        assert!(validate(sql, &policy).is_err(), "{sql}");
    }
}
