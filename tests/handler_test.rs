//! Request handler: activity tracking, health reporting and shutdown.

mod common;

use common::{Script, ScriptedDriver, scripted_pool, test_config};
use snowflake_daemon::db::QueryExecutor;
use snowflake_daemon::error::FailureKind;
use snowflake_daemon::lifecycle::ActivityClock;
use snowflake_daemon::models::QueryRequest;
use snowflake_daemon::tools::{HealthStatus, QueryToolHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn handler(script: &Script, max_size: usize) -> Arc<QueryToolHandler<ScriptedDriver>> {
    Arc::new(QueryToolHandler::new(
        scripted_pool(script, test_config(max_size)),
        QueryExecutor::default(),
        ActivityClock::new(),
        CancellationToken::new(),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_health_degraded_until_first_connection() {
    let script = Script::new();
    let handler = handler(&script, 2);

    let report = handler.health();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.connection_count, 0);

    let result = handler.query(QueryRequest::new("SELECT 1")).await;
    assert!(result.success);

    let report = handler.health();
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.connection_count, 1);
    assert_eq!(report.active_queries, 0);
    assert_eq!(report.pool.idle, 1);
}

#[tokio::test(start_paused = true)]
async fn test_queries_reset_idle_time_but_health_does_not() {
    let script = Script::new();
    let handler = handler(&script, 1);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(handler.health().idle_seconds >= 10);
    // Asking for health is not activity.
    assert!(handler.health().idle_seconds >= 10);

    handler.query(QueryRequest::new("SELECT 1")).await;
    assert_eq!(handler.health().idle_seconds, 0);
}

#[tokio::test(start_paused = true)]
async fn test_active_queries_counted_while_running() {
    let script = Script::new();
    script.delay_statement("slow", Duration::from_secs(5));
    let handler = handler(&script, 2);

    let running = {
        let handler = handler.clone();
        tokio::spawn(async move { handler.query(QueryRequest::new("SELECT * FROM slow")).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handler.health().active_queries, 1);

    assert!(running.await.unwrap().success);
    assert_eq!(handler.health().active_queries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_pool_exhaustion_becomes_failed_result() {
    let script = Script::new();
    script.delay_statement("slow", Duration::from_secs(60));
    let handler = handler(&script, 1);

    let _running = {
        let handler = handler.clone();
        tokio::spawn(async move { handler.query(QueryRequest::new("SELECT * FROM slow")).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = handler.query(QueryRequest::new("SELECT 1")).await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(FailureKind::ConnectionUnavailable));
    assert!(result.error.unwrap().contains("busy"));
}

#[tokio::test(start_paused = true)]
async fn test_session_reports_context() {
    let script = Script::new();
    let handler = handler(&script, 1);

    handler.query(QueryRequest::new("USE WAREHOUSE etl_wh")).await;
    let snapshot = handler.session().await.unwrap();

    assert_eq!(snapshot.connection_id, Some(1));
    assert_eq!(snapshot.warehouse.as_deref(), Some("etl_wh"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_token_and_reports_state() {
    let script = Script::new();
    let handler = handler(&script, 1);

    let ack = handler.shutdown();
    assert_eq!(ack.status, HealthStatus::ShuttingDown);
    assert!(handler.shutdown_token().is_cancelled());
    assert_eq!(handler.health().status, HealthStatus::ShuttingDown);
}

#[tokio::test(start_paused = true)]
async fn test_query_after_pool_shutdown_fails_cleanly() {
    let script = Script::new();
    let handler = handler(&script, 1);
    handler.pool().shutdown().await;

    let result = handler.query(QueryRequest::new("SELECT 1")).await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(FailureKind::PoolClosed));
    assert_eq!(script.connect_attempts(), 0);
}
