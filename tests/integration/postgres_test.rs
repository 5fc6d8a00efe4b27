//! Executor tests against a live PostGIS store.
//!
//! These tests require a running PostgreSQL database.
//! Set DATABASE_URL environment variable to run them.

use landos::config::DatabaseConfig;
use landos::db::{self, ConnectionPool};
use landos::query::QueryExecutor;
use std::sync::Arc;
use std::time::Duration;

/// Helper to create a test pool.
async fn get_test_pool() -> Option<Arc<dyn ConnectionPool>> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let config = DatabaseConfig {
        url: Some(url),
        max_connections: 2,
        ..DatabaseConfig::default()
    };
    db::connect(&config).await.ok()
}

#[tokio::test]
async fn test_execute_select_with_geometry() {
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let executor = QueryExecutor::new(pool.clone());
    let result = executor
        .execute(
            "SELECT 'Main St' AS address, 1.5::numeric AS price, \
             '{\"type\":\"Point\",\"coordinates\":[-6.2,53.3]}' AS geometry",
        )
        .await;

    assert!(result.is_success(), "error: {:?}", result.error);
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0]["price"], serde_json::json!(1.5));
    assert_eq!(result.rows[0]["geometry"]["type"], serde_json::json!("Point"));

    pool.close().await;
}

#[tokio::test]
async fn test_row_cap_applies() {
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let executor = QueryExecutor::new(pool.clone());
    let result = executor.execute("SELECT g FROM generate_series(1, 100) AS g").await;
    assert_eq!(result.row_count, 25);

    pool.close().await;
}

#[tokio::test]
async fn test_writes_fail_in_read_only_transaction() {
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let executor = QueryExecutor::new(pool.clone());
    let result = executor
        .execute("CREATE TEMP TABLE scratch AS SELECT 1 AS x")
        .await;
    assert!(!result.is_success());
    assert!(result.error.unwrap().len() <= 200);

    pool.close().await;
}

#[tokio::test]
async fn test_statement_timeout_is_enforced() {
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let executor = QueryExecutor::new(pool.clone()).with_statement_timeout(Duration::from_secs(1));
    let result = executor.execute("SELECT pg_sleep(3)").await;
    assert!(!result.is_success());
    assert!(result.error.unwrap().contains("statement timeout"));

    pool.close().await;
}
