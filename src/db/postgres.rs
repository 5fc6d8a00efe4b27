//! PostgreSQL connection pool implementation.
//!
//! Provides `PostgresPool` and `PostgresSession`, the sqlx-backed
//! implementations of the `ConnectionPool` and `PooledSession` traits.

use crate::config::{display_connection_string, DatabaseConfig};
use crate::db::{ColumnInfo, ConnectionPool, PoolStatus, PooledSession, QueryResult, RawRow, Value};
use crate::error::{LandosError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column as SqlxColumn, Postgres, Row as SqlxRow, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Opens the pool, retrying transient failures with exponential backoff.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let conn_str = config.connection_string()?;
        let location = display_connection_string(&conn_str);

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .acquire_timeout(config.acquire_timeout())
                .connect(&conn_str)
                .await;

            match result {
                Ok(pool) => {
                    debug!(store = %location, "Connected to spatial store");
                    return Ok(Self { pool });
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    } else {
                        break;
                    }
                }
            }
        }

        Err(match last_error {
            Some(e) => map_connection_error(e, &location),
            None => LandosError::connection(format!("Could not connect to {location}")),
        })
    }
}

#[async_trait]
impl ConnectionPool for PostgresPool {
    async fn acquire(&self) -> Result<Box<dyn PooledSession>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| LandosError::connection(format!("Failed to acquire connection: {e}")))?;
        Ok(Box::new(PostgresSession { conn }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.pool.size(),
            idle: self.pool.num_idle() as u32,
        }
    }
}

/// A single checked-out Postgres connection.
///
/// The inner `PoolConnection` goes back to the pool on drop.
pub struct PostgresSession {
    conn: PoolConnection<Postgres>,
}

impl PostgresSession {
    async fn run_utility(&mut self, sql: &str) -> Result<()> {
        sqlx::query(sql)
            .persistent(false)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| LandosError::query(format_query_error(e)))?;
        Ok(())
    }
}

#[async_trait]
impl PooledSession for PostgresSession {
    async fn begin_read_only(&mut self) -> Result<()> {
        self.run_utility("BEGIN READ ONLY").await
    }

    async fn set_statement_timeout(&mut self, timeout: Duration) -> Result<()> {
        let sql = format!("SET statement_timeout = {}", timeout.as_millis());
        self.run_utility(&sql).await
    }

    async fn reset_statement_timeout(&mut self) -> Result<()> {
        self.run_utility("RESET statement_timeout").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.run_utility("ROLLBACK").await
    }

    async fn fetch_all(&mut self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();

        // Prepared statements admit exactly one command. Not cached.
        let rows = sqlx::query(sql)
            .persistent(false)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(|e| LandosError::query(format_query_error(e)))?;

        let columns: Vec<ColumnInfo> = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
                    .collect()
            })
            .unwrap_or_default();

        let raw: Vec<RawRow> = rows.iter().map(convert_row).collect();

        Ok(QueryResult::with_data(columns, raw).with_execution_time(start.elapsed()))
    }
}

/// Converts a sqlx PgRow to our RawRow type.
fn convert_row(row: &PgRow) -> RawRow {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

/// Converts a single column value from a PgRow to our Value type.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INT2" | "SMALLINT" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT4" | "INT" | "INTEGER" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),

        "INT8" | "BIGINT" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Int)
            .unwrap_or(Value::Null),

        "FLOAT4" | "REAL" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),

        "FLOAT8" | "DOUBLE PRECISION" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(Value::Float)
            .unwrap_or(Value::Null),

        "NUMERIC" | "DECIMAL" => row
            .try_get::<Option<Decimal>, _>(index)
            .ok()
            .flatten()
            .map(Value::Decimal)
            .unwrap_or(Value::Null),

        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)
            .ok()
            .flatten()
            .map(Value::Date)
            .unwrap_or(Value::Null),

        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(index)
            .ok()
            .flatten()
            .map(Value::Time)
            .unwrap_or(Value::Null),

        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(Value::Timestamp)
            .unwrap_or(Value::Null),

        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .ok()
            .flatten()
            .map(Value::TimestampTz)
            .unwrap_or(Value::Null),

        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)
            .ok()
            .flatten()
            .map(Value::Json)
            .unwrap_or(Value::Null),

        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bytes)
            .unwrap_or(Value::Null),

        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps sqlx connection errors to operator-friendly messages.
fn map_connection_error(error: sqlx::Error, location: &str) -> LandosError {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        LandosError::connection(format!(
            "Cannot connect to {location}. Check that the server is running."
        ))
    } else if error_str.contains("authentication failed") {
        LandosError::connection(format!(
            "Authentication failed for {location}. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        LandosError::connection(format!("Database for {location} does not exist."))
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        LandosError::connection(format!(
            "Connection to {location} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        LandosError::connection(error.to_string())
    }
}

/// Formats a query error with Postgres detail and hint when available.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }

        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }

    result
}
