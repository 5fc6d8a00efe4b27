//! Spatial store access for LandOS.
//!
//! The pool is an explicit object with its own lifecycle: created by
//! [`connect`], handed to whoever needs connections, and closed with
//! [`ConnectionPool::close`]. A [`PooledSession`] holds exactly one pooled
//! connection and returns it to the pool when dropped.

mod mock;
mod postgres;
mod types;

pub use mock::{MockOutcome, MockPool};
pub use postgres::PostgresPool;
pub use types::{ColumnInfo, QueryResult, RawRow, Value};

use crate::config::DatabaseConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Occupancy snapshot of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections currently open.
    pub size: u32,
    /// Open connections not checked out.
    pub idle: u32,
}

/// A bounded pool of connections to the spatial store.
///
/// Capacity is shared by every concurrent request; `acquire` waits for a
/// connection to free up rather than failing immediately.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Checks out one connection.
    async fn acquire(&self) -> Result<Box<dyn PooledSession>>;

    /// Closes the pool. Later acquires fail.
    async fn close(&self);

    /// Returns current pool occupancy.
    fn status(&self) -> PoolStatus;
}

/// One checked-out connection. Dropping it releases the connection.
#[async_trait]
pub trait PooledSession: Send {
    /// Opens a read-only transaction.
    async fn begin_read_only(&mut self) -> Result<()>;

    /// Sets the session-level statement timeout.
    async fn set_statement_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Restores the server default statement timeout.
    async fn reset_statement_timeout(&mut self) -> Result<()>;

    /// Rolls back the open transaction, if any.
    async fn rollback(&mut self) -> Result<()>;

    /// Runs a single statement and returns its columns and raw rows.
    async fn fetch_all(&mut self, sql: &str) -> Result<QueryResult>;
}

/// Creates the Postgres-backed pool described by the configuration.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn ConnectionPool>> {
    let pool = PostgresPool::connect(config).await?;
    Ok(Arc::new(pool))
}
