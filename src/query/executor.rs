//! Isolated execution of vetted, model-generated SQL.
//!
//! Every statement runs on its own pooled connection inside a read-only
//! transaction with a statement timeout. The statement is first wrapped as a
//! subquery under an outer LIMIT; if that fails it is retried as written with
//! a LIMIT appended. Failures become part of the result, never an error.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::ExploreConfig;
use crate::db::{ConnectionPool, PooledSession, QueryResult};
use crate::error::Result;
use crate::query::normalize::{normalize_result, Row};

/// Default per-statement timeout.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Hard row cap per statement.
pub const MAX_ROWS: usize = 25;

/// Maximum length of an error message recorded on a result.
pub const MAX_ERROR_LEN: usize = 200;

/// How much of the statement tail is searched for an existing LIMIT.
const LIMIT_TAIL_LEN: usize = 60;

/// Outcome of executing one statement.
///
/// `error` and a non-empty `rows` never occur together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub rows: Vec<Row>,
    pub error: Option<String>,
    pub row_count: usize,
}

impl ExecutionResult {
    /// A successful result.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            rows,
            error: None,
            row_count,
        }
    }

    /// A failed result with zero rows. The message is truncated.
    pub fn failed(message: impl AsRef<str>) -> Self {
        Self {
            rows: Vec::new(),
            error: Some(truncate_error(message.as_ref())),
            row_count: 0,
        }
    }

    /// Returns true if the statement ran without error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs statements against a shared pool.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: Arc<dyn ConnectionPool>,
    statement_timeout: Duration,
    max_rows: usize,
}

impl QueryExecutor {
    /// Creates an executor with the default timeout and row cap.
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Self {
        Self {
            pool,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
            max_rows: MAX_ROWS,
        }
    }

    /// Creates an executor using the explore settings.
    pub fn from_config(pool: Arc<dyn ConnectionPool>, config: &ExploreConfig) -> Self {
        Self::new(pool)
            .with_statement_timeout(config.query_timeout())
            .with_max_rows(config.max_rows)
    }

    /// Sets the per-statement timeout. Zero would disable the server-side
    /// limit and is ignored.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            warn!("Ignoring zero statement timeout");
        } else {
            self.statement_timeout = timeout;
        }
        self
    }

    /// Sets the row cap. Values above 25 are clamped.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.min(MAX_ROWS);
        self
    }

    /// Executes one statement that already passed validation.
    ///
    /// The session work runs on its own task, so the rollback and timeout
    /// reset still happen when the caller is dropped mid-query. The
    /// connection is released on every path.
    pub async fn execute(&self, sql: &str) -> ExecutionResult {
        let executor = self.clone();
        let sql = sql.to_string();

        match tokio::spawn(async move { executor.execute_on_session(&sql).await }).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Query task failed");
                ExecutionResult::failed(format!("query task failed: {e}"))
            }
        }
    }

    async fn execute_on_session(&self, sql: &str) -> ExecutionResult {
        let start = Instant::now();

        let mut session = match self.pool.acquire().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Could not acquire a connection");
                return ExecutionResult::failed(e.to_string());
            }
        };

        let outcome = self.run(session.as_mut(), sql).await;
        self.finish(session.as_mut()).await;
        drop(session);

        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(result) => {
                let rows = normalize_result(&result, self.max_rows);
                debug!(
                    row_count = rows.len(),
                    statement_ms = result.execution_time.as_millis() as u64,
                    duration_ms,
                    "Query succeeded"
                );
                ExecutionResult::from_rows(rows)
            }
            Err(e) => {
                let result = ExecutionResult::failed(e.to_string());
                warn!(
                    error = result.error.as_deref().unwrap_or_default(),
                    duration_ms,
                    "Query failed"
                );
                result
            }
        }
    }

    async fn run(&self, session: &mut dyn PooledSession, sql: &str) -> Result<QueryResult> {
        self.open(session).await?;

        let wrapped = wrap_with_limit(sql, self.max_rows);
        match session.fetch_all(&wrapped).await {
            Ok(result) => return Ok(result),
            Err(e) => debug!(error = %e, "Wrapped statement failed, retrying as written"),
        }

        session.rollback().await?;
        session.reset_statement_timeout().await?;
        self.open(session).await?;

        let direct = append_limit(sql, self.max_rows);
        let mut result = session.fetch_all(&direct).await?;
        result.rows.truncate(self.max_rows);
        result.row_count = result.rows.len();
        Ok(result)
    }

    async fn open(&self, session: &mut dyn PooledSession) -> Result<()> {
        session.begin_read_only().await?;
        session.set_statement_timeout(self.statement_timeout).await
    }

    // Runs on every path, after success or failure.
    async fn finish(&self, session: &mut dyn PooledSession) {
        if let Err(e) = session.rollback().await {
            warn!(error = %e, "Rollback failed");
        }
        if let Err(e) = session.reset_statement_timeout().await {
            warn!(error = %e, "Resetting statement timeout failed");
        }
    }
}

/// Wraps a statement as a subquery under an outer LIMIT.
pub fn wrap_with_limit(sql: &str, max_rows: usize) -> String {
    format!("SELECT * FROM ({}) AS _t LIMIT {}", sql, max_rows)
}

/// Strips trailing terminators and appends a LIMIT unless the statement's
/// tail already has one.
pub fn append_limit(sql: &str, max_rows: usize) -> String {
    let trimmed = sql.trim_end_matches(|c: char| c.is_whitespace() || c == ';');

    let tail_start = trimmed
        .char_indices()
        .rev()
        .nth(LIMIT_TAIL_LEN - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let has_limit = trimmed[tail_start..].to_ascii_uppercase().contains("LIMIT");

    if has_limit {
        trimmed.to_string()
    } else {
        format!("{} LIMIT {}", trimmed, max_rows)
    }
}

/// Truncates an error message to [`MAX_ERROR_LEN`] characters.
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}
