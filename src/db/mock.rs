//! Mock connection pool for testing.
//!
//! Scripted, in-memory stand-in for the spatial store. Every statement a
//! session receives is recorded, acquisitions and releases are counted, and
//! capacity is enforced with a semaphore so callers block exactly like they
//! would on a real pool.

use super::{ColumnInfo, ConnectionPool, PoolStatus, PooledSession, QueryResult, Value};
use crate::error::{LandosError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

type Matcher = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// What the mock returns for a matching statement.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed with this result.
    Rows(QueryResult),
    /// Fail with a query error carrying this message.
    Error(String),
}

impl MockOutcome {
    /// Builds a `Rows` outcome from column names and rows of values.
    pub fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let columns = columns
            .iter()
            .map(|name| ColumnInfo::new(*name, "TEXT"))
            .collect();
        Self::Rows(QueryResult::with_data(columns, rows))
    }
}

struct MockRule {
    matcher: Matcher,
    outcome: MockOutcome,
}

#[derive(Default)]
struct MockPoolStats {
    acquired: AtomicUsize,
    released: AtomicUsize,
    statements: Mutex<Vec<String>>,
}

impl MockPoolStats {
    fn record(&self, statement: impl Into<String>) {
        if let Ok(mut statements) = self.statements.lock() {
            statements.push(statement.into());
        }
    }
}

/// A scripted connection pool.
///
/// Rules are checked in insertion order; the first matcher that accepts the
/// SQL decides the outcome. Unmatched SQL returns an empty result.
pub struct MockPool {
    rules: Arc<Vec<MockRule>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    stats: Arc<MockPoolStats>,
    acquire_error: Option<String>,
    query_delay: Option<Duration>,
    closed: AtomicBool,
}

impl MockPool {
    /// Creates a mock pool with capacity 10 and no rules.
    pub fn new() -> Self {
        Self::with_capacity(10)
    }

    /// Creates a mock pool with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rules: Arc::new(Vec::new()),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            stats: Arc::new(MockPoolStats::default()),
            acquire_error: None,
            query_delay: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Adds a rule: statements accepted by `matcher` produce `outcome`.
    pub fn on(
        mut self,
        matcher: impl Fn(&str) -> bool + Send + Sync + 'static,
        outcome: MockOutcome,
    ) -> Self {
        if let Some(rules) = Arc::get_mut(&mut self.rules) {
            rules.push(MockRule {
                matcher: Box::new(matcher),
                outcome,
            });
        }
        self
    }

    /// Adds a rule matching statements that contain `pattern`.
    pub fn on_contains(self, pattern: impl Into<String>, outcome: MockOutcome) -> Self {
        let pattern = pattern.into();
        self.on(move |sql| sql.contains(&pattern), outcome)
    }

    /// Makes every acquire fail with a connection error.
    pub fn failing_acquire(mut self, message: impl Into<String>) -> Self {
        self.acquire_error = Some(message.into());
        self
    }

    /// Makes every `fetch_all` sleep for `delay` before answering.
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    /// Number of successful acquisitions so far.
    pub fn acquired(&self) -> usize {
        self.stats.acquired.load(Ordering::SeqCst)
    }

    /// Number of sessions released back to the pool so far.
    pub fn released(&self) -> usize {
        self.stats.released.load(Ordering::SeqCst)
    }

    /// Connections currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Every statement received by any session, in order.
    pub fn statements(&self) -> Vec<String> {
        self.stats
            .statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl Default for MockPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    async fn acquire(&self) -> Result<Box<dyn PooledSession>> {
        if let Some(message) = &self.acquire_error {
            return Err(LandosError::connection(message.clone()));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(LandosError::connection("pool is closed"));
        }

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| LandosError::connection("pool is closed"))?;
        self.stats.acquired.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockSession {
            rules: Arc::clone(&self.rules),
            stats: Arc::clone(&self.stats),
            query_delay: self.query_delay,
            _permit: permit,
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();
    }

    fn status(&self) -> PoolStatus {
        let idle = self.permits.available_permits() as u32;
        PoolStatus {
            size: self.capacity as u32,
            idle,
        }
    }
}

/// A session handed out by `MockPool`.
struct MockSession {
    rules: Arc<Vec<MockRule>>,
    stats: Arc<MockPoolStats>,
    query_delay: Option<Duration>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PooledSession for MockSession {
    async fn begin_read_only(&mut self) -> Result<()> {
        self.stats.record("BEGIN READ ONLY");
        Ok(())
    }

    async fn set_statement_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.stats
            .record(format!("SET statement_timeout = {}", timeout.as_millis()));
        Ok(())
    }

    async fn reset_statement_timeout(&mut self) -> Result<()> {
        self.stats.record("RESET statement_timeout");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.stats.record("ROLLBACK");
        Ok(())
    }

    async fn fetch_all(&mut self, sql: &str) -> Result<QueryResult> {
        self.stats.record(sql);
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }

        match self.rules.iter().find(|rule| (rule.matcher)(sql)) {
            Some(rule) => match &rule.outcome {
                MockOutcome::Rows(result) => Ok(result.clone()),
                MockOutcome::Error(message) => Err(LandosError::query(message.clone())),
            },
            None => Ok(QueryResult::new()),
        }
    }
}
