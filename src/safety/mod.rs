//! SQL safety gate for model-generated queries.
//!
//! An advisory, regex-based check: statements containing a blocked keyword
//! are rejected outright; table references outside the known spatial tables
//! are reported but tolerated. This is not a SQL parser. Keywords hidden in
//! comments or string literals still trigger rejection, and disallowed tables
//! reached through aliases, subqueries or comments are not caught. The
//! database-side read-only transaction is what actually prevents writes.

mod validator;

pub use validator::{validate, KNOWN_TABLES};

use std::fmt;

/// Why a statement was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    reason: String,
}

impl Rejection {
    /// Creates a rejection with a short human-readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The reason shown to callers and recorded on the query.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for Rejection {}

/// A statement that passed the gate, with advisory notes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vetted {
    /// Tokens after FROM/JOIN that are neither known tables, SQL keywords
    /// nor spatial functions. Tolerated; usually aliases or CTE names.
    pub unrecognized_tables: Vec<String>,
}

impl Vetted {
    /// Returns true if the table scan had nothing to report.
    pub fn is_clean(&self) -> bool {
        self.unrecognized_tables.is_empty()
    }
}
