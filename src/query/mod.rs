//! Query execution for LandOS.
//!
//! Runs vetted SQL under isolation and turns raw database rows into
//! JSON-safe rows.

pub mod executor;
pub mod normalize;

pub use executor::{ExecutionResult, QueryExecutor, MAX_ROWS};
pub use normalize::{normalize_result, normalize_value, Row};
