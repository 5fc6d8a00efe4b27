//! Error types for LandOS.
//!
//! Defines the main error enum used throughout the application.

use thiserror::Error;

/// Main error type for LandOS operations.
#[derive(Error, Debug)]
pub enum LandosError {
    /// Database connection errors (host unreachable, auth failed, pool exhausted, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution errors (syntax errors, statement timeouts, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// Reasoning-service errors (rate limits, auth, transport failures, etc.)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Hypothesis generation produced nothing usable and the service failed.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// A reasoning-service call exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The request was cancelled between pipeline stages.
    #[error("Request cancelled")]
    Cancelled,

    /// The caller sent something the pipeline cannot work with.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration errors (invalid config file, bad connection string, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LandosError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates an LLM error with the given message.
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    /// Creates a generation error with the given message.
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    /// Creates a timeout error with the given message.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Creates an invalid-request error with the given message.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Query(_) => "Query Error",
            Self::Llm(_) => "LLM Error",
            Self::Generation(_) => "Generation Error",
            Self::Timeout(_) => "Timeout",
            Self::Cancelled => "Cancelled",
            Self::InvalidRequest(_) => "Invalid Request",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using LandosError.
pub type Result<T> = std::result::Result<T, LandosError>;
