//! Error types for query serving
//!
//! Every failure a caller can observe from the orchestrator is a
//! [`QueryError`]. The enum is `Clone` because a single failed upstream
//! compute is broadcast to every request waiting on the same in-flight key.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::upstream::{GenerationError, RetrievalError};

/// Main error type for query serving
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The identity exhausted its request quota for the current window
    #[error("Rate limit exceeded: retry after {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    /// Vector store retrieval failed
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Language model generation failed
    #[error("Generation error: {0}")]
    Generation(String),

    /// The caller's deadline elapsed while waiting on a computation
    #[error("Operation timed out after {}ms: {context}", waited.as_millis())]
    Timeout { waited: Duration, context: String },

    /// The shared compute task was cancelled or panicked
    #[error("Computation aborted: {0}")]
    Aborted(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A metric could not be registered or exported
    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// Coarse classification used by boundary layers to pick a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Client should back off; not a system failure
    RateLimited,
    /// A downstream dependency failed
    Upstream,
    /// The caller's own deadline was exceeded
    Timeout,
    /// Anything else
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::RateLimited => write!(f, "rate_limited"),
            ErrorKind::Upstream => write!(f, "upstream"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::RateLimited { .. } => ErrorKind::RateLimited,
            QueryError::Retrieval(_) | QueryError::Generation(_) => ErrorKind::Upstream,
            QueryError::Timeout { .. } => ErrorKind::Timeout,
            QueryError::Aborted(_)
            | QueryError::Serialization(_)
            | QueryError::Config(_)
            | QueryError::Metrics(_) => ErrorKind::Internal,
        }
    }

    /// Backoff hint, present only for rate-limit rejections
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            QueryError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether the failure came from the retriever or generator
    pub fn is_upstream(&self) -> bool {
        self.kind() == ErrorKind::Upstream
    }

    /// Convert to HTTP status code equivalent
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::RateLimited => 429,
            ErrorKind::Upstream => 502,
            ErrorKind::Timeout => 504,
            ErrorKind::Internal => 500,
        }
    }
}

impl From<RetrievalError> for QueryError {
    fn from(err: RetrievalError) -> Self {
        QueryError::Retrieval(err.message)
    }
}

impl From<GenerationError> for QueryError {
    fn from(err: GenerationError) -> Self {
        QueryError::Generation(err.message)
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Serialization(err.to_string())
    }
}

impl From<prometheus::Error> for QueryError {
    fn from(err: prometheus::Error) -> Self {
        QueryError::Metrics(err.to_string())
    }
}

/// Result type alias for query serving
pub type Result<T> = std::result::Result<T, QueryError>;
