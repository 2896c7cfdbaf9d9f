//! Benchmark error types.

use std::time::Duration;

use thiserror::Error;

/// Benchmark errors.
///
/// Every variant except [`Error::Cancelled`] names the operation that failed so the
/// run controller can abort with a descriptive message.
#[derive(Debug, Error)]
pub enum Error {
    /// Connecting to or pinging a database failed.
    #[error("connectivity error ({engine}): {message}")]
    Connectivity { engine: String, message: String },

    /// A statement failed for a reason other than returning no rows.
    #[error("query failed ({engine}): {message}")]
    Query { engine: String, message: String },

    /// A row did not match the declared result shape.
    #[error("decode error ({engine}): {message}")]
    Decode { engine: String, message: String },

    /// An operation exceeded its time ceiling.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The root cancellation token fired.
    #[error("benchmark run cancelled")]
    Cancelled,

    /// Starting or initialising an ephemeral instance failed.
    #[error("provisioning error: {0}")]
    Provisioning(String),

    /// The query catalog is incomplete or malformed.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a connectivity error for an engine.
    pub fn connectivity(engine: impl ToString, message: impl ToString) -> Self {
        Error::Connectivity {
            engine: engine.to_string(),
            message: message.to_string(),
        }
    }

    /// Build a query error for an engine.
    pub fn query(engine: impl ToString, message: impl ToString) -> Self {
        Error::Query {
            engine: engine.to_string(),
            message: message.to_string(),
        }
    }

    /// Build a decode error for an engine.
    pub fn decode(engine: impl ToString, message: impl ToString) -> Self {
        Error::Decode {
            engine: engine.to_string(),
            message: message.to_string(),
        }
    }

    /// Build a timeout error.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Whether this error came from the root cancellation token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
