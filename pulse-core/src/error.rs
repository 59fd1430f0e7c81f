//! Error types for pulse.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use crate::types::MetricKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pulse operations.
pub type Result<T> = std::result::Result<T, PulseError>;

/// Main error type for pulse.
#[derive(Error, Debug)]
pub enum PulseError {
    // Repository contract errors
    #[error("Metric not found: {name}")]
    MetricNotFound { name: String },

    #[error("Metric {name} is a {stored}, cannot apply a {incoming} value")]
    KindMismatch { name: String, stored: MetricKind, incoming: MetricKind },

    #[error("Invalid metric: {reason}")]
    InvalidMetric { reason: String },

    #[error("Counter {name} would overflow")]
    CounterOverflow { name: String },

    // Storage errors
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Database migration failed: {reason}")]
    MigrationFailed { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request rejected with status {status}")]
    Rejected { status: u16 },

    #[error("Compression failed: {reason}")]
    CompressionFailed { reason: String },

    #[error("Signature check failed: {reason}")]
    SignatureInvalid { reason: String },

    #[error("Encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PulseError {
    /// Create a Database error from any sqlx error.
    pub fn database(err: sqlx::Error) -> Self {
        Self::DatabaseError(err.to_string())
    }

    /// Whether the retry schedule may try the failed operation again.
    ///
    /// Only environmental failures qualify: network transport errors, server-side
    /// responses and file I/O. Contract violations never do.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::IoError { .. } => true,
            Self::Rejected { status } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for PulseError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Rejected { status: status.as_u16() },
            None => Self::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PulseError::Transport("connection refused".into()).is_transient());
        assert!(PulseError::Rejected { status: 503 }.is_transient());
        assert!(!PulseError::Rejected { status: 400 }.is_transient());
        assert!(!PulseError::Cancelled.is_transient());
        assert!(!PulseError::KindMismatch {
            name: "PollCount".into(),
            stored: MetricKind::Counter,
            incoming: MetricKind::Gauge,
        }
        .is_transient());
    }
}
