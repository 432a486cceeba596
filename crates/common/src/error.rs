//! Common error types for the signaling core.

use thiserror::Error;

/// Errors reported by a signaling transport or state fetch.
///
/// The type is `Clone` because a single outbound request may be shared by
/// several coalesced callers, and every one of them receives the same
/// outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection-level failure (DNS, reset, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered with a non-success status.
    #[error("HTTP status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Server-provided reason.
        message: String,
    },

    /// Request did not complete in time.
    #[error("Request timed out")]
    Timeout,

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The request was dropped before it produced a result.
    #[error("Request cancelled")]
    Cancelled,
}

impl TransportError {
    /// Short, bounded label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            TransportError::Network(_) => "network",
            TransportError::Status { .. } => "status",
            TransportError::Timeout => "timeout",
            TransportError::Serialization(_) => "serialization",
            TransportError::Cancelled => "cancelled",
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

/// Result type alias using `TransportError`
pub type TransportResult<T> = std::result::Result<T, TransportError>;
