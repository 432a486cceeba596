//! Signaling core error types.
//!
//! Routine protocol mismatches (glare, duplicates, stray late responses) are
//! not errors and never appear here. These types cover failures a caller can
//! act on.

use common::error::TransportError;
use thiserror::Error;

/// Signaling core error type.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No actor exists for the meeting.
    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    /// Conflict (e.g., meeting already registered).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Controller is shutting down.
    #[error("Signaling controller is draining")]
    Draining,

    /// Outbound request failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// SDP build/apply failed.
    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// TURN discovery API misuse.
    #[error("TURN discovery error: {0}")]
    TurnDiscovery(#[from] TurnDiscoveryError),

    /// Internal error (actor channel closed, task dropped).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// SDP negotiation failures reported by a `MediaNegotiator`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// Building a local answer for a remote offer failed.
    #[error("Failed to build answer: {0}")]
    BuildAnswer(String),

    /// Applying a remote answer failed.
    #[error("Failed to apply answer: {0}")]
    ApplyAnswer(String),
}

impl NegotiationError {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            NegotiationError::BuildAnswer(_) => "build",
            NegotiationError::ApplyAnswer(_) => "apply",
        }
    }
}

/// TURN discovery failures.
///
/// Only `NotInProgress` ever escapes to a caller. Every other variant is
/// folded into a failed `TurnDiscoveryResult` and reported via metrics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TurnDiscoveryError {
    /// An HTTP response was handed over without a pending exchange.
    #[error("TURN discovery is not in progress")]
    NotInProgress,

    /// No response arrived before the timeout.
    #[error("Timed out waiting for TURN_DISCOVERY_RESPONSE")]
    Timeout,

    /// Response had the wrong message type.
    #[error("TURN_DISCOVERY_RESPONSE {from} has unexpected messageType: {message_type}")]
    UnexpectedMessageType {
        /// Delivery path ("in http response", "from push").
        from: String,
        /// Received message type.
        message_type: String,
    },

    /// One or more of the url/username/password headers is absent.
    #[error("TURN_DISCOVERY_RESPONSE {from} missing some headers")]
    MissingHeaders {
        /// Delivery path.
        from: String,
    },

    /// The embedded HTTP response could not be decoded.
    #[error("Malformed TURN discovery response: {0}")]
    Malformed(String),

    /// Sending the request or the OK failed.
    #[error("TURN discovery request failed: {0}")]
    Transport(TransportError),

    /// The exchange was aborted before completing.
    #[error("TURN discovery aborted")]
    Aborted,
}

impl TurnDiscoveryError {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            TurnDiscoveryError::NotInProgress => "not_in_progress",
            TurnDiscoveryError::Timeout => "timeout",
            TurnDiscoveryError::UnexpectedMessageType { .. } => "unexpected_message_type",
            TurnDiscoveryError::MissingHeaders { .. } => "missing_headers",
            TurnDiscoveryError::Malformed(_) => "malformed",
            TurnDiscoveryError::Transport(_) => "transport",
            TurnDiscoveryError::Aborted => "aborted",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_converts() {
        let err: SignalingError = TransportError::Network("reset".into()).into();
        assert!(matches!(err, SignalingError::Transport(_)));
    }

    #[test]
    fn test_labels() {
        assert_eq!(NegotiationError::ApplyAnswer("x".into()).stage(), "apply");
        assert_eq!(TurnDiscoveryError::Timeout.reason(), "timeout");
        assert_eq!(
            TurnDiscoveryError::MissingHeaders { from: "x".into() }.reason(),
            "missing_headers"
        );
    }
}
