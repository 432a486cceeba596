//! ROAP wire messages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version carried in every message.
pub const ROAP_VERSION: &str = "2";

/// Sequence number reserved for TURN discovery.
///
/// Real offer/answer exchanges start at `seq = 1`, so the two never collide.
pub const TURN_DISCOVERY_SEQ: u64 = 0;

/// Tie breaker used for locally generated offers.
pub const LOCAL_OFFER_TIE_BREAKER: u32 = 0xFFFF_FFFE;

/// Request header asking the server to embed its reply in the HTTP response.
pub const HEADER_INCLUDE_ANSWER_IN_HTTP_RESPONSE: &str = "includeAnswerInHttpResponse";

/// Header meaning the peer does not expect a trailing `OK`.
pub const HEADER_NO_OK_IN_TRANSACTION: &str = "noOkInTransaction";

/// ROAP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoapMessageType {
    Offer,
    Answer,
    Ok,
    Error,
    TurnDiscoveryRequest,
    TurnDiscoveryResponse,
}

impl RoapMessageType {
    /// Wire name of the type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RoapMessageType::Offer => "OFFER",
            RoapMessageType::Answer => "ANSWER",
            RoapMessageType::Ok => "OK",
            RoapMessageType::Error => "ERROR",
            RoapMessageType::TurnDiscoveryRequest => "TURN_DISCOVERY_REQUEST",
            RoapMessageType::TurnDiscoveryResponse => "TURN_DISCOVERY_RESPONSE",
        }
    }

    /// Whether this type belongs to the TURN discovery sub-protocol.
    #[must_use]
    pub const fn is_turn_discovery(&self) -> bool {
        matches!(
            self,
            RoapMessageType::TurnDiscoveryRequest | RoapMessageType::TurnDiscoveryResponse
        )
    }
}

impl fmt::Display for RoapMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ROAP message. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoapMessage {
    pub message_type: RoapMessageType,
    #[serde(default = "default_version")]
    pub version: String,
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sdps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_breaker: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_cause: Option<String>,
}

fn default_version() -> String {
    ROAP_VERSION.to_string()
}

impl RoapMessage {
    fn new(message_type: RoapMessageType, seq: u64) -> Self {
        Self {
            message_type,
            version: default_version(),
            seq,
            sdps: Vec::new(),
            tie_breaker: None,
            headers: Vec::new(),
            error_type: None,
            error_cause: None,
        }
    }

    /// Build an `OFFER`.
    #[must_use]
    pub fn offer(seq: u64, sdps: Vec<String>, tie_breaker: u32) -> Self {
        Self {
            sdps,
            tie_breaker: Some(tie_breaker),
            ..Self::new(RoapMessageType::Offer, seq)
        }
    }

    /// Build an `ANSWER` for the offer with the same `seq`.
    #[must_use]
    pub fn answer(seq: u64, sdps: Vec<String>) -> Self {
        Self {
            sdps,
            ..Self::new(RoapMessageType::Answer, seq)
        }
    }

    /// Build an `OK`.
    #[must_use]
    pub fn ok(seq: u64) -> Self {
        Self::new(RoapMessageType::Ok, seq)
    }

    /// Build an `ERROR`.
    #[must_use]
    pub fn error(seq: u64, error_type: impl Into<String>) -> Self {
        Self {
            error_type: Some(error_type.into()),
            ..Self::new(RoapMessageType::Error, seq)
        }
    }

    /// Build a `TURN_DISCOVERY_REQUEST`.
    #[must_use]
    pub fn turn_discovery_request() -> Self {
        Self {
            headers: vec![
                HEADER_INCLUDE_ANSWER_IN_HTTP_RESPONSE.to_string(),
                HEADER_NO_OK_IN_TRANSACTION.to_string(),
            ],
            ..Self::new(RoapMessageType::TurnDiscoveryRequest, TURN_DISCOVERY_SEQ)
        }
    }

    /// Build a `TURN_DISCOVERY_RESPONSE` (mostly useful for tests and loopback transports).
    #[must_use]
    pub fn turn_discovery_response(headers: Vec<String>) -> Self {
        Self {
            headers,
            ..Self::new(RoapMessageType::TurnDiscoveryResponse, TURN_DISCOVERY_SEQ)
        }
    }

    /// Whether `headers` contains exactly `name`.
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    /// Value of the first `name=value` header, if present.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|h| {
            h.strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('='))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_offer_wire_format() {
        let offer = RoapMessage::offer(1, vec!["v=0".to_string()], LOCAL_OFFER_TIE_BREAKER);
        let value = serde_json::to_value(&offer).unwrap();

        assert_eq!(
            value,
            json!({
                "messageType": "OFFER",
                "version": "2",
                "seq": 1,
                "sdps": ["v=0"],
                "tieBreaker": 4_294_967_294_u32,
            })
        );
    }

    #[test]
    fn test_deserialize_tolerates_missing_optional_fields() {
        let msg: RoapMessage =
            serde_json::from_value(json!({"messageType": "OK", "seq": 7})).unwrap();
        assert_eq!(msg.message_type, RoapMessageType::Ok);
        assert_eq!(msg.version, ROAP_VERSION);
        assert!(msg.tie_breaker.is_none());
        assert!(msg.headers.is_empty());
    }

    #[test]
    fn test_error_message_fields() {
        let msg: RoapMessage = serde_json::from_value(json!({
            "messageType": "ERROR",
            "seq": 3,
            "errorType": "OUT_OF_ORDER",
            "errorCause": "seq mismatch"
        }))
        .unwrap();
        assert_eq!(msg.error_type.as_deref(), Some("OUT_OF_ORDER"));
        assert_eq!(msg.error_cause.as_deref(), Some("seq mismatch"));
    }

    #[test]
    fn test_turn_discovery_request_shape() {
        let msg = RoapMessage::turn_discovery_request();
        assert_eq!(msg.seq, TURN_DISCOVERY_SEQ);
        assert!(msg.has_header(HEADER_INCLUDE_ANSWER_IN_HTTP_RESPONSE));
        assert!(msg.has_header(HEADER_NO_OK_IN_TRANSACTION));
        assert!(msg.message_type.is_turn_discovery());
    }

    #[test]
    fn test_header_value_matches_by_prefix() {
        let msg = RoapMessage::turn_discovery_response(vec![
            "x-cisco-turn-url=turns:relay:443".to_string(),
            "x-cisco-turn-url-extra=ignored".to_string(),
        ]);
        assert_eq!(msg.header_value("x-cisco-turn-url"), Some("turns:relay:443"));
        assert_eq!(msg.header_value("x-cisco-turn-password"), None);
    }
}
