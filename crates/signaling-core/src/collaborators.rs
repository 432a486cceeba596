//! Interfaces to the services the signaling core depends on.
//!
//! Each collaborator is an `async_trait` object injected at construction.
//! Test doubles live in the `signaling-test-utils` crate.

use crate::errors::NegotiationError;
use crate::locus::LocusSnapshot;
use crate::roap::message::RoapMessage;
use common::error::TransportError;
use common::types::CorrelationId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Transport
// ============================================================================

/// What an outbound media request carries besides mute state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundPayload {
    /// A ROAP message (offer, answer, OK, TURN discovery).
    Roap {
        #[serde(rename = "roapMessage")]
        roap_message: RoapMessage,
    },
    /// Mute state only.
    LocalMute,
}

/// A fully resolved request, ready for the wire.
///
/// Mute values and media id are filled in by the `RequestSerializer` at
/// dispatch time, so they are always the freshest known values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMediaRequest {
    pub meeting_id: CorrelationId,
    pub media_id: String,
    pub audio_muted: bool,
    pub video_muted: bool,
    pub payload: OutboundPayload,
}

impl OutboundMediaRequest {
    /// The ROAP message carried, if any.
    #[must_use]
    pub fn roap_message(&self) -> Option<&RoapMessage> {
        match &self.payload {
            OutboundPayload::Roap { roap_message } => Some(roap_message),
            OutboundPayload::LocalMute => None,
        }
    }
}

/// One entry of `mediaConnections` in a media response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConnection {
    #[serde(default)]
    pub media_id: String,
    /// JSON-encoded object which may hold a `roapMessage`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_sdp: Option<String>,
}

/// Server reply to a media request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaResponse {
    /// Server state returned alongside the acknowledgement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locus: Option<serde_json::Value>,
    #[serde(default)]
    pub media_connections: Vec<MediaConnection>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddedRemoteSdp {
    roap_message: Option<RoapMessage>,
}

impl MediaResponse {
    /// Build a response embedding `message` the way the server does.
    pub fn with_embedded_roap(
        media_id: impl Into<String>,
        message: &RoapMessage,
    ) -> Result<Self, TransportError> {
        let remote_sdp = serde_json::to_string(&serde_json::json!({ "roapMessage": message }))?;
        Ok(Self {
            locus: None,
            media_connections: vec![MediaConnection {
                media_id: media_id.into(),
                remote_sdp: Some(remote_sdp),
            }],
        })
    }

    /// ROAP message embedded in `mediaConnections[0].remoteSdp`.
    ///
    /// `Ok(None)` when nothing is embedded. `Err` when something is embedded
    /// but cannot be decoded.
    pub fn embedded_roap_message(&self) -> Result<Option<RoapMessage>, TransportError> {
        let Some(remote_sdp) = self
            .media_connections
            .first()
            .and_then(|c| c.remote_sdp.as_deref())
            .filter(|s| !s.is_empty())
        else {
            return Ok(None);
        };

        let parsed: EmbeddedRemoteSdp = serde_json::from_str(remote_sdp)?;
        Ok(parsed.roap_message)
    }

    /// Media id assigned by the server, if any.
    #[must_use]
    pub fn media_id(&self) -> Option<&str> {
        self.media_connections
            .first()
            .map(|c| c.media_id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Sends media requests (PUT to the participant's media endpoint).
#[async_trait::async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send_media_request(
        &self,
        request: OutboundMediaRequest,
    ) -> Result<MediaResponse, TransportError>;
}

// ============================================================================
// Media negotiation
// ============================================================================

/// Owns SDP generation and application.
#[async_trait::async_trait]
pub trait MediaNegotiator: Send + Sync {
    /// Selects which step the core drives.
    ///
    /// When true the core builds and sends the answer to a remote offer.
    /// When false it applies a remote answer and sends the `OK`. The other
    /// step is left to the media stack, which reports it with
    /// `SignalingAction::Send`.
    fn owns_media(&self) -> bool;

    /// Build local answer SDPs for a remote offer.
    async fn build_answer(&self, offer: &RoapMessage) -> Result<Vec<String>, NegotiationError>;

    /// Apply a remote answer.
    async fn apply_answer(&self, answer: &RoapMessage) -> Result<(), NegotiationError>;
}

// ============================================================================
// Reachability
// ============================================================================

/// Result of UDP reachability probing.
#[async_trait::async_trait]
pub trait Reachability: Send + Sync {
    async fn is_any_public_cluster_reachable(&self) -> bool;
}

// ============================================================================
// Locus state fetch
// ============================================================================

/// Fetches Locus state for a resync.
#[async_trait::async_trait]
pub trait LocusFetcher: Send + Sync {
    /// `Ok(None)` means the server had nothing newer (empty body).
    async fn fetch_state(&self, url: &str) -> Result<Option<LocusSnapshot>, TransportError>;
}

// ============================================================================
// Meeting lifecycle
// ============================================================================

/// Why the core asked for a meeting to be torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingRemovedReason {
    /// Both the delta and the full resync failed.
    LocusDtoSyncFailed,
}

impl MeetingRemovedReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MeetingRemovedReason::LocusDtoSyncFailed => "locus_dto_sync_failed",
        }
    }
}

/// Owner of meeting objects.
#[async_trait::async_trait]
pub trait MeetingLifecycle: Send + Sync {
    async fn destroy_meeting(&self, meeting_id: &CorrelationId, reason: MeetingRemovedReason);
}

// ============================================================================
// Jitter
// ============================================================================

/// Random source for the stall timer.
pub trait JitterSource: Send + Sync {
    /// A duration in `[0, max]`.
    fn jitter(&self, max: Duration) -> Duration;
}

/// Uniformly random jitter from the thread RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter(&self, max: Duration) -> Duration {
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

// ============================================================================
// Callbacks
// ============================================================================

/// Fired exactly once per finished sequence.
pub type SequenceFinishedCallback = Arc<dyn Fn(&CorrelationId, u64) + Send + Sync>;

/// Fired once per applied (or resynced) Locus snapshot, in order.
pub type DeltaAppliedCallback = Arc<dyn Fn(&CorrelationId, &LocusSnapshot) + Send + Sync>;

/// Upstream notifications.
#[derive(Clone)]
pub struct SignalingCallbacks {
    pub on_sequence_finished: SequenceFinishedCallback,
    pub on_delta_applied: DeltaAppliedCallback,
}

impl Default for SignalingCallbacks {
    fn default() -> Self {
        Self {
            on_sequence_finished: Arc::new(|_, _| {}),
            on_delta_applied: Arc::new(|_, _| {}),
        }
    }
}

impl std::fmt::Debug for SignalingCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingCallbacks").finish_non_exhaustive()
    }
}

/// Everything a meeting actor needs from the outside world.
#[derive(Clone)]
pub struct MeetingDependencies {
    pub transport: Arc<dyn SignalingTransport>,
    pub negotiator: Arc<dyn MediaNegotiator>,
    pub reachability: Arc<dyn Reachability>,
    pub fetcher: Arc<dyn LocusFetcher>,
    pub lifecycle: Arc<dyn MeetingLifecycle>,
    pub jitter: Arc<dyn JitterSource>,
    pub callbacks: SignalingCallbacks,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::roap::message::RoapMessageType;

    #[test]
    fn test_embedded_roap_message_roundtrip() {
        let msg = RoapMessage::turn_discovery_response(vec!["x-cisco-turn-url=u".into()]);
        let response = MediaResponse::with_embedded_roap("media-1", &msg).unwrap();

        let embedded = response.embedded_roap_message().unwrap().unwrap();
        assert_eq!(embedded.message_type, RoapMessageType::TurnDiscoveryResponse);
        assert_eq!(response.media_id(), Some("media-1"));
    }

    #[test]
    fn test_missing_embedded_message() {
        assert!(MediaResponse::default()
            .embedded_roap_message()
            .unwrap()
            .is_none());

        let response = MediaResponse {
            locus: None,
            media_connections: vec![MediaConnection {
                media_id: String::new(),
                remote_sdp: Some("{\"type\":\"offer\"}".to_string()),
            }],
        };
        assert!(response.embedded_roap_message().unwrap().is_none());
        assert_eq!(response.media_id(), None);
    }

    #[test]
    fn test_garbage_embedded_message_is_an_error() {
        let response = MediaResponse {
            locus: None,
            media_connections: vec![MediaConnection {
                media_id: "m".to_string(),
                remote_sdp: Some("not json".to_string()),
            }],
        };
        assert!(response.embedded_roap_message().is_err());
    }

    #[test]
    fn test_random_jitter_is_bounded() {
        let jitter = RandomJitter;
        assert_eq!(jitter.jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(jitter.jitter(Duration::from_millis(50)) <= Duration::from_millis(50));
        }
    }

    #[test]
    fn test_outbound_request_serializes_payload_tag() {
        let request = OutboundMediaRequest {
            meeting_id: CorrelationId::from("m1"),
            media_id: "media".into(),
            audio_muted: true,
            video_muted: false,
            payload: OutboundPayload::LocalMute,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["payload"]["type"], "localMute");
        assert_eq!(value["audioMuted"], true);
        assert!(request.roap_message().is_none());
    }
}
