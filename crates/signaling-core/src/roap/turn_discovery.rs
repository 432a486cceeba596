//! TURN discovery.
//!
//! Retrieves TURN relay credentials with a fixed `seq = 0` exchange before
//! the first real offer:
//!
//! ```text
//! client                             server
//!  | -----TURN_DISCOVERY_REQUEST-----> |
//!  | <----TURN_DISCOVERY_RESPONSE----- |   (HTTP response body or push)
//!  | --------------OK----------------> |   (unless noOkInTransaction)
//! ```
//!
//! Discovery never fails outward. A failed attempt resolves with no TURN
//! info and no skip reason, and bumps `signaling_turn_discovery_total`
//! with `outcome="failure"`. A skipped attempt carries a reason.
//!
//! One exchange may be pending per instance. The pending exchange is a
//! single-slot completion handle (a oneshot channel) with a generation
//! number, so a late completion never clears a newer exchange.

use super::message::{RoapMessage, RoapMessageType, HEADER_NO_OK_IN_TRANSACTION, TURN_DISCOVERY_SEQ};
use crate::collaborators::{MediaResponse, Reachability};
use crate::config::Config;
use crate::errors::TurnDiscoveryError;
use crate::media_request::{MediaRequest, RequestSerializer};
use crate::observability::metrics;
use common::secret::SecretString;
use common::types::CorrelationId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, instrument, warn};

const HEADER_TURN_URL: &str = "x-cisco-turn-url";
const HEADER_TURN_USERNAME: &str = "x-cisco-turn-username";
const HEADER_TURN_PASSWORD: &str = "x-cisco-turn-password";

/// Delivery path label for responses embedded in the HTTP reply.
pub const FROM_HTTP_RESPONSE: &str = "in http response";

/// Delivery path label for responses pushed over the notification channel.
pub const FROM_PUSH: &str = "through push channel";

/// TURN relay credentials.
#[derive(Debug, Clone)]
pub struct TurnServerInfo {
    pub url: String,
    pub username: String,
    pub password: SecretString,
}

/// Why discovery did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDiscoverySkipReason {
    /// A public cluster is reachable directly, TURN is not needed.
    Reachability,
    /// Discovery is disabled in configuration.
    Config,
    /// Another exchange is still pending.
    AlreadyInProgress,
    /// The HTTP response did not embed the discovery response.
    MissingHttpResponse,
}

impl TurnDiscoverySkipReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TurnDiscoverySkipReason::Reachability => "reachability",
            TurnDiscoverySkipReason::Config => "config",
            TurnDiscoverySkipReason::AlreadyInProgress => "already in progress",
            TurnDiscoverySkipReason::MissingHttpResponse => "missing http response",
        }
    }
}

impl std::fmt::Display for TurnDiscoverySkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a discovery attempt.
///
/// | `turn_server_info` | `skipped_reason` | meaning   |
/// |--------------------|------------------|-----------|
/// | `Some`             | `None`           | success   |
/// | `None`             | `Some`           | skipped   |
/// | `None`             | `None`           | failed    |
#[derive(Debug, Clone, Default)]
pub struct TurnDiscoveryResult {
    pub turn_server_info: Option<TurnServerInfo>,
    pub skipped_reason: Option<TurnDiscoverySkipReason>,
}

impl TurnDiscoveryResult {
    fn success(info: TurnServerInfo) -> Self {
        Self {
            turn_server_info: Some(info),
            skipped_reason: None,
        }
    }

    fn skipped(reason: TurnDiscoverySkipReason) -> Self {
        Self {
            turn_server_info: None,
            skipped_reason: Some(reason),
        }
    }

    fn failed() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.turn_server_info.is_none() && self.skipped_reason.is_none()
    }
}

/// Result of `generate_turn_discovery_request_message`.
#[derive(Debug, Clone, Default)]
pub struct TurnDiscoveryRequest {
    /// Message to embed in the join request. `None` when skipped.
    pub roap_message: Option<RoapMessage>,
    pub skipped_reason: Option<TurnDiscoverySkipReason>,
}

/// A validated response.
#[derive(Debug)]
struct ResolvedResponse {
    info: TurnServerInfo,
    ok_required: bool,
}

type Completion = Result<ResolvedResponse, TurnDiscoveryError>;

#[derive(Debug)]
struct PendingExchange {
    generation: u64,
    /// Taken by the first response handled. `None` once resolved.
    responder: Option<oneshot::Sender<Completion>>,
    /// Taken by whoever waits for the response.
    receiver: Option<oneshot::Receiver<Completion>>,
}

#[derive(Debug, Default)]
struct ExchangeSlot {
    next_generation: u64,
    pending: Option<PendingExchange>,
}

/// Per-meeting TURN discovery.
pub struct TurnDiscovery {
    meeting_id: CorrelationId,
    serializer: RequestSerializer,
    reachability: Arc<dyn Reachability>,
    enabled: bool,
    timeout: Duration,
    slot: Mutex<ExchangeSlot>,
}

impl std::fmt::Debug for TurnDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnDiscovery")
            .field("meeting_id", &self.meeting_id)
            .field("enabled", &self.enabled)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TurnDiscovery {
    #[must_use]
    pub fn new(
        serializer: RequestSerializer,
        reachability: Arc<dyn Reachability>,
        config: &Config,
    ) -> Self {
        Self {
            meeting_id: serializer.meeting_id().clone(),
            serializer,
            reachability,
            enabled: config.turn_discovery_enabled,
            timeout: config.turn_discovery_timeout,
            slot: Mutex::new(ExchangeSlot::default()),
        }
    }

    /// Whether an exchange is pending.
    pub async fn is_in_progress(&self) -> bool {
        self.slot.lock().await.pending.is_some()
    }

    /// Whether discovery would be skipped right now.
    pub async fn is_skipped(&self) -> bool {
        self.skip_reason().await.is_some()
    }

    async fn skip_reason(&self) -> Option<TurnDiscoverySkipReason> {
        if !self.enabled {
            return Some(TurnDiscoverySkipReason::Config);
        }
        if self.reachability.is_any_public_cluster_reachable().await {
            info!(
                target: "signaling.roap.turn",
                meeting_id = %self.meeting_id,
                "Public cluster reachable, TURN discovery not needed"
            );
            return Some(TurnDiscoverySkipReason::Reachability);
        }
        None
    }

    /// Skip check. `forced` bypasses the reachability check, never the
    /// configuration switch.
    async fn check_skip(&self, forced: bool) -> Option<TurnDiscoverySkipReason> {
        if forced {
            return (!self.enabled).then_some(TurnDiscoverySkipReason::Config);
        }
        self.skip_reason().await
    }

    /// Open a new exchange. `None` if one is already pending.
    async fn begin_exchange(&self) -> Option<u64> {
        let mut slot = self.slot.lock().await;
        if slot.pending.is_some() {
            return None;
        }
        let generation = slot.next_generation;
        slot.next_generation += 1;
        let (tx, rx) = oneshot::channel();
        slot.pending = Some(PendingExchange {
            generation,
            responder: Some(tx),
            receiver: Some(rx),
        });
        Some(generation)
    }

    /// Retire exchange `generation` if it is still the pending one.
    async fn end_exchange(&self, generation: u64) {
        let mut slot = self.slot.lock().await;
        if slot
            .pending
            .as_ref()
            .is_some_and(|p| p.generation == generation)
        {
            slot.pending = None;
        }
    }

    async fn pending_generation(&self) -> Option<u64> {
        self.slot.lock().await.pending.as_ref().map(|p| p.generation)
    }

    /// Run a full discovery exchange.
    ///
    /// Never fails: problems resolve as a failed `TurnDiscoveryResult`.
    #[instrument(skip_all, name = "signaling.turn.discover", fields(meeting_id = %self.meeting_id))]
    pub async fn do_turn_discovery(&self, is_reconnecting: bool, is_forced: bool) -> TurnDiscoveryResult {
        if let Some(reason) = self.check_skip(is_forced).await {
            return Self::report_skip(reason);
        }

        let Some(generation) = self.begin_exchange().await else {
            warn!(
                target: "signaling.roap.turn",
                meeting_id = %self.meeting_id,
                "TURN discovery already in progress"
            );
            return Self::report_skip(TurnDiscoverySkipReason::AlreadyInProgress);
        };

        info!(
            target: "signaling.roap.turn",
            meeting_id = %self.meeting_id,
            is_reconnecting,
            "Sending TURN_DISCOVERY_REQUEST"
        );

        let message = RoapMessage::turn_discovery_request();
        let request = if is_reconnecting {
            MediaRequest::roap_reconnecting(message)
        } else {
            MediaRequest::roap(message)
        };

        let outcome = match self.serializer.send(request).await {
            Ok(response) => self.complete_exchange(generation, &response, true).await,
            Err(e) => Err(TurnDiscoveryError::Transport(e)),
        };
        self.finish(generation, outcome).await
    }

    /// Start an exchange without sending, for embedding the request in a join.
    ///
    /// When this returns a message, the caller must later call
    /// [`Self::handle_turn_discovery_http_response`] or [`Self::abort`].
    pub async fn generate_turn_discovery_request_message(&self, is_forced: bool) -> TurnDiscoveryRequest {
        if self.is_in_progress().await {
            warn!(
                target: "signaling.roap.turn",
                meeting_id = %self.meeting_id,
                "TURN discovery already in progress"
            );
            return TurnDiscoveryRequest {
                roap_message: None,
                skipped_reason: Some(TurnDiscoverySkipReason::AlreadyInProgress),
            };
        }

        if let Some(reason) = self.check_skip(is_forced).await {
            return TurnDiscoveryRequest {
                roap_message: None,
                skipped_reason: Some(reason),
            };
        }

        if self.begin_exchange().await.is_none() {
            return TurnDiscoveryRequest {
                roap_message: None,
                skipped_reason: Some(TurnDiscoverySkipReason::AlreadyInProgress),
            };
        }

        info!(
            target: "signaling.roap.turn",
            meeting_id = %self.meeting_id,
            "Generated TURN_DISCOVERY_REQUEST"
        );
        TurnDiscoveryRequest {
            roap_message: Some(RoapMessage::turn_discovery_request()),
            skipped_reason: None,
        }
    }

    /// Complete an exchange started by `generate_turn_discovery_request_message`
    /// from the join response.
    ///
    /// `None` (no response) or a response without an embedded discovery
    /// message resolves as skipped with `MissingHttpResponse` and leaves the
    /// exchange pending, so the push response can still complete it. Call
    /// [`Self::abort`] to give up on it.
    ///
    /// # Errors
    ///
    /// `TurnDiscoveryError::NotInProgress` when no exchange is pending.
    #[instrument(skip_all, name = "signaling.turn.http_response", fields(meeting_id = %self.meeting_id))]
    pub async fn handle_turn_discovery_http_response(
        &self,
        response: Option<&MediaResponse>,
    ) -> Result<TurnDiscoveryResult, TurnDiscoveryError> {
        let Some(generation) = self.pending_generation().await else {
            warn!(
                target: "signaling.roap.turn",
                meeting_id = %self.meeting_id,
                "HTTP response handed over but TURN discovery is not in progress"
            );
            return Err(TurnDiscoveryError::NotInProgress);
        };

        let Some(response) = response else {
            return Ok(TurnDiscoveryResult::skipped(
                TurnDiscoverySkipReason::MissingHttpResponse,
            ));
        };

        match response.embedded_roap_message() {
            Ok(Some(_)) => {}
            Ok(None) => {
                metrics::record_turn_discovery_http_response_missing();
                return Ok(TurnDiscoveryResult::skipped(
                    TurnDiscoverySkipReason::MissingHttpResponse,
                ));
            }
            Err(e) => {
                return Ok(self
                    .finish(generation, Err(TurnDiscoveryError::Malformed(e.to_string())))
                    .await);
            }
        }

        let outcome = self.complete_exchange(generation, response, false).await;
        Ok(self.finish(generation, outcome).await)
    }

    /// Handle a `TURN_DISCOVERY_RESPONSE` from either delivery path.
    ///
    /// A no-op when no exchange is pending or the pending one already has
    /// its response.
    pub async fn handle_turn_discovery_response(&self, message: &RoapMessage, from: &str) {
        let mut slot = self.slot.lock().await;
        let Some(responder) = slot.pending.as_mut().and_then(|p| p.responder.take()) else {
            debug!(
                target: "signaling.roap.turn",
                meeting_id = %self.meeting_id,
                from,
                "TURN_DISCOVERY_RESPONSE with no pending exchange, ignoring"
            );
            return;
        };
        drop(slot);

        let completion = self.validate_response(message, from);
        // Waiter may have timed out already.
        let _ = responder.send(completion);
    }

    /// Abort the pending exchange, if any.
    pub async fn abort(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(mut pending) = slot.pending.take() {
            info!(
                target: "signaling.roap.turn",
                meeting_id = %self.meeting_id,
                "Aborting TURN discovery"
            );
            if let Some(responder) = pending.responder.take() {
                let _ = responder.send(Err(TurnDiscoveryError::Aborted));
            }
        }
    }

    fn validate_response(&self, message: &RoapMessage, from: &str) -> Completion {
        if message.message_type != RoapMessageType::TurnDiscoveryResponse {
            warn!(
                target: "signaling.roap.turn",
                meeting_id = %self.meeting_id,
                from,
                message_type = %message.message_type,
                "Unexpected message type for TURN discovery response"
            );
            return Err(TurnDiscoveryError::UnexpectedMessageType {
                from: from.to_string(),
                message_type: message.message_type.to_string(),
            });
        }

        let url = message.header_value(HEADER_TURN_URL);
        let username = message.header_value(HEADER_TURN_USERNAME);
        let password = message.header_value(HEADER_TURN_PASSWORD);

        let (Some(url), Some(username), Some(password)) = (url, username, password) else {
            warn!(
                target: "signaling.roap.turn",
                meeting_id = %self.meeting_id,
                from,
                header_count = message.headers.len(),
                "TURN discovery response missing some headers"
            );
            return Err(TurnDiscoveryError::MissingHeaders {
                from: from.to_string(),
            });
        };

        info!(
            target: "signaling.roap.turn",
            meeting_id = %self.meeting_id,
            from,
            url,
            "Received TURN_DISCOVERY_RESPONSE"
        );

        Ok(ResolvedResponse {
            info: TurnServerInfo {
                url: url.to_string(),
                username: username.to_string(),
                password: SecretString::from(password.to_string()),
            },
            ok_required: !message.has_header(HEADER_NO_OK_IN_TRANSACTION),
        })
    }

    /// Feed the HTTP-embedded response (if any), wait for the exchange to
    /// resolve and send the `OK` when required.
    async fn complete_exchange(
        &self,
        generation: u64,
        response: &MediaResponse,
        wait_for_push: bool,
    ) -> Result<TurnServerInfo, TurnDiscoveryError> {
        match response.embedded_roap_message() {
            Ok(Some(message)) => {
                self.handle_turn_discovery_response(&message, FROM_HTTP_RESPONSE)
                    .await;
            }
            Ok(None) if wait_for_push => {
                metrics::record_turn_discovery_http_response_missing();
                debug!(
                    target: "signaling.roap.turn",
                    meeting_id = %self.meeting_id,
                    "No TURN response in HTTP reply, waiting for push"
                );
            }
            Ok(None) => return Err(TurnDiscoveryError::Aborted),
            Err(e) => return Err(TurnDiscoveryError::Malformed(e.to_string())),
        }

        let resolved = self.wait_for_response(generation).await?;

        if resolved.ok_required {
            info!(
                target: "signaling.roap.turn",
                meeting_id = %self.meeting_id,
                "TURN discovery response requires OK, sending it"
            );
            metrics::record_turn_discovery_ok_required();
            self.serializer
                .send(MediaRequest::roap(RoapMessage::ok(TURN_DISCOVERY_SEQ)))
                .await
                .map_err(TurnDiscoveryError::Transport)?;
        }

        Ok(resolved.info)
    }

    async fn wait_for_response(&self, generation: u64) -> Completion {
        let receiver = {
            let mut slot = self.slot.lock().await;
            slot.pending
                .as_mut()
                .filter(|p| p.generation == generation)
                .and_then(|p| p.receiver.take())
        };
        let Some(receiver) = receiver else {
            return Err(TurnDiscoveryError::Aborted);
        };

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(_)) => Err(TurnDiscoveryError::Aborted),
            Err(_) => {
                warn!(
                    target: "signaling.roap.turn",
                    meeting_id = %self.meeting_id,
                    timeout_secs = self.timeout.as_secs(),
                    "No TURN discovery response before timeout"
                );
                Err(TurnDiscoveryError::Timeout)
            }
        }
    }

    async fn finish(
        &self,
        generation: u64,
        outcome: Result<TurnServerInfo, TurnDiscoveryError>,
    ) -> TurnDiscoveryResult {
        self.end_exchange(generation).await;

        match outcome {
            Ok(info) => {
                info!(
                    target: "signaling.roap.turn",
                    meeting_id = %self.meeting_id,
                    "TURN discovery completed"
                );
                metrics::record_turn_discovery("success");
                TurnDiscoveryResult::success(info)
            }
            Err(e) => {
                info!(
                    target: "signaling.roap.turn",
                    meeting_id = %self.meeting_id,
                    reason = e.reason(),
                    error = %e,
                    "TURN discovery failed, continuing without TURN"
                );
                metrics::record_turn_discovery("failure");
                TurnDiscoveryResult::failed()
            }
        }
    }

    fn report_skip(reason: TurnDiscoverySkipReason) -> TurnDiscoveryResult {
        metrics::record_turn_discovery("skipped");
        TurnDiscoveryResult::skipped(reason)
    }
}
