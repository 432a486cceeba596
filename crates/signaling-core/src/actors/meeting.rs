//! `MeetingSignalingActor` - per-meeting actor that owns signaling state.
//!
//! Each `MeetingSignalingActor`:
//! - Owns the `RoapCoordinator` (and its `SessionRegistry`) for one meeting
//! - Owns the `DeltaSynchronizer` and drives its stall timer
//! - Shares a `RequestSerializer` and `TurnDiscovery` with its handle
//!
//! Network work (building or applying an answer, sending a ROAP message,
//! fetching Locus state) runs in tasks owned by a `JoinSet`. Their results
//! come back through the run loop, so the coordinator and the synchronizer
//! are only ever touched by the actor itself.

use crate::collaborators::{LocusFetcher, MediaNegotiator, MediaResponse, MeetingDependencies};
use crate::config::Config;
use crate::errors::{NegotiationError, SignalingError};
use crate::locus::{DeltaSynchronizer, LocusDelta, LocusSnapshot, SyncEffect, SyncKind};
use crate::media_request::{MediaRequest, RequestSerializer};
use crate::observability::metrics;
use crate::roap::turn_discovery::FROM_PUSH;
use crate::roap::{
    RoapCoordinator, RoapEffect, RoapMessage, RoapMessageType, RoapState, SessionRegistry,
    SignalingAction, SignalingSession, TurnDiscovery,
};

use super::messages::{MeetingMessage, MeetingSignalingState};
use super::metrics::{ActorType, MailboxMonitor};

use common::error::TransportError;
use common::types::CorrelationId;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Handle to a `MeetingSignalingActor`.
#[derive(Debug, Clone)]
pub struct MeetingSignalingHandle {
    meeting_id: CorrelationId,
    sender: mpsc::Sender<MeetingMessage>,
    cancel_token: CancellationToken,
    serializer: RequestSerializer,
    turn: Arc<TurnDiscovery>,
}

impl MeetingSignalingHandle {
    #[must_use]
    pub fn meeting_id(&self) -> &CorrelationId {
        &self.meeting_id
    }

    /// Feed a signaling action through the coordinator.
    ///
    /// Returns once the action has been processed. Effects it triggers
    /// (answer generation, sends) complete asynchronously.
    pub async fn submit(&self, action: SignalingAction) -> Result<(), SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MeetingMessage::Submit {
                action,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Send a locally initiated offer with the next sequence number.
    ///
    /// # Errors
    ///
    /// `Conflict` if a local offer is still in flight, `Transport` if the
    /// send failed.
    pub async fn send_offer(
        &self,
        sdps: Vec<String>,
        tie_breaker: u32,
    ) -> Result<u64, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MeetingMessage::SendOffer {
                sdps,
                tie_breaker,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Record and send a ROAP message produced by the media stack, for the
    /// step the core does not drive itself.
    pub async fn send_roap(&self, message: RoapMessage) -> Result<u64, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MeetingMessage::SendRoap {
                message,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Send the local mute state. Coalesces with queued requests.
    pub async fn send_local_mute(
        &self,
        audio_muted: Option<bool>,
        video_muted: Option<bool>,
    ) -> Result<MediaResponse, SignalingError> {
        Ok(self
            .serializer
            .send(MediaRequest::local_mute(audio_muted, video_muted))
            .await?)
    }

    /// Hand over an incremental Locus update.
    pub async fn locus_delta(&self, delta: LocusDelta) -> Result<(), SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MeetingMessage::LocusDelta {
                delta,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Hand over a full Locus snapshot.
    pub async fn locus_full_state(&self, snapshot: LocusSnapshot) -> Result<(), SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MeetingMessage::LocusFullState {
                snapshot,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn get_state(&self) -> Result<MeetingSignalingState, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MeetingMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Whether any ROAP sequence is still in progress.
    pub async fn is_busy(&self) -> Result<bool, SignalingError> {
        Ok(self.get_state().await?.is_busy)
    }

    /// The local participant left; drop all ROAP state for the meeting.
    pub async fn call_leave(&self) -> Result<(), SignalingError> {
        self.submit(SignalingAction::CallLeave).await
    }

    /// TURN discovery for this meeting. Shares the request queue with ROAP.
    #[must_use]
    pub fn turn_discovery(&self) -> Arc<TurnDiscovery> {
        Arc::clone(&self.turn)
    }

    #[must_use]
    pub fn request_serializer(&self) -> &RequestSerializer {
        &self.serializer
    }

    /// Cancel the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

type SendReply = oneshot::Sender<Result<u64, SignalingError>>;

/// Result of a task spawned by the actor.
enum TaskEvent {
    AnswerBuilt {
        seq: u64,
        result: Result<Vec<String>, NegotiationError>,
    },
    AnswerApplied {
        seq: u64,
        result: Result<(), NegotiationError>,
    },
    Sent {
        message: RoapMessage,
        result: Result<MediaResponse, TransportError>,
        respond_to: Option<SendReply>,
    },
    SyncCompleted {
        kind: SyncKind,
        result: Result<Option<LocusSnapshot>, TransportError>,
    },
    Destroyed,
}

/// The `MeetingSignalingActor` implementation.
pub struct MeetingSignalingActor {
    meeting_id: CorrelationId,
    receiver: mpsc::Receiver<MeetingMessage>,
    cancel_token: CancellationToken,
    coordinator: RoapCoordinator,
    sync: DeltaSynchronizer,
    serializer: RequestSerializer,
    turn: Arc<TurnDiscovery>,
    deps: MeetingDependencies,
    tasks: JoinSet<TaskEvent>,
    /// Highest ROAP `seq` this client has put on the wire.
    last_roap_seq: u64,
    /// `seq` of a local offer still being sent.
    offer_in_flight: Option<u64>,
    stall_deadline: Option<Instant>,
    mailbox: MailboxMonitor,
}

impl MeetingSignalingActor {
    /// Spawn a new meeting actor.
    ///
    /// # Arguments
    ///
    /// * `meeting_id` - Correlation id of the meeting
    /// * `config` - Timeouts and buffer sizes
    /// * `deps` - Injected collaborators and callbacks
    /// * `cancel_token` - Cancellation token (child of the controller's token)
    pub fn spawn(
        meeting_id: CorrelationId,
        config: &Config,
        deps: MeetingDependencies,
        cancel_token: CancellationToken,
    ) -> (MeetingSignalingHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.meeting_channel_buffer);

        let serializer = RequestSerializer::new(meeting_id.clone(), Arc::clone(&deps.transport));
        let turn = Arc::new(TurnDiscovery::new(
            serializer.clone(),
            Arc::clone(&deps.reachability),
            config,
        ));

        let actor = Self {
            meeting_id: meeting_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            coordinator: RoapCoordinator::new(meeting_id.clone(), SessionRegistry::new()),
            sync: DeltaSynchronizer::new(meeting_id.clone(), config, Arc::clone(&deps.jitter)),
            serializer: serializer.clone(),
            turn: Arc::clone(&turn),
            deps,
            tasks: JoinSet::new(),
            last_roap_seq: 0,
            offer_in_flight: None,
            stall_deadline: None,
            mailbox: MailboxMonitor::new(ActorType::Meeting, meeting_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = MeetingSignalingHandle {
            meeting_id,
            sender,
            cancel_token,
            serializer,
            turn,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "signaling.actor.meeting", fields(meeting_id = %self.meeting_id))]
    async fn run(mut self) {
        info!(
            target: "signaling.actor.meeting",
            meeting_id = %self.meeting_id,
            "MeetingSignalingActor started"
        );

        loop {
            let stall_deadline = self.stall_deadline;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "signaling.actor.meeting",
                        meeting_id = %self.meeting_id,
                        "MeetingSignalingActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                () = tokio::time::sleep_until(stall_deadline.unwrap_or_else(Instant::now)),
                    if stall_deadline.is_some() =>
                {
                    self.stall_deadline = None;
                    let effects = self.sync.on_stall_timeout();
                    self.run_sync_effects(effects);
                }

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.handle_task_result(joined);
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_received(self.receiver.len());
                            self.handle_message(message).await;
                        }
                        None => {
                            info!(
                                target: "signaling.actor.meeting",
                                meeting_id = %self.meeting_id,
                                "MeetingSignalingActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "signaling.actor.meeting",
            meeting_id = %self.meeting_id,
            last_roap_seq = self.last_roap_seq,
            messages_processed = self.mailbox.messages_processed(),
            "MeetingSignalingActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: MeetingMessage) {
        match message {
            MeetingMessage::Submit { action, respond_to } => {
                self.handle_submit(action).await;
                let _ = respond_to.send(());
            }

            MeetingMessage::SendOffer {
                sdps,
                tie_breaker,
                respond_to,
            } => {
                self.handle_send_offer(sdps, tie_breaker, respond_to);
            }

            MeetingMessage::SendRoap {
                message,
                respond_to,
            } => {
                self.transmit(message, Some(respond_to));
            }

            MeetingMessage::LocusDelta { delta, respond_to } => {
                let effects = self.sync.on_delta(delta);
                self.run_sync_effects(effects);
                let _ = respond_to.send(());
            }

            MeetingMessage::LocusFullState {
                snapshot,
                respond_to,
            } => {
                let effects = self.sync.on_full_state(snapshot);
                self.run_sync_effects(effects);
                let _ = respond_to.send(());
            }

            MeetingMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }
        }
    }

    async fn handle_submit(&mut self, action: SignalingAction) {
        if let SignalingAction::Receive(message) = &action {
            if message.message_type.is_turn_discovery() {
                if message.message_type == RoapMessageType::TurnDiscoveryResponse {
                    self.turn
                        .handle_turn_discovery_response(message, FROM_PUSH)
                        .await;
                } else {
                    debug!(
                        target: "signaling.actor.meeting",
                        meeting_id = %self.meeting_id,
                        message_type = %message.message_type,
                        "Ignoring inbound TURN discovery message"
                    );
                }
                return;
            }
        }

        if matches!(action, SignalingAction::CallLeave) {
            self.offer_in_flight = None;
        }

        let effects = self
            .coordinator
            .submit(action, self.deps.negotiator.owns_media());
        self.run_roap_effects(effects);
    }

    fn handle_send_offer(&mut self, sdps: Vec<String>, tie_breaker: u32, respond_to: SendReply) {
        if self.offer_in_flight.is_some() {
            let _ = respond_to.send(Err(SignalingError::Conflict(
                "Local offer already in flight".to_string(),
            )));
            return;
        }

        let seq = self.last_roap_seq + 1;
        self.offer_in_flight = Some(seq);
        debug!(
            target: "signaling.actor.meeting",
            meeting_id = %self.meeting_id,
            seq,
            "Sending local offer"
        );
        self.transmit(RoapMessage::offer(seq, sdps, tie_breaker), Some(respond_to));
    }

    /// Record `message` with the coordinator and send it.
    fn transmit(&mut self, message: RoapMessage, respond_to: Option<SendReply>) {
        let effects = self.coordinator.submit(
            SignalingAction::Send(message.clone()),
            self.deps.negotiator.owns_media(),
        );
        self.run_roap_effects(effects);

        let serializer = self.serializer.clone();
        self.tasks.spawn(async move {
            let result = serializer.send(MediaRequest::roap(message.clone())).await;
            TaskEvent::Sent {
                message,
                result,
                respond_to,
            }
        });
    }

    fn run_roap_effects(&mut self, effects: Vec<RoapEffect>) {
        for effect in effects {
            match effect {
                RoapEffect::SendAnswer { seq, offer } => {
                    let negotiator = Arc::clone(&self.deps.negotiator);
                    self.tasks.spawn(build_answer(negotiator, seq, offer));
                }
                RoapEffect::ApplyAnswerAndSendOk { seq, answer } => {
                    let negotiator = Arc::clone(&self.deps.negotiator);
                    self.tasks.spawn(apply_answer(negotiator, seq, answer));
                }
                RoapEffect::SequenceFinished { seq } => {
                    (self.deps.callbacks.on_sequence_finished)(&self.meeting_id, seq);
                }
            }
        }
    }

    fn run_sync_effects(&mut self, effects: Vec<SyncEffect>) {
        for effect in effects {
            match effect {
                SyncEffect::Applied(snapshot) => {
                    (self.deps.callbacks.on_delta_applied)(&self.meeting_id, &snapshot);
                }
                SyncEffect::ArmStallTimer(delay) => {
                    self.stall_deadline = Some(Instant::now() + delay);
                }
                SyncEffect::CancelStallTimer => {
                    self.stall_deadline = None;
                }
                SyncEffect::Fetch { url, kind } => {
                    let fetcher = Arc::clone(&self.deps.fetcher);
                    let meeting_id = self.meeting_id.clone();
                    self.tasks
                        .spawn(fetch_locus_state(fetcher, meeting_id, url, kind));
                }
                SyncEffect::Destroy(reason) => {
                    self.stall_deadline = None;
                    metrics::record_meeting_destroyed(reason.as_str());
                    error!(
                        target: "signaling.actor.meeting",
                        meeting_id = %self.meeting_id,
                        reason = reason.as_str(),
                        "Locus resync failed, destroying meeting"
                    );
                    let lifecycle = Arc::clone(&self.deps.lifecycle);
                    let meeting_id = self.meeting_id.clone();
                    self.tasks.spawn(async move {
                        lifecycle.destroy_meeting(&meeting_id, reason).await;
                        TaskEvent::Destroyed
                    });
                }
            }
        }
    }

    fn handle_task_result(&mut self, joined: Result<TaskEvent, JoinError>) {
        let event = match joined {
            Ok(event) => event,
            Err(e) => {
                if e.is_panic() {
                    error!(
                        target: "signaling.actor.meeting",
                        meeting_id = %self.meeting_id,
                        error = ?e,
                        "Signaling task panicked"
                    );
                }
                return;
            }
        };

        match event {
            TaskEvent::AnswerBuilt { seq, result } => self.on_answer_built(seq, result),
            TaskEvent::AnswerApplied { seq, result } => self.on_answer_applied(seq, result),
            TaskEvent::Sent {
                message,
                result,
                respond_to,
            } => self.on_sent(message, result, respond_to),
            TaskEvent::SyncCompleted { kind, result } => {
                let effects = self.sync.on_sync_result(kind, result);
                self.run_sync_effects(effects);
            }
            TaskEvent::Destroyed => {
                debug!(
                    target: "signaling.actor.meeting",
                    meeting_id = %self.meeting_id,
                    "Meeting destroy requested"
                );
            }
        }
    }

    fn on_answer_built(&mut self, seq: u64, result: Result<Vec<String>, NegotiationError>) {
        match result {
            Ok(sdps) => {
                if self.coordinator.state(seq) != Some(RoapState::WaitTxAnswer) {
                    debug!(
                        target: "signaling.actor.meeting",
                        meeting_id = %self.meeting_id,
                        seq,
                        "Sequence moved on while building answer, dropping it"
                    );
                    return;
                }
                self.transmit(RoapMessage::answer(seq, sdps), None);
            }
            Err(e) => {
                warn!(
                    target: "signaling.actor.meeting",
                    meeting_id = %self.meeting_id,
                    seq,
                    error = %e,
                    "Failed to build answer, sequence left pending"
                );
                metrics::record_roap_answer_failure(e.stage());
            }
        }
    }

    fn on_answer_applied(&mut self, seq: u64, result: Result<(), NegotiationError>) {
        match result {
            Ok(()) => {
                if self.coordinator.state(seq) != Some(RoapState::WaitTxOk) {
                    debug!(
                        target: "signaling.actor.meeting",
                        meeting_id = %self.meeting_id,
                        seq,
                        "Sequence moved on while applying answer, not sending OK"
                    );
                    return;
                }
                self.transmit(RoapMessage::ok(seq), None);
            }
            Err(e) => {
                warn!(
                    target: "signaling.actor.meeting",
                    meeting_id = %self.meeting_id,
                    seq,
                    error = %e,
                    "Failed to apply answer, sequence left pending"
                );
                metrics::record_roap_answer_failure(e.stage());
            }
        }
    }

    fn on_sent(
        &mut self,
        message: RoapMessage,
        result: Result<MediaResponse, TransportError>,
        respond_to: Option<SendReply>,
    ) {
        let seq = message.seq;
        let is_offer = message.message_type == RoapMessageType::Offer;
        if is_offer && self.offer_in_flight == Some(seq) {
            self.offer_in_flight = None;
        }

        let reply = match result {
            Ok(_) => {
                self.last_roap_seq = self.last_roap_seq.max(seq);
                let effects = self.coordinator.submit(
                    SignalingAction::SendSuccess(message),
                    self.deps.negotiator.owns_media(),
                );
                self.run_roap_effects(effects);
                Ok(seq)
            }
            Err(e) => {
                warn!(
                    target: "signaling.actor.meeting",
                    meeting_id = %self.meeting_id,
                    seq,
                    message_type = %message.message_type,
                    error = %e,
                    "Failed to send ROAP message"
                );
                match message.message_type {
                    RoapMessageType::Answer | RoapMessageType::Ok => {
                        metrics::record_roap_answer_failure("send");
                    }
                    RoapMessageType::Offer
                        if self.coordinator.state(seq) == Some(RoapState::WaitRxAnswer) =>
                    {
                        // Nobody will answer an offer that never left.
                        let effects = self.coordinator.submit(
                            SignalingAction::Reset { seq },
                            self.deps.negotiator.owns_media(),
                        );
                        self.run_roap_effects(effects);
                    }
                    _ => {}
                }
                Err(SignalingError::Transport(e))
            }
        };

        if let Some(respond_to) = respond_to {
            let _ = respond_to.send(reply);
        }
    }

    fn get_state(&self) -> MeetingSignalingState {
        MeetingSignalingState {
            meeting_id: self.meeting_id.clone(),
            is_busy: self.coordinator.is_busy(),
            last_roap_seq: self.last_roap_seq,
            last_roap_state: self.coordinator.state(self.last_roap_seq),
            roap_sequences: self
                .coordinator
                .registry()
                .session(&self.meeting_id)
                .map_or(0, SignalingSession::sequence_count),
            locus_position: self.sync.last_applied(),
            locus: self.sync.working_copy().cloned(),
            pending_deltas: self.sync.pending_count(),
            sync_in_flight: self.sync.sync_in_flight(),
            stall_timer_armed: self.stall_deadline.is_some(),
            destroyed: self.sync.is_destroyed(),
        }
    }

    /// Stop outstanding work.
    async fn graceful_shutdown(&mut self) {
        debug!(
            target: "signaling.actor.meeting",
            meeting_id = %self.meeting_id,
            tasks = self.tasks.len(),
            "Stopping meeting signaling tasks"
        );
        self.stall_deadline = None;
        self.turn.abort().await;
        self.tasks.shutdown().await;
    }
}

async fn build_answer(negotiator: Arc<dyn MediaNegotiator>, seq: u64, offer: RoapMessage) -> TaskEvent {
    let result = negotiator.build_answer(&offer).await;
    TaskEvent::AnswerBuilt { seq, result }
}

async fn apply_answer(negotiator: Arc<dyn MediaNegotiator>, seq: u64, answer: RoapMessage) -> TaskEvent {
    let result = negotiator.apply_answer(&answer).await;
    TaskEvent::AnswerApplied { seq, result }
}

#[instrument(skip_all, name = "signaling.locus.fetch", fields(meeting_id = %meeting_id, kind = kind.as_str()))]
async fn fetch_locus_state(
    fetcher: Arc<dyn LocusFetcher>,
    meeting_id: CorrelationId,
    url: String,
    kind: SyncKind,
) -> TaskEvent {
    let result = fetcher.fetch_state(&url).await;
    if let Err(e) = &result {
        warn!(
            target: "signaling.locus.sync",
            meeting_id = %meeting_id,
            kind = kind.as_str(),
            error = %e,
            "Locus resync fetch failed"
        );
    }
    TaskEvent::SyncCompleted { kind, result }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collaborators::{
        JitterSource, MeetingLifecycle, MeetingRemovedReason, OutboundMediaRequest, Reachability,
        SignalingCallbacks, SignalingTransport,
    };
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTransport {
        requests: Mutex<Vec<OutboundMediaRequest>>,
        fail: bool,
    }

    impl RecordingTransport {
        fn sent_roap(&self) -> Vec<RoapMessage> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter_map(|r| r.roap_message().cloned())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl SignalingTransport for RecordingTransport {
        async fn send_media_request(
            &self,
            request: OutboundMediaRequest,
        ) -> Result<MediaResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            if self.fail {
                Err(TransportError::Network("unreachable".into()))
            } else {
                Ok(MediaResponse::default())
            }
        }
    }

    /// `true` answers remote offers, `false` applies remote answers.
    struct FixedNegotiator(bool);

    #[async_trait::async_trait]
    impl MediaNegotiator for FixedNegotiator {
        fn owns_media(&self) -> bool {
            self.0
        }

        async fn build_answer(&self, _offer: &RoapMessage) -> Result<Vec<String>, NegotiationError> {
            Ok(vec!["answer-sdp".to_string()])
        }

        async fn apply_answer(&self, _answer: &RoapMessage) -> Result<(), NegotiationError> {
            Ok(())
        }
    }

    struct Reachable;

    #[async_trait::async_trait]
    impl Reachability for Reachable {
        async fn is_any_public_cluster_reachable(&self) -> bool {
            true
        }
    }

    struct EmptyFetcher;

    #[async_trait::async_trait]
    impl LocusFetcher for EmptyFetcher {
        async fn fetch_state(&self, _url: &str) -> Result<Option<LocusSnapshot>, TransportError> {
            Ok(None)
        }
    }

    struct NoopLifecycle;

    #[async_trait::async_trait]
    impl MeetingLifecycle for NoopLifecycle {
        async fn destroy_meeting(&self, _meeting_id: &CorrelationId, _reason: MeetingRemovedReason) {}
    }

    struct NoJitter;

    impl JitterSource for NoJitter {
        fn jitter(&self, _max: Duration) -> Duration {
            Duration::ZERO
        }
    }

    struct Harness {
        transport: Arc<RecordingTransport>,
        finished: Arc<Mutex<Vec<u64>>>,
        applied: Arc<Mutex<Vec<u64>>>,
        deps: MeetingDependencies,
    }

    fn harness(transport: RecordingTransport, owns_media: bool) -> Harness {
        let transport = Arc::new(transport);
        let finished = Arc::new(Mutex::new(Vec::new()));
        let applied = Arc::new(Mutex::new(Vec::new()));
        let finished_cb = Arc::clone(&finished);
        let applied_cb = Arc::clone(&applied);

        let deps = MeetingDependencies {
            transport: Arc::clone(&transport) as Arc<dyn SignalingTransport>,
            negotiator: Arc::new(FixedNegotiator(owns_media)),
            reachability: Arc::new(Reachable),
            fetcher: Arc::new(EmptyFetcher),
            lifecycle: Arc::new(NoopLifecycle),
            jitter: Arc::new(NoJitter),
            callbacks: SignalingCallbacks {
                on_sequence_finished: Arc::new(move |_, seq| finished_cb.lock().unwrap().push(seq)),
                on_delta_applied: Arc::new(move |_, snapshot| {
                    applied_cb
                        .lock()
                        .unwrap()
                        .push(snapshot.sequence.position());
                }),
            },
        };

        Harness {
            transport,
            finished,
            applied,
            deps,
        }
    }

    fn spawn(h: &Harness) -> MeetingSignalingHandle {
        let (handle, _task) = MeetingSignalingActor::spawn(
            CorrelationId::from("meeting-1"),
            &Config::default(),
            h.deps.clone(),
            CancellationToken::new(),
        );
        handle
    }

    /// Let spawned tasks run and report back.
    async fn settle(handle: &MeetingSignalingHandle) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
            let _ = handle.get_state().await;
        }
    }

    #[tokio::test]
    async fn test_meeting_actor_spawn() {
        let h = harness(RecordingTransport::default(), true);
        let handle = spawn(&h);

        assert_eq!(handle.meeting_id().as_str(), "meeting-1");
        assert!(!handle.is_cancelled());
        assert!(!handle.is_busy().await.unwrap());

        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_local_offers_allocate_increasing_seq() {
        let h = harness(RecordingTransport::default(), false);
        let handle = spawn(&h);

        let seq = handle.send_offer(vec!["offer".into()], 10).await.unwrap();
        assert_eq!(seq, 1);
        assert!(handle.is_busy().await.unwrap());

        let state = handle.get_state().await.unwrap();
        assert_eq!(state.last_roap_seq, 1);
        assert_eq!(state.last_roap_state, Some(RoapState::WaitRxAnswer));

        // Remote answers, we apply and send OK
        handle
            .submit(SignalingAction::Receive(RoapMessage::answer(1, vec!["a".into()])))
            .await
            .unwrap();
        settle(&handle).await;

        assert!(!handle.is_busy().await.unwrap());
        assert_eq!(*h.finished.lock().unwrap(), vec![1]);

        let sent = h.transport.sent_roap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], RoapMessage::ok(1));

        let seq = handle.send_offer(vec!["offer".into()], 10).await.unwrap();
        assert_eq!(seq, 2);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_remote_offer_is_answered() {
        let h = harness(RecordingTransport::default(), true);
        let handle = spawn(&h);

        handle
            .submit(SignalingAction::Receive(RoapMessage::offer(1, vec!["o".into()], 5)))
            .await
            .unwrap();
        settle(&handle).await;

        let sent = h.transport.sent_roap();
        assert_eq!(sent, vec![RoapMessage::answer(1, vec!["answer-sdp".into()])]);
        assert!(handle.is_busy().await.unwrap());

        handle
            .submit(SignalingAction::Receive(RoapMessage::ok(1)))
            .await
            .unwrap();
        assert!(!handle.is_busy().await.unwrap());
        assert_eq!(*h.finished.lock().unwrap(), vec![1]);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_failed_offer_send_clears_sequence() {
        let h = harness(
            RecordingTransport {
                fail: true,
                ..RecordingTransport::default()
            },
            false,
        );
        let handle = spawn(&h);

        let result = handle.send_offer(vec!["offer".into()], 1).await;
        assert!(matches!(result, Err(SignalingError::Transport(_))));
        assert!(!handle.is_busy().await.unwrap());
        assert_eq!(handle.get_state().await.unwrap().last_roap_seq, 0);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_locus_deltas_reach_callback_in_order() {
        let h = harness(RecordingTransport::default(), true);
        let handle = spawn(&h);

        handle
            .locus_full_state(LocusSnapshot {
                url: "https://locus/1".into(),
                sequence: crate::locus::LocusSequence::range(0, 10),
                ..LocusSnapshot::default()
            })
            .await
            .unwrap();
        handle.locus_delta(LocusDelta::range(20, 30)).await.unwrap();

        let state = handle.get_state().await.unwrap();
        assert_eq!(state.pending_deltas, 1);
        assert!(state.stall_timer_armed);

        handle.locus_delta(LocusDelta::range(10, 20)).await.unwrap();

        let state = handle.get_state().await.unwrap();
        assert_eq!(state.locus_position, Some(30));
        assert!(!state.stall_timer_armed);
        assert_eq!(*h.applied.lock().unwrap(), vec![10, 20, 30]);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_call_leave_clears_busy() {
        let h = harness(RecordingTransport::default(), true);
        let handle = spawn(&h);

        handle.send_offer(vec!["offer".into()], 1).await.unwrap();
        assert!(handle.is_busy().await.unwrap());

        handle.call_leave().await.unwrap();
        assert!(!handle.is_busy().await.unwrap());

        handle.cancel();
    }
}
