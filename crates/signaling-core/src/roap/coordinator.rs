//! Routes signaling actions through the registry and the state machine.
//!
//! The coordinator is synchronous and performs no I/O. Each `submit` returns
//! the effects the owner must carry out (build and send an answer, apply an
//! answer and send `OK`, announce a finished sequence). Completion of those
//! effects is reported back with another `submit`.

use super::message::{RoapMessage, RoapMessageType};
use super::registry::SessionRegistry;
use super::state_machine::{RoapSignal, RoapState, StoreOutcome, StoredKind};
use crate::observability::metrics;
use common::types::CorrelationId;
use tracing::{debug, error, info, warn};

/// Input to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingAction {
    /// A message arrived from the server.
    Receive(RoapMessage),
    /// A message is about to be sent by this client.
    Send(RoapMessage),
    /// A previously submitted send was acknowledged by the transport.
    SendSuccess(RoapMessage),
    /// The local participant left the call; drop all signaling state.
    CallLeave,
    /// Forcefully drop one sequence (only way out of `ERROR`).
    Reset { seq: u64 },
}

/// Work the coordinator asks its owner to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoapEffect {
    /// Build an answer for `offer` and send it with `seq`.
    SendAnswer { seq: u64, offer: RoapMessage },
    /// Apply the remote `answer`, then send `OK` with `seq`.
    ApplyAnswerAndSendOk { seq: u64, answer: RoapMessage },
    /// `seq` finished. Fired once per sequence.
    SequenceFinished { seq: u64 },
}

/// Per-meeting signaling coordinator.
#[derive(Debug)]
pub struct RoapCoordinator {
    meeting_id: CorrelationId,
    registry: SessionRegistry,
    last_received: Option<(u64, RoapMessageType)>,
}

impl RoapCoordinator {
    /// Create a coordinator that owns `registry`.
    #[must_use]
    pub fn new(meeting_id: CorrelationId, registry: SessionRegistry) -> Self {
        Self {
            meeting_id,
            registry,
            last_received: None,
        }
    }

    #[must_use]
    pub fn meeting_id(&self) -> &CorrelationId {
        &self.meeting_id
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Whether any sequence is still in progress.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.registry.is_busy(&self.meeting_id)
    }

    /// Current state of `seq`, if it exists.
    #[must_use]
    pub fn state(&self, seq: u64) -> Option<RoapState> {
        self.registry
            .sequence(&self.meeting_id, seq)
            .map(super::state_machine::SequenceState::state)
    }

    /// Process one action.
    ///
    /// `owns_media` selects who builds answers and applies remote answers
    /// (see `MediaNegotiator::owns_media`).
    pub fn submit(&mut self, action: SignalingAction, owns_media: bool) -> Vec<RoapEffect> {
        let mut effects = Vec::new();

        match action {
            SignalingAction::Receive(message) => {
                if self.is_duplicate(&message) {
                    warn!(
                        target: "signaling.roap.coordinator",
                        meeting_id = %self.meeting_id,
                        seq = message.seq,
                        message_type = %message.message_type,
                        "Duplicate ROAP message from server, ignoring"
                    );
                    metrics::record_roap_duplicate();
                    return effects;
                }
                self.last_received = Some((message.seq, message.message_type));
                self.execute(message, true, owns_media, &mut effects);
            }

            SignalingAction::Send(message) => {
                self.execute(message, false, owns_media, &mut effects);
            }

            SignalingAction::SendSuccess(message) => {
                debug!(
                    target: "signaling.roap.coordinator",
                    meeting_id = %self.meeting_id,
                    seq = message.seq,
                    message_type = %message.message_type,
                    "ROAP message delivered"
                );
            }

            SignalingAction::CallLeave => {
                info!(
                    target: "signaling.roap.coordinator",
                    meeting_id = %self.meeting_id,
                    "Call leave, dropping signaling session"
                );
                self.registry.delete_session(&self.meeting_id);
                self.last_received = None;
            }

            SignalingAction::Reset { seq } => {
                info!(
                    target: "signaling.roap.coordinator",
                    meeting_id = %self.meeting_id,
                    seq,
                    "Resetting ROAP sequence"
                );
                self.registry.delete_sequence(&self.meeting_id, seq);
            }
        }

        effects
    }

    fn is_duplicate(&self, message: &RoapMessage) -> bool {
        self.last_received == Some((message.seq, message.message_type))
    }

    fn execute(
        &mut self,
        message: RoapMessage,
        remote: bool,
        owns_media: bool,
        effects: &mut Vec<RoapEffect>,
    ) {
        let Some(signal) = RoapSignal::for_message(message.message_type, remote) else {
            debug!(
                target: "signaling.roap.coordinator",
                meeting_id = %self.meeting_id,
                message_type = %message.message_type,
                "Not an offer/answer message, ignoring"
            );
            return;
        };

        let seq = message.seq;
        let sequence = self.registry.get_or_create_sequence(&self.meeting_id, seq);

        if sequence.store(message, remote) == StoreOutcome::GlareDetected {
            warn!(
                target: "signaling.roap.coordinator",
                meeting_id = %self.meeting_id,
                seq,
                remote,
                "Glare condition, both sides offered"
            );
        }

        let before = sequence.state();
        let after = sequence.step(signal);

        debug!(
            target: "signaling.roap.coordinator",
            meeting_id = %self.meeting_id,
            seq,
            signal = ?signal,
            from = %before,
            to = %after,
            "ROAP transition"
        );

        if after == RoapState::Error && before != RoapState::Error {
            error!(
                target: "signaling.roap.coordinator",
                meeting_id = %self.meeting_id,
                seq,
                signal = ?signal,
                from = %before,
                "ROAP protocol violation, sequence moved to ERROR"
            );
            metrics::record_roap_protocol_violation();
        }

        self.perform(seq, owns_media, effects);
    }

    fn perform(&mut self, seq: u64, owns_media: bool, effects: &mut Vec<RoapEffect>) {
        loop {
            let Some(sequence) = self.registry.sequence(&self.meeting_id, seq) else {
                return;
            };

            match sequence.state() {
                RoapState::Init => {
                    if self.registry.finish_sequence(&self.meeting_id, seq) {
                        metrics::record_roap_sequence_finished();
                        effects.push(RoapEffect::SequenceFinished { seq });
                    }
                    return;
                }

                RoapState::WaitTxAnswer => {
                    if owns_media {
                        match sequence.stored(StoredKind::Offer) {
                            Some(offer) => effects.push(RoapEffect::SendAnswer {
                                seq: offer.message.seq,
                                offer: offer.message.clone(),
                            }),
                            None => warn!(
                                target: "signaling.roap.coordinator",
                                meeting_id = %self.meeting_id,
                                seq,
                                "Answer owed but no offer stored"
                            ),
                        }
                    }
                    return;
                }

                RoapState::WaitTxOk => {
                    if !owns_media {
                        match sequence.stored(StoredKind::Answer) {
                            Some(answer) => effects.push(RoapEffect::ApplyAnswerAndSendOk {
                                seq,
                                answer: answer.message.clone(),
                            }),
                            None => warn!(
                                target: "signaling.roap.coordinator",
                                meeting_id = %self.meeting_id,
                                seq,
                                "OK owed but no answer stored"
                            ),
                        }
                    }
                    return;
                }

                RoapState::Glare => {
                    let sequence = self.registry.get_or_create_sequence(&self.meeting_id, seq);
                    match sequence.resolve_glare() {
                        Some(winner) => {
                            info!(
                                target: "signaling.roap.coordinator",
                                meeting_id = %self.meeting_id,
                                seq,
                                winner = winner.as_str(),
                                "Resolved glare"
                            );
                            metrics::record_roap_glare(winner.as_str());
                            sequence.step(RoapSignal::GlareResolved(winner));
                        }
                        None => {
                            error!(
                                target: "signaling.roap.coordinator",
                                meeting_id = %self.meeting_id,
                                seq,
                                "Glare state without two offers"
                            );
                            metrics::record_roap_protocol_violation();
                            sequence.fail();
                            return;
                        }
                    }
                }

                RoapState::Error => {
                    error!(
                        target: "signaling.roap.coordinator",
                        meeting_id = %self.meeting_id,
                        seq,
                        "ROAP sequence in ERROR state"
                    );
                    return;
                }

                RoapState::WaitRxAnswer | RoapState::WaitRxOk => return,
            }
        }
    }
}
