//! Session and sequence bookkeeping.
//!
//! A `SessionRegistry` is an explicitly owned value: each client (or each
//! meeting actor) holds its own instance, so nothing leaks between tests or
//! between concurrent clients in one process.
//!
//! Nothing here fails. Missing sessions and sequences are created lazily.

use super::state_machine::SequenceState;
use common::types::CorrelationId;
use std::collections::HashMap;
use tracing::debug;

/// Signaling state for one meeting.
#[derive(Debug, Default)]
pub struct SignalingSession {
    sequences: HashMap<u64, SequenceState>,
    active_sequence_count: usize,
}

impl SignalingSession {
    /// Number of sequences created and not yet finished.
    #[must_use]
    pub fn active_sequence_count(&self) -> usize {
        self.active_sequence_count
    }

    #[must_use]
    pub fn sequence(&self, seq: u64) -> Option<&SequenceState> {
        self.sequences.get(&seq)
    }

    #[must_use]
    pub fn sequence_count(&self) -> usize {
        self.sequences.len()
    }
}

/// Table of signaling sessions keyed by meeting.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<CorrelationId, SignalingSession>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the session for `meeting_id`, creating it if needed.
    pub fn get_or_create_session(&mut self, meeting_id: &CorrelationId) -> &mut SignalingSession {
        self.sessions.entry(meeting_id.clone()).or_insert_with(|| {
            debug!(
                target: "signaling.roap.registry",
                meeting_id = %meeting_id,
                "Creating signaling session"
            );
            SignalingSession::default()
        })
    }

    /// Fetch sequence `seq`, creating it (and counting it active) if needed.
    pub fn get_or_create_sequence(
        &mut self,
        meeting_id: &CorrelationId,
        seq: u64,
    ) -> &mut SequenceState {
        let session = self.get_or_create_session(meeting_id);
        let active = &mut session.active_sequence_count;
        session.sequences.entry(seq).or_insert_with(|| {
            *active += 1;
            debug!(
                target: "signaling.roap.registry",
                meeting_id = %meeting_id,
                seq,
                active_sequences = *active,
                "Creating sequence"
            );
            SequenceState::new()
        })
    }

    /// Drop the session and every sequence in it.
    pub fn delete_session(&mut self, meeting_id: &CorrelationId) {
        if let Some(session) = self.sessions.remove(meeting_id) {
            debug!(
                target: "signaling.roap.registry",
                meeting_id = %meeting_id,
                sequences = session.sequences.len(),
                "Deleted signaling session"
            );
        }
    }

    /// Remove one sequence. An unfinished sequence stops counting as active.
    pub fn delete_sequence(&mut self, meeting_id: &CorrelationId, seq: u64) {
        let Some(session) = self.sessions.get_mut(meeting_id) else {
            return;
        };

        if let Some(removed) = session.sequences.remove(&seq) {
            if !removed.is_finished() {
                session.active_sequence_count = session.active_sequence_count.saturating_sub(1);
            }
            debug!(
                target: "signaling.roap.registry",
                meeting_id = %meeting_id,
                seq,
                active_sequences = session.active_sequence_count,
                "Deleted sequence"
            );
        }
    }

    /// Whether the meeting has any unfinished sequence.
    #[must_use]
    pub fn is_busy(&self, meeting_id: &CorrelationId) -> bool {
        self.sessions
            .get(meeting_id)
            .is_some_and(|s| s.active_sequence_count > 0)
    }

    /// Mark `seq` finished. Idempotent.
    ///
    /// Returns true only when this call performed the transition, so the
    /// caller can fire its completion callback exactly once.
    pub fn finish_sequence(&mut self, meeting_id: &CorrelationId, seq: u64) -> bool {
        let Some(session) = self.sessions.get_mut(meeting_id) else {
            return false;
        };
        let Some(sequence) = session.sequences.get_mut(&seq) else {
            return false;
        };

        if !sequence.mark_finished() {
            return false;
        }

        session.active_sequence_count = session.active_sequence_count.saturating_sub(1);
        debug!(
            target: "signaling.roap.registry",
            meeting_id = %meeting_id,
            seq,
            active_sequences = session.active_sequence_count,
            "Sequence finished"
        );
        true
    }

    /// Read-only view of a session.
    #[must_use]
    pub fn session(&self, meeting_id: &CorrelationId) -> Option<&SignalingSession> {
        self.sessions.get(meeting_id)
    }

    /// Read-only view of a sequence.
    #[must_use]
    pub fn sequence(&self, meeting_id: &CorrelationId, seq: u64) -> Option<&SequenceState> {
        self.sessions.get(meeting_id)?.sequences.get(&seq)
    }
}
