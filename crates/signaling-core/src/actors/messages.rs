//! Actor message types.
//!
//! Requests carry a `respond_to` oneshot sender for the reply.

use crate::errors::SignalingError;
use crate::locus::{LocusDelta, LocusSnapshot, SyncKind};
use crate::roap::{RoapMessage, RoapState, SignalingAction};
use common::types::CorrelationId;
use tokio::sync::oneshot;

use super::meeting::MeetingSignalingHandle;

// ============================================================================
// Controller Messages
// ============================================================================

/// Messages sent to the `SignalingControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Spawn a meeting actor and return its handle.
    CreateMeeting {
        meeting_id: CorrelationId,
        respond_to: oneshot::Sender<Result<MeetingSignalingHandle, SignalingError>>,
    },

    /// Look up the handle of a running meeting actor.
    GetHandle {
        meeting_id: CorrelationId,
        respond_to: oneshot::Sender<Result<MeetingSignalingHandle, SignalingError>>,
    },

    /// Summarize one meeting.
    GetMeeting {
        meeting_id: CorrelationId,
        respond_to: oneshot::Sender<Result<MeetingInfo, SignalingError>>,
    },

    /// Stop and forget a meeting actor.
    RemoveMeeting {
        meeting_id: CorrelationId,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Stop accepting meetings and cancel every actor.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },
}

/// Controller status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub meeting_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Summary of one meeting as seen by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingInfo {
    pub meeting_id: CorrelationId,
    pub is_busy: bool,
    pub last_roap_seq: u64,
    /// Position of the last applied Locus state, if any.
    pub locus_position: Option<u64>,
    /// Set once resync failed for good.
    pub destroyed: bool,
}

// ============================================================================
// Meeting Messages
// ============================================================================

/// Messages sent to a `MeetingSignalingActor`.
#[derive(Debug)]
pub enum MeetingMessage {
    /// Feed a signaling action through the coordinator.
    Submit {
        action: SignalingAction,
        respond_to: oneshot::Sender<()>,
    },

    /// Send a locally initiated offer. Replies with the allocated `seq`
    /// once the offer is on the wire.
    SendOffer {
        sdps: Vec<String>,
        tie_breaker: u32,
        respond_to: oneshot::Sender<Result<u64, SignalingError>>,
    },

    /// Record and send a ROAP message built by the media stack. Replies with
    /// its `seq` once it is on the wire.
    SendRoap {
        message: RoapMessage,
        respond_to: oneshot::Sender<Result<u64, SignalingError>>,
    },

    /// An incremental Locus update arrived.
    LocusDelta {
        delta: LocusDelta,
        respond_to: oneshot::Sender<()>,
    },

    /// A full Locus snapshot arrived.
    LocusFullState {
        snapshot: LocusSnapshot,
        respond_to: oneshot::Sender<()>,
    },

    GetState {
        respond_to: oneshot::Sender<MeetingSignalingState>,
    },
}

/// Point-in-time view of one meeting actor.
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingSignalingState {
    pub meeting_id: CorrelationId,
    pub is_busy: bool,
    pub last_roap_seq: u64,
    /// State of the sequence `last_roap_seq`, if it still exists.
    pub last_roap_state: Option<RoapState>,
    /// ROAP sequences currently tracked, finished ones included.
    pub roap_sequences: usize,
    pub locus_position: Option<u64>,
    pub locus: Option<LocusSnapshot>,
    pub pending_deltas: usize,
    pub sync_in_flight: Option<SyncKind>,
    pub stall_timer_armed: bool,
    pub destroyed: bool,
}
