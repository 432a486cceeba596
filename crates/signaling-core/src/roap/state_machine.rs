//! Per-sequence ROAP state machine.
//!
//! Pure state: no I/O, no timers. The coordinator feeds signals in and turns
//! the resulting state into effects.
//!
//! ```text
//!            RX_OFFER                TX_ANSWER              RX_OK
//!   INIT ─────────────▶ WAIT_TX_ANSWER ─────────▶ WAIT_RX_OK ─────▶ INIT
//!     │                      │ TX_OFFER
//!     │ TX_OFFER             ▼
//!     │                    GLARE ──GLARE_RESOLVED──▶ WAIT_TX_ANSWER | WAIT_RX_ANSWER
//!     ▼                      ▲
//!   WAIT_RX_ANSWER ──RX_OFFER┘
//!     │ RX_ANSWER            TX_OK
//!     ▼               ──────────────▶ INIT
//!   WAIT_TX_OK
//! ```
//!
//! `ERROR` is a sink. Any `ERROR` message, or a signal the current state does
//! not expect, moves the sequence there.

use super::message::{RoapMessage, RoapMessageType};
use std::collections::HashMap;
use std::fmt;

/// State of one (meeting, seq) exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoapState {
    /// No exchange in progress. Reached initially and after completion.
    Init,
    /// Remote offer received, local answer owed.
    WaitTxAnswer,
    /// Local answer sent, remote `OK` owed.
    WaitRxOk,
    /// Local offer sent, remote answer owed.
    WaitRxAnswer,
    /// Remote answer received, local `OK` owed.
    WaitTxOk,
    /// Both sides offered for the same sequence.
    Glare,
    /// Protocol violation. Only deletion of the sequence leaves this state.
    Error,
}

impl RoapState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RoapState::Init => "INIT",
            RoapState::WaitTxAnswer => "WAIT_TX_ANSWER",
            RoapState::WaitRxOk => "WAIT_RX_OK",
            RoapState::WaitRxAnswer => "WAIT_RX_ANSWER",
            RoapState::WaitTxOk => "WAIT_TX_OK",
            RoapState::Glare => "GLARE",
            RoapState::Error => "ERROR",
        }
    }
}

impl fmt::Display for RoapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoapSignal {
    RxOffer,
    RxAnswer,
    RxOk,
    RxError,
    TxOffer,
    TxAnswer,
    TxOk,
    TxError,
    GlareResolved(GlareWinner),
}

impl RoapSignal {
    /// Signal for a message seen in the given direction.
    ///
    /// Returns `None` for TURN discovery messages, which never enter the
    /// offer/answer machine.
    #[must_use]
    pub fn for_message(message_type: RoapMessageType, remote: bool) -> Option<Self> {
        let signal = match (message_type, remote) {
            (RoapMessageType::Offer, true) => RoapSignal::RxOffer,
            (RoapMessageType::Answer, true) => RoapSignal::RxAnswer,
            (RoapMessageType::Ok, true) => RoapSignal::RxOk,
            (RoapMessageType::Error, true) => RoapSignal::RxError,
            (RoapMessageType::Offer, false) => RoapSignal::TxOffer,
            (RoapMessageType::Answer, false) => RoapSignal::TxAnswer,
            (RoapMessageType::Ok, false) => RoapSignal::TxOk,
            (RoapMessageType::Error, false) => RoapSignal::TxError,
            (RoapMessageType::TurnDiscoveryRequest | RoapMessageType::TurnDiscoveryResponse, _) => {
                return None
            }
        };
        Some(signal)
    }
}

/// Which side's offer survives glare resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlareWinner {
    Local,
    Remote,
}

impl GlareWinner {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            GlareWinner::Local => "local",
            GlareWinner::Remote => "remote",
        }
    }
}

/// Resolve glare by tie breaker. Missing values count as 0.
///
/// The smaller value wins. Equal values go to the remote side so that both
/// peers computing this independently agree on the outcome.
#[must_use]
pub fn glare_winner(local_tie_breaker: Option<u32>, remote_tie_breaker: Option<u32>) -> GlareWinner {
    let local = local_tie_breaker.unwrap_or(0);
    let remote = remote_tie_breaker.unwrap_or(0);
    if local < remote {
        GlareWinner::Local
    } else {
        GlareWinner::Remote
    }
}

/// Transition table.
#[must_use]
pub fn transition(state: RoapState, signal: RoapSignal) -> RoapState {
    use RoapSignal as S;
    use RoapState as St;

    match (state, signal) {
        (St::Error, _) => St::Error,
        (_, S::RxError | S::TxError) => St::Error,

        (St::Init, S::RxOffer) => St::WaitTxAnswer,
        (St::Init, S::TxOffer) => St::WaitRxAnswer,
        // Stray late message for an exchange that already completed.
        (St::Init, _) => St::Init,

        (St::WaitTxAnswer, S::TxAnswer) => St::WaitRxOk,
        (St::WaitTxAnswer, S::TxOffer) => St::Glare,

        (St::WaitRxOk, S::RxOk) => St::Init,

        (St::WaitRxAnswer, S::RxAnswer) => St::WaitTxOk,
        (St::WaitRxAnswer, S::RxOffer) => St::Glare,

        (St::WaitTxOk, S::TxOk) => St::Init,

        (St::Glare, S::GlareResolved(GlareWinner::Remote)) => St::WaitTxAnswer,
        (St::Glare, S::GlareResolved(GlareWinner::Local)) => St::WaitRxAnswer,

        _ => St::Error,
    }
}

/// Slot a message is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoredKind {
    Offer,
    Answer,
    Ok,
    Error,
    GlareOffer,
}

impl StoredKind {
    fn for_type(message_type: RoapMessageType) -> Option<Self> {
        match message_type {
            RoapMessageType::Offer => Some(StoredKind::Offer),
            RoapMessageType::Answer => Some(StoredKind::Answer),
            RoapMessageType::Ok => Some(StoredKind::Ok),
            RoapMessageType::Error => Some(StoredKind::Error),
            RoapMessageType::TurnDiscoveryRequest | RoapMessageType::TurnDiscoveryResponse => None,
        }
    }
}

/// A stored message tagged with its direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message: RoapMessage,
    pub remote: bool,
}

/// Outcome of storing a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// An `OFFER` was already held, the new one went to `GLARE_OFFER`.
    GlareDetected,
    /// Not an offer/answer message.
    Ignored,
}

/// State of a single sequence within a signaling session.
#[derive(Debug, Clone)]
pub struct SequenceState {
    state: RoapState,
    stored: HashMap<StoredKind, StoredMessage>,
    finished: bool,
}

impl Default for SequenceState {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RoapState::Init,
            stored: HashMap::new(),
            finished: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> RoapState {
        self.state
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn stored(&self, kind: StoredKind) -> Option<&StoredMessage> {
        self.stored.get(&kind)
    }

    /// Store `message`, diverting a second `OFFER` into `GLARE_OFFER`.
    pub fn store(&mut self, message: RoapMessage, remote: bool) -> StoreOutcome {
        let Some(kind) = StoredKind::for_type(message.message_type) else {
            return StoreOutcome::Ignored;
        };

        if kind == StoredKind::Offer && self.stored.contains_key(&StoredKind::Offer) {
            self.stored
                .insert(StoredKind::GlareOffer, StoredMessage { message, remote });
            return StoreOutcome::GlareDetected;
        }

        self.stored.insert(kind, StoredMessage { message, remote });
        StoreOutcome::Stored
    }

    /// Apply `signal` and return the new state.
    pub fn step(&mut self, signal: RoapSignal) -> RoapState {
        self.state = transition(self.state, signal);
        self.state
    }

    /// Pick the surviving offer and leave it in the `OFFER` slot.
    ///
    /// Returns `None` when the sequence does not hold two offers, which means
    /// glare cannot be resolved and the caller should treat it as a
    /// protocol violation.
    pub fn resolve_glare(&mut self) -> Option<GlareWinner> {
        let glare = self.stored.remove(&StoredKind::GlareOffer)?;
        let Some(original) = self.stored.remove(&StoredKind::Offer) else {
            self.stored.insert(StoredKind::GlareOffer, glare);
            return None;
        };

        let (local, remote) = if original.remote {
            (glare, original)
        } else {
            (original, glare)
        };

        let winner = glare_winner(local.message.tie_breaker, remote.message.tie_breaker);
        let kept = match winner {
            GlareWinner::Local => local,
            GlareWinner::Remote => remote,
        };
        self.stored.insert(StoredKind::Offer, kept);
        Some(winner)
    }

    /// Force the sequence into `ERROR`.
    pub(crate) fn fail(&mut self) {
        self.state = RoapState::Error;
    }

    /// Mark finished. Returns true only on the first call.
    pub(crate) fn mark_finished(&mut self) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        true
    }
}
