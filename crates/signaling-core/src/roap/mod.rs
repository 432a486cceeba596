//! ROAP offer/answer signaling.
//!
//! - [`message`] - Wire payload types
//! - [`state_machine`] - Per-sequence finite state machine
//! - [`registry`] - Session and sequence bookkeeping with busy tracking
//! - [`coordinator`] - Routes actions into the state machine, yields effects
//! - [`turn_discovery`] - TURN relay credential exchange (`seq = 0`)

pub mod coordinator;
pub mod message;
pub mod registry;
pub mod state_machine;
pub mod turn_discovery;

pub use coordinator::{RoapCoordinator, RoapEffect, SignalingAction};
pub use message::{RoapMessage, RoapMessageType};
pub use registry::{SessionRegistry, SignalingSession};
pub use state_machine::{GlareWinner, RoapSignal, RoapState, SequenceState};
pub use turn_discovery::{
    TurnDiscovery, TurnDiscoveryRequest, TurnDiscoveryResult, TurnDiscoverySkipReason,
    TurnServerInfo,
};
