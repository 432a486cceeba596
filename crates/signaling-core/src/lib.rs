//! Signaling Core Library
//!
//! This library provides the signaling core of a real-time meeting client.
//! It is responsible for:
//!
//! - Per-meeting ROAP session and sequence bookkeeping (busy tracking)
//! - The ROAP offer/answer state machine, including glare resolution
//! - TURN discovery before the first offer
//! - Serializing outbound media requests so only one is in flight per meeting
//! - Ordered application of Locus state deltas with gap detection and resync
//!
//! # Architecture
//!
//! Protocol logic is written as plain synchronous state machines that return
//! effects. An actor per meeting owns those state machines, executes their
//! effects against injected collaborators and feeds the results back through
//! its mailbox:
//!
//! ```text
//! SignalingControllerActor (singleton per client)
//! └── supervises N MeetingSignalingActors
//!     └── MeetingSignalingActor (one per meeting)
//!         ├── RoapCoordinator ── SessionRegistry
//!         ├── DeltaSynchronizer
//!         ├── RequestSerializer (shared with TurnDiscovery)
//!         └── TurnDiscovery
//! ```
//!
//! Network transport, SDP generation, reachability probing, state fetches and
//! meeting teardown are collaborators behind the traits in [`collaborators`].
//!
//! # Modules
//!
//! - [`actors`] - Actor runtime (controller, per-meeting actor)
//! - [`collaborators`] - Traits for injected external services
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types
//! - [`locus`] - Locus sequence comparison and delta synchronization
//! - [`media_request`] - Per-meeting outbound request serializer
//! - [`observability`] - Metrics
//! - [`roap`] - ROAP messages, state machine, registry, coordinator, TURN discovery

pub mod actors;
pub mod collaborators;
pub mod config;
pub mod errors;
pub mod locus;
pub mod media_request;
pub mod observability;
pub mod roap;
