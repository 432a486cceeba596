//! Actor runtime for the signaling core.
//!
//! ```text
//! SignalingControllerActor (one per client)
//! └── MeetingSignalingActor (one per meeting)
//! ```
//!
//! - [`controller`] - Supervisor, meeting creation and removal, shutdown
//! - [`meeting`] - Per-meeting actor owning the ROAP coordinator and delta synchronizer
//! - [`messages`] - Mailbox message and reply types
//! - [`metrics`] - Mailbox depth monitoring and actor counters

pub mod controller;
pub mod meeting;
pub mod messages;
pub mod metrics;

pub use controller::{SignalingControllerActor, SignalingControllerHandle};
pub use meeting::{MeetingSignalingActor, MeetingSignalingHandle};
pub use messages::{ControllerStatus, MeetingInfo, MeetingSignalingState};
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
