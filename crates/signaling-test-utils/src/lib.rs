//! # Signaling Test Utilities
//!
//! Mock collaborators and fixtures for testing the signaling core without
//! a network, a media stack or a Locus server.
//!
//! ## Modules
//!
//! - `mock_transport` - Recording, scriptable and gateable `SignalingTransport`
//! - `mock_media` - `MediaNegotiator` and `Reachability` mocks
//! - `mock_locus` - Scripted `LocusFetcher`, recording `MeetingLifecycle`, fixed jitter
//! - `fixtures` - Locus snapshots/deltas, TURN responses, a ready-made harness
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signaling_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = TestHarness::builder()
//!         .transport(MockTransport::gated())
//!         .build();
//!
//!     let (handle, _task) = harness.spawn_meeting("meeting-123");
//!     // Drive the meeting, then release the transport...
//!     harness.transport.release(1);
//! }
//! ```

pub mod fixtures;
pub mod mock_locus;
pub mod mock_media;
pub mod mock_transport;

pub use fixtures::*;
pub use mock_locus::*;
pub use mock_media::*;
pub use mock_transport::*;
