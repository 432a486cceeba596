//! Pre-configured test data and a ready-made harness.
//!
//! Provides:
//! - Locus snapshots and range-based deltas
//! - TURN discovery responses (complete, partial, embedded in HTTP replies)
//! - `CallbackRecorder` capturing `on_sequence_finished`/`on_delta_applied`
//! - `TestHarness`, bundling every mock into `MeetingDependencies`

use crate::mock_locus::{FixedJitter, MockLifecycle, MockLocusFetcher};
use crate::mock_media::{MockNegotiator, MockReachability};
use crate::mock_transport::MockTransport;
use common::types::CorrelationId;
use signaling_core::actors::{MeetingSignalingActor, MeetingSignalingHandle};
use signaling_core::collaborators::{
    JitterSource, LocusFetcher, MediaNegotiator, MediaResponse, MeetingDependencies,
    MeetingLifecycle, Reachability, SignalingCallbacks, SignalingTransport,
};
use signaling_core::config::Config;
use signaling_core::locus::{LocusDelta, LocusSequence, LocusSnapshot};
use signaling_core::roap::message::HEADER_NO_OK_IN_TRANSACTION;
use signaling_core::roap::RoapMessage;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Base URL used by snapshot fixtures.
pub const TEST_LOCUS_URL: &str = "https://locus.test/loci/1";

/// Sync URL used by snapshot fixtures.
pub const TEST_SYNC_URL: &str = "https://locus.test/loci/1/sync";

pub const TEST_TURN_URL: &str = "turns:relay.test:443?transport=tcp";
pub const TEST_TURN_USERNAME: &str = "relay-user";
pub const TEST_TURN_PASSWORD: &str = "relay-pass";

static TRACING: Once = Once::new();

/// Install a test subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A random meeting id.
#[must_use]
pub fn random_meeting_id() -> CorrelationId {
    CorrelationId::from(format!("meeting-{}", Uuid::new_v4()))
}

/// Configuration with short, round timeouts.
#[must_use]
pub fn test_config() -> Config {
    Config {
        client_id: "signaling-test".to_string(),
        turn_discovery_enabled: true,
        turn_discovery_timeout: Duration::from_secs(10),
        max_out_of_order_deltas: 5,
        stall_timeout: Duration::from_millis(2000),
        stall_jitter: Duration::from_millis(1000),
        meeting_channel_buffer: 64,
    }
}

// ============================================================================
// Locus
// ============================================================================

/// Full snapshot at range `[0, end]` with both URLs set.
#[must_use]
pub fn snapshot_at(end: u64) -> LocusSnapshot {
    LocusSnapshot {
        url: TEST_LOCUS_URL.to_string(),
        sequence: LocusSequence::range(0, end),
        sync_url: Some(TEST_SYNC_URL.to_string()),
        ..LocusSnapshot::default()
    }
}

/// Full snapshot at range `[0, end]` without a sync URL.
#[must_use]
pub fn snapshot_without_sync_url(end: u64) -> LocusSnapshot {
    LocusSnapshot {
        sync_url: None,
        ..snapshot_at(end)
    }
}

/// Delta advancing `base -> end`, carrying `{"seqMarker": end}`.
#[must_use]
pub fn delta(base: u64, end: u64) -> LocusDelta {
    let mut delta = LocusDelta::range(base, end);
    delta
        .payload
        .insert("seqMarker".to_string(), serde_json::json!(end));
    delta
}

// ============================================================================
// TURN discovery
// ============================================================================

/// The three `name=value` headers of a complete TURN response.
#[must_use]
pub fn turn_headers() -> Vec<String> {
    vec![
        format!("x-cisco-turn-url={TEST_TURN_URL}"),
        format!("x-cisco-turn-username={TEST_TURN_USERNAME}"),
        format!("x-cisco-turn-password={TEST_TURN_PASSWORD}"),
    ]
}

/// Complete response that expects a trailing `OK`.
#[must_use]
pub fn turn_response() -> RoapMessage {
    RoapMessage::turn_discovery_response(turn_headers())
}

/// Complete response that does not expect an `OK`.
#[must_use]
pub fn turn_response_no_ok() -> RoapMessage {
    let mut headers = turn_headers();
    headers.push(HEADER_NO_OK_IN_TRANSACTION.to_string());
    RoapMessage::turn_discovery_response(headers)
}

/// Response missing the password header.
#[must_use]
pub fn turn_response_missing_password() -> RoapMessage {
    let mut headers = turn_headers();
    headers.truncate(2);
    RoapMessage::turn_discovery_response(headers)
}

/// HTTP reply embedding `message` in `mediaConnections[0].remoteSdp`.
#[must_use]
pub fn media_response_with(message: &RoapMessage) -> MediaResponse {
    MediaResponse::with_embedded_roap("media-test", message).unwrap()
}

// ============================================================================
// Callbacks
// ============================================================================

/// Records every upstream callback.
#[derive(Debug, Default)]
pub struct CallbackRecorder {
    finished: Mutex<Vec<(CorrelationId, u64)>>,
    applied: Mutex<Vec<LocusSnapshot>>,
}

impl CallbackRecorder {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Callbacks that record into `self`.
    #[must_use]
    pub fn callbacks(self: &Arc<Self>) -> SignalingCallbacks {
        let finished = Arc::clone(self);
        let applied = Arc::clone(self);
        SignalingCallbacks {
            on_sequence_finished: Arc::new(move |meeting_id, seq| {
                finished
                    .finished
                    .lock()
                    .unwrap()
                    .push((meeting_id.clone(), seq));
            }),
            on_delta_applied: Arc::new(move |_, snapshot| {
                applied.applied.lock().unwrap().push(snapshot.clone());
            }),
        }
    }

    /// Finished sequence numbers, in callback order.
    #[must_use]
    pub fn finished_seqs(&self) -> Vec<u64> {
        self.finished
            .lock()
            .unwrap()
            .iter()
            .map(|(_, seq)| *seq)
            .collect()
    }

    /// Positions of the published working copies, in callback order.
    #[must_use]
    pub fn applied_positions(&self) -> Vec<u64> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.sequence.position())
            .collect()
    }

    #[must_use]
    pub fn applied(&self) -> Vec<LocusSnapshot> {
        self.applied.lock().unwrap().clone()
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Every mock plus the `MeetingDependencies` wired from them.
pub struct TestHarness {
    pub config: Config,
    pub transport: Arc<MockTransport>,
    pub negotiator: Arc<MockNegotiator>,
    pub reachability: Arc<MockReachability>,
    pub fetcher: Arc<MockLocusFetcher>,
    pub lifecycle: Arc<MockLifecycle>,
    pub recorder: Arc<CallbackRecorder>,
    pub jitter: FixedJitter,
}

impl TestHarness {
    #[must_use]
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::default()
    }

    /// Harness with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn deps(&self) -> MeetingDependencies {
        MeetingDependencies {
            transport: Arc::clone(&self.transport) as Arc<dyn SignalingTransport>,
            negotiator: Arc::clone(&self.negotiator) as Arc<dyn MediaNegotiator>,
            reachability: Arc::clone(&self.reachability) as Arc<dyn Reachability>,
            fetcher: Arc::clone(&self.fetcher) as Arc<dyn LocusFetcher>,
            lifecycle: Arc::clone(&self.lifecycle) as Arc<dyn MeetingLifecycle>,
            jitter: Arc::new(self.jitter) as Arc<dyn JitterSource>,
            callbacks: self.recorder.callbacks(),
        }
    }

    /// Spawn a meeting actor wired to this harness.
    #[must_use]
    pub fn spawn_meeting(&self, meeting_id: &str) -> (MeetingSignalingHandle, JoinHandle<()>) {
        MeetingSignalingActor::spawn(
            CorrelationId::from(meeting_id),
            &self.config,
            self.deps(),
            CancellationToken::new(),
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TestHarness`.
#[derive(Default)]
pub struct TestHarnessBuilder {
    config: Option<Config>,
    transport: Option<MockTransport>,
    negotiator: Option<MockNegotiator>,
    reachability: Option<MockReachability>,
    fetcher: Option<MockLocusFetcher>,
    jitter: Option<Duration>,
}

impl TestHarnessBuilder {
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: MockTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn negotiator(mut self, negotiator: MockNegotiator) -> Self {
        self.negotiator = Some(negotiator);
        self
    }

    #[must_use]
    pub fn reachability(mut self, reachability: MockReachability) -> Self {
        self.reachability = Some(reachability);
        self
    }

    #[must_use]
    pub fn fetcher(mut self, fetcher: MockLocusFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Jitter added to every stall timer (default zero).
    #[must_use]
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Some(jitter);
        self
    }

    #[must_use]
    pub fn build(self) -> TestHarness {
        TestHarness {
            config: self.config.unwrap_or_else(test_config),
            transport: Arc::new(self.transport.unwrap_or_default()),
            negotiator: Arc::new(self.negotiator.unwrap_or_else(MockNegotiator::answerer)),
            reachability: Arc::new(
                self.reachability
                    .unwrap_or_else(MockReachability::unreachable),
            ),
            fetcher: Arc::new(self.fetcher.unwrap_or_default()),
            lifecycle: Arc::new(MockLifecycle::new()),
            recorder: CallbackRecorder::new(),
            jitter: FixedJitter(self.jitter.unwrap_or(Duration::ZERO)),
        }
    }
}
