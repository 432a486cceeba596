//! Per-meeting outbound media request serializer.
//!
//! Every media request for a meeting goes through one `RequestSerializer`.
//! At most one request is on the wire at a time. Requests submitted while one
//! is in flight are queued, and redundant mute-only requests are folded into
//! whatever is queued next. Callers folded together share one outcome.
//!
//! Mute state is not captured when a request is queued. It is read when the
//! request is dispatched, so a queued request always carries the latest
//! values.

use crate::collaborators::{
    MediaResponse, OutboundMediaRequest, OutboundPayload, SignalingTransport,
};
use crate::observability::metrics;
use crate::roap::message::RoapMessage;
use common::error::TransportError;
use common::types::CorrelationId;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

/// Which kind of request this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaRequestKind {
    Roap,
    LocalMute,
}

impl MediaRequestKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaRequestKind::Roap => "roap",
            MediaRequestKind::LocalMute => "local_mute",
        }
    }
}

/// A request submitted to the serializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    roap_message: Option<RoapMessage>,
    audio_muted: Option<bool>,
    video_muted: Option<bool>,
    reconnecting: bool,
}

impl MediaRequest {
    /// Carry a ROAP message.
    #[must_use]
    pub fn roap(message: RoapMessage) -> Self {
        Self {
            roap_message: Some(message),
            audio_muted: None,
            video_muted: None,
            reconnecting: false,
        }
    }

    /// Carry a ROAP message on a reconnect. The media id is left empty so the
    /// server allocates a new one.
    #[must_use]
    pub fn roap_reconnecting(message: RoapMessage) -> Self {
        Self {
            reconnecting: true,
            ..Self::roap(message)
        }
    }

    /// Update mute state only. `None` leaves that media type unchanged.
    #[must_use]
    pub fn local_mute(audio_muted: Option<bool>, video_muted: Option<bool>) -> Self {
        Self {
            roap_message: None,
            audio_muted,
            video_muted,
            reconnecting: false,
        }
    }

    #[must_use]
    pub fn kind(&self) -> MediaRequestKind {
        if self.roap_message.is_some() {
            MediaRequestKind::Roap
        } else {
            MediaRequestKind::LocalMute
        }
    }

    #[must_use]
    pub fn roap_message(&self) -> Option<&RoapMessage> {
        self.roap_message.as_ref()
    }
}

type Waiter = oneshot::Sender<Result<MediaResponse, TransportError>>;

struct QueuedRequest {
    request: MediaRequest,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueuedRequest>,
    in_flight: bool,
    latest_audio_muted: Option<bool>,
    latest_video_muted: Option<bool>,
    media_id: String,
}

impl QueueState {
    fn record_mute_intent(&mut self, request: &MediaRequest) {
        if let Some(audio) = request.audio_muted {
            self.latest_audio_muted = Some(audio);
        }
        if let Some(video) = request.video_muted {
            self.latest_video_muted = Some(video);
        }
    }

    /// Returns true when `request` was folded into an existing entry.
    fn enqueue(&mut self, request: MediaRequest, waiter: Waiter) -> bool {
        match request.kind() {
            MediaRequestKind::LocalMute => {
                // Whatever goes out next carries the latest mute state.
                if let Some(next) = self.queue.front_mut() {
                    next.waiters.push(waiter);
                    return true;
                }
            }
            MediaRequestKind::Roap => {
                let mut waiters = vec![waiter];
                let mut absorbed = false;
                self.queue.retain_mut(|queued| {
                    if queued.request.kind() == MediaRequestKind::LocalMute {
                        waiters.append(&mut queued.waiters);
                        absorbed = true;
                        false
                    } else {
                        true
                    }
                });
                self.queue.push_back(QueuedRequest { request, waiters });
                return absorbed;
            }
        }

        self.queue.push_back(QueuedRequest {
            request,
            waiters: vec![waiter],
        });
        false
    }

    fn build_outbound(&self, meeting_id: &CorrelationId, request: &MediaRequest) -> OutboundMediaRequest {
        let payload = match &request.roap_message {
            Some(message) => OutboundPayload::Roap {
                roap_message: message.clone(),
            },
            None => OutboundPayload::LocalMute,
        };
        let media_id = if request.reconnecting {
            String::new()
        } else {
            self.media_id.clone()
        };

        OutboundMediaRequest {
            meeting_id: meeting_id.clone(),
            media_id,
            // Never requested means muted.
            audio_muted: self.latest_audio_muted.unwrap_or(true),
            video_muted: self.latest_video_muted.unwrap_or(true),
            payload,
        }
    }
}

struct Inner {
    meeting_id: CorrelationId,
    transport: Arc<dyn SignalingTransport>,
    state: Mutex<QueueState>,
}

/// Serializes outbound media requests for one meeting.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct RequestSerializer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSerializer")
            .field("meeting_id", &self.inner.meeting_id)
            .finish_non_exhaustive()
    }
}

impl RequestSerializer {
    #[must_use]
    pub fn new(meeting_id: CorrelationId, transport: Arc<dyn SignalingTransport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                meeting_id,
                transport,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    #[must_use]
    pub fn meeting_id(&self) -> &CorrelationId {
        &self.inner.meeting_id
    }

    /// Media id assigned by the server in the last response that carried one.
    pub async fn media_id(&self) -> String {
        self.inner.state.lock().await.media_id.clone()
    }

    /// Whether a request is currently on the wire (or about to be).
    pub async fn is_in_flight(&self) -> bool {
        self.inner.state.lock().await.in_flight
    }

    /// Number of queued requests behind the in-flight one.
    pub async fn queued(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// Submit `request` and wait for the outcome of the wire request that
    /// eventually carries it.
    ///
    /// # Errors
    ///
    /// Returns the transport failure of that wire request. There is no
    /// retry. `TransportError::Cancelled` if the runtime dropped the request.
    pub async fn send(&self, request: MediaRequest) -> Result<MediaResponse, TransportError> {
        let (tx, rx) = oneshot::channel();
        let kind = request.kind();

        let start_dispatch = {
            let mut state = self.inner.state.lock().await;
            state.record_mute_intent(&request);

            if state.enqueue(request, tx) {
                debug!(
                    target: "signaling.media_request",
                    meeting_id = %self.inner.meeting_id,
                    kind = kind.as_str(),
                    "Request coalesced into queued request"
                );
                metrics::record_media_request_coalesced(kind.as_str());
            }

            if state.in_flight {
                false
            } else {
                state.in_flight = true;
                true
            }
        };

        if start_dispatch {
            tokio::spawn(dispatch_loop(Arc::clone(&self.inner)));
        }

        rx.await.map_err(|_| TransportError::Cancelled)?
    }
}

/// Sends queued requests one at a time until the queue is empty.
async fn dispatch_loop(inner: Arc<Inner>) {
    loop {
        let (job, outbound) = {
            let mut state = inner.state.lock().await;
            let Some(job) = state.queue.pop_front() else {
                state.in_flight = false;
                return;
            };
            let outbound = state.build_outbound(&inner.meeting_id, &job.request);
            (job, outbound)
        };

        let kind = job.request.kind();
        info!(
            target: "signaling.media_request",
            meeting_id = %inner.meeting_id,
            kind = kind.as_str(),
            audio_muted = outbound.audio_muted,
            video_muted = outbound.video_muted,
            waiters = job.waiters.len(),
            "Sending media request"
        );

        let started = Instant::now();
        let result = inner.transport.send_media_request(outbound).await;
        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_media_request(kind.as_str(), status, started.elapsed());

        match &result {
            Ok(response) => {
                if let Some(media_id) = response.media_id() {
                    inner.state.lock().await.media_id = media_id.to_string();
                }
            }
            Err(e) => warn!(
                target: "signaling.media_request",
                meeting_id = %inner.meeting_id,
                kind = kind.as_str(),
                error = %e,
                "Media request failed"
            ),
        }

        for waiter in job.waiters {
            // Caller may have given up; nothing to do then.
            let _ = waiter.send(result.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::collaborators::MediaConnection;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Semaphore;

    /// Records requests and blocks each one until a permit is released.
    struct GatedTransport {
        gate: Semaphore,
        requests: StdMutex<Vec<OutboundMediaRequest>>,
        fail: bool,
    }

    impl GatedTransport {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                requests: StdMutex::new(Vec::new()),
                fail,
            })
        }

        fn requests(&self) -> Vec<OutboundMediaRequest> {
            self.requests.lock().unwrap().clone()
        }

        async fn wait_for_requests(&self, n: usize) {
            while self.requests.lock().unwrap().len() < n {
                tokio::task::yield_now().await;
            }
        }
    }

    #[async_trait::async_trait]
    impl SignalingTransport for GatedTransport {
        async fn send_media_request(
            &self,
            request: OutboundMediaRequest,
        ) -> Result<MediaResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            self.gate.acquire().await.unwrap().forget();
            if self.fail {
                return Err(TransportError::Network("connection reset".into()));
            }
            Ok(MediaResponse {
                locus: None,
                media_connections: vec![MediaConnection {
                    media_id: "media-1".into(),
                    remote_sdp: None,
                }],
            })
        }
    }

    fn serializer(transport: &Arc<GatedTransport>) -> RequestSerializer {
        RequestSerializer::new(CorrelationId::from("m1"), transport.clone())
    }

    #[tokio::test]
    async fn test_single_request_uses_default_mute_state() {
        let transport = GatedTransport::new(false);
        let s = serializer(&transport);
        transport.gate.add_permits(1);

        let response = s.send(MediaRequest::roap(RoapMessage::ok(1))).await.unwrap();
        assert_eq!(response.media_id(), Some("media-1"));

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].audio_muted);
        assert!(sent[0].video_muted);
        assert_eq!(sent[0].media_id, "");
        assert_eq!(s.media_id().await, "media-1");
    }

    #[tokio::test]
    async fn test_mute_requests_coalesce_behind_in_flight_request() {
        let transport = GatedTransport::new(false);
        let s = serializer(&transport);

        let first = tokio::spawn({
            let s = s.clone();
            async move { s.send(MediaRequest::local_mute(Some(true), Some(true))).await }
        });
        transport.wait_for_requests(1).await;

        let mut followers = Vec::new();
        for audio in [false, true, false] {
            let s = s.clone();
            followers.push(tokio::spawn(async move {
                s.send(MediaRequest::local_mute(Some(audio), None)).await
            }));
        }
        while s.queued().await < 1 {
            tokio::task::yield_now().await;
        }
        // Let the three followers all land before releasing.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        transport.gate.add_permits(2);
        first.await.unwrap().unwrap();
        for follower in followers {
            follower.await.unwrap().unwrap();
        }

        let sent = transport.requests();
        assert_eq!(sent.len(), 2);
        assert!(!sent[1].audio_muted);
        assert!(sent[1].video_muted);
        assert!(!s.is_in_flight().await);
    }

    #[tokio::test]
    async fn test_roap_absorbs_queued_mute_request() {
        let transport = GatedTransport::new(false);
        let s = serializer(&transport);

        let first = tokio::spawn({
            let s = s.clone();
            async move { s.send(MediaRequest::roap(RoapMessage::ok(1))).await }
        });
        transport.wait_for_requests(1).await;

        let mute = tokio::spawn({
            let s = s.clone();
            async move { s.send(MediaRequest::local_mute(Some(false), Some(false))).await }
        });
        while s.queued().await < 1 {
            tokio::task::yield_now().await;
        }
        let roap = tokio::spawn({
            let s = s.clone();
            async move { s.send(MediaRequest::roap(RoapMessage::ok(2))).await }
        });
        while s
            .inner
            .state
            .lock()
            .await
            .queue
            .front()
            .map_or(true, |q| q.request.kind() != MediaRequestKind::Roap)
        {
            tokio::task::yield_now().await;
        }

        transport.gate.add_permits(2);
        first.await.unwrap().unwrap();
        mute.await.unwrap().unwrap();
        roap.await.unwrap().unwrap();

        let sent = transport.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].roap_message().unwrap().seq, 2);
        assert!(!sent[1].audio_muted);
        assert!(!sent[1].video_muted);
        assert_eq!(sent[1].media_id, "media-1");
    }

    #[tokio::test]
    async fn test_failure_reaches_every_coalesced_caller() {
        let transport = GatedTransport::new(true);
        let s = serializer(&transport);

        let first = tokio::spawn({
            let s = s.clone();
            async move { s.send(MediaRequest::local_mute(Some(true), None)).await }
        });
        transport.wait_for_requests(1).await;

        let a = tokio::spawn({
            let s = s.clone();
            async move { s.send(MediaRequest::local_mute(Some(false), None)).await }
        });
        while s.queued().await < 1 {
            tokio::task::yield_now().await;
        }
        let b = tokio::spawn({
            let s = s.clone();
            async move { s.send(MediaRequest::local_mute(None, Some(false))).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        transport.gate.add_permits(2);
        assert!(first.await.unwrap().is_err());
        let a = a.await.unwrap().unwrap_err();
        let b = b.await.unwrap().unwrap_err();
        assert_eq!(a, b);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_reconnecting_request_clears_media_id() {
        let transport = GatedTransport::new(false);
        let s = serializer(&transport);
        transport.gate.add_permits(2);

        s.send(MediaRequest::roap(RoapMessage::ok(1))).await.unwrap();
        s.send(MediaRequest::roap_reconnecting(RoapMessage::turn_discovery_request()))
            .await
            .unwrap();

        let sent = transport.requests();
        assert_eq!(sent[1].media_id, "");
    }
}
