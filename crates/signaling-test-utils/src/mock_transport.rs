//! Mock signaling transport.
//!
//! Records every outbound media request. Responses come from a script
//! (consumed in order) and fall back to a default. A gated transport holds
//! each request until the test releases it, which is how tests keep a
//! request "in flight".
//!
//! # Example
//!
//! ```rust,ignore
//! use signaling_test_utils::MockTransport;
//!
//! let transport = MockTransport::gated()
//!     .with_response(Err(TransportError::Timeout));
//!
//! // ...issue requests...
//! transport.wait_for_requests(1).await;
//! transport.release(1);
//! ```

use common::error::TransportError;
use signaling_core::collaborators::{MediaResponse, OutboundMediaRequest, SignalingTransport};
use signaling_core::roap::RoapMessage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{Notify, Semaphore};

/// Mock `SignalingTransport`.
#[derive(Debug)]
pub struct MockTransport {
    gate: Option<Semaphore>,
    script: Mutex<VecDeque<Result<MediaResponse, TransportError>>>,
    default_response: Result<MediaResponse, TransportError>,
    requests: Mutex<Vec<OutboundMediaRequest>>,
    call_count: AtomicUsize,
    recorded: Notify,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            gate: None,
            script: Mutex::new(VecDeque::new()),
            default_response: Ok(MediaResponse::default()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
            recorded: Notify::new(),
        }
    }
}

impl MockTransport {
    /// Answers every request immediately with an empty success.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every request until [`Self::release`] lets it through.
    #[must_use]
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Fails every request that has no scripted response.
    #[must_use]
    pub fn failing(error: TransportError) -> Self {
        Self {
            default_response: Err(error),
            ..Self::default()
        }
    }

    /// Queue a response for the next unscripted request.
    #[must_use]
    pub fn with_response(self, response: Result<MediaResponse, TransportError>) -> Self {
        self.push_response(response);
        self
    }

    /// Queue a response at any time.
    pub fn push_response(&self, response: Result<MediaResponse, TransportError>) {
        self.script.lock().unwrap().push_back(response);
    }

    /// Let `n` held requests complete.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Number of requests received (including ones still held).
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<OutboundMediaRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// ROAP messages carried by the received requests, in order.
    #[must_use]
    pub fn roap_messages(&self) -> Vec<RoapMessage> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.roap_message().cloned())
            .collect()
    }

    /// Wait until at least `n` requests have been received.
    pub async fn wait_for_requests(&self, n: usize) {
        loop {
            let notified = self.recorded.notified();
            if self.call_count() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait::async_trait]
impl SignalingTransport for MockTransport {
    async fn send_media_request(
        &self,
        request: OutboundMediaRequest,
    ) -> Result<MediaResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.recorded.notify_waiters();

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| TransportError::Cancelled)?
                .forget();
        }

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.default_response.clone())
    }
}
