//! Mock Locus fetcher, meeting lifecycle and jitter.

use common::error::TransportError;
use common::types::CorrelationId;
use signaling_core::collaborators::{
    JitterSource, LocusFetcher, MeetingLifecycle, MeetingRemovedReason,
};
use signaling_core::locus::LocusSnapshot;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Mock `LocusFetcher`.
///
/// Scripted results are consumed in call order. Unscripted calls return an
/// empty body (`Ok(None)`).
#[derive(Debug, Default)]
pub struct MockLocusFetcher {
    script: Mutex<VecDeque<Result<Option<LocusSnapshot>, TransportError>>>,
    urls: Mutex<Vec<String>>,
}

impl MockLocusFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_result(self, result: Result<Option<LocusSnapshot>, TransportError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    /// URLs fetched so far, in order.
    #[must_use]
    pub fn fetched_urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LocusFetcher for MockLocusFetcher {
    async fn fetch_state(&self, url: &str) -> Result<Option<LocusSnapshot>, TransportError> {
        self.urls.lock().unwrap().push(url.to_string());
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(None))
    }
}

/// Mock `MeetingLifecycle` that records teardown requests.
#[derive(Debug, Default)]
pub struct MockLifecycle {
    destroyed: Mutex<Vec<(CorrelationId, MeetingRemovedReason)>>,
    notify: Notify,
}

impl MockLifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn destroyed(&self) -> Vec<(CorrelationId, MeetingRemovedReason)> {
        self.destroyed.lock().unwrap().clone()
    }

    /// Wait until at least one meeting was destroyed.
    pub async fn wait_for_destroy(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.destroyed.lock().unwrap().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait::async_trait]
impl MeetingLifecycle for MockLifecycle {
    async fn destroy_meeting(&self, meeting_id: &CorrelationId, reason: MeetingRemovedReason) {
        self.destroyed
            .lock()
            .unwrap()
            .push((meeting_id.clone(), reason));
        self.notify.notify_waiters();
    }
}

/// Deterministic jitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedJitter(pub Duration);

impl JitterSource for FixedJitter {
    fn jitter(&self, max: Duration) -> Duration {
        self.0.min(max)
    }
}
