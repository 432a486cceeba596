//! Mock media negotiator and reachability probe.

use signaling_core::collaborators::{MediaNegotiator, Reachability};
use signaling_core::errors::NegotiationError;
use signaling_core::roap::RoapMessage;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// SDP the mock negotiator answers with.
pub const MOCK_ANSWER_SDP: &str = "v=0 mock-answer";

/// Mock `MediaNegotiator`.
#[derive(Debug)]
pub struct MockNegotiator {
    owns_media: bool,
    fail_build: bool,
    fail_apply: bool,
    build_calls: AtomicUsize,
    applied: Mutex<Vec<RoapMessage>>,
}

impl MockNegotiator {
    /// `owns_media = true`: the core builds answers to remote offers.
    #[must_use]
    pub fn answerer() -> Self {
        Self {
            owns_media: true,
            fail_build: false,
            fail_apply: false,
            build_calls: AtomicUsize::new(0),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// `owns_media = false`: the core applies remote answers and sends `OK`.
    #[must_use]
    pub fn offerer() -> Self {
        Self {
            owns_media: false,
            ..Self::answerer()
        }
    }

    #[must_use]
    pub fn failing_build() -> Self {
        Self {
            fail_build: true,
            ..Self::answerer()
        }
    }

    #[must_use]
    pub fn failing_apply() -> Self {
        Self {
            fail_apply: true,
            ..Self::offerer()
        }
    }

    #[must_use]
    pub fn build_calls(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }

    /// Remote answers applied so far.
    #[must_use]
    pub fn applied(&self) -> Vec<RoapMessage> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl MediaNegotiator for MockNegotiator {
    fn owns_media(&self) -> bool {
        self.owns_media
    }

    async fn build_answer(&self, offer: &RoapMessage) -> Result<Vec<String>, NegotiationError> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_build {
            return Err(NegotiationError::BuildAnswer(format!(
                "mock refused offer seq {}",
                offer.seq
            )));
        }
        Ok(vec![MOCK_ANSWER_SDP.to_string()])
    }

    async fn apply_answer(&self, answer: &RoapMessage) -> Result<(), NegotiationError> {
        if self.fail_apply {
            return Err(NegotiationError::ApplyAnswer(format!(
                "mock refused answer seq {}",
                answer.seq
            )));
        }
        self.applied.lock().unwrap().push(answer.clone());
        Ok(())
    }
}

/// Mock `Reachability` with a switchable result.
#[derive(Debug)]
pub struct MockReachability {
    reachable: AtomicBool,
    call_count: AtomicUsize,
}

impl MockReachability {
    #[must_use]
    pub fn reachable() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            call_count: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            reachable: AtomicBool::new(false),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Reachability for MockReachability {
    async fn is_any_public_cluster_reachable(&self) -> bool {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.reachable.load(Ordering::SeqCst)
    }
}
