//! Ordered Locus delta application.
//!
//! `DeltaSynchronizer` is a synchronous state machine. Inputs are pushed
//! deltas, full snapshots, stall timer expiry and resync fetch results.
//! Outputs are [`SyncEffect`]s: snapshots to publish, timer changes, fetches
//! to start, and the one unrecoverable outcome (destroy the meeting).
//!
//! A delta is applied only when its base position equals the working copy's
//! position. Anything else is buffered by base position until the gap fills
//! or a resync supersedes it. Deltas are never applied twice.

use super::sequence::{compare_sequences, SequenceComparison};
use super::{LocusDelta, LocusSnapshot};
use crate::collaborators::{JitterSource, MeetingRemovedReason};
use crate::config::Config;
use crate::observability::metrics;
use common::error::TransportError;
use common::types::CorrelationId;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Which URL a resync fetch used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// The narrower `syncUrl`.
    Delta,
    /// The base state URL.
    Full,
}

impl SyncKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Delta => "delta",
            SyncKind::Full => "full",
        }
    }
}

/// Work for the owner of the synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEffect {
    /// Publish the new working copy.
    Applied(LocusSnapshot),
    /// (Re)arm the stall timer to fire after the given delay.
    ArmStallTimer(Duration),
    /// Disarm the stall timer.
    CancelStallTimer,
    /// Fetch state from `url` and report back with `on_sync_result`.
    Fetch { url: String, kind: SyncKind },
    /// Resync failed for good. Tear the meeting down.
    Destroy(MeetingRemovedReason),
}

/// Per-meeting delta synchronizer.
pub struct DeltaSynchronizer {
    meeting_id: CorrelationId,
    working_copy: Option<LocusSnapshot>,
    /// Buffered deltas keyed by base position.
    pending: BTreeMap<u64, LocusDelta>,
    sync_in_flight: Option<SyncKind>,
    stall_timer_armed: bool,
    destroyed: bool,
    max_out_of_order: usize,
    stall_timeout: Duration,
    stall_jitter: Duration,
    jitter: Arc<dyn JitterSource>,
}

impl std::fmt::Debug for DeltaSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaSynchronizer")
            .field("meeting_id", &self.meeting_id)
            .field("last_applied", &self.last_applied())
            .field("pending", &self.pending.len())
            .field("sync_in_flight", &self.sync_in_flight)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

impl DeltaSynchronizer {
    #[must_use]
    pub fn new(meeting_id: CorrelationId, config: &Config, jitter: Arc<dyn JitterSource>) -> Self {
        Self {
            meeting_id,
            working_copy: None,
            pending: BTreeMap::new(),
            sync_in_flight: None,
            stall_timer_armed: false,
            destroyed: false,
            max_out_of_order: config.max_out_of_order_deltas,
            stall_timeout: config.stall_timeout,
            stall_jitter: config.stall_jitter,
            jitter,
        }
    }

    /// Position of the working copy, `None` before the first snapshot.
    #[must_use]
    pub fn last_applied(&self) -> Option<u64> {
        self.working_copy.as_ref().map(|w| w.sequence.position())
    }

    #[must_use]
    pub fn working_copy(&self) -> Option<&LocusSnapshot> {
        self.working_copy.as_ref()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn sync_in_flight(&self) -> Option<SyncKind> {
        self.sync_in_flight
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// A full snapshot arrived (join response, push, or media response).
    pub fn on_full_state(&mut self, snapshot: LocusSnapshot) -> Vec<SyncEffect> {
        let mut effects = Vec::new();
        if self.destroyed {
            return effects;
        }

        let comparison = match &self.working_copy {
            None => SequenceComparison::UseIncoming,
            Some(current) => compare_sequences(&current.sequence, &snapshot.sequence),
        };

        debug!(
            target: "signaling.locus.sync",
            meeting_id = %self.meeting_id,
            comparison = comparison.as_str(),
            incoming = snapshot.sequence.position(),
            current = ?self.last_applied(),
            "Full Locus state received"
        );

        match comparison {
            SequenceComparison::UseIncoming => {
                self.working_copy = Some(snapshot);
                self.publish(&mut effects);
                self.drain(&mut effects);
                self.reevaluate(&mut effects);
            }
            SequenceComparison::UseCurrent => {}
            SequenceComparison::Desync => {
                warn!(
                    target: "signaling.locus.sync",
                    meeting_id = %self.meeting_id,
                    "Locus state out of sync, resyncing"
                );
                self.start_sync(&mut effects);
            }
        }

        effects
    }

    /// A delta arrived.
    pub fn on_delta(&mut self, delta: LocusDelta) -> Vec<SyncEffect> {
        let mut effects = Vec::new();
        if self.destroyed {
            metrics::record_locus_delta("dropped");
            return effects;
        }

        let base = delta.base_sequence.position();
        let target = delta.sequence.position();

        let Some(last) = self.last_applied() else {
            debug!(
                target: "signaling.locus.sync",
                meeting_id = %self.meeting_id,
                base,
                target,
                "Delta before first full state, buffering"
            );
            self.buffer(delta);
            return effects;
        };

        if target <= last {
            debug!(
                target: "signaling.locus.sync",
                meeting_id = %self.meeting_id,
                base,
                target,
                last_applied = last,
                "Stale delta, already applied"
            );
            metrics::record_locus_delta("stale");
            return effects;
        }

        if self.sync_in_flight.is_some() || base != last {
            debug!(
                target: "signaling.locus.sync",
                meeting_id = %self.meeting_id,
                base,
                target,
                last_applied = last,
                sync_in_flight = self.sync_in_flight.is_some(),
                "Delta out of order, buffering"
            );
            self.buffer(delta);
            self.reevaluate(&mut effects);
            return effects;
        }

        self.apply(delta, &mut effects);
        self.drain(&mut effects);
        self.reevaluate(&mut effects);
        effects
    }

    /// The stall timer fired.
    pub fn on_stall_timeout(&mut self) -> Vec<SyncEffect> {
        let mut effects = Vec::new();
        self.stall_timer_armed = false;
        if self.destroyed || self.pending.is_empty() {
            return effects;
        }

        info!(
            target: "signaling.locus.sync",
            meeting_id = %self.meeting_id,
            pending = self.pending.len(),
            last_applied = ?self.last_applied(),
            "Stalled on a Locus sequence gap, resyncing"
        );
        self.start_sync(&mut effects);
        effects
    }

    /// A resync fetch finished. `Ok(None)` means an empty body.
    pub fn on_sync_result(
        &mut self,
        kind: SyncKind,
        result: Result<Option<LocusSnapshot>, TransportError>,
    ) -> Vec<SyncEffect> {
        let mut effects = Vec::new();
        if self.sync_in_flight != Some(kind) {
            debug!(
                target: "signaling.locus.sync",
                meeting_id = %self.meeting_id,
                kind = kind.as_str(),
                "Unexpected resync result, ignoring"
            );
            return effects;
        }
        self.sync_in_flight = None;

        match result {
            Ok(fetched) => {
                metrics::record_locus_sync(kind.as_str(), "success");
                match fetched {
                    Some(snapshot) => {
                        info!(
                            target: "signaling.locus.sync",
                            meeting_id = %self.meeting_id,
                            kind = kind.as_str(),
                            position = snapshot.sequence.position(),
                            "Resync succeeded"
                        );
                        match (kind, self.working_copy.as_mut()) {
                            (SyncKind::Delta, Some(current)) => current.merge(snapshot),
                            _ => self.working_copy = Some(snapshot),
                        }
                        self.publish(&mut effects);
                        self.discard_superseded();
                    }
                    None => debug!(
                        target: "signaling.locus.sync",
                        meeting_id = %self.meeting_id,
                        kind = kind.as_str(),
                        "Resync returned no changes, working copy is current"
                    ),
                }
                self.drain(&mut effects);
                self.reevaluate(&mut effects);
            }
            Err(e) => {
                metrics::record_locus_sync(kind.as_str(), "failure");
                match kind {
                    SyncKind::Delta => {
                        warn!(
                            target: "signaling.locus.sync",
                            meeting_id = %self.meeting_id,
                            error = %e,
                            "Delta resync failed, retrying with full state"
                        );
                        self.start_full_sync(&mut effects);
                    }
                    SyncKind::Full => {
                        error!(
                            target: "signaling.locus.sync",
                            meeting_id = %self.meeting_id,
                            error = %e,
                            "Full resync failed, meeting is unrecoverable"
                        );
                        self.give_up(&mut effects);
                    }
                }
            }
        }

        effects
    }

    fn buffer(&mut self, delta: LocusDelta) {
        let base = delta.base_sequence.position();
        if self.pending.insert(base, delta).is_some() {
            debug!(
                target: "signaling.locus.sync",
                meeting_id = %self.meeting_id,
                base,
                "Replaced buffered delta with the same base"
            );
        }
        metrics::record_locus_delta("buffered");
    }

    fn apply(&mut self, delta: LocusDelta, effects: &mut Vec<SyncEffect>) {
        let Some(current) = self.working_copy.as_mut() else {
            return;
        };
        current.apply_delta(delta);
        metrics::record_locus_delta("applied");
        self.publish(effects);
    }

    fn publish(&self, effects: &mut Vec<SyncEffect>) {
        if let Some(current) = &self.working_copy {
            effects.push(SyncEffect::Applied(current.clone()));
        }
    }

    /// Apply buffered deltas that now line up.
    fn drain(&mut self, effects: &mut Vec<SyncEffect>) {
        self.discard_superseded();
        while let Some(last) = self.last_applied() {
            let Some(next) = self.pending.remove(&last) else {
                break;
            };
            self.apply(next, effects);
            self.discard_superseded();
        }
    }

    /// Drop buffered deltas that do not advance past the working copy.
    fn discard_superseded(&mut self) {
        let Some(last) = self.last_applied() else {
            return;
        };
        let before = self.pending.len();
        self.pending
            .retain(|_, delta| delta.sequence.position() > last);
        for _ in self.pending.len()..before {
            metrics::record_locus_delta("stale");
        }
    }

    /// Decide between waiting, arming the stall timer and forcing a resync.
    fn reevaluate(&mut self, effects: &mut Vec<SyncEffect>) {
        if self.destroyed || self.sync_in_flight.is_some() || self.working_copy.is_none() {
            return;
        }

        if self.pending.is_empty() {
            if self.stall_timer_armed {
                self.stall_timer_armed = false;
                effects.push(SyncEffect::CancelStallTimer);
            }
            return;
        }

        if self.pending.len() > self.max_out_of_order {
            info!(
                target: "signaling.locus.sync",
                meeting_id = %self.meeting_id,
                pending = self.pending.len(),
                max = self.max_out_of_order,
                "Too many out-of-order deltas, resyncing"
            );
            self.start_sync(effects);
            return;
        }

        self.arm_timer(effects);
    }

    fn arm_timer(&mut self, effects: &mut Vec<SyncEffect>) {
        if !self.stall_timer_armed {
            self.stall_timer_armed = true;
            let delay = self.stall_timeout + self.jitter.jitter(self.stall_jitter);
            effects.push(SyncEffect::ArmStallTimer(delay));
        }
    }

    fn cancel_timer(&mut self, effects: &mut Vec<SyncEffect>) {
        if self.stall_timer_armed {
            self.stall_timer_armed = false;
            effects.push(SyncEffect::CancelStallTimer);
        }
    }

    /// Resync through `sync_url` when known, else the base URL.
    fn start_sync(&mut self, effects: &mut Vec<SyncEffect>) {
        if self.sync_in_flight.is_some() || self.destroyed {
            return;
        }
        let Some(current) = &self.working_copy else {
            return;
        };

        match current.sync_url.clone() {
            Some(url) => {
                self.cancel_timer(effects);
                self.sync_in_flight = Some(SyncKind::Delta);
                effects.push(SyncEffect::Fetch {
                    url,
                    kind: SyncKind::Delta,
                });
            }
            None if self.full_sync_url().is_none() => {
                // Nothing has been fetched yet, keep buffering
                warn!(
                    target: "signaling.locus.sync",
                    meeting_id = %self.meeting_id,
                    pending = self.pending.len(),
                    "No URL to resync from, waiting for the gap to fill"
                );
                self.arm_timer(effects);
            }
            None => self.start_full_sync(effects),
        }
    }

    fn full_sync_url(&self) -> Option<String> {
        self.working_copy
            .as_ref()
            .map(|w| w.url.clone())
            .filter(|u| !u.is_empty())
    }

    /// Full resync from the base URL. Also the retry after a failed delta
    /// resync, where a missing URL ends the meeting.
    fn start_full_sync(&mut self, effects: &mut Vec<SyncEffect>) {
        let Some(url) = self.full_sync_url() else {
            error!(
                target: "signaling.locus.sync",
                meeting_id = %self.meeting_id,
                "No URL to retry the resync from"
            );
            self.give_up(effects);
            return;
        };

        self.cancel_timer(effects);
        self.sync_in_flight = Some(SyncKind::Full);
        effects.push(SyncEffect::Fetch {
            url,
            kind: SyncKind::Full,
        });
    }

    fn give_up(&mut self, effects: &mut Vec<SyncEffect>) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.cancel_timer(effects);
        for _ in 0..self.pending.len() {
            metrics::record_locus_delta("dropped");
        }
        self.pending.clear();
        effects.push(SyncEffect::Destroy(MeetingRemovedReason::LocusDtoSyncFailed));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::locus::LocusSequence;
    use serde_json::json;

    struct NoJitter;

    impl JitterSource for NoJitter {
        fn jitter(&self, _max: Duration) -> Duration {
            Duration::ZERO
        }
    }

    fn sync() -> DeltaSynchronizer {
        DeltaSynchronizer::new(CorrelationId::from("m1"), &Config::default(), Arc::new(NoJitter))
    }

    fn snapshot(end: u64) -> LocusSnapshot {
        LocusSnapshot {
            url: "https://locus/loci/1".into(),
            sequence: LocusSequence::range(1, end),
            sync_url: Some("https://locus/loci/1/sync".into()),
            state: serde_json::Map::new(),
        }
    }

    fn delta(base: u64, end: u64) -> LocusDelta {
        let mut d = LocusDelta::range(base, end);
        d.payload.insert("step".into(), json!(end));
        d
    }

    fn applied_positions(effects: &[SyncEffect]) -> Vec<u64> {
        effects
            .iter()
            .filter_map(|e| match e {
                SyncEffect::Applied(s) => Some(s.sequence.position()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_in_order_deltas_apply_immediately() {
        let mut s = sync();
        assert_eq!(applied_positions(&s.on_full_state(snapshot(10))), vec![10]);
        assert_eq!(applied_positions(&s.on_delta(delta(10, 20))), vec![20]);
        assert_eq!(s.last_applied(), Some(20));
        assert_eq!(s.working_copy().unwrap().state["step"], 20);
    }

    #[test]
    fn test_reordered_deltas_apply_in_order() {
        let mut s = sync();
        s.on_full_state(snapshot(10));

        let effects = s.on_delta(delta(20, 30));
        assert!(applied_positions(&effects).is_empty());
        assert!(matches!(effects.as_slice(), [SyncEffect::ArmStallTimer(_)]));

        assert!(applied_positions(&s.on_delta(delta(30, 40))).is_empty());

        let effects = s.on_delta(delta(10, 20));
        assert_eq!(applied_positions(&effects), vec![20, 30, 40]);
        assert_eq!(effects.last(), Some(&SyncEffect::CancelStallTimer));
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn test_stale_delta_is_dropped() {
        let mut s = sync();
        s.on_full_state(snapshot(10));
        s.on_delta(delta(10, 20));

        let effects = s.on_delta(delta(10, 20));
        assert!(effects.is_empty());
        assert_eq!(s.last_applied(), Some(20));
    }

    #[test]
    fn test_backlog_over_threshold_forces_resync() {
        let mut s = sync();
        s.on_full_state(snapshot(10));

        // Default threshold is 5; the sixth gap delta triggers the resync
        for i in 0..5 {
            let base = 100 + i * 10;
            let effects = s.on_delta(delta(base, base + 10));
            assert!(!effects.iter().any(|e| matches!(e, SyncEffect::Fetch { .. })));
        }
        let effects = s.on_delta(delta(200, 210));
        assert!(effects.contains(&SyncEffect::CancelStallTimer));
        assert!(effects.contains(&SyncEffect::Fetch {
            url: "https://locus/loci/1/sync".into(),
            kind: SyncKind::Delta
        }));
        assert_eq!(s.sync_in_flight(), Some(SyncKind::Delta));
    }

    #[test]
    fn test_stall_timer_triggers_resync_once() {
        let mut s = sync();
        s.on_full_state(snapshot(10));
        s.on_delta(delta(20, 30));

        let effects = s.on_stall_timeout();
        assert_eq!(
            effects,
            vec![SyncEffect::Fetch {
                url: "https://locus/loci/1/sync".into(),
                kind: SyncKind::Delta
            }]
        );

        // A second trigger while in flight is a no-op
        assert!(s.on_stall_timeout().is_empty());
    }

    #[test]
    fn test_resync_success_discards_superseded_and_drains() {
        let mut s = sync();
        s.on_full_state(snapshot(10));
        s.on_delta(delta(20, 30));
        s.on_delta(delta(40, 50));
        s.on_stall_timeout();

        // Deltas arriving mid-resync are buffered
        assert!(applied_positions(&s.on_delta(delta(10, 20))).is_empty());

        let effects = s.on_sync_result(SyncKind::Delta, Ok(Some(snapshot(40))));
        assert_eq!(applied_positions(&effects), vec![40, 50]);
        assert_eq!(s.pending_count(), 0);
        assert_eq!(s.sync_in_flight(), None);
    }

    #[test]
    fn test_empty_resync_body_resumes() {
        let mut s = sync();
        s.on_full_state(snapshot(10));
        s.on_delta(delta(20, 30));
        s.on_stall_timeout();

        let effects = s.on_sync_result(SyncKind::Delta, Ok(None));
        assert!(applied_positions(&effects).is_empty());
        // Still blocked, so the stall timer is armed again
        assert!(matches!(effects.as_slice(), [SyncEffect::ArmStallTimer(_)]));
    }

    #[test]
    fn test_delta_failure_falls_back_to_full_then_destroys_once() {
        let mut s = sync();
        s.on_full_state(snapshot(10));
        s.on_delta(delta(20, 30));
        s.on_stall_timeout();

        let effects = s.on_sync_result(
            SyncKind::Delta,
            Err(TransportError::Network("reset".into())),
        );
        assert_eq!(
            effects,
            vec![SyncEffect::Fetch {
                url: "https://locus/loci/1".into(),
                kind: SyncKind::Full
            }]
        );

        let effects = s.on_sync_result(SyncKind::Full, Err(TransportError::Timeout));
        assert_eq!(
            effects,
            vec![SyncEffect::Destroy(MeetingRemovedReason::LocusDtoSyncFailed)]
        );
        assert!(s.is_destroyed());

        // Nothing more happens after giving up
        assert!(s.on_delta(delta(10, 20)).is_empty());
        assert!(s.on_stall_timeout().is_empty());
        assert!(s.on_full_state(snapshot(99)).is_empty());
    }

    #[test]
    fn test_full_state_comparison() {
        let mut s = sync();
        s.on_full_state(snapshot(20));

        // Older snapshot is ignored
        assert!(s.on_full_state(snapshot(10)).is_empty());
        assert_eq!(s.last_applied(), Some(20));

        // Newer snapshot replaces
        assert_eq!(applied_positions(&s.on_full_state(snapshot(30))), vec![30]);
    }

    #[test]
    fn test_full_state_desync_triggers_resync() {
        let mut s = sync();
        let mut current = snapshot(0);
        current.sequence = LocusSequence::from_entries(vec![1, 3, 5]);
        s.on_full_state(current);

        let mut incoming = snapshot(0);
        incoming.sequence = LocusSequence::from_entries(vec![1, 4, 5]);
        let effects = s.on_full_state(incoming);
        assert!(matches!(
            effects.as_slice(),
            [SyncEffect::Fetch {
                kind: SyncKind::Delta,
                ..
            }]
        ));
    }

    #[test]
    fn test_deltas_before_first_full_state_wait_for_baseline() {
        let mut s = sync();
        assert!(s.on_delta(delta(10, 20)).is_empty());
        assert!(s.on_delta(delta(20, 30)).is_empty());

        let effects = s.on_full_state(snapshot(10));
        assert_eq!(applied_positions(&effects), vec![10, 20, 30]);
    }

    #[test]
    fn test_same_base_replaces_buffered_delta() {
        let mut s = sync();
        s.on_full_state(snapshot(10));
        s.on_delta(delta(20, 30));
        s.on_delta(delta(20, 35));
        assert_eq!(s.pending_count(), 1);

        let effects = s.on_delta(delta(10, 20));
        assert_eq!(applied_positions(&effects), vec![20, 35]);
    }

    #[test]
    fn test_no_sync_url_goes_straight_to_full() {
        let mut s = sync();
        let mut base = snapshot(10);
        base.sync_url = None;
        s.on_full_state(base);
        s.on_delta(delta(20, 30));

        let effects = s.on_stall_timeout();
        assert_eq!(
            effects,
            vec![SyncEffect::Fetch {
                url: "https://locus/loci/1".into(),
                kind: SyncKind::Full
            }]
        );
    }

    #[test]
    fn test_no_resync_url_keeps_buffering() {
        let mut s = sync();
        let mut base = snapshot(10);
        base.url = String::new();
        base.sync_url = None;
        s.on_full_state(base);
        s.on_delta(delta(20, 30));

        let effects = s.on_stall_timeout();
        assert!(matches!(effects.as_slice(), [SyncEffect::ArmStallTimer(_)]));
        assert!(!s.is_destroyed());
        assert_eq!(s.sync_in_flight(), None);
        assert_eq!(s.pending_count(), 1);

        // Gap fills later and nothing was lost
        let effects = s.on_delta(delta(10, 20));
        assert_eq!(applied_positions(&effects), vec![20, 30]);
        assert!(!s.is_destroyed());
    }
}
