//! Integration tests for Locus delta synchronization.
//!
//! Uses tokio's test-util time control for the stall timer:
//! - Out-of-order deltas apply in sequence order
//! - A stalled gap triggers a resync through the sync URL
//! - Two failed resyncs tear the meeting down exactly once

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use common::error::TransportError;
use common::types::CorrelationId;
use signaling_core::collaborators::{JitterSource, MeetingRemovedReason};
use signaling_core::locus::{DeltaSynchronizer, LocusDelta, SyncEffect};
use signaling_test_utils::{
    delta, init_tracing, snapshot_at, test_config, FixedJitter, MockLocusFetcher, TestHarness,
    TEST_LOCUS_URL, TEST_SYNC_URL,
};

fn synchronizer() -> DeltaSynchronizer {
    DeltaSynchronizer::new(
        CorrelationId::from("meeting-sync"),
        &test_config(),
        Arc::new(FixedJitter(Duration::ZERO)) as Arc<dyn JitterSource>,
    )
}

fn applied_positions(effects: &[SyncEffect]) -> Vec<u64> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            SyncEffect::Applied(snapshot) => Some(snapshot.sequence.position()),
            _ => None,
        })
        .collect()
}

fn permutations(items: &[LocusDelta]) -> Vec<Vec<LocusDelta>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let first = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, first.clone());
            out.push(tail);
        }
    }
    out
}

// ============================================================================
// Synchronizer
// ============================================================================

#[test]
fn test_any_arrival_order_applies_in_sequence_order() {
    let deltas = vec![delta(10, 20), delta(20, 30), delta(30, 40)];

    for order in permutations(&deltas) {
        let mut sync = synchronizer();
        let mut positions = applied_positions(&sync.on_full_state(snapshot_at(10)));
        for d in order.clone() {
            positions.extend(applied_positions(&sync.on_delta(d)));
        }

        let bases: Vec<u64> = order.iter().map(|d| d.base_sequence.position()).collect();
        assert_eq!(positions, vec![10, 20, 30, 40], "arrival order by base: {bases:?}");
        assert_eq!(sync.last_applied(), Some(40));
        assert_eq!(sync.pending_count(), 0);

        let working = sync.working_copy().unwrap();
        assert_eq!(working.state.get("seqMarker"), Some(&serde_json::json!(40)));
    }
}

#[test]
fn test_redelivered_deltas_are_never_applied_twice() {
    let mut sync = synchronizer();
    sync.on_full_state(snapshot_at(10));

    let mut positions = Vec::new();
    for d in [delta(10, 20), delta(10, 20), delta(20, 30), delta(10, 20)] {
        positions.extend(applied_positions(&sync.on_delta(d)));
    }

    assert_eq!(positions, vec![20, 30]);
    assert_eq!(sync.pending_count(), 0);
}

// ============================================================================
// Meeting actor
// ============================================================================

#[tokio::test]
async fn test_out_of_order_deltas_reach_callback_in_order() {
    init_tracing();
    let harness = TestHarness::new();
    let (handle, _task) = harness.spawn_meeting("meeting-reorder");

    handle.locus_full_state(snapshot_at(10)).await.unwrap();
    handle.locus_delta(delta(20, 30)).await.unwrap();
    handle.locus_delta(delta(30, 40)).await.unwrap();

    let state = handle.get_state().await.unwrap();
    assert_eq!(state.locus_position, Some(10));
    assert_eq!(state.pending_deltas, 2);
    assert!(state.stall_timer_armed);

    handle.locus_delta(delta(10, 20)).await.unwrap();

    assert_eq!(harness.recorder.applied_positions(), vec![10, 20, 30, 40]);
    let state = handle.get_state().await.unwrap();
    assert_eq!(state.locus_position, Some(40));
    assert_eq!(state.pending_deltas, 0);
    assert!(!state.stall_timer_armed);
    assert!(harness.fetcher.fetched_urls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_gap_resyncs_through_sync_url() {
    init_tracing();
    let harness = TestHarness::builder()
        .fetcher(MockLocusFetcher::new().with_result(Ok(Some(snapshot_at(30)))))
        .build();
    let (handle, _task) = harness.spawn_meeting("meeting-stall");

    handle.locus_full_state(snapshot_at(10)).await.unwrap();
    handle.locus_delta(delta(20, 30)).await.unwrap();

    // Stall timeout is 2000ms with zero jitter
    tokio::time::sleep(Duration::from_millis(1999)).await;
    assert!(harness.fetcher.fetched_urls().is_empty());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.fetcher.fetched_urls(), vec![TEST_SYNC_URL.to_string()]);

    let state = handle.get_state().await.unwrap();
    assert_eq!(state.locus_position, Some(30));
    assert_eq!(state.pending_deltas, 0);
    assert!(state.sync_in_flight.is_none());

    handle.locus_delta(delta(30, 40)).await.unwrap();
    assert_eq!(harness.recorder.applied_positions(), vec![10, 30, 40]);
}

#[tokio::test(start_paused = true)]
async fn test_two_failed_resyncs_destroy_meeting_once() {
    init_tracing();
    let harness = TestHarness::builder()
        .fetcher(
            MockLocusFetcher::new()
                .with_result(Err(TransportError::Timeout))
                .with_result(Err(TransportError::Status {
                    status: 503,
                    message: "unavailable".to_string(),
                })),
        )
        .build();
    let (handle, _task) = harness.spawn_meeting("meeting-doomed");

    handle.locus_full_state(snapshot_at(10)).await.unwrap();
    handle.locus_delta(delta(20, 30)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), harness.lifecycle.wait_for_destroy())
        .await
        .unwrap();

    assert_eq!(
        harness.fetcher.fetched_urls(),
        vec![TEST_SYNC_URL.to_string(), TEST_LOCUS_URL.to_string()]
    );

    // Nothing after the teardown request brings the meeting back
    handle.locus_delta(delta(30, 40)).await.unwrap();
    handle.locus_delta(delta(10, 20)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let destroyed = harness.lifecycle.destroyed();
    assert_eq!(destroyed.len(), 1);
    assert_eq!(destroyed[0].0, CorrelationId::from("meeting-doomed"));
    assert_eq!(destroyed[0].1, MeetingRemovedReason::LocusDtoSyncFailed);

    let state = handle.get_state().await.unwrap();
    assert!(state.destroyed);
    assert_eq!(state.locus_position, Some(10));
    assert_eq!(harness.recorder.applied_positions(), vec![10]);
    assert_eq!(harness.fetcher.fetched_urls().len(), 2);
}
