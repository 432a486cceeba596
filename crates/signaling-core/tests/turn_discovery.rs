//! Integration tests for TURN discovery.
//!
//! Exercises both delivery paths of the discovery response (embedded in
//! the HTTP reply, pushed through the meeting actor) and the outcome
//! metrics.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::error::TransportError;
use common::secret::ExposeSecret;
use common::types::CorrelationId;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use signaling_core::collaborators::{Reachability, SignalingTransport};
use signaling_core::media_request::RequestSerializer;
use signaling_core::roap::turn_discovery::FROM_PUSH;
use signaling_core::roap::{
    RoapMessageType, SignalingAction, TurnDiscovery, TurnDiscoveryResult, TurnDiscoverySkipReason,
};
use signaling_test_utils::{
    init_tracing, media_response_with, test_config, turn_response, turn_response_missing_password,
    turn_response_no_ok, MockReachability, MockTransport, TestHarness, TEST_TURN_PASSWORD,
    TEST_TURN_URL, TEST_TURN_USERNAME,
};

fn discovery(transport: &Arc<MockTransport>, reachability: MockReachability) -> TurnDiscovery {
    let serializer = RequestSerializer::new(
        CorrelationId::from("meeting-turn"),
        Arc::clone(transport) as Arc<dyn SignalingTransport>,
    );
    TurnDiscovery::new(
        serializer,
        Arc::new(reachability) as Arc<dyn Reachability>,
        &test_config(),
    )
}

/// Counter values of `signaling_turn_discovery_total`, keyed by outcome.
fn turn_outcomes(snapshotter: &Snapshotter) -> HashMap<String, u64> {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(key, _, _, _)| key.key().name() == "signaling_turn_discovery_total")
        .filter_map(|(key, _, _, value)| {
            let outcome = key
                .key()
                .labels()
                .find(|l| l.key() == "outcome")
                .map(|l| l.value().to_string())?;
            match value {
                DebugValue::Counter(n) => Some((outcome, n)),
                _ => None,
            }
        })
        .collect()
}

fn assert_test_credentials(result: &TurnDiscoveryResult) {
    let info = result.turn_server_info.as_ref().expect("TURN info present");
    assert_eq!(info.url, TEST_TURN_URL);
    assert_eq!(info.username, TEST_TURN_USERNAME);
    assert_eq!(info.password.expose_secret(), TEST_TURN_PASSWORD);
    assert!(result.skipped_reason.is_none());
}

#[test]
fn test_missing_password_fails_and_is_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let (result, requests) = metrics::with_local_recorder(&recorder, || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let transport = Arc::new(MockTransport::new().with_response(Ok(
                media_response_with(&turn_response_missing_password()),
            )));
            let turn = discovery(&transport, MockReachability::unreachable());
            let result = turn.do_turn_discovery(false, false).await;
            (result, transport.roap_messages())
        })
    });

    assert!(result.turn_server_info.is_none());
    assert!(result.skipped_reason.is_none());
    assert!(result.is_failure());

    // Request only, no OK for a rejected response
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].message_type, RoapMessageType::TurnDiscoveryRequest);

    let outcomes = turn_outcomes(&snapshotter);
    assert_eq!(outcomes.get("failure"), Some(&1));
    assert_eq!(outcomes.get("success"), None);
}

#[test]
fn test_failed_ok_send_discards_credentials() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let (result, in_progress, requests) = metrics::with_local_recorder(&recorder, || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            // Request gets a valid response, the OK that follows is rejected
            let transport = Arc::new(
                MockTransport::new()
                    .with_response(Ok(media_response_with(&turn_response())))
                    .with_response(Err(TransportError::Network(
                        "connection reset".to_string(),
                    ))),
            );
            let turn = discovery(&transport, MockReachability::unreachable());
            let result = turn.do_turn_discovery(false, false).await;
            let in_progress = turn.is_in_progress().await;
            (result, in_progress, transport.roap_messages())
        })
    });

    assert!(result.is_failure());
    assert!(result.turn_server_info.is_none());
    assert!(result.skipped_reason.is_none());
    assert!(!in_progress);

    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].message_type, RoapMessageType::Ok);
    assert_eq!(requests[1].seq, 0);

    let outcomes = turn_outcomes(&snapshotter);
    assert_eq!(outcomes.get("failure"), Some(&1));
    assert_eq!(outcomes.get("success"), None);
}

#[tokio::test]
async fn test_first_response_wins_and_later_ones_are_ignored() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    let turn = discovery(&transport, MockReachability::unreachable());

    let request = turn.generate_turn_discovery_request_message(false).await;
    assert_eq!(
        request.roap_message.map(|m| m.message_type),
        Some(RoapMessageType::TurnDiscoveryRequest)
    );

    turn.handle_turn_discovery_response(&turn_response(), FROM_PUSH)
        .await;
    // A later, different response is a no-op
    turn.handle_turn_discovery_response(&turn_response_missing_password(), FROM_PUSH)
        .await;

    let result = turn
        .handle_turn_discovery_http_response(Some(&media_response_with(&turn_response_no_ok())))
        .await
        .unwrap();

    assert_test_credentials(&result);
    // The winning response wanted an OK
    let sent = transport.roap_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message_type, RoapMessageType::Ok);
    assert_eq!(sent[0].seq, 0);
    assert!(!turn.is_in_progress().await);
}

#[tokio::test]
async fn test_join_response_without_embedded_message_keeps_exchange_open() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    let turn = discovery(&transport, MockReachability::unreachable());

    turn.generate_turn_discovery_request_message(false).await;
    let result = turn.handle_turn_discovery_http_response(None).await.unwrap();

    assert_eq!(
        result.skipped_reason,
        Some(TurnDiscoverySkipReason::MissingHttpResponse)
    );
    assert!(turn.is_in_progress().await);

    turn.abort().await;
    assert!(!turn.is_in_progress().await);
    assert!(turn.handle_turn_discovery_http_response(None).await.is_err());
}

#[tokio::test]
async fn test_forced_discovery_ignores_reachability() {
    init_tracing();
    let transport = Arc::new(
        MockTransport::new().with_response(Ok(media_response_with(&turn_response_no_ok()))),
    );
    let turn = discovery(&transport, MockReachability::reachable());

    let skipped = turn.do_turn_discovery(false, false).await;
    assert_eq!(
        skipped.skipped_reason,
        Some(TurnDiscoverySkipReason::Reachability)
    );
    assert_eq!(transport.call_count(), 0);

    let forced = turn.do_turn_discovery(false, true).await;
    assert_test_credentials(&forced);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_pushed_response_completes_discovery_through_meeting() {
    init_tracing();
    let harness = TestHarness::new();
    let (handle, _task) = harness.spawn_meeting("meeting-turn-push");
    let turn = handle.turn_discovery();

    let discovery = tokio::spawn(async move { turn.do_turn_discovery(false, false).await });
    tokio::time::timeout(Duration::from_secs(1), harness.transport.wait_for_requests(1))
        .await
        .unwrap();

    // HTTP reply carried nothing, the response arrives over the push channel
    handle
        .submit(SignalingAction::Receive(turn_response_no_ok()))
        .await
        .unwrap();

    let result = discovery.await.unwrap();
    assert_test_credentials(&result);
    assert_eq!(harness.transport.call_count(), 1);
    assert_eq!(harness.reachability.call_count(), 1);
    // Discovery does not touch ROAP sequence state
    assert!(!handle.is_busy().await.unwrap());
}
