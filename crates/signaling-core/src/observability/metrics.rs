//! Metrics definitions for the signaling core.
//!
//! All metrics follow Prometheus naming conventions:
//! - `signaling_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded enums, never identifiers:
//! - `winner`: 2 values (local, remote)
//! - `stage`: 3 values (build, apply, send)
//! - `outcome`: 3 values (success, failure, skipped)
//! - `kind`: media request kind (roap, local_mute) or sync kind (delta, full)
//! - `status`: success or a `TransportError::kind()` label
//! - `action`: 4 values (applied, buffered, stale, dropped)
//! - `actor_type`: 2 values (controller, meeting)

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// ROAP Metrics (Counters)
// ============================================================================

/// Record a glare condition and who won it.
///
/// Metric: `signaling_roap_glare_total`
/// Labels: `winner`
pub fn record_roap_glare(winner: &'static str) {
    counter!("signaling_roap_glare_total", "winner" => winner).increment(1);
}

/// Record a failed answer build/apply/send.
///
/// Metric: `signaling_roap_answer_failures_total`
/// Labels: `stage`
pub fn record_roap_answer_failure(stage: &'static str) {
    counter!("signaling_roap_answer_failures_total", "stage" => stage).increment(1);
}

/// Record a sequence entering the `ERROR` state.
///
/// Metric: `signaling_roap_protocol_violations_total`
/// Labels: none
pub fn record_roap_protocol_violation() {
    counter!("signaling_roap_protocol_violations_total").increment(1);
}

/// Record a sequence finishing.
///
/// Metric: `signaling_roap_sequences_finished_total`
/// Labels: none
pub fn record_roap_sequence_finished() {
    counter!("signaling_roap_sequences_finished_total").increment(1);
}

/// Record a duplicate inbound message being dropped.
///
/// Metric: `signaling_roap_duplicates_total`
/// Labels: none
pub fn record_roap_duplicate() {
    counter!("signaling_roap_duplicates_total").increment(1);
}

// ============================================================================
// TURN Discovery Metrics (Counters)
// ============================================================================

/// Record the outcome of a TURN discovery attempt.
///
/// Metric: `signaling_turn_discovery_total`
/// Labels: `outcome` (success, failure, skipped)
pub fn record_turn_discovery(outcome: &'static str) {
    counter!("signaling_turn_discovery_total", "outcome" => outcome).increment(1);
}

/// Record that a TURN discovery response required an `OK`.
///
/// Metric: `signaling_turn_discovery_ok_required_total`
/// Labels: none
pub fn record_turn_discovery_ok_required() {
    counter!("signaling_turn_discovery_ok_required_total").increment(1);
}

/// Record an HTTP response that should have embedded the TURN response but did not.
///
/// Metric: `signaling_turn_discovery_http_response_missing_total`
/// Labels: none
pub fn record_turn_discovery_http_response_missing() {
    counter!("signaling_turn_discovery_http_response_missing_total").increment(1);
}

// ============================================================================
// Media Request Metrics
// ============================================================================

/// Record a completed outbound media request.
///
/// Metrics: `signaling_media_requests_total`, `signaling_media_request_duration_seconds`
/// Labels: `kind`, `status`
pub fn record_media_request(kind: &'static str, status: &'static str, duration: Duration) {
    counter!("signaling_media_requests_total", "kind" => kind, "status" => status).increment(1);
    histogram!("signaling_media_request_duration_seconds", "kind" => kind)
        .record(duration.as_secs_f64());
}

/// Record a request that was folded into an already-queued one.
///
/// Metric: `signaling_media_requests_coalesced_total`
/// Labels: `kind`
pub fn record_media_request_coalesced(kind: &'static str) {
    counter!("signaling_media_requests_coalesced_total", "kind" => kind).increment(1);
}

// ============================================================================
// Locus Sync Metrics
// ============================================================================

/// Record how an inbound delta was handled.
///
/// Metric: `signaling_locus_deltas_total`
/// Labels: `action` (applied, buffered, stale, dropped)
pub fn record_locus_delta(action: &'static str) {
    counter!("signaling_locus_deltas_total", "action" => action).increment(1);
}

/// Record a resync fetch outcome.
///
/// Metric: `signaling_locus_sync_total`
/// Labels: `kind` (delta, full), `status` (success, failure)
pub fn record_locus_sync(kind: &'static str, status: &'static str) {
    counter!("signaling_locus_sync_total", "kind" => kind, "status" => status).increment(1);
}

/// Record a meeting being handed to the lifecycle collaborator for teardown.
///
/// Metric: `signaling_meetings_destroyed_total`
/// Labels: `reason`
pub fn record_meeting_destroyed(reason: &'static str) {
    counter!("signaling_meetings_destroyed_total", "reason" => reason).increment(1);
}

// ============================================================================
// Actor Metrics (Gauges)
// ============================================================================

/// Set the number of meetings with a live signaling actor.
///
/// Metric: `signaling_meetings_active`
/// Labels: none
pub fn set_meetings_active(count: usize) {
    // usize to f64 conversion is safe for realistic meeting counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("signaling_meetings_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `signaling_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    // usize to f64 conversion is safe for realistic mailbox depths
    #[allow(clippy::cast_precision_loss)]
    gauge!("signaling_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

/// Record an actor task panic.
///
/// Metric: `signaling_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("signaling_actor_panics_total", "actor_type" => actor_type).increment(1);
}
