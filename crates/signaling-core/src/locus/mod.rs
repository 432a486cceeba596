//! Locus state synchronization.
//!
//! - [`sequence`] - Sequence positions and snapshot comparison
//! - [`delta_sync`] - Ordered delta application with gap detection and resync

pub mod delta_sync;
pub mod sequence;

pub use delta_sync::{DeltaSynchronizer, SyncEffect, SyncKind};
pub use sequence::{compare_sequences, LocusSequence, SequenceComparison};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Full Locus state as held by the client (the working copy).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocusSnapshot {
    /// Base state URL, used for a full resync.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sequence: LocusSequence,
    /// Narrower resync URL, valid as of this snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_url: Option<String>,
    /// Every other top-level field.
    #[serde(flatten)]
    pub state: Map<String, Value>,
}

impl LocusSnapshot {
    /// Merge a partial snapshot (a delta resync body) into this one.
    ///
    /// Top-level fields present in `partial` overwrite ours. The sequence is
    /// taken from `partial`.
    pub fn merge(&mut self, partial: LocusSnapshot) {
        if !partial.url.is_empty() {
            self.url = partial.url;
        }
        if partial.sync_url.is_some() {
            self.sync_url = partial.sync_url;
        }
        self.sequence = partial.sequence;
        self.state.extend(partial.state);
    }

    /// Apply a delta's fields and advance to its sequence.
    pub fn apply_delta(&mut self, delta: LocusDelta) {
        if delta.sync_url.is_some() {
            self.sync_url = delta.sync_url;
        }
        self.sequence = delta.sequence;
        self.state.extend(delta.payload);
    }
}

/// An incremental Locus update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocusDelta {
    /// State the sender expects the receiver to hold.
    pub base_sequence: LocusSequence,
    /// State this delta advances the receiver to.
    pub sequence: LocusSequence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_url: Option<String>,
    /// Changed top-level fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl LocusDelta {
    /// Range-based delta `base_end -> end` with no payload.
    #[must_use]
    pub fn range(base_end: u64, end: u64) -> Self {
        Self {
            base_sequence: LocusSequence::range(0, base_end),
            sequence: LocusSequence::range(0, end),
            sync_url: None,
            payload: Map::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_wire_format() {
        let snapshot: LocusSnapshot = serde_json::from_value(json!({
            "url": "https://locus.example.com/loci/1",
            "syncUrl": "https://locus.example.com/loci/1/sync",
            "sequence": {"entries": [], "rangeStart": 1, "rangeEnd": 10},
            "participants": [],
            "fullState": {"state": "ACTIVE"}
        }))
        .unwrap();

        assert_eq!(snapshot.sequence.position(), 10);
        assert_eq!(snapshot.state.len(), 2);
        assert!(snapshot.state.contains_key("fullState"));
    }

    #[test]
    fn test_delta_merges_top_level_fields() {
        let mut snapshot: LocusSnapshot = serde_json::from_value(json!({
            "url": "u",
            "sequence": {"rangeEnd": 10},
            "a": 1,
            "b": 1
        }))
        .unwrap();
        let delta: LocusDelta = serde_json::from_value(json!({
            "baseSequence": {"rangeEnd": 10},
            "sequence": {"rangeEnd": 20},
            "syncUrl": "s",
            "b": 2,
            "c": 3
        }))
        .unwrap();

        snapshot.apply_delta(delta);
        assert_eq!(snapshot.sequence.position(), 20);
        assert_eq!(snapshot.sync_url.as_deref(), Some("s"));
        assert_eq!(snapshot.state["a"], 1);
        assert_eq!(snapshot.state["b"], 2);
        assert_eq!(snapshot.state["c"], 3);
    }

    #[test]
    fn test_merge_keeps_url_when_partial_has_none() {
        let mut snapshot = LocusSnapshot {
            url: "base".into(),
            ..LocusSnapshot::default()
        };
        snapshot.merge(LocusSnapshot {
            sequence: LocusSequence::range(0, 5),
            ..LocusSnapshot::default()
        });
        assert_eq!(snapshot.url, "base");
        assert_eq!(snapshot.sequence.position(), 5);
    }
}
