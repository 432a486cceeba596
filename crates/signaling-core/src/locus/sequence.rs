//! Locus sequence numbers and comparison.
//!
//! A Locus sequence is a set of explicit `entries` plus an optional
//! contiguous range `[range_start, range_end]` (both 0 when absent). Two
//! sequences are compared by applying the rules below in order; the first
//! rule that decides wins.
//!
//! 1. Overlap: one sequence lies entirely after the other.
//! 2. Unequal ranges: neither has unique entries, the longer span wins.
//! 3. Unique entries: only one side has entries the other lacks.
//! 4. Out of sync: both have unique entries. Interleaved unique entries (or
//!    no ranges at all) mean the two copies have diverged.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Sequence information attached to a Locus snapshot or delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocusSequence {
    pub entries: Vec<u64>,
    pub range_start: u64,
    pub range_end: u64,
}

impl LocusSequence {
    /// Pure range, no explicit entries.
    #[must_use]
    pub fn range(range_start: u64, range_end: u64) -> Self {
        Self {
            entries: Vec::new(),
            range_start,
            range_end,
        }
    }

    /// Explicit entries only.
    #[must_use]
    pub fn from_entries(entries: Vec<u64>) -> Self {
        Self {
            entries,
            range_start: 0,
            range_end: 0,
        }
    }

    /// The point this sequence advances state to: the last entry, or the
    /// range end when there are no entries.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.entries.last().copied().unwrap_or(self.range_end)
    }

    /// No entries and no range.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.range_start == 0 && self.range_end == 0
    }
}

/// What to do with an incoming snapshot relative to the working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceComparison {
    /// Incoming is newer.
    UseIncoming,
    /// Working copy is as new or newer.
    UseCurrent,
    /// The two have diverged; fetch authoritative state.
    Desync,
}

impl SequenceComparison {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SequenceComparison::UseIncoming => "use_incoming",
            SequenceComparison::UseCurrent => "use_current",
            SequenceComparison::Desync => "desync",
        }
    }
}

/// Outcome of the rule chain, before mapping to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleResult {
    Greater,
    Less,
    Equal,
    Desync,
}

struct Metadata<'a> {
    start: u64,
    end: u64,
    /// `range_start` if set, else the first entry.
    min: Option<u64>,
    /// Last non-zero entry if any, else `range_end`.
    max: u64,
    entries: &'a [u64],
    unique: Vec<u64>,
}

impl<'a> Metadata<'a> {
    fn new(sequence: &'a LocusSequence) -> Self {
        let first = sequence.entries.first().copied();
        let last = sequence.entries.last().copied().filter(|&v| v != 0);
        let min = if sequence.range_start != 0 {
            Some(sequence.range_start)
        } else {
            first
        };

        Self {
            start: sequence.range_start,
            end: sequence.range_end,
            min,
            max: last.unwrap_or(sequence.range_end),
            entries: &sequence.entries,
            unique: Vec::new(),
        }
    }

    fn has_no_range(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    /// `end - min`, `None` when there is no minimum.
    fn total_range(&self) -> Option<i128> {
        self.min.map(|min| i128::from(self.end) - i128::from(min))
    }
}

/// Entries of `base` missing from `other` that also fall outside `other`'s range.
fn unique_entries(base: &Metadata<'_>, other: &Metadata<'_>) -> Vec<u64> {
    let mut unique: Vec<u64> = base
        .entries
        .iter()
        .copied()
        .filter(|e| !other.entries.contains(e))
        .filter(|&e| e < other.start || e > other.end)
        .collect();
    unique.sort_unstable();
    unique
}

fn gt(a: Option<u64>, b: Option<u64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a > b)
}

fn check_sequence_overlap(current: &Metadata<'_>, incoming: &Metadata<'_>) -> Option<RuleResult> {
    if gt(current.min, Some(incoming.max)) {
        Some(RuleResult::Greater)
    } else if gt(incoming.min, Some(current.max)) {
        Some(RuleResult::Less)
    } else {
        None
    }
}

fn check_unequal_ranges(current: &Metadata<'_>, incoming: &Metadata<'_>) -> Option<RuleResult> {
    if !current.unique.is_empty() || !incoming.unique.is_empty() {
        return None;
    }

    let result = match (current.total_range(), incoming.total_range()) {
        (Some(c), Some(i)) => match c.cmp(&i) {
            Ordering::Greater => RuleResult::Greater,
            Ordering::Less => RuleResult::Less,
            Ordering::Equal => RuleResult::Equal,
        },
        _ => RuleResult::Equal,
    };
    Some(result)
}

fn check_for_unique_entries(current: &Metadata<'_>, incoming: &Metadata<'_>) -> Option<RuleResult> {
    match (current.unique.is_empty(), incoming.unique.is_empty()) {
        (false, true) => Some(RuleResult::Greater),
        (true, false) => Some(RuleResult::Less),
        _ => None,
    }
}

fn check_if_out_of_sync(current: &Metadata<'_>, incoming: &Metadata<'_>) -> RuleResult {
    let overlaps = |list: &[u64], min: Option<u64>, max: u64| {
        min.is_some_and(|min| list.iter().any(|&seq| min < seq && seq < max))
    };

    let neither_has_range = current.has_no_range() && incoming.has_no_range();
    let current_overlap = overlaps(&current.unique, incoming.min, incoming.max);
    let incoming_overlap = overlaps(&incoming.unique, current.min, current.max);

    if neither_has_range || current_overlap || incoming_overlap {
        RuleResult::Desync
    } else if gt(current.unique.first().copied(), incoming.unique.first().copied()) {
        RuleResult::Greater
    } else {
        RuleResult::Less
    }
}

fn compare_rules(current: &LocusSequence, incoming: &LocusSequence) -> RuleResult {
    let mut local = Metadata::new(current);
    let mut delta = Metadata::new(incoming);
    local.unique = unique_entries(&local, &delta);
    delta.unique = unique_entries(&delta, &local);

    check_sequence_overlap(&local, &delta)
        .or_else(|| check_unequal_ranges(&local, &delta))
        .or_else(|| check_for_unique_entries(&local, &delta))
        .unwrap_or_else(|| check_if_out_of_sync(&local, &delta))
}

/// Compare an incoming full snapshot's sequence with the working copy's.
///
/// An empty sequence on either side always yields `UseIncoming`.
#[must_use]
pub fn compare_sequences(current: &LocusSequence, incoming: &LocusSequence) -> SequenceComparison {
    if current.is_empty() || incoming.is_empty() {
        return SequenceComparison::UseIncoming;
    }

    match compare_rules(current, incoming) {
        RuleResult::Greater | RuleResult::Equal => SequenceComparison::UseCurrent,
        RuleResult::Less => SequenceComparison::UseIncoming,
        RuleResult::Desync => SequenceComparison::Desync,
    }
}
