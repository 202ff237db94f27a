//! # Domain Entities
//!
//! `SummaryDelta` (a signed adjustment caused by one event) and
//! `SummarySnapshot` (one versioned summary row).
//!
//! ## Invariants
//!
//! - `version` grows by exactly one on every apply and every finalize.
//! - `offset_committed == false` marks an in-doubt row: it reflects a delta
//!   whose log offset has not been acknowledged yet and may still be reverted.
//! - `snapshot.apply(d).apply(d.negate())` restores every numeric field.

use serde::{Deserialize, Serialize};
use shared_types::Address;

use super::value_objects::{SourcePosition, SummaryFields};

/// Signed change to one summary, attributed to a log position.
///
/// Deltas never carry absolute values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryDelta {
    /// Affected summary.
    pub key: Address,
    /// Adjustments.
    pub fields: SummaryFields,
    /// Log position of the originating record.
    pub source: SourcePosition,
    /// Chain time (unix seconds) of the originating event.
    pub activity_time: u64,
}

impl SummaryDelta {
    /// Create a delta.
    pub fn new(
        key: Address,
        fields: SummaryFields,
        source: SourcePosition,
        activity_time: u64,
    ) -> Self {
        Self {
            key,
            fields,
            source,
            activity_time,
        }
    }

    /// The retraction of this delta: same key and source, every field negated.
    pub fn negate(&self) -> Self {
        Self {
            fields: -self.fields,
            ..self.clone()
        }
    }

    /// Whether applying this delta leaves every numeric field unchanged.
    pub fn is_noop(&self) -> bool {
        self.fields.is_zero()
    }
}

/// One summary row as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySnapshot {
    /// Summary key.
    pub key: Address,
    /// Current absolute values.
    pub fields: SummaryFields,
    /// Row version, starts at 0.
    pub version: u64,
    /// Log position of the last applied delta.
    pub last_source: SourcePosition,
    /// Whether `last_source` has been acknowledged back to the log.
    pub offset_committed: bool,
    /// Earliest chain activity seen (unix seconds).
    pub first_seen_at: u64,
    /// Latest chain activity seen (unix seconds).
    pub last_seen_at: u64,
}

impl SummarySnapshot {
    /// Row created by the first delta for a key.
    pub fn from_delta(delta: &SummaryDelta) -> Self {
        Self {
            key: delta.key,
            fields: delta.fields,
            version: 0,
            last_source: delta.source.clone(),
            offset_committed: false,
            first_seen_at: delta.activity_time,
            last_seen_at: delta.activity_time,
        }
    }

    /// Row after applying `delta`. The result is in-doubt until finalized.
    pub fn apply(&self, delta: &SummaryDelta) -> Self {
        Self {
            key: self.key,
            fields: self.fields + delta.fields,
            version: self.version + 1,
            last_source: delta.source.clone(),
            offset_committed: false,
            first_seen_at: self.first_seen_at.min(delta.activity_time),
            last_seen_at: self.last_seen_at.max(delta.activity_time),
        }
    }

    /// Row after the second-phase commit.
    pub fn committed(&self) -> Self {
        Self {
            version: self.version + 1,
            offset_committed: true,
            ..self.clone()
        }
    }

    /// Whether the row was last written from the same topic partition as `source`.
    pub fn has_same_lineage(&self, source: &SourcePosition) -> bool {
        self.last_source.same_partition(source)
    }

    /// Whether the row already reflects every delta of `source`'s partition up
    /// to and including `source.offset`.
    pub fn already_reflects(&self, source: &SourcePosition) -> bool {
        self.has_same_lineage(source) && self.last_source.offset >= source.offset
    }
}
