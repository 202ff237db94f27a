//! # Value Objects
//!
//! Immutable values shared by the delta pipeline and the engine.

use serde::{Deserialize, Serialize};
use shared_types::Address;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg};

/// Numeric summary fields.
///
/// Used both as absolute values (inside a snapshot) and as signed adjustments
/// (inside a delta). Combination is component-wise addition, so merging is
/// associative and commutative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SummaryFields {
    /// Balance in wei.
    pub balance: i128,
    /// Total ever received in wei.
    pub total_received: i128,
    /// Number of transactions the address took part in.
    pub tx_number: i64,
    /// Number of canonical blocks mined.
    pub mined_block_number: i64,
    /// Number of canonical uncles mined.
    pub mined_uncle_number: i64,
}

impl SummaryFields {
    /// All fields zero.
    pub const ZERO: Self = Self {
        balance: 0,
        total_received: 0,
        tx_number: 0,
        mined_block_number: 0,
        mined_uncle_number: 0,
    };

    /// Whether every field is zero.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl Add for SummaryFields {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            balance: self.balance + rhs.balance,
            total_received: self.total_received + rhs.total_received,
            tx_number: self.tx_number + rhs.tx_number,
            mined_block_number: self.mined_block_number + rhs.mined_block_number,
            mined_uncle_number: self.mined_uncle_number + rhs.mined_uncle_number,
        }
    }
}

impl AddAssign for SummaryFields {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Neg for SummaryFields {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            balance: -self.balance,
            total_received: -self.total_received,
            tx_number: -self.tx_number,
            mined_block_number: -self.mined_block_number,
            mined_uncle_number: -self.mined_uncle_number,
        }
    }
}

impl Sum for SummaryFields {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

/// Position of a record in the event log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePosition {
    /// Topic.
    pub topic: String,
    /// Partition within the topic.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
}

impl SourcePosition {
    /// Create a position.
    pub fn new(topic: impl Into<String>, partition: u32, offset: u64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    /// Whether both positions belong to the same topic partition.
    pub fn same_partition(&self, other: &SourcePosition) -> bool {
        self.partition == other.partition && self.topic == other.topic
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

/// Bounds of one delivered batch.
///
/// A batch always comes from a single topic partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    /// Topic.
    pub topic: String,
    /// Partition.
    pub partition: u32,
    /// Lowest offset in the batch.
    pub min_offset: u64,
    /// Highest offset in the batch.
    pub max_offset: u64,
    /// Number of records delivered (including ignored ones).
    pub record_count: usize,
}

impl BatchInfo {
    /// Whether `position` falls inside this batch.
    pub fn contains(&self, position: &SourcePosition) -> bool {
        position.topic == self.topic
            && position.partition == self.partition
            && (self.min_offset..=self.max_offset).contains(&position.offset)
    }
}

impl fmt::Display for BatchInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} [{}..={}]",
            self.topic, self.partition, self.min_offset, self.max_offset
        )
    }
}

/// How the engine decides that a stalled writer's source partition has moved
/// past an in-doubt row, comparing the partition's committed position (next
/// offset to consume) with the row's offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceApplyRule {
    /// Committed position must be strictly greater than the row's offset,
    /// i.e. the row's own record has been acknowledged.
    #[default]
    StrictlyGreater,
    /// Committed position may equal the row's offset, i.e. every record
    /// before the row's own has been acknowledged.
    GreaterOrEqual,
}

impl ForceApplyRule {
    /// Whether `committed_position` allows forcing over a row written at `row_offset`.
    pub fn went_further(&self, committed_position: Option<u64>, row_offset: u64) -> bool {
        match (self, committed_position) {
            (_, None) => false,
            (Self::StrictlyGreater, Some(latest)) => latest > row_offset,
            (Self::GreaterOrEqual, Some(latest)) => latest >= row_offset,
        }
    }
}

/// Result of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing to do: the batch held no records.
    Empty,
    /// All keys applied, log offset acknowledged, rows finalized.
    Committed {
        /// Batch bounds.
        info: BatchInfo,
        /// Keys mutated by this batch.
        applied: Vec<Address>,
        /// Keys moved to `offset_committed = true`.
        finalized: Vec<Address>,
        /// Keys whose finalize CAS did not succeed.
        finalize_failures: Vec<Address>,
    },
    /// A key hit unresolvable contention; every mutation was reverted and the
    /// log offset was left untouched for redelivery.
    Reverted {
        /// Batch bounds.
        info: BatchInfo,
        /// Keys that declared the lock.
        locked: Vec<Address>,
        /// Keys restored to their pre-batch state.
        reverted: Vec<Address>,
    },
}

impl BatchOutcome {
    /// Whether the log offset was acknowledged.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    /// Whether the batch was rolled back.
    pub fn is_reverted(&self) -> bool {
        matches!(self, Self::Reverted { .. })
    }
}
