//! # Domain Errors
//!
//! Error types for the Summary Reconciliation subsystem.
//!
//! Expected conditions are not errors: a CAS mismatch is retried, resolvable
//! contention is forced through, and a lock ends the batch as
//! `BatchOutcome::Reverted`. Only collaborator failures surface here.

use thiserror::Error;

/// Summary store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Store cannot serve requests (no quorum, connection lost).
    #[error("Summary store unavailable: {0}")]
    Unavailable(String),

    /// A single call exceeded its deadline.
    #[error("Summary store call timed out: {operation}")]
    Timeout {
        /// Store operation that timed out.
        operation: String,
    },

    /// Stored row could not be decoded.
    #[error("Summary row corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying within the per-key budget may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Event log failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// Offset acknowledgment failed.
    #[error("Offset commit failed for {topic}/{partition}: {reason}")]
    CommitFailed {
        /// Topic.
        topic: String,
        /// Partition.
        partition: u32,
        /// Transport reason.
        reason: String,
    },

    /// Batch could not be fetched.
    #[error("Poll failed: {0}")]
    PollFailed(String),

    /// Topic partition is not assigned to this consumer.
    #[error("Unknown topic partition {topic}/{partition}")]
    UnknownPartition {
        /// Topic.
        topic: String,
        /// Partition.
        partition: u32,
    },
}

/// Offset oracle failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// Log metadata could not be read.
    #[error("Offset oracle unavailable: {0}")]
    Unavailable(String),
}

/// Fatal-for-this-batch errors. The log offset is never committed when one
/// of these is returned, so the batch is redelivered.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// Summary store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Event log failure.
    #[error(transparent)]
    Log(#[from] LogError),

    /// Offset oracle failure.
    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// Batch spans more than one topic partition.
    #[error("Batch mixes partitions: {first} and {other}")]
    MixedBatch {
        /// First partition seen.
        first: String,
        /// Conflicting partition.
        other: String,
    },

    /// A per-key apply task panicked or was cancelled.
    #[error("Apply worker failed: {0}")]
    WorkerFailed(String),

    /// Engine worker pool has been shut down.
    #[error("Reconciliation engine is shut down")]
    ShutDown,
}

/// Result type for reconciliation operations.
pub type ReconciliationResult<T> = Result<T, ReconciliationError>;
