//! # Outbound Ports (Driven Ports)
//!
//! SPIs required by the Summary Reconciliation subsystem.
//!
//! - `SummaryStore`: versioned, CAS-updatable summary rows
//! - `OffsetOracle`: committed position of a topic partition
//! - `LogConsumer`: batch delivery and synchronous offset acknowledgment
//! - `ReconciliationMetrics`: observability hooks

use async_trait::async_trait;
use shared_types::{Address, PumpRecord};
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::{BatchInfo, LogError, OracleError, StoreError, SummarySnapshot};

/// Versioned storage for summary rows.
///
/// Every mutating call must be atomic against concurrent callers
/// (quorum-consistent in a replicated deployment). The engine supplies no
/// external locking.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Read one row.
    async fn find_by_id(&self, key: &Address) -> Result<Option<SummarySnapshot>, StoreError>;

    /// Read many rows. Missing keys are simply absent from the result.
    async fn find_all_by_id_in(
        &self,
        keys: &[Address],
    ) -> Result<HashMap<Address, SummarySnapshot>, StoreError>;

    /// Insert `snapshot` only if no row exists for its key.
    ///
    /// Returns `true` if the insert happened.
    async fn insert_if_not_exists(&self, snapshot: &SummarySnapshot) -> Result<bool, StoreError>;

    /// Replace the row with `snapshot` if its current version equals
    /// `expected_version`. The new row is stored exactly as given.
    ///
    /// Returns `true` if the swap happened.
    async fn update(
        &self,
        snapshot: &SummarySnapshot,
        expected_version: u64,
    ) -> Result<bool, StoreError>;

    /// Delete a row.
    async fn remove(&self, key: &Address) -> Result<(), StoreError>;

    /// Second-phase commit: set `offset_committed = true` and bump the
    /// version, if the current version equals `expected_version`.
    ///
    /// Returns `true` if the swap happened.
    async fn commit_offset_bump(
        &self,
        key: &Address,
        expected_version: u64,
    ) -> Result<bool, StoreError>;
}

/// Read path over durably acknowledged log state.
#[async_trait]
pub trait OffsetOracle: Send + Sync {
    /// Committed position of `topic`/`partition`: the offset of the next
    /// record to consume, one past the last acknowledged record. `None` if
    /// nothing has been acknowledged.
    async fn latest_offset(&self, topic: &str, partition: u32) -> Result<Option<u64>, OracleError>;
}

/// Consumer side of the event log for one assigned partition set.
///
/// Until `commit_sync` succeeds for a batch, the consumer keeps redelivering
/// it (after a restart or on the next poll).
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Fetch the next batch. An empty batch means nothing is pending.
    async fn poll_batch(&self) -> Result<Vec<PumpRecord>, LogError>;

    /// Acknowledge every record of `batch`.
    async fn commit_sync(&self, batch: &BatchInfo) -> Result<(), LogError>;
}

/// Timed stages of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Initial snapshot fetch.
    Fetch,
    /// Apply loops for all keys.
    Store,
    /// Log offset acknowledgment.
    CommitLog,
    /// Re-read of touched rows before finalize.
    Reload,
    /// Second-phase commit of touched rows.
    Finalize,
    /// Rollback after a lock.
    Revert,
    /// Whole batch.
    Batch,
}

impl Stage {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Store => "store",
            Self::CommitLog => "commit_log",
            Self::Reload => "reload",
            Self::Finalize => "finalize",
            Self::Revert => "revert",
            Self::Batch => "batch",
        }
    }
}

/// Observability hooks. Implementations must be cheap and non-blocking.
pub trait ReconciliationMetrics: Send + Sync {
    /// A batch ended in a lock abort.
    fn record_lock_abort(&self, topic: &str);

    /// A key was force-applied over another writer's in-doubt row.
    fn record_forced_apply(&self, topic: &str);

    /// A finalize CAS did not succeed.
    fn record_finalize_failure(&self, topic: &str);

    /// Duration of one stage.
    fn observe_stage(&self, topic: &str, stage: Stage, elapsed: Duration);

    /// Last acknowledged offset.
    fn set_current_offset(&self, topic: &str, partition: u32, offset: u64);
}

/// Metrics sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl ReconciliationMetrics for NoopMetrics {
    fn record_lock_abort(&self, _topic: &str) {}

    fn record_forced_apply(&self, _topic: &str) {}

    fn record_finalize_failure(&self, _topic: &str) {}

    fn observe_stage(&self, _topic: &str, _stage: Stage, _elapsed: Duration) {}

    fn set_current_offset(&self, _topic: &str, _partition: u32, _offset: u64) {}
}
