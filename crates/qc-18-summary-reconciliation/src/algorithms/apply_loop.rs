//! # Per-Key Apply Loop
//!
//! Applies one merged delta to its summary row through CAS, resolving
//! contention with other writers.
//!
//! ## State Machine
//!
//! ```text
//!                 ┌──────────── CAS mismatch / insert lost ───────────┐
//!                 ▼                                                   │
//!   ┌────────┐  classify  ┌──────────────────────────────┐           │
//!   │ Reload │──────────▶ │ NoRow                        │──insert───┤──▶ Applied
//!   └────────┘            │ RowCommitted                 │──CAS──────┤──▶ Applied
//!        ▲                │ RowUncommittedSameSource     │──CAS──────┘──▶ Applied
//!        │                │ RowUncommittedOtherSource    │
//!        │                └──────────────┬───────────────┘
//!        │   budget left: sleep          │ budget spent: ask oracle
//!        └───────────────────────────────┤
//!                                        ├── writer went further ──▶ forced CAS ──▶ Applied
//!                                        └── otherwise ────────────────────────────▶ Locked
//! ```
//!
//! Rows that already carry the delta's position (redelivery, or a write
//! whose acknowledgement timed out) end as `AlreadyApplied` or are
//! recognised as this loop's own write.

use shared_types::{address_hex, Address};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::config::ReconciliationConfig;
use crate::domain::{
    ForceApplyRule, ReconciliationResult, SourcePosition, StoreError, SummaryDelta,
    SummarySnapshot,
};
use crate::ports::{OffsetOracle, SummaryStore};

/// Bounds and timing of the apply loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyPolicy {
    /// Contention waits plus call timeouts allowed per key.
    pub max_store_attempts: u32,
    /// CAS mismatches allowed per key before declaring a lock.
    pub max_cas_conflicts: u32,
    /// Backoff between contention retries.
    pub store_retry_delay: Duration,
    /// Deadline for a single store call.
    pub store_call_timeout: Duration,
    /// Forced-apply comparison.
    pub force_apply_rule: ForceApplyRule,
}

impl From<&ReconciliationConfig> for ApplyPolicy {
    fn from(config: &ReconciliationConfig) -> Self {
        Self {
            max_store_attempts: config.max_store_attempts,
            max_cas_conflicts: config.max_cas_conflicts,
            store_retry_delay: config.store_retry_delay(),
            store_call_timeout: config.store_call_timeout(),
            force_apply_rule: config.force_apply_rule,
        }
    }
}

impl Default for ApplyPolicy {
    fn default() -> Self {
        Self::from(&ReconciliationConfig::default())
    }
}

/// Why a key could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockReason {
    /// Another writer left the row in-doubt and its source has not moved on.
    StalledWriter {
        /// Position recorded on the in-doubt row.
        holder: SourcePosition,
        /// Committed position of the holder's partition.
        committed_position: Option<u64>,
    },
    /// CAS kept losing against concurrent writers.
    CasConflicts(u32),
}

/// Terminal result of one apply loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The delta was written by this loop.
    Applied {
        /// Summary key.
        key: Address,
        /// Row the successful write replaced (`None` if this loop inserted it).
        previous: Option<SummarySnapshot>,
        /// Version of the row as written.
        applied_version: u64,
        /// Whether the write went over another writer's in-doubt row.
        forced: bool,
    },
    /// The row already reflects the delta.
    AlreadyApplied {
        /// Summary key.
        key: Address,
        /// Version seen.
        observed_version: u64,
        /// Whether the row was already finalized.
        committed: bool,
    },
    /// Unresolvable contention; the whole batch must be reverted.
    Locked {
        /// Summary key.
        key: Address,
        /// Cause.
        reason: LockReason,
    },
}

impl ApplyOutcome {
    /// Summary key.
    pub fn key(&self) -> Address {
        match self {
            Self::Applied { key, .. }
            | Self::AlreadyApplied { key, .. }
            | Self::Locked { key, .. } => *key,
        }
    }

    /// Whether this outcome aborts the batch.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

/// Loop state.
#[derive(Debug)]
enum ApplyState {
    Reload,
    NoRow,
    RowCommitted(SummarySnapshot),
    RowUncommittedSameSource(SummarySnapshot),
    RowUncommittedOtherSource(SummarySnapshot),
    Done(ApplyOutcome),
}

/// A write whose result is unknown because its call timed out.
#[derive(Debug)]
struct InFlightWrite {
    previous: Option<SummarySnapshot>,
    applied_version: u64,
    forced: bool,
}

/// Run the apply loop for one key.
///
/// `initial` is the row as fetched at the start of the batch. Store and
/// oracle failures other than call timeouts are returned as errors; timeouts
/// are retried within `max_store_attempts`.
pub async fn apply_delta(
    store: &dyn SummaryStore,
    oracle: &dyn OffsetOracle,
    policy: &ApplyPolicy,
    delta: &SummaryDelta,
    initial: Option<SummarySnapshot>,
) -> ReconciliationResult<ApplyOutcome> {
    let key = delta.key;
    let mut store_attempts: u32 = 0;
    let mut cas_conflicts: u32 = 0;
    let mut in_flight: Option<InFlightWrite> = None;
    let mut state = classify(initial, delta);

    loop {
        state = match state {
            ApplyState::Done(outcome) => return Ok(outcome),

            ApplyState::Reload => {
                match timed("find_by_id", policy.store_call_timeout, store.find_by_id(&key)).await {
                    Ok(row) => {
                        match (in_flight.take(), row) {
                            (Some(write), Some(row)) if is_own_write(&row, delta, &write) => {
                                debug!(
                                    key = %address_hex(&key),
                                    version = row.version,
                                    "Timed out write landed"
                                );
                                ApplyState::Done(ApplyOutcome::Applied {
                                    key,
                                    previous: write.previous,
                                    applied_version: write.applied_version,
                                    forced: write.forced,
                                })
                            }
                            (_, row) => classify(row, delta),
                        }
                    }
                    Err(e) if e.is_retryable() => {
                        spend_attempt(&mut store_attempts, policy, e)?;
                        ApplyState::Reload
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            ApplyState::NoRow => {
                let row = SummarySnapshot::from_delta(delta);
                match timed(
                    "insert_if_not_exists",
                    policy.store_call_timeout,
                    store.insert_if_not_exists(&row),
                )
                .await
                {
                    Ok(true) => ApplyState::Done(ApplyOutcome::Applied {
                        key,
                        previous: None,
                        applied_version: row.version,
                        forced: false,
                    }),
                    Ok(false) => {
                        debug!(key = %address_hex(&key), "Row created concurrently, re-reading");
                        ApplyState::Reload
                    }
                    Err(e) if e.is_retryable() => {
                        spend_attempt(&mut store_attempts, policy, e)?;
                        in_flight = Some(InFlightWrite {
                            previous: None,
                            applied_version: row.version,
                            forced: false,
                        });
                        ApplyState::Reload
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            ApplyState::RowCommitted(row) | ApplyState::RowUncommittedSameSource(row) => {
                if row.already_reflects(&delta.source) {
                    ApplyState::Done(ApplyOutcome::AlreadyApplied {
                        key,
                        observed_version: row.version,
                        committed: row.offset_committed,
                    })
                } else {
                    cas_apply(
                        store,
                        policy,
                        delta,
                        row,
                        false,
                        &mut store_attempts,
                        &mut cas_conflicts,
                        &mut in_flight,
                    )
                    .await?
                }
            }

            ApplyState::RowUncommittedOtherSource(row) => {
                if store_attempts < policy.max_store_attempts {
                    store_attempts += 1;
                    debug!(
                        key = %address_hex(&key),
                        holder = %row.last_source,
                        attempt = store_attempts,
                        "Row in-doubt under another writer, backing off"
                    );
                    tokio::time::sleep(policy.store_retry_delay).await;
                    ApplyState::Reload
                } else {
                    let holder = row.last_source.clone();
                    let latest = oracle.latest_offset(&holder.topic, holder.partition).await?;

                    if policy.force_apply_rule.went_further(latest, holder.offset) {
                        debug!(
                            key = %address_hex(&key),
                            holder = %holder,
                            committed_position = ?latest,
                            "Holder moved on, forcing apply"
                        );
                        cas_apply(
                            store,
                            policy,
                            delta,
                            row,
                            true,
                            &mut store_attempts,
                            &mut cas_conflicts,
                            &mut in_flight,
                        )
                        .await?
                    } else {
                        ApplyState::Done(ApplyOutcome::Locked {
                            key,
                            reason: LockReason::StalledWriter {
                                holder,
                                committed_position: latest,
                            },
                        })
                    }
                }
            }
        };
    }
}

#[allow(clippy::too_many_arguments)]
async fn cas_apply(
    store: &dyn SummaryStore,
    policy: &ApplyPolicy,
    delta: &SummaryDelta,
    row: SummarySnapshot,
    forced: bool,
    store_attempts: &mut u32,
    cas_conflicts: &mut u32,
    in_flight: &mut Option<InFlightWrite>,
) -> ReconciliationResult<ApplyState> {
    let updated = row.apply(delta);
    let applied_version = updated.version;

    match timed(
        "update",
        policy.store_call_timeout,
        store.update(&updated, row.version),
    )
    .await
    {
        Ok(true) => Ok(ApplyState::Done(ApplyOutcome::Applied {
            key: delta.key,
            previous: Some(row),
            applied_version,
            forced,
        })),
        Ok(false) => {
            *cas_conflicts += 1;
            if *cas_conflicts > policy.max_cas_conflicts {
                return Ok(ApplyState::Done(ApplyOutcome::Locked {
                    key: delta.key,
                    reason: LockReason::CasConflicts(*cas_conflicts),
                }));
            }
            debug!(
                key = %address_hex(&delta.key),
                expected_version = row.version,
                conflicts = *cas_conflicts,
                "CAS mismatch, re-reading"
            );
            Ok(ApplyState::Reload)
        }
        Err(e) if e.is_retryable() => {
            spend_attempt(store_attempts, policy, e)?;
            *in_flight = Some(InFlightWrite {
                previous: Some(row),
                applied_version,
                forced,
            });
            Ok(ApplyState::Reload)
        }
        Err(e) => Err(e.into()),
    }
}

fn classify(row: Option<SummarySnapshot>, delta: &SummaryDelta) -> ApplyState {
    match row {
        None => ApplyState::NoRow,
        Some(row) if row.offset_committed => ApplyState::RowCommitted(row),
        Some(row) if row.has_same_lineage(&delta.source) => {
            ApplyState::RowUncommittedSameSource(row)
        }
        Some(row) => ApplyState::RowUncommittedOtherSource(row),
    }
}

fn is_own_write(row: &SummarySnapshot, delta: &SummaryDelta, write: &InFlightWrite) -> bool {
    row.version == write.applied_version && row.last_source == delta.source
}

fn spend_attempt(
    store_attempts: &mut u32,
    policy: &ApplyPolicy,
    error: StoreError,
) -> Result<(), StoreError> {
    *store_attempts += 1;
    if *store_attempts >= policy.max_store_attempts {
        return Err(error);
    }
    Ok(())
}

/// Run a store call under a deadline.
pub(crate) async fn timed<T, F>(
    operation: &'static str,
    deadline: Duration,
    call: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation: operation.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemorySummaryStore;
    use crate::domain::{OracleError, SummaryFields};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    const K: Address = [0x0A; 20];
    const BLOCKS: &str = "ETHEREUM_BLOCK_PUMP";
    const TXS: &str = "ETHEREUM_TX_PUMP";

    struct FixedOracle(Mutex<HashMap<(String, u32), u64>>);

    impl FixedOracle {
        fn new() -> Self {
            Self(Mutex::new(HashMap::new()))
        }

        fn set(&self, topic: &str, partition: u32, offset: u64) {
            self.0.lock().insert((topic.to_string(), partition), offset);
        }
    }

    #[async_trait]
    impl OffsetOracle for FixedOracle {
        async fn latest_offset(
            &self,
            topic: &str,
            partition: u32,
        ) -> Result<Option<u64>, OracleError> {
            Ok(self.0.lock().get(&(topic.to_string(), partition)).copied())
        }
    }

    fn policy() -> ApplyPolicy {
        ApplyPolicy {
            max_store_attempts: 3,
            max_cas_conflicts: 5,
            store_retry_delay: Duration::from_millis(1),
            store_call_timeout: Duration::from_secs(1),
            force_apply_rule: ForceApplyRule::StrictlyGreater,
        }
    }

    fn delta(topic: &str, balance: i128, offset: u64) -> SummaryDelta {
        SummaryDelta::new(
            K,
            SummaryFields {
                balance,
                ..SummaryFields::ZERO
            },
            SourcePosition::new(topic, 0, offset),
            1_000,
        )
    }

    #[tokio::test]
    async fn test_insert_when_no_row() {
        let store = InMemorySummaryStore::new();
        let oracle = FixedOracle::new();
        let d = delta(BLOCKS, 7, 11);

        let outcome = apply_delta(&store, &oracle, &policy(), &d, None).await.unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                key: K,
                previous: None,
                applied_version: 0,
                forced: false,
            }
        );
        let row = store.get(&K).unwrap();
        assert_eq!(row.fields.balance, 7);
        assert!(!row.offset_committed);
    }

    #[tokio::test]
    async fn test_update_committed_row() {
        let store = InMemorySummaryStore::new();
        let base = SummarySnapshot::from_delta(&delta(BLOCKS, 7, 11)).committed();
        store.put(base.clone());
        let oracle = FixedOracle::new();

        let outcome = apply_delta(
            &store,
            &oracle,
            &policy(),
            &delta(BLOCKS, -2, 12),
            Some(base.clone()),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                key: K,
                previous: Some(base),
                applied_version: 2,
                forced: false,
            }
        );
        assert_eq!(store.get(&K).unwrap().fields.balance, 5);
    }

    #[tokio::test]
    async fn test_stale_initial_snapshot_retries_after_cas_mismatch() {
        let store = InMemorySummaryStore::new();
        let stale = SummarySnapshot::from_delta(&delta(BLOCKS, 7, 11)).committed();
        let fresh = stale.apply(&delta(TXS, 1, 3)).committed();
        store.put(fresh.clone());
        let oracle = FixedOracle::new();

        let outcome = apply_delta(&store, &oracle, &policy(), &delta(BLOCKS, 2, 12), Some(stale))
            .await
            .unwrap();
        match outcome {
            ApplyOutcome::Applied { previous, .. } => assert_eq!(previous, Some(fresh)),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(store.get(&K).unwrap().fields.balance, 10);
    }

    #[tokio::test]
    async fn test_same_source_in_doubt_row_is_continued() {
        let store = InMemorySummaryStore::new();
        let base = SummarySnapshot::from_delta(&delta(BLOCKS, 7, 11));
        store.put(base.clone());
        let oracle = FixedOracle::new();

        let outcome = apply_delta(&store, &oracle, &policy(), &delta(BLOCKS, 1, 20), Some(base))
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied { forced: false, .. }));
        assert_eq!(store.get(&K).unwrap().fields.balance, 8);
    }

    #[tokio::test]
    async fn test_already_reflected_row_is_not_touched() {
        let store = InMemorySummaryStore::new();
        let base = SummarySnapshot::from_delta(&delta(BLOCKS, 7, 11));
        store.put(base.clone());
        let oracle = FixedOracle::new();

        let outcome = apply_delta(&store, &oracle, &policy(), &delta(BLOCKS, 7, 11), Some(base))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::AlreadyApplied {
                key: K,
                observed_version: 0,
                committed: false,
            }
        );
        assert_eq!(store.get(&K).unwrap().fields.balance, 7);
    }

    #[tokio::test]
    async fn test_stalled_writer_locks() {
        let store = InMemorySummaryStore::new();
        let held = SummarySnapshot::from_delta(&delta(TXS, 7, 40));
        store.put(held.clone());
        let oracle = FixedOracle::new();
        oracle.set(TXS, 0, 39);

        let outcome = apply_delta(
            &store,
            &oracle,
            &policy(),
            &delta(BLOCKS, 1, 5),
            Some(held.clone()),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Locked {
                key: K,
                reason: LockReason::StalledWriter {
                    holder: held.last_source.clone(),
                    committed_position: Some(39),
                },
            }
        );
        assert_eq!(store.get(&K).unwrap(), held);
    }

    #[tokio::test]
    async fn test_forced_apply_when_holder_went_further() {
        let store = InMemorySummaryStore::new();
        let held = SummarySnapshot::from_delta(&delta(TXS, 7, 40));
        store.put(held.clone());
        let oracle = FixedOracle::new();
        oracle.set(TXS, 0, 41);

        let outcome = apply_delta(
            &store,
            &oracle,
            &policy(),
            &delta(BLOCKS, 1, 5),
            Some(held.clone()),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied { forced: true, .. }));
        assert_eq!(store.get(&K).unwrap().fields.balance, 8);
    }

    #[tokio::test]
    async fn test_equal_offset_respects_rule() {
        for (rule, expect_forced) in [
            (ForceApplyRule::StrictlyGreater, false),
            (ForceApplyRule::GreaterOrEqual, true),
        ] {
            let store = InMemorySummaryStore::new();
            let held = SummarySnapshot::from_delta(&delta(TXS, 7, 40));
            store.put(held.clone());
            let oracle = FixedOracle::new();
            oracle.set(TXS, 0, 40);
            let policy = ApplyPolicy {
                force_apply_rule: rule,
                ..policy()
            };

            let outcome = apply_delta(&store, &oracle, &policy, &delta(BLOCKS, 1, 5), Some(held))
                .await
                .unwrap();
            assert_eq!(!outcome.is_locked(), expect_forced, "rule {rule:?}");
        }
    }

    #[tokio::test]
    async fn test_holder_finalizing_during_backoff_unblocks() {
        let store = std::sync::Arc::new(InMemorySummaryStore::new());
        let held = SummarySnapshot::from_delta(&delta(TXS, 7, 40));
        store.put(held.clone());
        let oracle = FixedOracle::new();
        let policy = ApplyPolicy {
            max_store_attempts: 50,
            store_retry_delay: Duration::from_millis(5),
            ..policy()
        };

        let finalizer = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                store.commit_offset_bump(&K, 0).await.unwrap()
            })
        };

        let outcome = apply_delta(&*store, &oracle, &policy, &delta(BLOCKS, 1, 5), Some(held))
            .await
            .unwrap();
        assert!(finalizer.await.unwrap());
        assert!(matches!(outcome, ApplyOutcome::Applied { forced: false, applied_version: 2, .. }));
        assert_eq!(store.get(&K).unwrap().fields.balance, 8);
    }

    /// Performs the write, then never answers.
    struct StallAfterWrite {
        inner: InMemorySummaryStore,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl SummaryStore for StallAfterWrite {
        async fn find_by_id(&self, key: &Address) -> Result<Option<SummarySnapshot>, StoreError> {
            self.inner.find_by_id(key).await
        }

        async fn find_all_by_id_in(
            &self,
            keys: &[Address],
        ) -> Result<HashMap<Address, SummarySnapshot>, StoreError> {
            self.inner.find_all_by_id_in(keys).await
        }

        async fn insert_if_not_exists(
            &self,
            snapshot: &SummarySnapshot,
        ) -> Result<bool, StoreError> {
            self.inner.insert_if_not_exists(snapshot).await
        }

        async fn update(
            &self,
            snapshot: &SummarySnapshot,
            expected_version: u64,
        ) -> Result<bool, StoreError> {
            let swapped = self.inner.update(snapshot, expected_version).await?;
            if !self.stalled.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(swapped)
        }

        async fn remove(&self, key: &Address) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }

        async fn commit_offset_bump(
            &self,
            key: &Address,
            expected_version: u64,
        ) -> Result<bool, StoreError> {
            self.inner.commit_offset_bump(key, expected_version).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_write_is_recognised() {
        let store = StallAfterWrite {
            inner: InMemorySummaryStore::new(),
            stalled: AtomicBool::new(false),
        };
        let base = SummarySnapshot::from_delta(&delta(TXS, 7, 40)).committed();
        store.inner.put(base.clone());
        let oracle = FixedOracle::new();

        let outcome = apply_delta(
            &store,
            &oracle,
            &policy(),
            &delta(BLOCKS, 1, 5),
            Some(base.clone()),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                key: K,
                previous: Some(base),
                applied_version: 2,
                forced: false,
            }
        );
        assert_eq!(store.inner.get(&K).unwrap().fields.balance, 8);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_fatal() {
        let store = InMemorySummaryStore::new();
        store.set_unavailable(true);
        let oracle = FixedOracle::new();

        let result = apply_delta(&store, &oracle, &policy(), &delta(BLOCKS, 1, 5), None).await;
        assert!(matches!(
            result,
            Err(crate::domain::ReconciliationError::Store(StoreError::Unavailable(_)))
        ));
    }

    /// Every CAS loses to some other writer.
    struct LosingStore {
        inner: InMemorySummaryStore,
    }

    #[async_trait]
    impl SummaryStore for LosingStore {
        async fn find_by_id(&self, key: &Address) -> Result<Option<SummarySnapshot>, StoreError> {
            self.inner.find_by_id(key).await
        }

        async fn find_all_by_id_in(
            &self,
            keys: &[Address],
        ) -> Result<HashMap<Address, SummarySnapshot>, StoreError> {
            self.inner.find_all_by_id_in(keys).await
        }

        async fn insert_if_not_exists(
            &self,
            snapshot: &SummarySnapshot,
        ) -> Result<bool, StoreError> {
            self.inner.insert_if_not_exists(snapshot).await
        }

        async fn update(&self, _: &SummarySnapshot, _: u64) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn remove(&self, key: &Address) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }

        async fn commit_offset_bump(
            &self,
            key: &Address,
            version: u64,
        ) -> Result<bool, StoreError> {
            self.inner.commit_offset_bump(key, version).await
        }
    }

    #[tokio::test]
    async fn test_endless_cas_conflicts_lock() {
        let store = LosingStore {
            inner: InMemorySummaryStore::new(),
        };
        let base = SummarySnapshot::from_delta(&delta(BLOCKS, 7, 11)).committed();
        store.inner.put(base.clone());
        let oracle = FixedOracle::new();
        let policy = ApplyPolicy {
            max_cas_conflicts: 4,
            ..policy()
        };

        let outcome = apply_delta(
            &store,
            &oracle,
            &policy,
            &delta(BLOCKS, 1, 12),
            Some(base.clone()),
        )
        .await
        .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Locked {
                key: K,
                reason: LockReason::CasConflicts(5),
            }
        );
        assert_eq!(store.inner.get(&K), Some(base));
    }

    #[tokio::test]
    async fn test_lost_insert_race_against_in_doubt_row_locks() {
        let store = InMemorySummaryStore::new();
        let other = SummarySnapshot::from_delta(&delta(TXS, 40, 9));
        store.put(other.clone());
        let oracle = FixedOracle::new();

        let outcome = apply_delta(&store, &oracle, &policy(), &delta(BLOCKS, 1, 5), None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Locked {
                key: K,
                reason: LockReason::StalledWriter {
                    holder: SourcePosition::new(TXS, 0, 9),
                    committed_position: None,
                },
            }
        );
        assert_eq!(store.get(&K), Some(other));
    }

    #[tokio::test]
    async fn test_lost_insert_race_against_committed_row_updates() {
        let store = InMemorySummaryStore::new();
        let other = SummarySnapshot::from_delta(&delta(TXS, 40, 9)).committed();
        store.put(other.clone());
        let oracle = FixedOracle::new();

        let outcome = apply_delta(&store, &oracle, &policy(), &delta(BLOCKS, 1, 5), None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                key: K,
                previous: Some(other),
                applied_version: 2,
                forced: false,
            }
        );
        let row = store.get(&K).unwrap();
        assert_eq!(row.fields.balance, 41);
        assert_eq!(row.last_source, SourcePosition::new(BLOCKS, 0, 5));
    }
}
