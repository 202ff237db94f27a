//! # Reconciliation Engine
//!
//! Batch-level orchestration of the delta-merge-and-apply protocol.
//!
//! ```text
//! poll ─▶ sort ─▶ derive ─▶ fetch ─▶ merge ─▶ apply (worker pool)
//!                                                │
//!                       ┌──── any key Locked ────┴──── all keys applied ────┐
//!                       ▼                                                   ▼
//!                revert touched rows                              commit_sync(offsets)
//!                offset NOT acknowledged                                    │
//!                                                                           ▼
//!                                                              finalize touched rows
//! ```
//!
//! A batch ends either applied, acknowledged and finalized, or reverted and
//! left for redelivery. Collaborator failures end it with an error and
//! without acknowledgment; rows it left in-doubt carry this partition's
//! lineage and are picked up as already applied on redelivery.

use async_trait::async_trait;
use shared_types::{address_hex, Address, PumpRecord};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::algorithms::apply_loop::timed;
use crate::algorithms::{
    affected_keys, apply_delta, merge_batch, record_to_deltas, ApplyOutcome, ApplyPolicy,
};
use crate::config::ReconciliationConfig;
use crate::domain::{
    BatchInfo, BatchOutcome, ReconciliationError, ReconciliationResult, StoreError,
    SummaryDelta, SummarySnapshot,
};
use crate::ports::{
    LogConsumer, NoopMetrics, OffsetOracle, ReconciliationMetrics, Stage,
    SummaryReconciliationApi, SummaryStore,
};
use crate::worker_pool::{Admission, WorkerPool};

/// A key this batch wrote, with what is needed to undo or finalize it.
#[derive(Debug, Clone)]
struct AppliedKey {
    key: Address,
    previous: Option<SummarySnapshot>,
    applied_version: u64,
}

/// Counters accumulated by `run` and `drain`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Batches acknowledged.
    pub committed: u64,
    /// Batches reverted after a lock.
    pub reverted: u64,
    /// Batches that ended in an error.
    pub failed: u64,
    /// Records delivered in acknowledged batches.
    pub records: u64,
}

impl RunStats {
    fn record(&mut self, outcome: &BatchOutcome) {
        match outcome {
            BatchOutcome::Empty => {}
            BatchOutcome::Committed { info, .. } => {
                self.committed += 1;
                self.records += info.record_count as u64;
            }
            BatchOutcome::Reverted { .. } => self.reverted += 1,
        }
    }
}

/// Reconciliation engine for one assigned partition set.
pub struct ReconciliationEngine<S, O>
where
    S: SummaryStore + 'static,
    O: OffsetOracle + 'static,
{
    config: ReconciliationConfig,
    policy: ApplyPolicy,
    store: Arc<S>,
    oracle: Arc<O>,
    metrics: Arc<dyn ReconciliationMetrics>,
    pool: WorkerPool,
}

impl<S, O> ReconciliationEngine<S, O>
where
    S: SummaryStore + 'static,
    O: OffsetOracle + 'static,
{
    /// Create an engine with its own worker pool of `config.worker_threads`.
    pub fn new(config: ReconciliationConfig, store: Arc<S>, oracle: Arc<O>) -> Self {
        let policy = ApplyPolicy::from(&config);
        let pool = WorkerPool::new(config.worker_threads);
        Self {
            config,
            policy,
            store,
            oracle,
            metrics: Arc::new(NoopMetrics),
            pool,
        }
    }

    /// Replace the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn ReconciliationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Summary store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Stop accepting batches. A batch already admitted runs to completion.
    pub fn shutdown(&self) {
        info!("Reconciliation engine shutting down");
        self.pool.shutdown();
    }

    /// Reconcile one delivered batch.
    #[instrument(skip(self, records, consumer), fields(records = records.len()))]
    pub async fn process_batch(
        &self,
        mut records: Vec<PumpRecord>,
        consumer: &dyn LogConsumer,
    ) -> ReconciliationResult<BatchOutcome> {
        let admission = self.pool.admit()?;
        let started = Instant::now();
        records.sort_by_key(|record| record.offset);
        let Some(info) = batch_info(&records)? else {
            return Ok(BatchOutcome::Empty);
        };

        let deltas: Vec<SummaryDelta> = records.iter().flat_map(record_to_deltas).collect();
        let keys = affected_keys(&records);

        let fetch_started = Instant::now();
        let snapshots = timed(
            "find_all_by_id_in",
            self.policy.store_call_timeout,
            self.store.find_all_by_id_in(&keys),
        )
        .await?;
        self.observe(&info, Stage::Fetch, fetch_started);

        let merged = merge_batch(deltas, &snapshots);

        // Rows this partition already wrote (a redelivery) but never finalized.
        let carried_over: Vec<(Address, u64)> = keys
            .iter()
            .filter(|key| !merged.contains_key(*key))
            .filter_map(|key| snapshots.get(key))
            .filter(|row| !row.offset_committed && info.contains(&row.last_source))
            .map(|row| (row.key, row.version))
            .collect();

        debug!(
            batch = %info,
            keys = keys.len(),
            merged = merged.len(),
            carried_over = carried_over.len(),
            "Batch derived"
        );

        let store_started = Instant::now();
        let results = self.apply_all(&admission, merged, &snapshots).await?;
        self.observe(&info, Stage::Store, store_started);

        let mut applied = Vec::new();
        let mut to_finalize: Vec<(Address, u64)> = carried_over;
        let mut locked = Vec::new();
        let mut fatal = None;

        for result in results {
            match result {
                Ok(ApplyOutcome::Applied {
                    key,
                    previous,
                    applied_version,
                    forced,
                }) => {
                    if forced {
                        warn!(
                            key = %address_hex(&key),
                            batch = %info,
                            "Forced apply over in-doubt row"
                        );
                        self.metrics.record_forced_apply(&info.topic);
                    }
                    to_finalize.push((key, applied_version));
                    applied.push(AppliedKey {
                        key,
                        previous,
                        applied_version,
                    });
                }
                Ok(ApplyOutcome::AlreadyApplied {
                    key,
                    observed_version,
                    committed,
                }) => {
                    if !committed {
                        to_finalize.push((key, observed_version));
                    }
                }
                Ok(ApplyOutcome::Locked { key, reason }) => {
                    warn!(key = %address_hex(&key), batch = %info, ?reason, "Key locked");
                    locked.push(key);
                }
                Err(e) => {
                    fatal.get_or_insert(e);
                }
            }
        }

        if let Some(e) = fatal {
            error!(
                batch = %info,
                error = %e,
                in_doubt = applied.len(),
                "Batch failed, offset not acknowledged"
            );
            return Err(e);
        }

        if !locked.is_empty() {
            self.metrics.record_lock_abort(&info.topic);
            let revert_started = Instant::now();
            let reverted = self.revert(&info, &applied).await;
            self.observe(&info, Stage::Revert, revert_started);
            self.observe(&info, Stage::Batch, started);

            warn!(
                batch = %info,
                locked = locked.len(),
                reverted = reverted.len(),
                "Batch reverted, awaiting redelivery"
            );
            return Ok(BatchOutcome::Reverted {
                info,
                locked,
                reverted,
            });
        }

        let commit_started = Instant::now();
        consumer.commit_sync(&info).await?;
        self.observe(&info, Stage::CommitLog, commit_started);
        self.metrics
            .set_current_offset(&info.topic, info.partition, info.max_offset);

        let (finalized, finalize_failures) = self.finalize(&info, &to_finalize).await;
        self.observe(&info, Stage::Batch, started);

        info!(
            batch = %info,
            applied = applied.len(),
            finalized = finalized.len(),
            finalize_failures = finalize_failures.len(),
            "Batch committed"
        );

        Ok(BatchOutcome::Committed {
            info,
            applied: applied.into_iter().map(|a| a.key).collect(),
            finalized,
            finalize_failures,
        })
    }

    /// Poll and process batches until `shutdown` turns `true`.
    pub async fn run(
        &self,
        consumer: &dyn LogConsumer,
        mut shutdown: watch::Receiver<bool>,
    ) -> ReconciliationResult<RunStats> {
        let mut stats = RunStats::default();
        info!("Reconciliation engine started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match consumer.poll_batch().await {
                Ok(records) if records.is_empty() => Some(self.config.poll_interval()),
                Ok(records) => match self.process_batch(records, consumer).await {
                    Ok(outcome) => {
                        stats.record(&outcome);
                        outcome.is_reverted().then(|| self.config.store_retry_delay())
                    }
                    Err(ReconciliationError::ShutDown) => break,
                    Err(e) => {
                        stats.failed += 1;
                        error!(error = %e, "Batch failed, backing off");
                        Some(self.config.error_backoff())
                    }
                },
                Err(e) => {
                    error!(error = %e, "Poll failed, backing off");
                    Some(self.config.error_backoff())
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(
            committed = stats.committed,
            reverted = stats.reverted,
            failed = stats.failed,
            "Reconciliation engine stopped"
        );
        Ok(stats)
    }

    /// Process batches until the consumer has nothing pending.
    ///
    /// Errors are returned immediately. A reverted batch is retried after the
    /// contention backoff.
    pub async fn drain(&self, consumer: &dyn LogConsumer) -> ReconciliationResult<RunStats> {
        let mut stats = RunStats::default();
        loop {
            let records = consumer.poll_batch().await?;
            if records.is_empty() {
                return Ok(stats);
            }
            let outcome = self.process_batch(records, consumer).await?;
            stats.record(&outcome);
            if outcome.is_reverted() {
                tokio::time::sleep(self.config.store_retry_delay()).await;
            }
        }
    }

    async fn apply_all(
        &self,
        admission: &Admission<'_>,
        merged: HashMap<Address, SummaryDelta>,
        snapshots: &HashMap<Address, SummarySnapshot>,
    ) -> ReconciliationResult<Vec<ReconciliationResult<ApplyOutcome>>> {
        let jobs: Vec<_> = merged
            .into_values()
            .map(|delta| {
                let store = Arc::clone(&self.store);
                let oracle = Arc::clone(&self.oracle);
                let policy = self.policy.clone();
                let initial = snapshots.get(&delta.key).cloned();
                async move { apply_delta(&*store, &*oracle, &policy, &delta, initial).await }
            })
            .collect();

        admission.run_all(jobs).await
    }

    /// Undo every write of this batch. Returns the keys restored.
    async fn revert(&self, info: &BatchInfo, applied: &[AppliedKey]) -> Vec<Address> {
        let mut reverted = Vec::with_capacity(applied.len());

        for write in applied {
            let key_hex = address_hex(&write.key);
            let restored = match &write.previous {
                Some(previous) => timed(
                    "update",
                    self.policy.store_call_timeout,
                    self.store.update(previous, write.applied_version),
                )
                .await,
                None => self.remove_own_insert(write).await,
            };

            match restored {
                Ok(true) => {
                    debug!(key = %key_hex, "Reverted");
                    reverted.push(write.key);
                }
                Ok(false) => {
                    warn!(key = %key_hex, batch = %info, "Row moved on since apply, left in place");
                }
                Err(e) => {
                    error!(key = %key_hex, batch = %info, error = %e, "Revert failed");
                }
            }
        }

        reverted
    }

    async fn remove_own_insert(&self, write: &AppliedKey) -> Result<bool, StoreError> {
        let timeout = self.policy.store_call_timeout;
        let current = timed("find_by_id", timeout, self.store.find_by_id(&write.key)).await?;
        match current {
            Some(row) if row.version == write.applied_version && !row.offset_committed => {
                timed("remove", timeout, self.store.remove(&write.key)).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Second-phase commit of every row this batch produced or found
    /// unfinalized. Returns `(finalized, failed)`.
    async fn finalize(
        &self,
        info: &BatchInfo,
        targets: &[(Address, u64)],
    ) -> (Vec<Address>, Vec<Address>) {
        if targets.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let timeout = self.policy.store_call_timeout;
        let keys: Vec<Address> = targets.iter().map(|(key, _)| *key).collect();

        let reload_started = Instant::now();
        let reload = timed(
            "find_all_by_id_in",
            timeout,
            self.store.find_all_by_id_in(&keys),
        );
        let current = match reload.await {
            Ok(rows) => rows,
            Err(e) => {
                error!(batch = %info, error = %e, "Finalize reload failed, rows left in-doubt");
                for _ in &keys {
                    self.metrics.record_finalize_failure(&info.topic);
                }
                return (Vec::new(), keys);
            }
        };
        self.observe(info, Stage::Reload, reload_started);

        let finalize_started = Instant::now();
        let mut finalized = Vec::new();
        let mut failed = Vec::new();

        for (key, expected_version) in targets {
            let eligible = current
                .get(key)
                .is_some_and(|row| row.version == *expected_version && !row.offset_committed);

            let done = if eligible {
                match timed(
                    "commit_offset_bump",
                    timeout,
                    self.store.commit_offset_bump(key, *expected_version),
                )
                .await
                {
                    Ok(done) => done,
                    Err(e) => {
                        warn!(key = %address_hex(key), error = %e, "Finalize call failed");
                        false
                    }
                }
            } else {
                false
            };

            if done {
                finalized.push(*key);
            } else {
                warn!(
                    key = %address_hex(key),
                    expected_version,
                    batch = %info,
                    "Finalize skipped, row left for a later batch"
                );
                self.metrics.record_finalize_failure(&info.topic);
                failed.push(*key);
            }
        }

        self.observe(info, Stage::Finalize, finalize_started);
        (finalized, failed)
    }

    fn observe(&self, info: &BatchInfo, stage: Stage, started: Instant) {
        self.metrics
            .observe_stage(&info.topic, stage, started.elapsed());
    }
}

#[async_trait]
impl<S, O> SummaryReconciliationApi for ReconciliationEngine<S, O>
where
    S: SummaryStore + 'static,
    O: OffsetOracle + 'static,
{
    async fn process_batch(
        &self,
        records: Vec<PumpRecord>,
        consumer: &dyn LogConsumer,
    ) -> ReconciliationResult<BatchOutcome> {
        ReconciliationEngine::process_batch(self, records, consumer).await
    }

    fn config(&self) -> &ReconciliationConfig {
        &self.config
    }
}

/// Bounds of an offset-sorted batch. `None` for an empty batch.
fn batch_info(records: &[PumpRecord]) -> ReconciliationResult<Option<BatchInfo>> {
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return Ok(None);
    };

    if let Some(other) = records
        .iter()
        .find(|r| r.topic != first.topic || r.partition != first.partition)
    {
        return Err(ReconciliationError::MixedBatch {
            first: format!("{}/{}", first.topic, first.partition),
            other: format!("{}/{}", other.topic, other.partition),
        });
    }

    Ok(Some(BatchInfo {
        topic: first.topic.clone(),
        partition: first.partition,
        min_offset: first.offset,
        max_offset: last.offset,
        record_count: records.len(),
    }))
}
