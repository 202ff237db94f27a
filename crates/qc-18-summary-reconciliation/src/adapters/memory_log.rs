//! In-memory partitioned event log.
//!
//! Offset-addressed per topic partition. A consumer handle always polls from
//! the partition's last acknowledged offset, so anything not acknowledged
//! through `commit_sync` is delivered again on the next poll.

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{ChainPayload, PumpEvent, PumpRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::{BatchInfo, LogError, OracleError};
use crate::ports::{LogConsumer, OffsetOracle};

type PartitionId = (String, u32);

#[derive(Debug, Default)]
struct PartitionLog {
    records: Vec<PumpRecord>,
    /// Offset of the last acknowledged record.
    acknowledged: Option<u64>,
}

impl PartitionLog {
    fn next_offset(&self) -> u64 {
        self.records.len() as u64
    }

    fn first_pending(&self) -> usize {
        self.acknowledged.map_or(0, |offset| offset as usize + 1)
    }
}

/// In-memory event log shared by producers, consumers and the offset oracle.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    partitions: RwLock<HashMap<PartitionId, PartitionLog>>,
    fail_next_commit: AtomicBool,
}

impl InMemoryEventLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return its offset.
    pub fn append(
        &self,
        topic: &str,
        partition: u32,
        key: PumpEvent,
        value: ChainPayload,
    ) -> u64 {
        let mut partitions = self.partitions.write();
        let log = partitions
            .entry((topic.to_string(), partition))
            .or_default();
        let offset = log.next_offset();
        log.records
            .push(PumpRecord::new(key, value, topic, partition, offset));
        offset
    }

    /// Consumer handle for one topic partition.
    pub fn consumer(
        self: &Arc<Self>,
        topic: impl Into<String>,
        partition: u32,
        max_batch: usize,
    ) -> InMemoryLogConsumer {
        InMemoryLogConsumer {
            log: Arc::clone(self),
            topic: topic.into(),
            partition,
            max_batch: max_batch.max(1),
        }
    }

    /// Offset of the last acknowledged record, if any.
    pub fn acknowledged_offset(&self, topic: &str, partition: u32) -> Option<u64> {
        self.partitions
            .read()
            .get(&(topic.to_string(), partition))
            .and_then(|log| log.acknowledged)
    }

    /// Records appended but not yet acknowledged.
    pub fn lag(&self, topic: &str, partition: u32) -> usize {
        self.partitions
            .read()
            .get(&(topic.to_string(), partition))
            .map_or(0, |log| log.records.len().saturating_sub(log.first_pending()))
    }

    /// Every known topic partition, sorted.
    pub fn partitions(&self) -> Vec<(String, u32)> {
        let mut ids: Vec<_> = self.partitions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Make the next `commit_sync` fail.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    fn pending(
        &self,
        topic: &str,
        partition: u32,
        max: usize,
    ) -> Result<Vec<PumpRecord>, LogError> {
        let partitions = self.partitions.read();
        let log = partitions
            .get(&(topic.to_string(), partition))
            .ok_or_else(|| LogError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            })?;
        Ok(log
            .records
            .iter()
            .skip(log.first_pending())
            .take(max)
            .cloned()
            .collect())
    }

    fn acknowledge(&self, batch: &BatchInfo) -> Result<(), LogError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(LogError::CommitFailed {
                topic: batch.topic.clone(),
                partition: batch.partition,
                reason: "injected failure".into(),
            });
        }

        let mut partitions = self.partitions.write();
        let log = partitions
            .get_mut(&(batch.topic.clone(), batch.partition))
            .ok_or_else(|| LogError::UnknownPartition {
                topic: batch.topic.clone(),
                partition: batch.partition,
            })?;
        if batch.max_offset >= log.next_offset() {
            return Err(LogError::CommitFailed {
                topic: batch.topic.clone(),
                partition: batch.partition,
                reason: format!("offset {} beyond log end", batch.max_offset),
            });
        }
        log.acknowledged = Some(
            log.acknowledged
                .map_or(batch.max_offset, |acked| acked.max(batch.max_offset)),
        );
        Ok(())
    }
}

#[async_trait]
impl OffsetOracle for InMemoryEventLog {
    async fn latest_offset(&self, topic: &str, partition: u32) -> Result<Option<u64>, OracleError> {
        Ok(self
            .acknowledged_offset(topic, partition)
            .map(|offset| offset + 1))
    }
}

/// Consumer bound to one topic partition of an `InMemoryEventLog`.
#[derive(Debug, Clone)]
pub struct InMemoryLogConsumer {
    log: Arc<InMemoryEventLog>,
    topic: String,
    partition: u32,
    max_batch: usize,
}

impl InMemoryLogConsumer {
    /// Assigned topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Assigned partition.
    pub fn partition(&self) -> u32 {
        self.partition
    }
}

#[async_trait]
impl LogConsumer for InMemoryLogConsumer {
    async fn poll_batch(&self) -> Result<Vec<PumpRecord>, LogError> {
        self.log.pending(&self.topic, self.partition, self.max_batch)
    }

    async fn commit_sync(&self, batch: &BatchInfo) -> Result<(), LogError> {
        if batch.topic != self.topic || batch.partition != self.partition {
            return Err(LogError::UnknownPartition {
                topic: batch.topic.clone(),
                partition: batch.partition,
            });
        }
        self.log.acknowledge(batch)
    }
}
