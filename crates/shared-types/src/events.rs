//! # Pump Events
//!
//! The record shape delivered by the partitioned, offset-addressed event log.
//!
//! ```text
//! ┌──────────┬──────────────┬───────┬───────────┬────────┐
//! │ key      │ value        │ topic │ partition │ offset │
//! │ PumpEvent│ ChainPayload │ &str  │ u32       │ u64    │
//! └──────────┴──────────────┴───────┴───────────┴────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::entities::{ChainBlock, ChainTransaction, ChainUncle};

/// Event kind tag carried in the record key.
///
/// `DroppedBlock` retracts every effect of an earlier `NewBlock` for the same
/// payload (chain reorganization). Reorg detection happens upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PumpEvent {
    /// Payload became part of the canonical chain.
    NewBlock,
    /// Payload left the canonical chain.
    DroppedBlock,
    /// Mempool transaction; affects no durable aggregate.
    NewPoolTx,
    /// Any tag this build does not recognise.
    #[serde(other)]
    Unknown,
}

/// Topic naming used by the chain pumps.
pub mod topics {
    /// Topic carrying blocks for `chain`.
    pub fn block_topic(chain: &str) -> String {
        format!("{}_BLOCK_PUMP", chain.to_uppercase())
    }

    /// Topic carrying uncles for `chain`.
    pub fn uncle_topic(chain: &str) -> String {
        format!("{}_UNCLE_PUMP", chain.to_uppercase())
    }

    /// Topic carrying transactions for `chain`.
    pub fn tx_topic(chain: &str) -> String {
        format!("{}_TX_PUMP", chain.to_uppercase())
    }
}

/// Record value, tagged by payload kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChainPayload {
    /// A block.
    Block(ChainBlock),
    /// An uncle.
    Uncle(ChainUncle),
    /// A mined transaction.
    Transaction(ChainTransaction),
}

/// One record as delivered by the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PumpRecord {
    /// Event kind.
    pub key: PumpEvent,
    /// Payload.
    pub value: ChainPayload,
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: u32,
    /// Position within the partition.
    pub offset: u64,
}

impl PumpRecord {
    /// Create a record.
    pub fn new(
        key: PumpEvent,
        value: ChainPayload,
        topic: impl Into<String>,
        partition: u32,
        offset: u64,
    ) -> Self {
        Self {
            key,
            value,
            topic: topic.into(),
            partition,
            offset,
        }
    }
}
