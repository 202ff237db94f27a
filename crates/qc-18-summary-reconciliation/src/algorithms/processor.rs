//! # Delta Processor
//!
//! Derives summary deltas from one pump record. Pure: no I/O, no shared state.
//!
//! | Payload | Key | Adjustment |
//! |---------|-----|------------|
//! | Block | miner | balance, total_received += all rewards; mined_block_number += 1 |
//! | Uncle | miner | balance, total_received += uncle reward; mined_uncle_number += 1 |
//! | Transaction | sender | balance -= value + fee; tx_number += 1 |
//! | Transaction | receiver | balance, total_received += value; tx_number += 1 |
//!
//! `DROPPED_BLOCK` yields the exact negation. Pool and unknown events yield
//! nothing.

use shared_types::{
    Address, ChainBlock, ChainPayload, ChainTransaction, ChainUncle, PumpEvent,
    PumpRecord, Wei,
};
use std::collections::BTreeSet;
use tracing::warn;

use crate::domain::{SourcePosition, SummaryDelta, SummaryFields};

/// Deltas caused by `record`.
///
/// Malformed payloads (a transaction without receiver, amounts beyond the
/// signed 128-bit range) are logged and produce an empty list.
pub fn record_to_deltas(record: &PumpRecord) -> Vec<SummaryDelta> {
    let sign_flip = match record.key {
        PumpEvent::NewBlock => false,
        PumpEvent::DroppedBlock => true,
        PumpEvent::NewPoolTx | PumpEvent::Unknown => return Vec::new(),
    };

    let source = SourcePosition::new(record.topic.clone(), record.partition, record.offset);
    let derived = match &record.value {
        ChainPayload::Block(block) => block_deltas(block, &source),
        ChainPayload::Uncle(uncle) => uncle_deltas(uncle, &source),
        ChainPayload::Transaction(tx) => transaction_deltas(tx, &source),
    };

    match derived {
        Ok(deltas) if sign_flip => deltas.iter().map(SummaryDelta::negate).collect(),
        Ok(deltas) => deltas,
        Err(reason) => {
            warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                reason,
                "Skipping malformed record"
            );
            Vec::new()
        }
    }
}

/// Distinct keys touched by `records`, in a stable order.
pub fn affected_keys(records: &[PumpRecord]) -> Vec<Address> {
    let keys: BTreeSet<Address> = records
        .iter()
        .flat_map(record_to_deltas)
        .map(|delta| delta.key)
        .collect();
    keys.into_iter().collect()
}

fn block_deltas(
    block: &ChainBlock,
    source: &SourcePosition,
) -> Result<Vec<SummaryDelta>, &'static str> {
    let reward = block
        .miner_reward()
        .ok_or("block reward overflows")
        .and_then(signed)?;

    Ok(vec![SummaryDelta::new(
        block.miner,
        SummaryFields {
            balance: reward,
            total_received: reward,
            mined_block_number: 1,
            ..SummaryFields::ZERO
        },
        source.clone(),
        block.timestamp,
    )])
}

fn uncle_deltas(
    uncle: &ChainUncle,
    source: &SourcePosition,
) -> Result<Vec<SummaryDelta>, &'static str> {
    let reward = signed(uncle.uncle_reward)?;

    Ok(vec![SummaryDelta::new(
        uncle.miner,
        SummaryFields {
            balance: reward,
            total_received: reward,
            mined_uncle_number: 1,
            ..SummaryFields::ZERO
        },
        source.clone(),
        uncle.block_time,
    )])
}

fn transaction_deltas(
    tx: &ChainTransaction,
    source: &SourcePosition,
) -> Result<Vec<SummaryDelta>, &'static str> {
    let receiver = tx
        .receiver()
        .ok_or("transaction has neither receiver nor created contract")?;
    let value = signed(tx.value)?;
    let spent = tx
        .value
        .checked_add(tx.fee)
        .ok_or("value + fee overflows")
        .and_then(signed)?;

    let sender_delta = SummaryDelta::new(
        tx.from,
        SummaryFields {
            balance: -spent,
            tx_number: 1,
            ..SummaryFields::ZERO
        },
        source.clone(),
        tx.block_time,
    );
    let receiver_delta = SummaryDelta::new(
        receiver,
        SummaryFields {
            balance: value,
            total_received: value,
            tx_number: 1,
            ..SummaryFields::ZERO
        },
        source.clone(),
        tx.block_time,
    );

    Ok(vec![sender_delta, receiver_delta])
}

fn signed(amount: Wei) -> Result<i128, &'static str> {
    i128::try_from(amount).map_err(|_| "amount exceeds signed 128-bit range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::topics;

    const MINER: Address = [0xEA; 20];
    const ALICE: Address = [0x01; 20];
    const BOB: Address = [0x02; 20];
    const CONTRACT: Address = [0xCC; 20];

    fn block() -> ChainBlock {
        ChainBlock {
            number: 5_386_266,
            hash: [0xA2; 32],
            miner: MINER,
            block_reward: 3_000,
            uncles_reward: 93,
            tx_fees: 214,
            tx_number: 3,
            timestamp: 1_522_000_000,
        }
    }

    fn tx(to: Option<Address>, created_contract: Option<Address>) -> ChainTransaction {
        ChainTransaction {
            hash: [0x11; 32],
            block_hash: [0xA2; 32],
            block_number: 5_386_266,
            from: ALICE,
            to,
            created_contract,
            value: 100,
            fee: 7,
            block_time: 1_522_000_000,
        }
    }

    fn record(key: PumpEvent, value: ChainPayload, offset: u64) -> PumpRecord {
        PumpRecord::new(key, value, topics::block_topic("ethereum"), 0, offset)
    }

    #[test]
    fn test_block_credits_miner() {
        let mined = record(PumpEvent::NewBlock, ChainPayload::Block(block()), 4);
        let deltas = record_to_deltas(&mined);
        assert_eq!(deltas.len(), 1);
        let d = &deltas[0];
        assert_eq!(d.key, MINER);
        assert_eq!(d.fields.balance, 3_307);
        assert_eq!(d.fields.total_received, 3_307);
        assert_eq!(d.fields.mined_block_number, 1);
        assert_eq!(d.source.offset, 4);
        assert_eq!(d.activity_time, 1_522_000_000);
    }

    #[test]
    fn test_dropped_block_negates() {
        let created =
            record_to_deltas(&record(PumpEvent::NewBlock, ChainPayload::Block(block()), 4));
        let dropped =
            record_to_deltas(&record(PumpEvent::DroppedBlock, ChainPayload::Block(block()), 9));
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].key, created[0].key);
        assert_eq!(dropped[0].fields, -created[0].fields);
        assert_eq!(dropped[0].source.offset, 9);
    }

    #[test]
    fn test_uncle_credits_miner() {
        let uncle = ChainUncle {
            hash: [0x33; 32],
            position: 0,
            number: 5_386_263,
            block_number: 5_386_266,
            miner: MINER,
            uncle_reward: 2_250,
            block_time: 1_522_000_000,
        };
        let deltas = record_to_deltas(&record(PumpEvent::NewBlock, ChainPayload::Uncle(uncle), 1));
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].fields.balance, 2_250);
        assert_eq!(deltas[0].fields.mined_uncle_number, 1);
        assert_eq!(deltas[0].fields.mined_block_number, 0);
    }

    #[test]
    fn test_transaction_fans_out() {
        let deltas = record_to_deltas(&record(
            PumpEvent::NewBlock,
            ChainPayload::Transaction(tx(Some(BOB), None)),
            2,
        ));
        assert_eq!(deltas.len(), 2);

        let sender = deltas.iter().find(|d| d.key == ALICE).unwrap();
        assert_eq!(sender.fields.balance, -107);
        assert_eq!(sender.fields.total_received, 0);
        assert_eq!(sender.fields.tx_number, 1);

        let receiver = deltas.iter().find(|d| d.key == BOB).unwrap();
        assert_eq!(receiver.fields.balance, 100);
        assert_eq!(receiver.fields.total_received, 100);
        assert_eq!(receiver.fields.tx_number, 1);
    }

    #[test]
    fn test_contract_creation_credits_created_contract() {
        let deltas = record_to_deltas(&record(
            PumpEvent::NewBlock,
            ChainPayload::Transaction(tx(None, Some(CONTRACT))),
            2,
        ));
        assert!(deltas.iter().any(|d| d.key == CONTRACT && d.fields.balance == 100));
    }

    #[test]
    fn test_transaction_without_receiver_is_skipped() {
        let deltas = record_to_deltas(&record(
            PumpEvent::NewBlock,
            ChainPayload::Transaction(tx(None, None)),
            2,
        ));
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_overflowing_amount_is_skipped() {
        let mut huge = block();
        huge.block_reward = u128::MAX;
        let overflowing = record(PumpEvent::NewBlock, ChainPayload::Block(huge), 1);
        assert!(record_to_deltas(&overflowing).is_empty());

        let mut big = block();
        big.block_reward = i128::MAX as u128 + 1;
        big.uncles_reward = 0;
        big.tx_fees = 0;
        let out_of_range = record(PumpEvent::NewBlock, ChainPayload::Block(big), 1);
        assert!(record_to_deltas(&out_of_range).is_empty());
    }

    #[test]
    fn test_pool_and_unknown_events_ignored() {
        let payload = ChainPayload::Transaction(tx(Some(BOB), None));
        assert!(record_to_deltas(&record(PumpEvent::NewPoolTx, payload.clone(), 1)).is_empty());
        assert!(record_to_deltas(&record(PumpEvent::Unknown, payload, 1)).is_empty());
    }

    #[test]
    fn test_affected_keys_deduplicates() {
        let records = vec![
            record(PumpEvent::NewBlock, ChainPayload::Transaction(tx(Some(BOB), None)), 1),
            record(PumpEvent::NewBlock, ChainPayload::Transaction(tx(Some(ALICE), None)), 2),
            record(PumpEvent::NewPoolTx, ChainPayload::Block(block()), 3),
        ];
        assert_eq!(affected_keys(&records), vec![ALICE, BOB]);
    }
}
