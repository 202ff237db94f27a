//! # Chain Entities
//!
//! Payloads carried on the block, uncle and transaction pump topics.
//!
//! ## Clusters
//!
//! - **Identity**: `Address`, `Hash`
//! - **Chain**: `ChainBlock`, `ChainUncle`, `ChainTransaction`
//!
//! Monetary amounts are expressed in wei and serialized as decimal strings so
//! that JSON consumers never truncate them to a float.

use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as, DisplayFromStr};

/// A 32-byte hash (block or transaction hash).
pub type Hash = [u8; 32];

/// A 20-byte Ethereum-style address.
///
/// Addresses double as the aggregate key of every summary row.
pub type Address = [u8; 20];

/// Amount in wei.
pub type Wei = u128;

/// Render an address as `0x`-prefixed lowercase hex.
pub fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}

/// Parse a `0x`-prefixed (or bare) hex address.
pub fn parse_address(s: &str) -> Option<Address> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw).ok()?;
    bytes.try_into().ok()
}

/// A block as published on the block pump topic.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    /// Block height.
    pub number: u64,
    /// Block hash.
    #[serde_as(as = "Hex")]
    pub hash: Hash,
    /// Address credited with the block rewards.
    #[serde_as(as = "Hex")]
    pub miner: Address,
    /// Static block reward.
    #[serde_as(as = "DisplayFromStr")]
    pub block_reward: Wei,
    /// Reward for including uncles.
    #[serde_as(as = "DisplayFromStr")]
    pub uncles_reward: Wei,
    /// Sum of transaction fees paid to the miner.
    #[serde_as(as = "DisplayFromStr")]
    pub tx_fees: Wei,
    /// Number of transactions in the block.
    pub tx_number: u32,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
}

impl ChainBlock {
    /// Total amount credited to the miner for this block.
    pub fn miner_reward(&self) -> Option<Wei> {
        self.block_reward
            .checked_add(self.uncles_reward)?
            .checked_add(self.tx_fees)
    }
}

/// An uncle block as published on the uncle pump topic.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainUncle {
    /// Uncle hash.
    #[serde_as(as = "Hex")]
    pub hash: Hash,
    /// Position of the uncle within the including block.
    pub position: u32,
    /// Uncle height.
    pub number: u64,
    /// Height of the block that included this uncle.
    pub block_number: u64,
    /// Address credited with the uncle reward.
    #[serde_as(as = "Hex")]
    pub miner: Address,
    /// Uncle reward.
    #[serde_as(as = "DisplayFromStr")]
    pub uncle_reward: Wei,
    /// Unix timestamp (seconds) of the including block.
    pub block_time: u64,
}

/// A mined transaction as published on the transaction pump topic.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransaction {
    /// Transaction hash.
    #[serde_as(as = "Hex")]
    pub hash: Hash,
    /// Hash of the including block.
    #[serde_as(as = "Hex")]
    pub block_hash: Hash,
    /// Height of the including block.
    pub block_number: u64,
    /// Sender.
    #[serde_as(as = "Hex")]
    pub from: Address,
    /// Recipient (absent for contract creation).
    #[serde_as(as = "Option<Hex>")]
    #[serde(default)]
    pub to: Option<Address>,
    /// Contract created by this transaction, if any.
    #[serde_as(as = "Option<Hex>")]
    #[serde(default)]
    pub created_contract: Option<Address>,
    /// Transferred value.
    #[serde_as(as = "DisplayFromStr")]
    pub value: Wei,
    /// Fee paid by the sender (gas used * gas price).
    #[serde_as(as = "DisplayFromStr")]
    pub fee: Wei,
    /// Unix timestamp (seconds) of the including block.
    pub block_time: u64,
}

impl ChainTransaction {
    /// The address receiving `value`: `to`, or the created contract.
    pub fn receiver(&self) -> Option<Address> {
        self.to.or(self.created_contract)
    }
}
