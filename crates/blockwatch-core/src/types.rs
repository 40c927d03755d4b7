//! Shared data model: nodes, blocks, transactions, contracts, and logs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Node ─────────────────────────────────────────────────────────────────────

/// Identity of one chain instance. Every stored entity is scoped to a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Hash of the genesis block (`0x…`).
    pub genesis_block_hash: String,
    /// Network id reported by the node.
    pub network_id: u64,
}

impl Node {
    pub fn new(genesis_block_hash: impl Into<String>, network_id: u64) -> Self {
        Self {
            genesis_block_hash: genesis_block_hash.into(),
            network_id,
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.genesis_block_hash, self.network_id)
    }
}

// ─── Header ───────────────────────────────────────────────────────────────────

/// A new-head notification. Only the number is needed to resolve the block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub number: i64,
    pub hash: String,
}

impl Header {
    pub fn new(number: i64, hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: hash.into(),
        }
    }
}

// ─── Block / Transaction ──────────────────────────────────────────────────────

/// A fully materialized block with its ordered transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: i64,
    pub hash: String,
    pub parent_hash: String,
    pub nonce: String,
    /// Unix timestamp (seconds).
    pub time: i64,
    pub difficulty: i64,
    pub gas_limit: i64,
    pub gas_used: i64,
    pub size: i64,
    pub uncle_hash: String,
    /// Set once the block is `FINALITY_DEPTH` behind the head. Never reset.
    pub is_final: bool,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// An otherwise empty block at `number`.
    pub fn at(number: i64) -> Self {
        Self {
            number,
            ..Default::default()
        }
    }

    /// Block time as a UTC datetime, if `time` is in range.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }

    /// Transactions sent to `address`.
    pub fn transactions_to<'a>(
        &'a self,
        address: &'a str,
    ) -> impl Iterator<Item = &'a Transaction> + 'a {
        self.transactions.iter().filter(move |tx| tx.to == address)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub to: String,
    pub from: String,
    pub nonce: u64,
    pub gas_limit: i64,
    pub gas_price: i64,
    pub value: i64,
}

// ─── Contract ─────────────────────────────────────────────────────────────────

/// A watched contract.
///
/// `transactions` is never stored. Repositories fill it on read from the
/// transactions of every stored block whose `to` equals `hash`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub hash: String,
    pub abi: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Contract {
    pub fn new(hash: impl Into<String>, abi: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            abi: abi.into(),
            transactions: vec![],
        }
    }

    /// Parse the ABI as JSON.
    pub fn parsed_abi(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.abi)
    }
}

// ─── Log ──────────────────────────────────────────────────────────────────────

/// Composite identity of a log: `(block_number, index)`.
pub type LogKey = (i64, i64);

/// An event log emitted by a contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub block_number: i64,
    pub index: i64,
    pub address: String,
    pub tx_hash: String,
    /// Topic position → topic hash. Position 0 is the event signature.
    pub topics: BTreeMap<u32, String>,
    pub data: String,
}

impl Log {
    pub fn key(&self) -> LogKey {
        (self.block_number, self.index)
    }

    pub fn topic(&self, position: u32) -> Option<&str> {
        self.topics.get(&position).map(String::as_str)
    }

    /// Build a topic map from topics in positional order.
    pub fn topics_from<I, S>(topics: I) -> BTreeMap<u32, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        topics
            .into_iter()
            .enumerate()
            .map(|(i, t)| (i as u32, t.into()))
            .collect()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
