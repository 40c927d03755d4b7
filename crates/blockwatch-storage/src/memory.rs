//! In-memory storage backend.
//!
//! Stores blocks, watched contracts, and logs in RAM, partitioned by node.
//! Useful for tests and short-lived indexers that don't need persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use blockwatch_core::error::{RepositoryError, RepositoryResult};
use blockwatch_core::finality::{finality_threshold, missing_in_range};
use blockwatch_core::repository::Repository;
use blockwatch_core::types::{Block, Contract, Log, LogKey, Node};

/// One node's tables. Each table has its own reader/writer lock.
#[derive(Default)]
struct NodeTables {
    blocks: RwLock<BTreeMap<i64, Block>>,
    contracts: RwLock<HashMap<String, Contract>>,
    logs: RwLock<BTreeMap<LogKey, Log>>,
}

/// Shared in-memory backend holding the tables of any number of nodes.
///
/// Cloning is cheap; clones see the same data. Repositories handed out for
/// different nodes never see each other's entities.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    nodes: Arc<Mutex<HashMap<Node, Arc<NodeTables>>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository scoped to `node`. Repeated calls for the same node share
    /// tables.
    pub fn repository(&self, node: Node) -> InMemoryRepository {
        let tables = self
            .nodes
            .lock()
            .entry(node.clone())
            .or_default()
            .clone();
        InMemoryRepository { node, tables }
    }

    /// Number of nodes with tables in this backend.
    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }
}

/// Node-scoped repository over in-memory tables.
///
/// All data is lost when the process exits.
pub struct InMemoryRepository {
    node: Node,
    tables: Arc<NodeTables>,
}

impl InMemoryRepository {
    /// A standalone repository with its own private tables.
    pub fn new(node: Node) -> Self {
        Self {
            node,
            tables: Arc::default(),
        }
    }

    /// Total number of stored logs.
    pub fn log_count(&self) -> usize {
        self.tables.logs.read().len()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    fn node(&self) -> &Node {
        &self.node
    }

    async fn create_or_update_block(&self, mut block: Block) -> RepositoryResult<()> {
        if block.number < 0 {
            return Err(RepositoryError::InvalidBlockNumber(block.number));
        }
        let mut blocks = self.tables.blocks.write();
        if let Some(previous) = blocks.get(&block.number) {
            block.is_final |= previous.is_final;
            if previous.hash != block.hash {
                tracing::debug!(
                    number = block.number,
                    old = %previous.hash,
                    new = %block.hash,
                    "Replacing block"
                );
            }
        }
        blocks.insert(block.number, block);
        Ok(())
    }

    async fn find_block_by_number(&self, number: i64) -> RepositoryResult<Block> {
        self.tables
            .blocks
            .read()
            .get(&number)
            .cloned()
            .ok_or(RepositoryError::BlockNotFound(number))
    }

    async fn block_count(&self) -> usize {
        self.tables.blocks.read().len()
    }

    async fn max_block_number(&self) -> i64 {
        self.tables
            .blocks
            .read()
            .last_key_value()
            .map(|(number, _)| *number)
            .unwrap_or(-1)
    }

    async fn missing_block_numbers(&self, start: i64, end: i64) -> Vec<i64> {
        let blocks = self.tables.blocks.read();
        missing_in_range(start, end, |n| blocks.contains_key(&n))
    }

    async fn create_contract(&self, mut contract: Contract) -> RepositoryResult<()> {
        if contract.hash.is_empty() {
            return Err(RepositoryError::InvalidContract("hash is required".into()));
        }
        // Derived on read; never stored.
        contract.transactions.clear();
        self.tables
            .contracts
            .write()
            .insert(contract.hash.clone(), contract);
        Ok(())
    }

    async fn contract_exists(&self, hash: &str) -> bool {
        self.tables.contracts.read().contains_key(hash)
    }

    async fn find_contract(&self, hash: &str) -> RepositoryResult<Contract> {
        let mut contract = self
            .tables
            .contracts
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| RepositoryError::ContractNotFound(hash.to_string()))?;

        let blocks = self.tables.blocks.read();
        contract.transactions = blocks
            .values()
            .flat_map(|block| block.transactions_to(hash))
            .cloned()
            .collect();
        Ok(contract)
    }

    async fn create_logs(&self, logs: Vec<Log>) -> RepositoryResult<()> {
        let mut table = self.tables.logs.write();
        for log in logs {
            table.insert(log.key(), log);
        }
        Ok(())
    }

    async fn find_logs(&self, address: &str, block_number: i64) -> Vec<Log> {
        self.tables
            .logs
            .read()
            .range((block_number, i64::MIN)..=(block_number, i64::MAX))
            .map(|(_, log)| log)
            .filter(|log| log.address == address)
            .cloned()
            .collect()
    }

    async fn set_blocks_status(&self, chain_head: i64) {
        if chain_head < 0 {
            return;
        }
        let threshold = finality_threshold(chain_head);
        let mut blocks = self.tables.blocks.write();
        let mut newly_final = 0usize;
        for block in blocks.range_mut(..threshold).map(|(_, b)| b) {
            if !block.is_final {
                block.is_final = true;
                newly_final += 1;
            }
        }
        if newly_final > 0 {
            tracing::debug!(chain_head, threshold, newly_final, "Finalized blocks");
        }
    }
}
