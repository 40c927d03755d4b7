//! The repository port: the queryable index of blocks, contracts, and logs.

use async_trait::async_trait;

use crate::error::RepositoryResult;
use crate::types::{Block, Contract, Log, Node};

/// Storage interface for one node's index.
///
/// Implementations must be safe to share between the live listener and any
/// number of concurrent backfill callers and readers. Each upsert is atomic
/// with respect to its own key: no reader may observe a block with a mix of
/// old and new transactions.
#[async_trait]
pub trait Repository: Send + Sync {
    /// The node every entity in this repository is scoped to.
    fn node(&self) -> &Node;

    /// Insert or replace the block at `(block.number, node)`.
    ///
    /// Scalar fields and the whole transaction list are replaced. A block
    /// that was already final stays final.
    async fn create_or_update_block(&self, block: Block) -> RepositoryResult<()>;

    /// Fails with `BlockNotFound(number)` if absent.
    async fn find_block_by_number(&self, number: i64) -> RepositoryResult<Block>;

    /// Count of distinct stored block numbers.
    async fn block_count(&self) -> usize;

    /// Highest stored block number, or `-1` when empty.
    async fn max_block_number(&self) -> i64;

    /// Ascending numbers in `[start, end]` with no stored block.
    async fn missing_block_numbers(&self, start: i64, end: i64) -> Vec<i64>;

    /// Insert a contract or overwrite the ABI of an existing one.
    async fn create_contract(&self, contract: Contract) -> RepositoryResult<()>;

    async fn contract_exists(&self, hash: &str) -> bool;

    /// The contract with `transactions` computed from all stored blocks.
    ///
    /// Fails with `ContractNotFound(hash)` if the contract was never created.
    async fn find_contract(&self, hash: &str) -> RepositoryResult<Contract>;

    /// Upsert each log by `(block_number, index)`. Last write wins.
    async fn create_logs(&self, logs: Vec<Log>) -> RepositoryResult<()>;

    /// Logs at `block_number` emitted by `address`. Empty when none match.
    async fn find_logs(&self, address: &str, block_number: i64) -> Vec<Log>;

    /// Mark final every block with `number < chain_head - FINALITY_DEPTH`.
    async fn set_blocks_status(&self, chain_head: i64);
}
