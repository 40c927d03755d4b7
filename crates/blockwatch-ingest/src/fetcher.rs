//! Header → full block resolution with bounded retry.
//!
//! Transient failures (timeouts, a block the node has not served yet) are
//! retried with exponential backoff. Fatal failures and exhausted retries
//! become `ListenerError::Fetch`; nothing is silently dropped.

use std::sync::Arc;

use blockwatch_core::error::{ListenerError, SourceError};
use blockwatch_core::retry::RetryPolicy;
use blockwatch_core::source::{require_block, BlockSource};
use blockwatch_core::types::Block;

use crate::shutdown::Shutdown;

/// Result of a fetch that may be interrupted by shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Block(Block),
    /// Shutdown fired before the block was resolved.
    Cancelled,
}

/// Wraps a `BlockSource` and adds the retry policy.
pub struct BlockFetcher<S: ?Sized> {
    source: Arc<S>,
    policy: RetryPolicy,
}

impl<S: BlockSource + ?Sized> BlockFetcher<S> {
    pub fn new(source: Arc<S>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch block `number`, retrying transient failures.
    ///
    /// Both the fetch and every backoff sleep are abandoned as soon as
    /// `shutdown` fires.
    pub async fn fetch(&self, number: i64, shutdown: &mut Shutdown) -> Result<Fetched, ListenerError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = shutdown.wait() => return Ok(Fetched::Cancelled),
                result = self.fetch_once(number) => result,
            };

            let err = match result {
                Ok(block) => return Ok(Fetched::Block(block)),
                Err(e) => e,
            };

            let delay = if err.is_retryable() {
                self.policy.next_delay(attempt)
            } else {
                None
            };
            let Some(delay) = delay else {
                return Err(ListenerError::Fetch {
                    number,
                    attempts: attempt,
                    source: err,
                });
            };

            tracing::warn!(
                number,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Block fetch failed, retrying"
            );
            tokio::select! {
                biased;
                _ = shutdown.wait() => return Ok(Fetched::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn fetch_once(&self, number: i64) -> Result<Block, SourceError> {
        let block = require_block(self.source.as_ref(), number).await?;
        if block.number != number {
            return Err(SourceError::Fatal(format!(
                "requested block {number}, node returned block {}",
                block.number
            )));
        }
        Ok(block)
    }
}
