//! The block source port: new-head notifications and on-demand fetches.
//!
//! The concrete node client (JSON-RPC over WS/IPC) lives outside this
//! workspace; anything that can push headers into a bounded channel and
//! answer block/log queries can drive the listener.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{SourceError, SourceResult};
use crate::types::{Block, Header, Log, Node};

/// One-shot hook that tears down the upstream subscription.
pub type UnsubscribeFn = Box<dyn FnOnce() + Send + 'static>;

/// A live header subscription.
///
/// Items arrive through a bounded channel whose capacity is fixed at
/// subscribe time. The channel closing, or an `Err` item, ends the
/// subscription. The unsubscribe hook runs at most once: on an explicit
/// [`unsubscribe`](Self::unsubscribe), through a detached [`Unsubscriber`],
/// or on drop.
pub struct HeaderSubscription {
    headers: mpsc::Receiver<SourceResult<Header>>,
    unsubscribe: Option<UnsubscribeFn>,
}

impl HeaderSubscription {
    pub fn new(headers: mpsc::Receiver<SourceResult<Header>>, unsubscribe: UnsubscribeFn) -> Self {
        Self {
            headers,
            unsubscribe: Some(unsubscribe),
        }
    }

    /// Wait for the next header. `None` means the stream ended.
    pub async fn next(&mut self) -> Option<SourceResult<Header>> {
        self.headers.recv().await
    }

    /// Run the unsubscribe hook if it has not run yet.
    pub fn unsubscribe(&mut self) {
        if let Some(hook) = self.unsubscribe.take() {
            hook();
        }
    }

    /// Split the hook off so another owner can cancel the subscription.
    ///
    /// After this, dropping the subscription no longer unsubscribes.
    pub fn detach_unsubscriber(&mut self) -> Unsubscriber {
        Unsubscriber(self.unsubscribe.take())
    }
}

impl Drop for HeaderSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for HeaderSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderSubscription")
            .field("subscribed", &self.unsubscribe.is_some())
            .finish()
    }
}

/// A detached unsubscribe hook.
pub struct Unsubscriber(Option<UnsubscribeFn>);

impl Unsubscriber {
    /// Run the hook. Returns `false` if it already ran.
    pub fn unsubscribe(&mut self) -> bool {
        match self.0.take() {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }
}

/// Trait for reading chain data from a remote node.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Identity of the connected chain.
    fn node(&self) -> Node;

    /// Subscribe to new heads, buffering at most `capacity` headers.
    async fn subscribe_to_headers(&self, capacity: usize) -> SourceResult<HeaderSubscription>;

    /// Fetch a full block. `Ok(None)` if the node does not have it.
    async fn get_block_by_number(&self, number: i64) -> SourceResult<Option<Block>>;

    /// Logs emitted by `address` in `[from_block, to_block]`.
    async fn get_logs(&self, address: &str, from_block: i64, to_block: i64)
        -> SourceResult<Vec<Log>>;

    /// Number of the node's current head.
    async fn current_head_number(&self) -> SourceResult<i64>;
}

/// Convenience: turn `Ok(None)` into `BlockUnavailable`.
pub async fn require_block<S: BlockSource + ?Sized>(source: &S, number: i64) -> SourceResult<Block> {
    source
        .get_block_by_number(number)
        .await?
        .ok_or(SourceError::BlockUnavailable(number))
}
