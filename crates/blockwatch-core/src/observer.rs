//! Block observer trait, the ordered observer set, and the built-in observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::repository::Repository;
use crate::types::Block;

/// A sink notified once per newly observed block.
///
/// Delivery is at-least-once: a block may be redelivered after a retry, so
/// implementations must be idempotent.
#[async_trait]
pub trait BlockObserver: Send + Sync {
    async fn notify_block_added(&self, block: &Block);

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Observers in registration order.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn BlockObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Observers are notified in registration order.
    pub fn register(&mut self, observer: Arc<dyn BlockObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Notify every observer, one after another. Each notification finishes
    /// before the next observer is called.
    pub async fn notify_block_added(&self, block: &Block) {
        for observer in &self.observers {
            tracing::trace!(observer = observer.name(), block = block.number, "notify");
            observer.notify_block_added(block).await;
        }
    }
}

impl FromIterator<Arc<dyn BlockObserver>> for ObserverSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn BlockObserver>>>(iter: I) -> Self {
        Self {
            observers: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.observers.iter().map(|o| o.name()))
            .finish()
    }
}

// ─── LoggingObserver ──────────────────────────────────────────────────────────

/// Logs every block. No other side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

#[async_trait]
impl BlockObserver for LoggingObserver {
    async fn notify_block_added(&self, block: &Block) {
        tracing::info!(
            number = block.number,
            hash = %block.hash,
            txs = block.transactions.len(),
            time = ?block.timestamp(),
            "New block"
        );
    }

    fn name(&self) -> &str {
        "logging"
    }
}

// ─── RepositoryObserver ───────────────────────────────────────────────────────

/// Persists every block through [`Repository::create_or_update_block`].
///
/// Upserts make redelivery harmless. Write failures cannot be returned
/// through the observer contract, so they are logged and counted.
pub struct RepositoryObserver<R: ?Sized> {
    repository: Arc<R>,
    failures: AtomicU64,
}

impl<R: Repository + ?Sized> RepositoryObserver<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self {
            repository,
            failures: AtomicU64::new(0),
        }
    }

    /// Number of blocks whose write failed.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<R: Repository + ?Sized> BlockObserver for RepositoryObserver<R> {
    async fn notify_block_added(&self, block: &Block) {
        if let Err(e) = self.repository.create_or_update_block(block.clone()).await {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                number = block.number,
                node = %self.repository.node(),
                error = %e,
                "Failed to persist block"
            );
        }
    }

    fn name(&self) -> &str {
        "repository"
    }
}
