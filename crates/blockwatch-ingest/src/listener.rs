//! The header listener: bridges a header subscription to per-block
//! observer notifications.
//!
//! # Loop
//! 1. Subscribe to headers with a bounded queue.
//! 2. For each header, resolve the full block (retrying transient failures).
//! 3. Notify every observer, in registration order, before taking the next
//!    header. A slow observer backpressures the whole pipeline.
//!
//! Fetch failures that survive the retry policy are reported on the error
//! channel and the header is skipped. The loop ends when the header stream
//! ends (`SubscriptionTerminated`) or `stop()` is called (`Ok`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use blockwatch_core::config::ListenerConfig;
use blockwatch_core::error::ListenerError;
use blockwatch_core::observer::ObserverSet;
use blockwatch_core::retry::RetryPolicy;
use blockwatch_core::source::{BlockSource, Unsubscriber};

use crate::fetcher::{BlockFetcher, Fetched};
use crate::shutdown::Shutdown;

/// Counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    pub headers_received: u64,
    pub blocks_notified: u64,
    pub fetch_failures: u64,
}

#[derive(Default)]
struct Counters {
    headers_received: AtomicU64,
    blocks_notified: AtomicU64,
    fetch_failures: AtomicU64,
}

/// Subscription lifecycle shared by `start` and `stop`.
#[derive(Default)]
struct Lifecycle {
    stopped: bool,
    unsubscriber: Option<Unsubscriber>,
}

/// Listens for new heads and fans each resolved block out to observers.
pub struct Listener<S: BlockSource + ?Sized> {
    source: Arc<S>,
    observers: ObserverSet,
    fetcher: BlockFetcher<S>,
    header_buffer: usize,
    errors: Option<mpsc::UnboundedSender<ListenerError>>,
    shutdown: watch::Sender<bool>,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
    counters: Counters,
}

impl<S: BlockSource + ?Sized> Listener<S> {
    /// A listener with the default configuration and no error channel.
    pub fn new(source: Arc<S>, observers: ObserverSet) -> Self {
        Self::with_config(source, observers, ListenerConfig::default(), None)
    }

    pub fn with_config(
        source: Arc<S>,
        observers: ObserverSet,
        config: ListenerConfig,
        errors: Option<mpsc::UnboundedSender<ListenerError>>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            fetcher: BlockFetcher::new(source.clone(), RetryPolicy::new(config.retry)),
            source,
            observers,
            header_buffer: config.header_buffer.max(1),
            errors,
            shutdown,
            lifecycle: Mutex::new(Lifecycle::default()),
            running: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Consume headers until the subscription ends or [`stop`](Self::stop)
    /// is called.
    ///
    /// Returns `Ok(())` after `stop`, `SubscriptionTerminated` when the
    /// header stream ends on its own, and `AlreadyRunning` if another
    /// `start` is in progress. The upstream subscription is released before
    /// this returns.
    pub async fn start(&self) -> Result<(), ListenerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ListenerError::AlreadyRunning);
        }
        let result = self.run().await;
        self.release_subscription();
        self.running.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => tracing::info!("Listener stopped"),
            Err(e) => tracing::error!(error = %e, "Listener terminated"),
        }
        result
    }

    /// Unsubscribe from the header stream and make `start` return.
    ///
    /// Idempotent, callable from any task, and safe before `start` has
    /// subscribed. A notification already in flight may still complete.
    pub fn stop(&self) {
        let unsubscriber = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.stopped = true;
            lifecycle.unsubscriber.take()
        };
        if let Some(mut unsubscriber) = unsubscriber {
            if unsubscriber.unsubscribe() {
                tracing::info!("Unsubscribed from headers");
            }
        }
        self.shutdown.send_replace(true);
    }

    fn is_stopped(&self) -> bool {
        self.lifecycle.lock().stopped
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            headers_received: self.counters.headers_received.load(Ordering::Relaxed),
            blocks_notified: self.counters.blocks_notified.load(Ordering::Relaxed),
            fetch_failures: self.counters.fetch_failures.load(Ordering::Relaxed),
        }
    }

    async fn run(&self) -> Result<(), ListenerError> {
        let mut shutdown = Shutdown::new(self.shutdown.subscribe());
        if shutdown.is_triggered() {
            return Ok(());
        }

        let mut subscription = tokio::select! {
            biased;
            _ = shutdown.wait() => return Ok(()),
            sub = self.source.subscribe_to_headers(self.header_buffer) => {
                sub.map_err(ListenerError::Subscribe)?
            }
        };

        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.stopped {
                drop(lifecycle);
                subscription.unsubscribe();
                return Ok(());
            }
            lifecycle.unsubscriber = Some(subscription.detach_unsubscriber());
        }
        tracing::info!(
            node = %self.source.node(),
            buffer = self.header_buffer,
            observers = self.observers.len(),
            "Subscribed to headers"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.wait() => return Ok(()),
                next = subscription.next() => next,
            };

            let header = match next {
                Some(Ok(header)) => header,
                // Unsubscribing may close the stream before the signal lands.
                Some(Err(_)) | None if self.is_stopped() => return Ok(()),
                Some(Err(e)) => {
                    return Err(ListenerError::SubscriptionTerminated {
                        reason: e.to_string(),
                    })
                }
                None => {
                    return Err(ListenerError::SubscriptionTerminated {
                        reason: "header stream closed".into(),
                    })
                }
            };
            self.counters.headers_received.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(number = header.number, hash = %header.hash, "Header received");

            match self.fetcher.fetch(header.number, &mut shutdown).await {
                Ok(Fetched::Block(block)) => {
                    self.observers.notify_block_added(&block).await;
                    self.counters.blocks_notified.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Fetched::Cancelled) => return Ok(()),
                Err(e) => self.report(e),
            }
        }
    }

    fn report(&self, err: ListenerError) {
        self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(error = %err, "Skipping header");
        if let Some(errors) = &self.errors {
            // Receiver may be gone; the log line above still records it.
            let _ = errors.send(err);
        }
    }

    fn release_subscription(&self) {
        let unsubscriber = self.lifecycle.lock().unsubscriber.take();
        if let Some(mut unsubscriber) = unsubscriber {
            if unsubscriber.unsubscribe() {
                tracing::info!("Unsubscribed from headers");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blockwatch_core::error::{SourceError, SourceResult};
    use blockwatch_core::observer::BlockObserver;
    use blockwatch_core::retry::RetryConfig;
    use blockwatch_core::source::HeaderSubscription;
    use blockwatch_core::types::{Block, Header, Log, Node};
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// A chain whose headers are pushed by the test.
    #[derive(Default)]
    struct FakeChain {
        blocks: Mutex<HashMap<i64, Block>>,
        fatal: Mutex<HashSet<i64>>,
        flaky: Mutex<HashMap<i64, u32>>,
        header_tx: Mutex<Option<mpsc::Sender<SourceResult<Header>>>>,
        unsubscribed: Arc<AtomicUsize>,
        subscribed: tokio::sync::Notify,
    }

    impl FakeChain {
        async fn add_block(&self, block: Block) {
            let header = Header::new(block.number, block.hash.clone());
            self.blocks.lock().insert(block.number, block);
            self.push(Ok(header)).await;
        }

        async fn push(&self, item: SourceResult<Header>) {
            let tx = self.header_tx.lock().clone();
            if let Some(tx) = tx {
                let _ = tx.send(item).await;
            }
        }

        fn close(&self) {
            self.header_tx.lock().take();
        }

        fn unsubscribe_count(&self) -> usize {
            self.unsubscribed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BlockSource for FakeChain {
        fn node(&self) -> Node {
            Node::new("GENESIS", 1)
        }

        async fn subscribe_to_headers(&self, capacity: usize) -> SourceResult<HeaderSubscription> {
            let (tx, rx) = mpsc::channel(capacity);
            *self.header_tx.lock() = Some(tx);
            let unsubscribed = self.unsubscribed.clone();
            self.subscribed.notify_one();
            Ok(HeaderSubscription::new(
                rx,
                Box::new(move || {
                    unsubscribed.fetch_add(1, Ordering::SeqCst);
                }),
            ))
        }

        async fn get_block_by_number(&self, number: i64) -> SourceResult<Option<Block>> {
            if self.fatal.lock().contains(&number) {
                return Err(SourceError::Fatal(format!("cannot decode block {number}")));
            }
            if let Some(left) = self.flaky.lock().get_mut(&number) {
                if *left > 0 {
                    *left -= 1;
                    return Err(SourceError::Transient("connection reset".into()));
                }
            }
            Ok(self.blocks.lock().get(&number).cloned())
        }

        async fn get_logs(&self, _address: &str, _from: i64, _to: i64) -> SourceResult<Vec<Log>> {
            Ok(vec![])
        }

        async fn current_head_number(&self) -> SourceResult<i64> {
            Ok(self.blocks.lock().keys().max().copied().unwrap_or(-1))
        }
    }

    /// Records blocks and wakes the test on each notification.
    struct FakeObserver {
        blocks: Mutex<Vec<Block>>,
        notified: mpsc::UnboundedSender<i64>,
    }

    impl FakeObserver {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<i64>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    blocks: Mutex::new(vec![]),
                    notified: tx,
                }),
                rx,
            )
        }

        fn numbers(&self) -> Vec<i64> {
            self.blocks.lock().iter().map(|b| b.number).collect()
        }
    }

    #[async_trait]
    impl BlockObserver for FakeObserver {
        async fn notify_block_added(&self, block: &Block) {
            self.blocks.lock().push(block.clone());
            let _ = self.notified.send(block.number);
        }
    }

    fn observers(observer: &Arc<FakeObserver>) -> ObserverSet {
        let mut set = ObserverSet::new();
        set.register(observer.clone());
        set
    }

    fn fast_config() -> ListenerConfig {
        ListenerConfig {
            header_buffer: 10,
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 1,
                max_backoff_ms: 2,
                multiplier: 2.0,
            },
        }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<i64>) -> i64 {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("observer was not notified")
            .expect("observer channel closed")
    }

    #[tokio::test]
    async fn starts_with_no_blocks() {
        let chain = Arc::new(FakeChain::default());
        let (observer, _rx) = FakeObserver::new();
        let listener = Arc::new(Listener::new(chain.clone(), observers(&observer)));
        let handle = tokio::spawn({
            let listener = listener.clone();
            async move { listener.start().await }
        });
        chain.subscribed.notified().await;
        assert!(listener.is_running());

        listener.stop();
        handle.await.unwrap().unwrap();
        assert!(observer.numbers().is_empty());
        assert_eq!(listener.stats(), ListenerStats::default());
    }

    #[tokio::test]
    async fn sees_added_blocks_in_order() {
        let chain = Arc::new(FakeChain::default());
        let (observer, mut rx) = FakeObserver::new();
        let listener = Arc::new(Listener::new(chain.clone(), observers(&observer)));
        let handle = tokio::spawn({
            let listener = listener.clone();
            async move { listener.start().await }
        });
        chain.subscribed.notified().await;

        chain.add_block(Block::at(123)).await;
        assert_eq!(recv(&mut rx).await, 123);
        chain.add_block(Block::at(456)).await;
        assert_eq!(recv(&mut rx).await, 456);

        assert_eq!(observer.numbers(), vec![123, 456]);
        listener.stop();
        handle.await.unwrap().unwrap();
        assert_eq!(listener.stats().blocks_notified, 2);
    }

    #[tokio::test]
    async fn stop_unsubscribes_exactly_once() {
        let chain = Arc::new(FakeChain::default());
        let (observer, _rx) = FakeObserver::new();
        let listener = Arc::new(Listener::new(chain.clone(), observers(&observer)));
        let handle = tokio::spawn({
            let listener = listener.clone();
            async move { listener.start().await }
        });
        chain.subscribed.notified().await;

        listener.stop();
        listener.stop();
        handle.await.unwrap().unwrap();
        assert_eq!(chain.unsubscribe_count(), 1);
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn stop_before_start() {
        let chain = Arc::new(FakeChain::default());
        let (observer, _rx) = FakeObserver::new();
        let listener = Listener::new(chain.clone(), observers(&observer));

        listener.stop();
        tokio::time::timeout(Duration::from_secs(5), listener.start())
            .await
            .expect("start should return")
            .unwrap();
        assert!(observer.numbers().is_empty());
        assert!(chain.unsubscribe_count() <= 1);
    }

    #[tokio::test]
    async fn closed_stream_terminates_subscription() {
        let chain = Arc::new(FakeChain::default());
        let (observer, _rx) = FakeObserver::new();
        let listener = Arc::new(Listener::new(chain.clone(), observers(&observer)));
        let handle = tokio::spawn({
            let listener = listener.clone();
            async move { listener.start().await }
        });
        chain.subscribed.notified().await;

        chain.close();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ListenerError::SubscriptionTerminated { .. }));
        assert_eq!(chain.unsubscribe_count(), 1);
    }

    #[tokio::test]
    async fn stream_error_terminates_subscription() {
        let chain = Arc::new(FakeChain::default());
        let (observer, _rx) = FakeObserver::new();
        let listener = Arc::new(Listener::new(chain.clone(), observers(&observer)));
        let handle = tokio::spawn({
            let listener = listener.clone();
            async move { listener.start().await }
        });
        chain.subscribed.notified().await;

        chain.push(Err(SourceError::Fatal("ws closed".into()))).await;
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            ListenerError::SubscriptionTerminated {
                reason: "fatal source error: ws closed".into()
            }
        );
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let chain = Arc::new(FakeChain::default());
        let (observer, _rx) = FakeObserver::new();
        let listener = Arc::new(Listener::new(chain.clone(), observers(&observer)));
        let handle = tokio::spawn({
            let listener = listener.clone();
            async move { listener.start().await }
        });
        chain.subscribed.notified().await;

        assert_eq!(listener.start().await, Err(ListenerError::AlreadyRunning));
        listener.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn transient_failure_is_retried_without_report() {
        let chain = Arc::new(FakeChain::default());
        chain.flaky.lock().insert(5, 2);
        let (observer, mut rx) = FakeObserver::new();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        let listener = Arc::new(Listener::with_config(
            chain.clone(),
            observers(&observer),
            fast_config(),
            Some(err_tx),
        ));
        let handle = tokio::spawn({
            let listener = listener.clone();
            async move { listener.start().await }
        });
        chain.subscribed.notified().await;

        chain.add_block(Block::at(5)).await;
        assert_eq!(recv(&mut rx).await, 5);
        assert!(err_rx.try_recv().is_err());

        listener.stop();
        handle.await.unwrap().unwrap();
        assert_eq!(observer.numbers(), vec![5]);
    }

    #[tokio::test]
    async fn fatal_failure_is_reported_and_skipped() {
        let chain = Arc::new(FakeChain::default());
        chain.fatal.lock().insert(6);
        let (observer, mut rx) = FakeObserver::new();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        let listener = Arc::new(Listener::with_config(
            chain.clone(),
            observers(&observer),
            fast_config(),
            Some(err_tx),
        ));
        let handle = tokio::spawn({
            let listener = listener.clone();
            async move { listener.start().await }
        });
        chain.subscribed.notified().await;

        chain.add_block(Block::at(6)).await;
        chain.add_block(Block::at(7)).await;
        assert_eq!(recv(&mut rx).await, 7);

        let reported = err_rx.recv().await.unwrap();
        assert!(matches!(reported, ListenerError::Fetch { number: 6, attempts: 1, .. }));
        assert_eq!(observer.numbers(), vec![7]);

        listener.stop();
        handle.await.unwrap().unwrap();
        assert_eq!(listener.stats().fetch_failures, 1);
        assert_eq!(listener.stats().headers_received, 2);
    }

    #[tokio::test]
    async fn missing_block_is_reported_after_retries() {
        let chain = Arc::new(FakeChain::default());
        let (observer, _rx) = FakeObserver::new();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        let listener = Arc::new(Listener::with_config(
            chain.clone(),
            observers(&observer),
            fast_config(),
            Some(err_tx),
        ));
        let handle = tokio::spawn({
            let listener = listener.clone();
            async move { listener.start().await }
        });
        chain.subscribed.notified().await;

        // Header without a block behind it.
        chain.push(Ok(Header::new(99, "0x99"))).await;
        let reported = tokio::time::timeout(Duration::from_secs(5), err_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reported,
            ListenerError::Fetch {
                number: 99,
                attempts: 3,
                source: SourceError::BlockUnavailable(99),
            }
        );

        listener.stop();
        handle.await.unwrap().unwrap();
        assert!(observer.numbers().is_empty());
    }
}
