//! Fluent builder for header listeners.
//!
//! # Example
//!
//! ```rust,ignore
//! use blockwatch_ingest::ListenerBuilder;
//! use blockwatch_core::observer::{LoggingObserver, RepositoryObserver};
//!
//! let (listener, mut errors) = ListenerBuilder::new(source)
//!     .observer(Arc::new(RepositoryObserver::new(repository)))
//!     .observer(Arc::new(LoggingObserver::default()))
//!     .header_buffer(10)
//!     .with_error_channel();
//! let listener = listener.build();
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;

use blockwatch_core::config::ListenerConfig;
use blockwatch_core::error::ListenerError;
use blockwatch_core::observer::{BlockObserver, ObserverSet};
use blockwatch_core::retry::RetryConfig;
use blockwatch_core::source::BlockSource;

use crate::listener::Listener;

/// Fluent builder for [`Listener`].
pub struct ListenerBuilder<S: BlockSource + ?Sized> {
    source: Arc<S>,
    observers: ObserverSet,
    config: ListenerConfig,
    errors: Option<mpsc::UnboundedSender<ListenerError>>,
}

impl<S: BlockSource + ?Sized> ListenerBuilder<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            observers: ObserverSet::new(),
            config: ListenerConfig::default(),
            errors: None,
        }
    }

    /// Register an observer. Observers are notified in registration order.
    pub fn observer(mut self, observer: Arc<dyn BlockObserver>) -> Self {
        self.observers.register(observer);
        self
    }

    pub fn observers(mut self, observers: impl IntoIterator<Item = Arc<dyn BlockObserver>>) -> Self {
        for observer in observers {
            self.observers.register(observer);
        }
        self
    }

    /// Capacity of the header queue. Clamped to at least 1.
    pub fn header_buffer(mut self, capacity: usize) -> Self {
        self.config.header_buffer = capacity.max(1);
        self
    }

    /// Retry policy for block fetches.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Replace the whole listener configuration.
    pub fn config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    /// Send unrecoverable fetch failures to `sink`.
    pub fn error_sink(mut self, sink: mpsc::UnboundedSender<ListenerError>) -> Self {
        self.errors = Some(sink);
        self
    }

    /// Create an error channel and keep its sending half.
    pub fn with_error_channel(self) -> (Self, mpsc::UnboundedReceiver<ListenerError>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.error_sink(tx), rx)
    }

    pub fn build(self) -> Listener<S> {
        Listener::with_config(self.source, self.observers, self.config, self.errors)
    }
}
