//! blockwatch-core — model, ports, and observers for the block ingestion pipeline.
//!
//! # Architecture
//!
//! ```text
//! BlockSource ──headers──▶ Listener ──Block──▶ ObserverSet
//!                                                 ├── LoggingObserver
//!                                                 └── RepositoryObserver ──▶ Repository
//! Reconciler ── missing_block_numbers / set_blocks_status ──▶ Repository
//! ```

pub mod config;
pub mod error;
pub mod finality;
pub mod logging;
pub mod observer;
pub mod repository;
pub mod retry;
pub mod source;
pub mod types;

pub use config::{ListenerConfig, ReconcilerConfig};
pub use error::{ListenerError, RepositoryError, SourceError};
pub use finality::FINALITY_DEPTH;
pub use observer::{BlockObserver, LoggingObserver, ObserverSet, RepositoryObserver};
pub use repository::Repository;
pub use retry::{RetryConfig, RetryPolicy};
pub use source::{BlockSource, HeaderSubscription, Unsubscriber};
pub use types::{Block, Contract, Header, Log, LogKey, Node, Transaction};
