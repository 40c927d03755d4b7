//! blockwatch-ingest — header listener, retrying block fetcher, and reconciler.
//!
//! ```rust,ignore
//! let repository = Arc::new(InMemoryRepository::new(source.node()));
//! let listener = Arc::new(
//!     ListenerBuilder::new(source.clone())
//!         .observer(Arc::new(RepositoryObserver::new(repository.clone())))
//!         .build(),
//! );
//! tokio::spawn({
//!     let listener = listener.clone();
//!     async move { listener.start().await }
//! });
//!
//! let reconciler = Reconciler::new(source, repository, ReconcilerConfig::default());
//! reconciler.backfill_to_head().await?;
//! reconciler.update_finality().await?;
//! ```

pub mod builder;
pub mod fetcher;
pub mod listener;
pub mod reconcile;
pub mod shutdown;

pub use builder::ListenerBuilder;
pub use fetcher::{BlockFetcher, Fetched};
pub use listener::{Listener, ListenerStats};
pub use reconcile::{BackfillReport, ReconcileError, Reconciler};
pub use shutdown::Shutdown;
