//! blockwatch-storage — pluggable storage backends for blockwatch.
//!
//! Backends:
//! - [`memory`] — in-memory, partitioned by node (dev/testing, no persistence)

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{InMemoryRepository, InMemoryStorage};
