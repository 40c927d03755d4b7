//! Listener and reconciler configuration.

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Configuration for a header listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Capacity of the bounded header queue requested from the source.
    pub header_buffer: usize,
    /// Retry policy for resolving a header to a full block.
    pub retry: RetryConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            header_buffer: 10,
            retry: RetryConfig::default(),
        }
    }
}

/// Configuration for gap backfill and log sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// How many missing blocks to fetch concurrently during backfill.
    pub backfill_concurrency: usize,
    /// Blocks per `get_logs` call.
    pub log_batch_size: i64,
    pub retry: RetryConfig,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            backfill_concurrency: 4,
            log_batch_size: 1000,
            retry: RetryConfig::default(),
        }
    }
}
