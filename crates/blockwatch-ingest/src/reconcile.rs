//! Gap backfill, finality advancement, and contract log sync.
//!
//! The listener only sees heads it was subscribed for. Anything it missed
//! (downtime, skipped headers) is recovered here from the repository's gap
//! report, and finality is advanced from the source's current head.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;

use blockwatch_core::config::ReconcilerConfig;
use blockwatch_core::error::{ListenerError, RepositoryError, SourceError};
use blockwatch_core::repository::Repository;
use blockwatch_core::retry::RetryPolicy;
use blockwatch_core::source::BlockSource;

use crate::fetcher::{BlockFetcher, Fetched};
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Outcome of one backfill pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Block numbers that were missing from the repository.
    pub requested: Vec<i64>,
    /// Blocks fetched and written.
    pub written: usize,
    /// Blocks the source does not have.
    pub unavailable: Vec<i64>,
    /// Blocks whose fetch failed for another reason.
    pub failed: Vec<i64>,
}

impl BackfillReport {
    pub fn is_complete(&self) -> bool {
        self.unavailable.is_empty() && self.failed.is_empty()
    }
}

/// Brings a repository in line with its source.
pub struct Reconciler<S: ?Sized, R: ?Sized> {
    source: Arc<S>,
    repository: Arc<R>,
    fetcher: BlockFetcher<S>,
    config: ReconcilerConfig,
}

impl<S, R> Reconciler<S, R>
where
    S: BlockSource + ?Sized,
    R: Repository + ?Sized,
{
    pub fn new(source: Arc<S>, repository: Arc<R>, config: ReconcilerConfig) -> Self {
        Self {
            fetcher: BlockFetcher::new(source.clone(), RetryPolicy::new(config.retry.clone())),
            source,
            repository,
            config,
        }
    }

    /// Fetch and store every block in `[start, end]` the repository lacks.
    ///
    /// Blocks are fetched `backfill_concurrency` at a time and written in
    /// ascending order. A storage failure aborts the pass.
    pub async fn backfill(&self, start: i64, end: i64) -> Result<BackfillReport, ReconcileError> {
        let start = start.max(0);
        let missing = self.repository.missing_block_numbers(start, end).await;
        let mut report = BackfillReport {
            requested: missing.clone(),
            ..Default::default()
        };
        if missing.is_empty() {
            tracing::debug!(start, end, "No gaps");
            return Ok(report);
        }
        tracing::info!(start, end, missing = missing.len(), "Backfilling gaps");

        let fetches = futures::stream::iter(missing)
            .map(|number| async move {
                let result = self.fetcher.fetch(number, &mut Shutdown::never()).await;
                (number, result)
            })
            .buffered(self.config.backfill_concurrency.max(1));
        futures::pin_mut!(fetches);

        while let Some((number, result)) = fetches.next().await {
            match result {
                Ok(Fetched::Block(block)) => {
                    self.repository.create_or_update_block(block).await?;
                    report.written += 1;
                }
                Err(ListenerError::Fetch {
                    source: SourceError::BlockUnavailable(_),
                    ..
                }) => report.unavailable.push(number),
                Err(e) => {
                    tracing::warn!(number, error = %e, "Backfill fetch failed");
                    report.failed.push(number);
                }
                Ok(Fetched::Cancelled) => report.failed.push(number),
            }
        }

        tracing::info!(
            written = report.written,
            unavailable = report.unavailable.len(),
            failed = report.failed.len(),
            "Backfill complete"
        );
        Ok(report)
    }

    /// Backfill from genesis to the source's current head.
    pub async fn backfill_to_head(&self) -> Result<BackfillReport, ReconcileError> {
        let head = self.source.current_head_number().await?;
        self.backfill(0, head).await
    }

    /// Mark blocks final against the source's current head. Returns the head.
    pub async fn update_finality(&self) -> Result<i64, ReconcileError> {
        let head = self.source.current_head_number().await?;
        self.repository.set_blocks_status(head).await;
        tracing::info!(head, "Finality advanced");
        Ok(head)
    }

    /// Fetch and store the logs of a watched contract in `[from, to]`.
    ///
    /// Queries the source in windows of `log_batch_size` blocks. Returns the
    /// number of logs written.
    pub async fn sync_contract_logs(
        &self,
        address: &str,
        from: i64,
        to: i64,
    ) -> Result<usize, ReconcileError> {
        if !self.repository.contract_exists(address).await {
            return Err(RepositoryError::ContractNotFound(address.to_string()).into());
        }
        let batch = self.config.log_batch_size.max(1);
        let mut written = 0;
        let mut window_start = from.max(0);

        while window_start <= to {
            let window_end = window_start.saturating_add(batch - 1).min(to);
            let logs = self.source.get_logs(address, window_start, window_end).await?;
            let count = logs.len();
            if count > 0 {
                self.repository.create_logs(logs).await?;
            }
            written += count;
            tracing::debug!(address, from = window_start, to = window_end, count, "Synced logs");

            if window_end == i64::MAX {
                break;
            }
            window_start = window_end + 1;
        }
        Ok(written)
    }
}
