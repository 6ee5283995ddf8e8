//! Chunked, fault-tolerant row loading into a target store.
//!
//! Rows arrive as outer chunks over a bounded channel, so a table is never
//! held in memory whole. Each chunk is written in batches, each committed as
//! one transaction. A batch the target rejects is retried row by row so only
//! the offending rows are lost. Tables with override policies skip batching
//! altogether and get one fallback retry per rejected row. Consecutive
//! chunks are separated by a pause.

mod policy;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::core::schema::Column;
use crate::core::traits::SyncStore;
use crate::core::value::Row;
use crate::error::{Result, SyncError};

pub use policy::{fallback_row, policies_for, OverrideAction, OverridePolicy};

/// Failed-row messages kept per table.
const FAILED_ROW_SAMPLE: usize = 5;

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Rows per committed batch.
    pub batch_size: usize,
    /// Rows per outer chunk.
    pub chunk_size: usize,
    /// Pause between outer chunks.
    pub chunk_pause: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            chunk_size: 100,
            chunk_pause: Duration::from_millis(100),
        }
    }
}

impl From<&SyncSettings> for LoaderConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            chunk_size: settings.chunk_size.max(1),
            chunk_pause: Duration::from_millis(settings.chunk_pause_ms),
        }
    }
}

/// Outcome of loading one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows committed.
    pub inserted: u64,
    /// Rows given up on.
    pub skipped: u64,
    /// First few rejection messages.
    pub failed_row_sample: Vec<String>,
}

impl LoadReport {
    /// At least one row landed.
    pub fn any_inserted(&self) -> bool {
        self.inserted > 0
    }

    /// Every row landed.
    pub fn is_complete(&self) -> bool {
        self.skipped == 0
    }

    fn record_failure(&mut self, message: String) {
        self.skipped += 1;
        if self.failed_row_sample.len() < FAILED_ROW_SAMPLE {
            self.failed_row_sample.push(message);
        }
    }
}

/// The table a load writes into.
#[derive(Debug, Clone, Copy)]
pub struct LoadTarget<'a> {
    pub table: &'a str,
    /// Target columns the row cells line up with.
    pub columns: &'a [Column],
    /// Source columns the cells were read from, in the same order.
    pub source_columns: &'a [Column],
}

impl<'a> LoadTarget<'a> {
    /// A target fed from columns of the same declared types.
    pub fn new(table: &'a str, columns: &'a [Column]) -> Self {
        Self {
            table,
            columns,
            source_columns: columns,
        }
    }

    /// Record the source columns the rows were read from.
    pub fn fed_from(mut self, source_columns: &'a [Column]) -> Self {
        self.source_columns = source_columns;
        self
    }
}

/// Writes row sets into a target store.
#[derive(Debug, Clone, Default)]
pub struct BatchLoader {
    config: LoaderConfig,
    policies: Vec<OverridePolicy>,
}

impl BatchLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            policies: Vec::new(),
        }
    }

    /// Attach override policies (all tables; filtered per load).
    pub fn with_policies(mut self, policies: Vec<OverridePolicy>) -> Self {
        self.policies = policies;
        self
    }

    /// Build a loader from sync settings.
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(LoaderConfig::from(settings)).with_policies(settings.overrides.clone())
    }

    /// Rows per outer chunk; readers page the source by this size.
    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// Delete every row of `table` on the target.
    pub async fn clear(&self, store: &dyn SyncStore, table: &str) -> Result<u64> {
        let removed = store.clear_table(table).await?;
        debug!("Cleared {} ({} rows)", table, removed);
        Ok(removed)
    }

    /// Insert every chunk received on `chunks` (already coerced to
    /// `target.columns`) until the sender side closes.
    ///
    /// Row-level rejections are absorbed into the report. A lost connection
    /// or cancellation aborts the load with an error. `on_chunk` is called
    /// after every chunk with the number of rows handled so far.
    pub async fn load<F>(
        &self,
        store: &dyn SyncStore,
        target: LoadTarget<'_>,
        mut chunks: mpsc::Receiver<Vec<Row>>,
        cancel: &CancellationToken,
        mut on_chunk: F,
    ) -> Result<LoadReport>
    where
        F: FnMut(usize) + Send,
    {
        let table = target.table;
        let mut report = LoadReport::default();

        let policies = policies_for(&self.policies, table);
        let designated = !policies.is_empty();
        if designated {
            debug!("{} has override policies, inserting row by row", table);
        }

        let mut done = 0;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                chunk = chunks.recv() => chunk,
            };
            let Some(chunk) = chunk else { break };

            if done > 0 && !self.config.chunk_pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(self.config.chunk_pause) => {}
                }
            }

            for batch in chunk.chunks(self.config.batch_size) {
                if designated {
                    self.insert_each(store, target, batch, &policies, &mut report)
                        .await?;
                    continue;
                }

                match store.insert_rows(table, target.columns, batch).await {
                    Ok(n) => report.inserted += n,
                    Err(e) if e.is_connection_lost() => return Err(e),
                    Err(e) => {
                        warn!(
                            "Batch of {} rows into {} failed ({}), retrying row by row",
                            batch.len(),
                            table,
                            e
                        );
                        self.insert_each(store, target, batch, &[], &mut report)
                            .await?;
                    }
                }
            }

            done += chunk.len();
            on_chunk(done);
        }

        if report.is_complete() {
            info!("{}: inserted {} rows", table, report.inserted);
        } else {
            warn!(
                "{}: inserted {} rows, skipped {}",
                table, report.inserted, report.skipped
            );
        }
        Ok(report)
    }

    /// Insert rows one at a time, applying the fallback row once when
    /// policies are given.
    async fn insert_each(
        &self,
        store: &dyn SyncStore,
        target: LoadTarget<'_>,
        rows: &[Row],
        policies: &[&OverridePolicy],
        report: &mut LoadReport,
    ) -> Result<()> {
        let table = target.table;
        for row in rows {
            let err = match store
                .insert_rows(table, target.columns, std::slice::from_ref(row))
                .await
            {
                Ok(n) => {
                    report.inserted += n;
                    continue;
                }
                Err(e) if e.is_connection_lost() => return Err(e),
                Err(e) => e,
            };

            let retry = if policies.is_empty() {
                None
            } else {
                fallback_row(row, target.columns, target.source_columns, policies)
            };

            let final_err = match retry {
                Some(fallback) => match store
                    .insert_rows(table, target.columns, std::slice::from_ref(&fallback))
                    .await
                {
                    Ok(n) => {
                        warn!("{}: row inserted with fallback values ({})", table, err);
                        report.inserted += n;
                        continue;
                    }
                    Err(e) if e.is_connection_lost() => return Err(e),
                    Err(e) => e,
                },
                None => err,
            };

            warn!("{}: skipping row: {}", table, final_err);
            report.record_failure(final_err.to_string());
        }
        Ok(())
    }
}
