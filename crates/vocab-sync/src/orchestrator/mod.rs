//! Sync orchestrator - runs one job table by table.
//!
//! A job is two passes over one computed order. The clear pass empties the
//! target tables leaf first; the load pass then fetches, coerces and inserts
//! root first. A failure inside one table is reported as an `error` event and
//! the job moves on. Only setup failures (a store that cannot be opened, a
//! catalog that cannot be read) and cancellation end the job as fatal.

mod pools;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coerce::coerce_row;
use crate::config::SyncConfig;
use crate::core::schema::{shared_columns, Column, Table};
use crate::core::traits::SyncStore;
use crate::error::{Result, SyncError};
use crate::introspect::SchemaIntrospector;
use crate::order::DependencyOrderer;
use crate::progress::ProgressEvent;
use crate::core::value::Row;
use crate::transfer::{BatchLoader, LoadReport, LoadTarget};

pub use pools::{ConnectionManager, Role};

/// Chunks the reader may run ahead of the loader.
const READ_AHEAD_CHUNKS: usize = 2;

/// Which way rows flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    ServerToLocal,
    LocalToServer,
    ServerToSecondary,
    SecondaryToServer,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::ServerToLocal,
        Direction::LocalToServer,
        Direction::ServerToSecondary,
        Direction::SecondaryToServer,
    ];

    /// (source, target) roles.
    pub fn roles(self) -> (Role, Role) {
        match self {
            Direction::ServerToLocal => (Role::Primary, Role::Local),
            Direction::LocalToServer => (Role::Local, Role::Primary),
            Direction::ServerToSecondary => (Role::Primary, Role::Secondary),
            Direction::SecondaryToServer => (Role::Secondary, Role::Primary),
        }
    }

    /// The mode this direction belongs to.
    pub fn mode(self) -> SyncMode {
        match self {
            Direction::ServerToLocal | Direction::LocalToServer => SyncMode::Local,
            Direction::ServerToSecondary | Direction::SecondaryToServer => SyncMode::DualServer,
        }
    }

    /// Parse the kebab-case name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == s)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ServerToLocal => "server-to-local",
            Direction::LocalToServer => "local-to-server",
            Direction::ServerToSecondary => "server-to-secondary",
            Direction::SecondaryToServer => "secondary-to-server",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which pair of roles a job involves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Primary server and local store.
    Local,
    /// Primary and secondary server stores.
    DualServer,
}

/// One sync invocation. Immutable once started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    /// Selected tables; empty selects every common table.
    #[serde(default)]
    pub tables: BTreeSet<String>,
    pub direction: Direction,
    pub mode: SyncMode,
}

impl SyncJob {
    /// A job whose mode follows from its direction.
    pub fn new(direction: Direction, tables: impl IntoIterator<Item = String>) -> Self {
        Self {
            tables: tables.into_iter().collect(),
            direction,
            mode: direction.mode(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.mode != self.direction.mode() {
            return Err(SyncError::Config(format!(
                "direction {} cannot run in {:?} mode",
                self.direction, self.mode
            )));
        }
        Ok(())
    }
}

/// Terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    CompletedWithErrors,
    Fatal,
}

/// What happened to one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    /// Rows removed from the target in the clear pass.
    pub cleared: u64,
    pub inserted: u64,
    pub skipped: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_row_sample: Vec<String>,
    /// Set when the table was abandoned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }

    /// Abandoned or lost rows.
    pub fn has_errors(&self) -> bool {
        self.error.is_some() || self.skipped > 0
    }

    fn absorb(&mut self, load: LoadReport) {
        self.inserted = load.inserted;
        self.skipped = load.skipped;
        self.failed_row_sample = load.failed_row_sample;
    }
}

/// Result of a job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub direction: Direction,
    pub status: JobStatus,
    pub tables: Vec<TableReport>,
}

impl JobReport {
    pub fn rows_inserted(&self) -> u64 {
        self.tables.iter().map(|t| t.inserted).sum()
    }

    pub fn rows_skipped(&self) -> u64 {
        self.tables.iter().map(|t| t.skipped).sum()
    }

    /// Tables that were abandoned.
    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.error.is_some())
            .map(|t| t.table.as_str())
            .collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    fn summary(&self) -> String {
        format!(
            "Synced {} tables ({}): {} rows inserted, {} skipped, {} tables failed",
            self.tables.len(),
            self.direction,
            self.rows_inserted(),
            self.rows_skipped(),
            self.failed_tables().len()
        )
    }
}

/// Runs a [`SyncJob`] against its own [`ConnectionManager`].
pub struct SyncOrchestrator {
    connections: ConnectionManager,
    job: SyncJob,
    loader: BatchLoader,
    orderer: DependencyOrderer,
    events: Option<UnboundedSender<ProgressEvent>>,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    pub fn new(config: SyncConfig, job: SyncJob) -> Self {
        let loader = BatchLoader::from_settings(&config.sync);
        let orderer = DependencyOrderer::from_settings(config.sync.precedence.as_deref());
        Self {
            connections: ConnectionManager::new(config),
            job,
            loader,
            orderer,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Send events to `tx` as the job runs.
    pub fn with_progress(mut self, tx: UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Stop at the next table or chunk boundary once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn job(&self) -> &SyncJob {
        &self.job
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.events {
            // A caller that stopped listening does not stop the job.
            let _ = tx.send(event);
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run the job to a terminal state.
    ///
    /// Emits `success` and returns the report, or emits `fatal_error` and
    /// returns the error. Every connection is closed either way.
    pub async fn run(self) -> Result<JobReport> {
        info!("Starting sync: {}", self.job.direction);
        let result = self.execute().await;
        self.connections.close_all().await;

        match result {
            Ok(report) => {
                let summary = report.summary();
                info!("{}", summary);
                self.emit(ProgressEvent::success(summary));
                Ok(report)
            }
            Err(e) => {
                error!("Sync failed: {}", e);
                self.emit(ProgressEvent::fatal(e.to_string()));
                Err(e)
            }
        }
    }

    async fn execute(&self) -> Result<JobReport> {
        self.job.validate()?;
        let (source, target) = self.job.direction.roles();

        // Setup: both stores must open and the catalogs must be readable.
        self.connections.store(source).await?;
        self.connections.store(target).await?;
        let introspector = SchemaIntrospector::new(&self.connections);
        let common = introspector.common_tables(source, target).await?;

        let mut reports: BTreeMap<String, TableReport> = BTreeMap::new();
        let candidates: BTreeSet<String> = if self.job.tables.is_empty() {
            common
        } else {
            for missing in self.job.tables.difference(&common) {
                let message = format!("table not present on both {} and {}", source, target);
                warn!("{}: {}", missing, message);
                self.emit(ProgressEvent::error(missing.clone(), message.clone()));
                let mut report = TableReport::new(missing);
                report.error = Some(message);
                reports.insert(missing.clone(), report);
            }
            self.job.tables.intersection(&common).cloned().collect()
        };

        let deletion = self.orderer.deletion_order(&candidates);
        let insertion = self.orderer.insertion_order(&candidates);
        let total = candidates.len();
        let steps = total * 2;
        let mut step = 0;
        self.emit(ProgressEvent::percent(step, steps));

        info!("Clear pass: {} tables on {}", total, target);
        for (idx, table) in deletion.iter().enumerate() {
            self.check_cancelled()?;
            self.emit(ProgressEvent::progress(table, idx + 1, total, "Clearing"));

            let mut report = TableReport::new(table);
            match self.clear_table(target, table).await {
                Ok(removed) => report.cleared = removed,
                Err(e) => self.table_failed(&mut report, "clear", e).await?,
            }
            reports.insert(table.clone(), report);

            step += 1;
            self.emit(ProgressEvent::percent(step, steps));
        }

        info!("Load pass: {} tables {} -> {}", total, source, target);
        for (idx, table) in insertion.iter().enumerate() {
            self.check_cancelled()?;
            let report = reports
                .entry(table.clone())
                .or_insert_with(|| TableReport::new(table));

            if report.error.is_some() {
                debug!("{}: not loading, clear failed", table);
            } else {
                self.emit(ProgressEvent::progress(table, idx + 1, total, "Loading"));
                match self.load_table(&introspector, source, target, table, idx, total).await {
                    Ok(load) => {
                        report.absorb(load);
                        if report.skipped > 0 {
                            self.emit(ProgressEvent::error(
                                table,
                                format!(
                                    "skipped {} rows ({} inserted): {}",
                                    report.skipped,
                                    report.inserted,
                                    report.failed_row_sample.join("; ")
                                ),
                            ));
                        } else {
                            self.emit(ProgressEvent::progress(
                                table,
                                idx + 1,
                                total,
                                format!("Inserted {} rows", report.inserted),
                            ));
                        }
                    }
                    Err(e) => self.table_failed(report, "load", e).await?,
                }
            }

            step += 1;
            self.emit(ProgressEvent::percent(step, steps));
        }

        // Selected-but-missing tables first, then load order.
        let mut tables: Vec<TableReport> = Vec::with_capacity(reports.len());
        for name in self.job.tables.difference(&candidates) {
            if let Some(r) = reports.remove(name) {
                tables.push(r);
            }
        }
        for name in &insertion {
            if let Some(r) = reports.remove(name) {
                tables.push(r);
            }
        }

        let status = if tables.iter().any(TableReport::has_errors) {
            JobStatus::CompletedWithErrors
        } else {
            JobStatus::Completed
        };

        Ok(JobReport {
            direction: self.job.direction,
            status,
            tables,
        })
    }

    /// Record a table-level failure and emit its `error` event.
    ///
    /// Cancellation is not a table failure and is passed back up. A lost
    /// connection drops the role's store so the next table reconnects.
    async fn table_failed(&self, report: &mut TableReport, phase: &str, e: SyncError) -> Result<()> {
        if matches!(e, SyncError::Cancelled) {
            return Err(e);
        }
        let lost = e.is_connection_lost();
        let failure = SyncError::transfer(report.table.clone(), format!("{} failed: {}", phase, e));
        error!("{}", failure);
        self.emit(ProgressEvent::error(report.table.clone(), failure.to_string()));
        report.error = Some(failure.to_string());
        if lost {
            let (source, target) = self.job.direction.roles();
            self.connections.close(source).await;
            self.connections.close(target).await;
        }
        Ok(())
    }

    async fn clear_table(&self, target: Role, table: &str) -> Result<u64> {
        let store = self.connections.store(target).await?;
        self.loader.clear(store.as_ref(), table).await
    }

    async fn load_table(
        &self,
        introspector: &SchemaIntrospector<'_>,
        source: Role,
        target: Role,
        table: &str,
        idx: usize,
        total: usize,
    ) -> Result<LoadReport> {
        let source_table = introspector.describe(table, source).await?;
        let target_table = introspector.describe(table, target).await?;
        let (source_cols, target_cols) = column_plan(&source_table, &target_table)?;

        let expected = self.connections.row_count(source, table).await?;
        let store: Arc<dyn SyncStore> = self.connections.store(target).await?;
        self.emit(ProgressEvent::progress(
            table,
            idx + 1,
            total,
            format!("Inserting {} rows", expected),
        ));

        let (tx, rx) = mpsc::channel(READ_AHEAD_CHUNKS);
        let load_target = LoadTarget::new(table, &target_cols).fed_from(&source_cols);
        let (read, write) = tokio::join!(
            self.read_chunks(source, table, &source_cols, &target_cols, tx),
            self.loader.load(store.as_ref(), load_target, rx, &self.cancel, |done| {
                debug!("{}: {}/{} rows written", table, done, expected)
            }),
        );

        let report = write?;
        read?;
        Ok(report)
    }

    /// Pages the source table in `chunk_size` pieces, coerces each piece to
    /// the target columns and hands it to the loader. Returns quietly once
    /// the loader hangs up.
    async fn read_chunks(
        &self,
        source: Role,
        table: &str,
        source_cols: &[Column],
        target_cols: &[Column],
        tx: mpsc::Sender<Vec<Row>>,
    ) -> Result<()> {
        let limit = self.loader.chunk_size();
        let mut cursor: Option<String> = None;
        let mut fetched = 0usize;
        loop {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let after = cursor.as_deref();
            let page = self
                .connections
                .read_with_retry(source, |store| async move {
                    store.fetch_page(table, source_cols, after, limit).await
                })
                .await?;
            fetched += page.rows.len();

            let chunk: Vec<Row> = page
                .rows
                .into_iter()
                .map(|row| coerce_row(row, target_cols))
                .collect();
            if !chunk.is_empty() && tx.send(chunk).await.is_err() {
                return Ok(());
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!("{}: fetched {} rows from {}", table, fetched, source);
        Ok(())
    }
}

/// Source and target columns for the names both sides share, in target
/// order.
fn column_plan(source: &Table, target: &Table) -> Result<(Vec<Column>, Vec<Column>)> {
    let pairs = shared_columns(source, target);
    if pairs.is_empty() {
        return Err(SyncError::Schema(format!(
            "{} has no columns in common between source and target",
            target.name
        )));
    }
    if pairs.len() < target.columns.len() {
        debug!(
            "{}: {} of {} target columns present on source",
            target.name,
            pairs.len(),
            target.columns.len()
        );
    }
    Ok(pairs.into_iter().map(|p| (p.source, p.target)).unzip())
}
