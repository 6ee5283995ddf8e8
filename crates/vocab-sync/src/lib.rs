//! # vocab-sync
//!
//! Table mirroring engine for the vocabulary application's databases.
//!
//! Copies table contents between a primary PostgreSQL server, a local SQLite
//! store and an optional second PostgreSQL server:
//!
//! - **Per-cell coercion** between the two type systems, total and
//!   fallback-based
//! - **Dependency-aware ordering** from a static precedence list
//! - **Batched, fault-tolerant loading** that skips only the rows a target
//!   rejects
//! - **Isolated worker process** streaming JSON progress events to its caller
//!
//! ## Example
//!
//! ```rust,no_run
//! use vocab_sync::{Direction, SyncConfig, SyncJob, SyncOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> vocab_sync::Result<()> {
//!     let config = SyncConfig::load("config.yaml")?;
//!     let job = SyncJob::new(Direction::ServerToLocal, Vec::new());
//!     let report = SyncOrchestrator::new(config, job).run().await?;
//!     println!("Inserted {} rows", report.rows_inserted());
//!     Ok(())
//! }
//! ```

pub mod coerce;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod introspect;
pub mod orchestrator;
pub mod order;
pub mod progress;
pub mod transfer;
pub mod typemap;

// Re-exports for convenient access
pub use config::{BackendConfig, PostgresConfig, SqliteConfig, SyncConfig, SyncSettings};
pub use crate::core::{Cell, Column, Row, SyncStore, Table};
pub use error::{Result, SyncError};
pub use introspect::SchemaIntrospector;
pub use orchestrator::{
    ConnectionManager, Direction, JobReport, JobStatus, Role, SyncJob, SyncMode, SyncOrchestrator,
    TableReport,
};
pub use order::DependencyOrderer;
pub use progress::{ProgressEvent, WorkerHandle, WorkerRequest};
pub use transfer::{BatchLoader, LoadReport, LoaderConfig, OverrideAction, OverridePolicy};
pub use typemap::ColumnType;
