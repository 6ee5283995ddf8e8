//! Progress events and the worker process protocol.
//!
//! A sync job runs in its own process. The worker writes one JSON
//! [`ProgressEvent`] per stdout line; the caller reads them through a
//! [`WorkerHandle`] and drains them without blocking.

mod bridge;
mod worker;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use bridge::{WorkerHandle, WorkerRequest, POLL_INTERVAL};
pub use worker::{run_worker, serve};

/// One message in the worker-to-caller event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A step on one table; `current` of `total` tables in the pass.
    Progress {
        table: String,
        current: usize,
        total: usize,
        message: String,
    },
    /// Overall completion, 0 to 100.
    ProgressPercent { progress: u8 },
    /// A table failed or lost rows. The job carries on.
    Error { table: String, message: String },
    /// Job finished (possibly with table errors).
    Success { message: String },
    /// Job aborted.
    FatalError { message: String },
}

impl ProgressEvent {
    pub fn progress(
        table: impl Into<String>,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Self {
        ProgressEvent::Progress {
            table: table.into(),
            current,
            total,
            message: message.into(),
        }
    }

    /// Percentage of `done` steps out of `total`; an empty job is 100%.
    pub fn percent(done: usize, total: usize) -> Self {
        let progress = if total == 0 {
            100
        } else {
            (done.min(total) * 100 / total) as u8
        };
        ProgressEvent::ProgressPercent { progress }
    }

    pub fn error(table: impl Into<String>, message: impl Into<String>) -> Self {
        ProgressEvent::Error {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        ProgressEvent::Success {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ProgressEvent::FatalError {
            message: message.into(),
        }
    }

    /// `success` and `fatal_error` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Success { .. } | ProgressEvent::FatalError { .. }
        )
    }

    /// Serialize as a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse one JSON line.
    pub fn from_json_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Progress {
                table,
                current,
                total,
                message,
            } => write!(f, "[{}/{}] {}: {}", current, total, table, message),
            ProgressEvent::ProgressPercent { progress } => write!(f, "{}%", progress),
            ProgressEvent::Error { table, message } => write!(f, "ERROR {}: {}", table, message),
            ProgressEvent::Success { message } => write!(f, "DONE {}", message),
            ProgressEvent::FatalError { message } => write!(f, "FATAL {}", message),
        }
    }
}
