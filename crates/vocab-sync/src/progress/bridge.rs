//! Caller side of the worker protocol.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ProgressEvent;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::orchestrator::SyncJob;

/// How often [`WorkerHandle::drive`] drains the event channel.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The single line a worker reads from its stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub config: SyncConfig,
    pub job: SyncJob,
}

/// A running worker process and the events it has produced so far.
///
/// Holding the worker's stdin open is what keeps the job alive: dropping it
/// is the graceful cancel signal.
pub struct WorkerHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    events: UnboundedReceiver<ProgressEvent>,
    reader: JoinHandle<()>,
    finished: bool,
}

impl WorkerHandle {
    /// Start `command` as a worker and send it `request`.
    ///
    /// The command's stdin and stdout are replaced with pipes; stderr is
    /// inherited so worker logs reach the caller's terminal.
    pub async fn spawn(mut command: Command, request: &WorkerRequest) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SyncError::Worker(format!("failed to start worker: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SyncError::Worker("worker stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::Worker("worker stdout not captured".into()))?;

        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;

        let (tx, events) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match ProgressEvent::from_json_line(&line) {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring unparseable worker output ({}): {}", e, line),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Reading worker output failed: {}", e);
                        break;
                    }
                }
            }
            debug!("Worker output closed");
        });

        info!("Worker started (pid {:?})", child.id());
        Ok(Self {
            child,
            stdin: Some(stdin),
            events,
            reader,
            finished: false,
        })
    }

    /// Drain whatever events have arrived, without waiting.
    ///
    /// Once the worker's output closes without a terminal event, a
    /// `fatal_error` is synthesized so the caller always sees an end.
    pub fn poll(&mut self) -> Vec<ProgressEvent> {
        let mut drained = Vec::new();
        while !self.finished {
            match self.events.try_recv() {
                Ok(event) => {
                    self.finished = event.is_terminal();
                    drained.push(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.finished = true;
                    drained.push(ProgressEvent::fatal("worker exited without reporting a result"));
                }
            }
        }
        drained
    }

    /// A terminal event has been handed out by [`poll`](Self::poll).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Close stdin, wait up to `grace` for the worker to stop, then kill it.
    pub async fn cancel(&mut self, grace: Duration) -> Result<ExitStatus> {
        self.stdin.take();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!("Worker did not stop within {:?}, killing it", grace);
                self.child.kill().await?;
                Ok(self.child.wait().await?)
            }
        }
    }

    /// Poll every [`POLL_INTERVAL`] until a terminal event, handing each
    /// event to `on_event`, then reap the process.
    ///
    /// When `cancel` fires the worker's stdin is closed; if it has not
    /// finished `grace` later it is killed.
    pub async fn drive<F>(
        &mut self,
        cancel: &CancellationToken,
        grace: Duration,
        mut on_event: F,
    ) -> Result<ExitStatus>
    where
        F: FnMut(&ProgressEvent),
    {
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        let mut deadline: Option<Instant> = None;
        let mut killed = false;

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = cancel.cancelled(), if deadline.is_none() => {
                    info!("Cancelling worker");
                    self.stdin.take();
                    deadline = Some(Instant::now() + grace);
                }
            }

            for event in self.poll() {
                on_event(&event);
            }
            if self.finished {
                break;
            }

            if let Some(deadline) = deadline {
                if !killed && Instant::now() >= deadline {
                    warn!("Worker did not stop within {:?}, killing it", grace);
                    self.child.kill().await?;
                    killed = true;
                }
            }
        }

        self.stdin.take();
        let status = self.child.wait().await?;
        debug!("Worker exited: {}", status);
        Ok(status)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
