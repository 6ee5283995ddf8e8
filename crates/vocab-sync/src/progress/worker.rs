//! Worker side of the protocol: one request in, a stream of events out.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ProgressEvent, WorkerRequest};
use crate::error::{Result, SyncError};
use crate::orchestrator::{JobStatus, SyncOrchestrator};

/// Serve one job over the process's stdin and stdout.
pub async fn run_worker(cancel: CancellationToken) -> Result<JobStatus> {
    serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), cancel).await
}

/// Read a [`WorkerRequest`] line from `input`, run the job and write every
/// event to `output` as a flushed JSON line.
///
/// After the request line, end-of-input cancels the job. A request that
/// cannot be read or validated is answered with a single `fatal_error`.
pub async fn serve<R, W>(mut input: R, mut output: W, cancel: CancellationToken) -> Result<JobStatus>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let request = match read_request(&mut input).await {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejecting worker request: {}", e);
            write_event(&mut output, &ProgressEvent::fatal(e.to_string())).await?;
            return Ok(JobStatus::Fatal);
        }
    };

    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut buf = String::new();
            loop {
                buf.clear();
                match input.read_line(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => debug!("Ignoring extra worker input"),
                }
            }
            info!("Caller closed worker input, cancelling");
            cancel.cancel();
        })
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = SyncOrchestrator::new(request.config, request.job)
        .with_progress(tx)
        .with_cancel(cancel.clone());

    let forward = async {
        let mut broken = false;
        while let Some(event) = rx.recv().await {
            if broken {
                continue;
            }
            if let Err(e) = write_event(&mut output, &event).await {
                warn!("Caller stopped reading events ({}), cancelling", e);
                cancel.cancel();
                broken = true;
            }
        }
    };

    let (result, ()) = tokio::join!(orchestrator.run(), forward);
    watcher.abort();

    Ok(match result {
        Ok(report) => report.status,
        Err(_) => JobStatus::Fatal,
    })
}

async fn read_request<R>(input: &mut R) -> Result<WorkerRequest>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        return Err(SyncError::Worker("no request received".into()));
    }
    let request: WorkerRequest = serde_json::from_str(line.trim())?;
    request.config.validate()?;
    request.job.validate()?;
    Ok(request)
}

async fn write_event<W>(output: &mut W, event: &ProgressEvent) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = event.to_json_line()?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}
