//! Supervisor side - spawns a worker and dispatches requests to it.
//!
//! Flow:
//! 1. Spawn worker subprocess with piped stdin/stdout
//! 2. Wait for Ready
//! 3. Dispatch requests one at a time, each answered by Response or Error,
//!    and ask for statistics between them
//! 4. Send Stop, wait for Stopped (or EOF)

use std::io;
use std::process::Stdio;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::JsonCodec;
use crate::bridge::protocol::{SupervisorFrame, WorkerFrame};
use crate::exchange::{Request, Response};
use crate::stats::StatsSnapshot;

/// What the worker sent back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Response(Response),
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("worker exited")]
    WorkerExited,
    #[error("channel i/o error: {0}")]
    Io(#[from] io::Error),
}

pub struct Supervisor<R, W> {
    reader: FramedRead<R, JsonCodec<WorkerFrame>>,
    writer: FramedWrite<W, JsonCodec<SupervisorFrame>>,
}

impl<R, W> Supervisor<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FramedRead::new(reader, JsonCodec::new()),
            writer: FramedWrite::new(writer, JsonCodec::new()),
        }
    }

    /// Waits for the worker's Ready frame and returns its pid.
    pub async fn wait_ready(&mut self) -> Result<u32, SupervisorError> {
        tracing::debug!("Waiting for Ready from worker");
        match self.reader.next().await {
            Some(Ok(WorkerFrame::Ready { pid })) => {
                tracing::debug!(pid, "Worker ready");
                Ok(pid)
            }
            Some(Ok(other)) => Err(SupervisorError::Protocol(format!(
                "expected ready, got {other:?}"
            ))),
            Some(Err(e)) => Err(e.into()),
            None => Err(SupervisorError::WorkerExited),
        }
    }

    /// Sends one request and waits for its response or error report.
    pub async fn dispatch(&mut self, request: Request) -> Result<Outcome, SupervisorError> {
        let id = request.id;
        tracing::trace!(%id, method = %request.method, uri = %request.uri, "Dispatching request");
        self.writer
            .send(SupervisorFrame::Request {
                id,
                method: request.method,
                uri: request.uri,
                headers: request.headers,
                body: request.body,
            })
            .await?;

        loop {
            match self.reader.next().await {
                Some(Ok(WorkerFrame::Response {
                    id: got,
                    status,
                    headers,
                    body,
                })) => {
                    if got != id {
                        return Err(SupervisorError::Protocol(format!(
                            "response for {got} while waiting on {id}"
                        )));
                    }
                    return Ok(Outcome::Response(Response::from_parts(status, headers, body)));
                }
                Some(Ok(WorkerFrame::Error { id: got, message })) => {
                    if let Some(got) = got
                        && got != id
                    {
                        return Err(SupervisorError::Protocol(format!(
                            "error for {got} while waiting on {id}"
                        )));
                    }
                    tracing::warn!(%id, error = %message, "Worker reported error");
                    return Ok(Outcome::Failed(message));
                }
                Some(Ok(WorkerFrame::Ready { pid })) => {
                    tracing::warn!(pid, "Unexpected Ready while dispatching");
                }
                Some(Ok(WorkerFrame::Stats { .. })) => {
                    tracing::warn!(%id, "Unexpected Stats while dispatching");
                }
                Some(Ok(WorkerFrame::Stopped)) => {
                    return Err(SupervisorError::Protocol(
                        "worker stopped with a request in flight".to_string(),
                    ));
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(SupervisorError::WorkerExited),
            }
        }
    }

    /// Asks the worker for its counters. Call between dispatches only.
    pub async fn stats(&mut self) -> Result<StatsSnapshot, SupervisorError> {
        self.writer.send(SupervisorFrame::Stats).await?;
        match self.reader.next().await {
            Some(Ok(WorkerFrame::Stats { stats })) => Ok(stats),
            Some(Ok(other)) => Err(SupervisorError::Protocol(format!(
                "expected stats, got {other:?}"
            ))),
            Some(Err(e)) => Err(e.into()),
            None => Err(SupervisorError::WorkerExited),
        }
    }

    /// Sends the closing sentinel and waits for the worker to acknowledge or exit.
    pub async fn stop(&mut self) -> Result<(), SupervisorError> {
        tracing::debug!("Sending Stop to worker");
        self.writer.send(SupervisorFrame::Stop).await?;
        loop {
            match self.reader.next().await {
                Some(Ok(WorkerFrame::Stopped)) | None => return Ok(()),
                Some(Ok(other)) => {
                    tracing::warn!(?other, "Unexpected frame while stopping");
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

/// Spawns a worker process and connects a supervisor to its stdin/stdout.
///
/// Stderr is inherited so worker logs reach the parent's stderr.
pub fn spawn_worker(
    command: &mut Command,
) -> Result<(Supervisor<ChildStdout, ChildStdin>, Child), SupervisorError> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SupervisorError::Spawn(e.to_string()))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| SupervisorError::Spawn("stdin not captured".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SupervisorError::Spawn("stdout not captured".to_string()))?;

    Ok((Supervisor::new(stdout, stdin), child))
}
