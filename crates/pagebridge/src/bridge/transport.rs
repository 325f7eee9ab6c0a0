//! Framed worker channel over a pair of byte streams.
//!
//! In production the streams are the worker's stdin/stdout; in tests they
//! are `tokio::io::duplex` halves.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use super::codec::{FrameTooLarge, JsonCodec, MAX_FRAME_BYTES};
use super::protocol::{RequestId, SupervisorFrame, WorkerFrame};
use crate::channel::{ChannelError, WorkerChannel};
use crate::exchange::{Request, Response};
use crate::stats::WorkerStats;

pub struct FramedChannel<R, W> {
    reader: FramedRead<R, JsonCodec<SupervisorFrame>>,
    writer: FramedWrite<W, JsonCodec<WorkerFrame>>,
    in_flight: Option<RequestId>,
    stopped: bool,
    stats: Option<Arc<WorkerStats>>,
}

impl<R, W> FramedChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_max_frame_length(reader, writer, MAX_FRAME_BYTES)
    }

    /// Like [`new`](Self::new), with a custom limit for frames in both directions.
    pub fn with_max_frame_length(reader: R, writer: W, max_frame_length: usize) -> Self {
        Self {
            reader: FramedRead::new(reader, JsonCodec::with_max_frame_length(max_frame_length)),
            writer: FramedWrite::new(writer, JsonCodec::with_max_frame_length(max_frame_length)),
            in_flight: None,
            stopped: false,
            stats: None,
        }
    }

    /// Answers `stats` frames from the supervisor with snapshots of `stats`.
    pub fn with_stats(mut self, stats: Arc<WorkerStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Tells the supervisor the worker is ready to take requests.
    pub async fn announce_ready(&mut self) -> Result<(), ChannelError> {
        let pid = std::process::id();
        tracing::debug!(pid, "Sending Ready to supervisor");
        self.writer.send(WorkerFrame::Ready { pid }).await?;
        Ok(())
    }

    pub fn in_flight(&self) -> Option<RequestId> {
        self.in_flight
    }
}

#[async_trait]
impl<R, W> WorkerChannel for FramedChannel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn wait_request(&mut self) -> Result<Option<Request>, ChannelError> {
        if self.stopped {
            return Ok(None);
        }

        loop {
            let frame = match self.reader.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Supervisor channel error");
                    return Err(e.into());
                }
                None => {
                    tracing::info!("Supervisor channel closed (parent died?)");
                    self.stopped = true;
                    return Ok(None);
                }
            };

            match frame {
                SupervisorFrame::Request {
                    id,
                    method,
                    uri,
                    headers,
                    body,
                } => {
                    if let Some(previous) = self.in_flight.replace(id) {
                        tracing::warn!(%previous, "Previous request was never answered");
                    }
                    tracing::trace!(%id, %method, %uri, "Request received");
                    return Ok(Some(Request {
                        id,
                        method,
                        uri,
                        headers,
                        body,
                    }));
                }
                SupervisorFrame::Stats => {
                    let stats = self
                        .stats
                        .as_ref()
                        .map(|stats| stats.snapshot())
                        .unwrap_or_default();
                    tracing::trace!(?stats, "Sending stats");
                    self.writer.send(WorkerFrame::Stats { stats }).await?;
                }
                SupervisorFrame::Stop => {
                    tracing::info!("Stop requested");
                    self.stopped = true;
                    self.writer.send(WorkerFrame::Stopped).await?;
                    return Ok(None);
                }
            }
        }
    }

    async fn respond(&mut self, response: Response) -> Result<(), ChannelError> {
        let id = self.in_flight.take().ok_or(ChannelError::NoRequestInFlight)?;
        let (status, headers, body) = response.into_parts();
        tracing::trace!(%id, status, body_bytes = body.len(), "Sending response");
        let sent = self
            .writer
            .send(WorkerFrame::Response {
                id,
                status,
                headers,
                body,
            })
            .await;
        match sent {
            Ok(()) => Ok(()),
            Err(e) => match FrameTooLarge::from_io(&e) {
                Some(&FrameTooLarge { size, max }) => {
                    // Nothing reached the wire; the request still needs an answer.
                    self.in_flight = Some(id);
                    Err(ChannelError::FrameTooLarge { size, max })
                }
                None => Err(e.into()),
            },
        }
    }

    async fn report_error(&mut self, message: String) -> Result<(), ChannelError> {
        let id = self.in_flight.take();
        self.writer.send(WorkerFrame::Error { id, message }).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex, split};
    use tokio_util::bytes::Bytes;

    type Worker = FramedChannel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;
    type ParentReader = FramedRead<ReadHalf<DuplexStream>, JsonCodec<WorkerFrame>>;
    type ParentWriter = FramedWrite<WriteHalf<DuplexStream>, JsonCodec<SupervisorFrame>>;

    fn pair() -> (Worker, ParentReader, ParentWriter) {
        pair_with_limit(MAX_FRAME_BYTES)
    }

    fn pair_with_limit(max_frame_length: usize) -> (Worker, ParentReader, ParentWriter) {
        let (worker_io, parent_io) = duplex(64 * 1024);
        let (wr, ww) = split(worker_io);
        let (pr, pw) = split(parent_io);
        (
            FramedChannel::with_max_frame_length(wr, ww, max_frame_length),
            FramedRead::new(pr, JsonCodec::new()),
            FramedWrite::new(pw, JsonCodec::new()),
        )
    }

    fn request_frame(id: RequestId) -> SupervisorFrame {
        SupervisorFrame::Request {
            id,
            method: "GET".to_string(),
            uri: "/".to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn response_carries_request_id() {
        let (mut worker, mut from_worker, mut to_worker) = pair();
        let id = RequestId::new();
        to_worker.send(request_frame(id)).await.unwrap();

        let request = worker.wait_request().await.unwrap().unwrap();
        assert_eq!(request.id, id);
        assert_eq!(worker.in_flight(), Some(id));

        let mut response = Response::new();
        response.write_body(b"page");
        worker.respond(response).await.unwrap();
        assert_eq!(worker.in_flight(), None);

        match from_worker.next().await.unwrap().unwrap() {
            WorkerFrame::Response {
                id: got,
                status,
                body,
                ..
            } => {
                assert_eq!(got, id);
                assert_eq!(status, 200);
                assert_eq!(&body[..], b"page");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_respond_is_rejected() {
        let (mut worker, _from_worker, mut to_worker) = pair();
        to_worker.send(request_frame(RequestId::new())).await.unwrap();
        worker.wait_request().await.unwrap().unwrap();

        worker.respond(Response::new()).await.unwrap();
        let err = worker.respond(Response::new()).await.unwrap_err();
        assert!(matches!(err, ChannelError::NoRequestInFlight));
    }

    #[tokio::test]
    async fn error_report_carries_request_id() {
        let (mut worker, mut from_worker, mut to_worker) = pair();
        let id = RequestId::new();
        to_worker.send(request_frame(id)).await.unwrap();
        worker.wait_request().await.unwrap().unwrap();

        worker.report_error("failed: boom".to_string()).await.unwrap();

        match from_worker.next().await.unwrap().unwrap() {
            WorkerFrame::Error { id: got, message } => {
                assert_eq!(got, Some(id));
                assert_eq!(message, "failed: boom");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(matches!(
            worker.respond(Response::new()).await,
            Err(ChannelError::NoRequestInFlight)
        ));
    }

    #[tokio::test]
    async fn stop_frame_is_acknowledged_and_sticky() {
        let (mut worker, mut from_worker, mut to_worker) = pair();
        to_worker.send(SupervisorFrame::Stop).await.unwrap();

        assert!(worker.wait_request().await.unwrap().is_none());
        assert!(matches!(
            from_worker.next().await.unwrap().unwrap(),
            WorkerFrame::Stopped
        ));
        assert!(worker.wait_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_is_closing_sentinel() {
        let (mut worker, _from_worker, mut to_worker) = pair();
        to_worker.close().await.unwrap();
        assert!(worker.wait_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ready_announces_pid() {
        let (mut worker, mut from_worker, _to_worker) = pair();
        worker.announce_ready().await.unwrap();
        match from_worker.next().await.unwrap().unwrap() {
            WorkerFrame::Ready { pid } => assert_eq!(pid, std::process::id()),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_response_keeps_request_in_flight() {
        let (mut worker, mut from_worker, mut to_worker) = pair_with_limit(512);
        let id = RequestId::new();
        to_worker.send(request_frame(id)).await.unwrap();
        worker.wait_request().await.unwrap().unwrap();

        let mut response = Response::new();
        response.write_body(&[b'x'; 4096]);
        let err = worker.respond(response).await.unwrap_err();
        match err {
            ChannelError::FrameTooLarge { size, max } => {
                assert_eq!(max, 512);
                assert!(size > 4096, "{size}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(worker.in_flight(), Some(id));

        worker
            .report_error("response too large".to_string())
            .await
            .unwrap();
        match from_worker.next().await.unwrap().unwrap() {
            WorkerFrame::Error { id: got, message } => {
                assert_eq!(got, Some(id));
                assert_eq!(message, "response too large");
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        // The writer is still usable for the next request.
        let next = RequestId::new();
        to_worker.send(request_frame(next)).await.unwrap();
        worker.wait_request().await.unwrap().unwrap();
        worker.respond(Response::new()).await.unwrap();
        assert!(matches!(
            from_worker.next().await.unwrap().unwrap(),
            WorkerFrame::Response { id, .. } if id == next
        ));
    }

    #[tokio::test]
    async fn stats_frame_is_answered_between_requests() {
        let (worker, mut from_worker, mut to_worker) = pair();
        let stats = WorkerStats::new();
        stats.record_request();
        stats.record_response(std::time::Duration::from_micros(10));
        let mut worker = worker.with_stats(Arc::clone(&stats));

        let id = RequestId::new();
        to_worker.send(SupervisorFrame::Stats).await.unwrap();
        to_worker.send(request_frame(id)).await.unwrap();

        let request = worker.wait_request().await.unwrap().unwrap();
        assert_eq!(request.id, id);
        match from_worker.next().await.unwrap().unwrap() {
            WorkerFrame::Stats { stats } => {
                assert_eq!(stats.requests, 1);
                assert_eq!(stats.responses, 1);
                assert_eq!(stats.busy_micros, 10);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stats_without_counters_reports_zeroes() {
        let (mut worker, mut from_worker, mut to_worker) = pair();
        to_worker.send(SupervisorFrame::Stats).await.unwrap();
        to_worker.close().await.unwrap();

        assert!(worker.wait_request().await.unwrap().is_none());
        match from_worker.next().await.unwrap().unwrap() {
            WorkerFrame::Stats { stats } => assert_eq!(stats.completed(), 0),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
