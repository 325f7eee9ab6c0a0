//! Request bridge loop - runs inside the worker process.
//!
//! Waits for a request, runs the content producer against a fresh capture
//! buffer, and sends the captured bytes back as the response body. A failed
//! iteration is reported on the error channel and never stops the loop; so is
//! a response too large to fit in one frame.
//!
//! States: `AwaitingRequest` -> `ProcessingRequest` -> `AwaitingRequest`, and
//! `AwaitingRequest` -> `Stopped` on the closing sentinel.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;

use crate::capture::CaptureScope;
use crate::channel::{ChannelError, WorkerChannel};
use crate::exchange::Response;
use crate::producer::{ContentProducer, ProduceError};
use crate::stats::WorkerStats;

/// Any failure raised while building the response or producing content.
///
/// Formats as `kind: message (in context)`.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {source} (in {context})")]
pub struct ContentProductionFailure {
    kind: &'static str,
    context: String,
    source: ProduceError,
}

impl ContentProductionFailure {
    pub fn new(source: ProduceError, context: impl Into<String>) -> Self {
        Self {
            kind: source.label(),
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("worker channel failed: {0}")]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    AwaitingRequest,
    ProcessingRequest,
    Stopped,
}

/// Summary returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub served: u64,
    pub failed: u64,
}

pub struct Bridge<C, P> {
    channel: C,
    producer: P,
    state: BridgeState,
    stats: Arc<WorkerStats>,
}

impl<C, P> Bridge<C, P>
where
    C: WorkerChannel,
    P: ContentProducer,
{
    pub fn new(channel: C, producer: P) -> Self {
        Self {
            channel,
            producer,
            state: BridgeState::AwaitingRequest,
            stats: WorkerStats::new(),
        }
    }

    /// Records into `stats` instead of a private set of counters.
    pub fn with_stats(mut self, stats: Arc<WorkerStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn stats(&self) -> BridgeStats {
        let snapshot = self.stats.snapshot();
        BridgeStats {
            served: snapshot.responses,
            failed: snapshot.errors,
        }
    }

    /// Runs until the channel yields the closing sentinel.
    pub async fn run(mut self) -> Result<BridgeStats, BridgeError> {
        tracing::info!(producer = %self.producer.describe(), "Bridge loop starting");
        while self.step().await? != BridgeState::Stopped {}
        let stats = self.stats();
        tracing::info!(
            served = stats.served,
            failed = stats.failed,
            "Bridge loop stopped"
        );
        Ok(stats)
    }

    /// Handles one wait + request cycle and returns the resulting state.
    pub async fn step(&mut self) -> Result<BridgeState, BridgeError> {
        self.state = BridgeState::AwaitingRequest;
        let Some(request) = self.channel.wait_request().await? else {
            self.state = BridgeState::Stopped;
            return Ok(self.state);
        };

        self.state = BridgeState::ProcessingRequest;
        self.stats.record_request();
        let started = Instant::now();
        let request_id = request.id;
        drop(request);

        match produce_response(&self.producer).await {
            Ok(response) => {
                let body_bytes = response.body().len();
                match self.channel.respond(response).await {
                    Ok(()) => {
                        tracing::debug!(%request_id, body_bytes, "Request served");
                        self.stats.record_response(started.elapsed());
                    }
                    Err(err @ ChannelError::FrameTooLarge { .. }) => {
                        tracing::warn!(%request_id, body_bytes, error = %err, "Response too large");
                        self.channel.report_error(err.to_string()).await?;
                        self.stats.record_oversized(started.elapsed());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            Err(failure) => {
                tracing::warn!(%request_id, error = %failure, "Content production failed");
                self.channel.report_error(failure.to_string()).await?;
                self.stats.record_error(started.elapsed());
            }
        }

        self.state = BridgeState::AwaitingRequest;
        Ok(self.state)
    }
}

/// Runs the bridge loop over `channel` until it closes.
pub async fn run_bridge<C, P>(channel: C, producer: P) -> Result<BridgeStats, BridgeError>
where
    C: WorkerChannel,
    P: ContentProducer,
{
    Bridge::new(channel, producer).run().await
}

async fn produce_response<P: ContentProducer>(
    producer: &P,
) -> Result<Response, ContentProductionFailure> {
    let mut response = Response::new();
    let mut capture = CaptureScope::begin();

    let produced = AssertUnwindSafe(producer.produce(capture.sink()))
        .catch_unwind()
        .await;
    let result = match produced {
        Ok(result) => result,
        Err(payload) => Err(ProduceError::Panicked(panic_message(payload))),
    };
    // On error the scope is dropped here, closing the capture.
    result.map_err(|e| ContentProductionFailure::new(e, producer.describe()))?;

    let contents = capture.finish();
    response.write_body(&contents);
    Ok(response)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
