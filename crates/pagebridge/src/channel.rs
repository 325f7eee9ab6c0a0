//! Worker channel - the connection to the supervising process.

use std::io;

use async_trait::async_trait;

use crate::exchange::{Request, Response};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("no request in flight")]
    NoRequestInFlight,

    /// The response did not fit in one frame. The request is still in
    /// flight and can be answered with an error report instead.
    #[error("response of {size} bytes exceeds the {max} byte frame limit")]
    FrameTooLarge { size: usize, max: usize },
}

/// Abstracts the supervisor side of the worker protocol.
#[async_trait]
pub trait WorkerChannel: Send {
    /// Blocks until the next request. `None` is the closing sentinel.
    async fn wait_request(&mut self) -> Result<Option<Request>, ChannelError>;

    /// Sends the response for the request currently in flight.
    async fn respond(&mut self, response: Response) -> Result<(), ChannelError>;

    /// Reports a failed request to the supervisor's error sink.
    async fn report_error(&mut self, message: String) -> Result<(), ChannelError>;
}
