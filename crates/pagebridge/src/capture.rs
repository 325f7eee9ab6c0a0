//! Scoped output capture.
//!
//! Producers never write to the process stdout. Each iteration owns a fresh
//! [`OutputBuffer`] that is handed to the producer explicitly, and the
//! [`CaptureScope`] holding it is closed on every exit path: either through
//! [`CaptureScope::finish`] or by being dropped on the failure path.

use std::fmt;
use std::io;

use tokio_util::bytes::{BufMut, Bytes, BytesMut};

/// Accumulates everything a producer writes during one iteration.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    buf: BytesMut,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: impl AsRef<[u8]>) {
        self.buf.put_slice(data.as_ref());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl io::Write for OutputBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.put_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Write for OutputBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }
}

/// One bounded capture. Begin it, hand [`sink`](Self::sink) to the producer,
/// then [`finish`](Self::finish) it to take the captured bytes.
#[derive(Debug)]
pub struct CaptureScope {
    buffer: OutputBuffer,
    closed: bool,
}

impl CaptureScope {
    pub fn begin() -> Self {
        tracing::trace!("Output capture started");
        Self {
            buffer: OutputBuffer::new(),
            closed: false,
        }
    }

    pub fn sink(&mut self) -> &mut OutputBuffer {
        &mut self.buffer
    }

    /// Ends the capture and returns everything written to the sink.
    pub fn finish(mut self) -> Bytes {
        self.closed = true;
        let captured = std::mem::take(&mut self.buffer).into_bytes();
        tracing::trace!(captured_bytes = captured.len(), "Output capture finished");
        captured
    }
}

impl Drop for CaptureScope {
    fn drop(&mut self) {
        if !self.closed {
            tracing::debug!(
                discarded_bytes = self.buffer.len(),
                "Output capture abandoned, discarding partial output"
            );
        }
    }
}
