//! IPC bridge for supervisor-worker communication.
//!
//! This module provides the wire protocol, codec and framed channel used
//! between the supervising process (parent) and the worker.
//!
//! # Architecture
//!
//! - **protocol**: Frame types (SupervisorFrame, WorkerFrame)
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite
//! - **transport**: [`WorkerChannel`](crate::channel::WorkerChannel) over framed streams

pub mod codec;
pub mod protocol;
pub mod transport;
