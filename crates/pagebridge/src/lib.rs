//! pagebridge: output-capturing request/response bridge between a
//! supervising process and a content producer.

pub mod bridge;
pub mod capture;
pub mod channel;
pub mod config;
pub mod exchange;
pub mod logging;
pub mod orchestrator;
pub mod producer;
pub mod stats;
pub mod worker;

pub use bridge::transport::FramedChannel;
pub use capture::{CaptureScope, OutputBuffer};
pub use channel::{ChannelError, WorkerChannel};
pub use config::{ConfigError, WorkerConfig};
pub use exchange::{Request, Response};
pub use orchestrator::{Outcome, Supervisor, SupervisorError, spawn_worker};
pub use producer::{ContentProducer, FnProducer, ProduceError, ScriptProducer, from_fn};
pub use stats::{StatsSnapshot, WorkerStats};
pub use worker::{
    Bridge, BridgeError, BridgeState, BridgeStats, ContentProductionFailure, run_bridge,
};
