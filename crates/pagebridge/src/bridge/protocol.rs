//! Wire protocol types for supervisor-worker communication.
//!
//! One channel (stdin/stdout of the worker), strictly request/response:
//! - **Supervisor → worker**: Request, Stats, Stop
//! - **Worker → supervisor**: Ready, Response, Error, Stats, Stopped
//!
//! Bodies are raw bytes carried as base64 strings.

use serde::{Deserialize, Serialize};
use tokio_util::bytes::Bytes;

use crate::stats::StatsSnapshot;

/// Unique identifier for a request, assigned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(uuid::Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages from supervisor to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorFrame {
    Request {
        id: RequestId,
        method: String,
        uri: String,
        #[serde(default)]
        headers: Vec<(String, String)>,
        #[serde(default, with = "base64_body")]
        body: Bytes,
    },

    /// Asks for a statistics snapshot. Only valid between requests.
    Stats,

    /// Closing sentinel. The worker acknowledges with `Stopped` and exits its loop.
    Stop,
}

/// Messages from worker to supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    /// Sent once, before the worker starts waiting for requests.
    Ready { pid: u32 },

    Response {
        id: RequestId,
        status: u16,
        headers: Vec<(String, String)>,
        #[serde(with = "base64_body")]
        body: Bytes,
    },

    /// Content production failed; no response follows for this request.
    Error {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        id: Option<RequestId>,
        message: String,
    },

    Stats {
        stats: StatsSnapshot,
    },

    Stopped,
}

mod base64_body {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};
    use tokio_util::bytes::Bytes;

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
