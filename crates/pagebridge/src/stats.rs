//! Worker statistics.
//!
//! Counters are shared between the bridge loop, the framed channel (which
//! answers `stats` frames) and the optional periodic reporter, so they live
//! behind an `Arc` as plain atomics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct WorkerStats {
    started: Instant,
    requests: AtomicU64,
    responses: AtomicU64,
    errors: AtomicU64,
    oversized: AtomicU64,
    busy_micros: AtomicU64,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            responses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            oversized: AtomicU64::new(0),
            busy_micros: AtomicU64::new(0),
        }
    }
}

impl WorkerStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response(&self, elapsed: Duration) {
        self.responses.fetch_add(1, Ordering::Relaxed);
        self.add_busy(elapsed);
    }

    pub fn record_error(&self, elapsed: Duration) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.add_busy(elapsed);
    }

    /// An error that happened because the response did not fit in a frame.
    pub fn record_oversized(&self, elapsed: Duration) {
        self.oversized.fetch_add(1, Ordering::Relaxed);
        self.record_error(elapsed);
    }

    fn add_busy(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.busy_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            requests: self.requests.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
            busy_micros: self.busy_micros.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`WorkerStats`], as sent in a `stats` frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub requests: u64,
    pub responses: u64,
    pub errors: u64,
    pub oversized: u64,
    pub busy_micros: u64,
}

impl StatsSnapshot {
    /// Requests that have been answered, one way or the other.
    pub fn completed(&self) -> u64 {
        self.responses + self.errors
    }
}

/// One line of the periodic report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub seconds: u64,
    pub completed: u64,
    pub per_second: f64,
    pub errors: u64,
}

/// Turns successive snapshots into per-interval completion rates.
#[derive(Debug, Default)]
pub struct RateWindow {
    last_completed: u64,
}

impl RateWindow {
    pub fn sample(&mut self, snapshot: &StatsSnapshot, interval: Duration) -> RateSample {
        let completed = snapshot.completed();
        let delta = completed.saturating_sub(self.last_completed);
        self.last_completed = completed;

        let secs = interval.as_secs_f64();
        let per_second = if secs > 0.0 { delta as f64 / secs } else { 0.0 };
        RateSample {
            seconds: snapshot.uptime_secs,
            completed,
            per_second,
            errors: snapshot.errors,
        }
    }
}

/// Logs a rate sample every `interval` until `shutdown` is cancelled.
pub fn spawn_reporter(
    stats: Arc<WorkerStats>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await; // Skip immediate first tick
        let mut window = RateWindow::default();
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let sample = window.sample(&stats.snapshot(), interval);
                    tracing::info!(
                        seconds = sample.seconds,
                        completed = sample.completed,
                        per_second = sample.per_second,
                        errors = sample.errors,
                        "Worker statistics"
                    );
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("Statistics reporter shutting down");
                    break;
                }
            }
        }
    })
}
