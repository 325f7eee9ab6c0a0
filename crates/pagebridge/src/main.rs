use std::process;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use pagebridge::config::{ConfigError, USAGE, WorkerConfig};
use pagebridge::stats::{WorkerStats, spawn_reporter};
use pagebridge::{Bridge, FramedChannel};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Usage goes to stderr, stdout is the control channel.
    let config = match WorkerConfig::from_env_and_args(&args) {
        Ok(config) => config,
        Err(ConfigError::Help) => {
            eprintln!("{USAGE}");
            process::exit(0);
        }
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!();
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    pagebridge::logging::init_tracing();
    tracing::info!("pagebridge-worker {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config) {
        let message = format!("{e:#}");
        tracing::error!(error = %message, "Worker failed");
        process::exit(1);
    }
}

fn run(config: WorkerConfig) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let result = runtime.block_on(async move {
        let stats = WorkerStats::new();
        let shutdown = CancellationToken::new();
        let reporter = config
            .stats_interval
            .map(|interval| spawn_reporter(stats.clone(), interval, shutdown.clone()));

        let mut channel = FramedChannel::with_max_frame_length(
            tokio::io::stdin(),
            tokio::io::stdout(),
            config.max_frame_bytes,
        )
        .with_stats(stats.clone());
        channel
            .announce_ready()
            .await
            .context("failed to announce ready")?;

        let outcome = Bridge::new(channel, config.producer())
            .with_stats(stats)
            .run()
            .await;

        shutdown.cancel();
        if let Some(reporter) = reporter {
            let _ = reporter.await;
        }

        let summary = outcome?;
        tracing::info!(
            served = summary.served,
            failed = summary.failed,
            "Worker exiting"
        );
        Ok::<(), anyhow::Error>(())
    });

    // A blocking stdin read may still be parked in the runtime's blocking pool.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}
