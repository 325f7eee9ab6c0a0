//! Tracing setup for the worker binary.
//!
//! Logs always go to stderr: stdout belongs to the control channel.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_LEVEL_ENV: &str = "PAGEBRIDGE_LOG";

/// Initialize tracing with RUST_LOG, PAGEBRIDGE_LOG and LOG_FORMAT support.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = std::env::var(LOG_LEVEL_ENV).ok();
        EnvFilter::new(filter_directives(level.as_deref()))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn filter_directives(level: Option<&str>) -> String {
    let base_level = match level {
        Some("debug") => "debug",
        Some("trace") => "trace",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };

    format!(
        "pagebridge={level},pagebridge_worker={level}",
        level = base_level
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_info() {
        assert_eq!(
            filter_directives(None),
            "pagebridge=info,pagebridge_worker=info"
        );
        assert!(filter_directives(Some("nonsense")).starts_with("pagebridge=info,"));
    }

    #[test]
    fn codec_logs_follow_the_crate_level() {
        // Large-frame logging in the codec must stay visible at debug.
        assert_eq!(
            filter_directives(Some("debug")),
            "pagebridge=debug,pagebridge_worker=debug"
        );
    }

    #[test]
    fn warning_is_alias_for_warn() {
        assert!(filter_directives(Some("warning")).starts_with("pagebridge=warn,"));
    }
}
