//! Worker binary configuration from command-line arguments and environment.
//!
//! Arguments win over environment variables. The bridge loop itself has no
//! configuration; this selects the producer, the frame limit and the
//! statistics report.

use std::path::PathBuf;
use std::time::Duration;

use crate::bridge::codec::MAX_FRAME_BYTES;
use crate::producer::ScriptProducer;

pub const SCRIPT_ENV: &str = "PAGEBRIDGE_SCRIPT";
pub const SCRIPT_DIR_ENV: &str = "PAGEBRIDGE_SCRIPT_DIR";
pub const STATS_INTERVAL_ENV: &str = "PAGEBRIDGE_STATS_INTERVAL";
pub const MAX_FRAME_ENV: &str = "PAGEBRIDGE_MAX_FRAME_BYTES";

pub const USAGE: &str = "\
Usage: pagebridge-worker [options] [--] <program> [args...]

Arguments:
  <program> [args...]         Script run once per request; its stdout becomes the body

Options:
  --dir <dir>                 Working directory for the script [env: PAGEBRIDGE_SCRIPT_DIR]
  --stats-interval <secs>     Log statistics every <secs> seconds, 0 disables
                              [env: PAGEBRIDGE_STATS_INTERVAL] [default: 0]
  --max-frame-bytes <bytes>   Largest frame sent or accepted
                              [env: PAGEBRIDGE_MAX_FRAME_BYTES] [default: 67108864]
  -h, --help                  Print this help

Environment:
  PAGEBRIDGE_SCRIPT           Script command line, used when no program is given
  PAGEBRIDGE_LOG              Log level: debug, info, warn, error [default: info]
  LOG_FORMAT                  Set to `json` for JSON log lines";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no script given: pass <program> [args...] or set PAGEBRIDGE_SCRIPT")]
    MissingScript,

    #[error("{0}")]
    Usage(String),

    #[error("help requested")]
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    /// `None` when periodic statistics logging is off.
    pub stats_interval: Option<Duration>,
    pub max_frame_bytes: usize,
}

impl WorkerConfig {
    pub fn from_env_and_args(args: &[String]) -> Result<Self, ConfigError> {
        Self::parse(args, |key| std::env::var(key).ok())
    }

    /// Parses `args` (including argv[0]) with `env` as the variable lookup.
    pub fn parse(
        args: &[String],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut dir: Option<PathBuf> = None;
        let mut stats_secs: Option<u64> = None;
        let mut max_frame_bytes: Option<usize> = None;
        let mut command: Vec<String> = Vec::new();

        let mut i = 1; // skip argv[0]
        while i < args.len() {
            match args[i].as_str() {
                "--dir" => {
                    i += 1;
                    let value = args
                        .get(i)
                        .ok_or_else(|| ConfigError::Usage("--dir requires a value".to_string()))?;
                    dir = Some(PathBuf::from(value));
                }
                "--stats-interval" => {
                    i += 1;
                    stats_secs = Some(parse_number("--stats-interval", args.get(i))?);
                }
                "--max-frame-bytes" => {
                    i += 1;
                    max_frame_bytes = Some(parse_number("--max-frame-bytes", args.get(i))?);
                }
                "--help" | "-h" => return Err(ConfigError::Help),
                "--" => {
                    command.extend(args[i + 1..].iter().cloned());
                    break;
                }
                arg if arg.starts_with('-') => {
                    return Err(ConfigError::Usage(format!("unknown flag: {arg}")));
                }
                _ => {
                    command.extend(args[i..].iter().cloned());
                    break;
                }
            }
            i += 1;
        }

        if command.is_empty()
            && let Some(script) = env(SCRIPT_ENV)
        {
            command = script.split_whitespace().map(str::to_string).collect();
        }
        let dir = dir.or_else(|| env(SCRIPT_DIR_ENV).map(PathBuf::from));
        let stats_secs = match stats_secs {
            Some(secs) => secs,
            None => match env(STATS_INTERVAL_ENV) {
                Some(value) => parse_number(STATS_INTERVAL_ENV, Some(&value))?,
                None => 0,
            },
        };
        let max_frame_bytes = match max_frame_bytes {
            Some(bytes) => bytes,
            None => match env(MAX_FRAME_ENV) {
                Some(value) => parse_number(MAX_FRAME_ENV, Some(&value))?,
                None => MAX_FRAME_BYTES,
            },
        };
        if max_frame_bytes == 0 {
            return Err(ConfigError::Usage(
                "max frame bytes must be greater than zero".to_string(),
            ));
        }

        let mut command = command.into_iter();
        let program = command.next().ok_or(ConfigError::MissingScript)?;

        Ok(Self {
            program,
            args: command.collect(),
            dir,
            stats_interval: (stats_secs > 0).then(|| Duration::from_secs(stats_secs)),
            max_frame_bytes,
        })
    }

    pub fn producer(&self) -> ScriptProducer {
        let producer = ScriptProducer::new(&self.program).with_args(self.args.iter().cloned());
        match &self.dir {
            Some(dir) => producer.with_dir(dir),
            None => producer,
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    name: &str,
    value: Option<&String>,
) -> Result<T, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::Usage(format!("{name} requires a value")))?;
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Usage(format!("{name}: not a number: {value}")))
}
