//! Content producers - the unit of work run once per request.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use crate::capture::OutputBuffer;

#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("script failed ({status}): {stderr}")]
    Exit { status: ExitStatus, stderr: String },

    #[error("{0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

impl ProduceError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Short stable label used as the failure kind in error reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Exit { .. } => "script_exit",
            Self::Panicked(_) => "panic",
            Self::Failed(_) => "failed",
        }
    }
}

/// Trait for the content-producing unit.
///
/// Everything the producer wants in the response body goes to `out`.
#[async_trait]
pub trait ContentProducer: Send + Sync {
    async fn produce(&self, out: &mut OutputBuffer) -> Result<(), ProduceError>;

    /// Human readable description, used as context in failure reports.
    fn describe(&self) -> String;
}

/// Producer backed by a plain function.
pub struct FnProducer<F> {
    name: String,
    f: F,
}

pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnProducer<F>
where
    F: Fn(&mut OutputBuffer) -> Result<(), ProduceError> + Send + Sync,
{
    FnProducer {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> ContentProducer for FnProducer<F>
where
    F: Fn(&mut OutputBuffer) -> Result<(), ProduceError> + Send + Sync,
{
    async fn produce(&self, out: &mut OutputBuffer) -> Result<(), ProduceError> {
        (self.f)(out)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Runs an external script per request and captures its stdout.
///
/// A non-zero exit is a failure and the partial stdout is discarded.
#[derive(Debug, Clone)]
pub struct ScriptProducer {
    program: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
}

impl ScriptProducer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl ContentProducer for ScriptProducer {
    async fn produce(&self, out: &mut OutputBuffer) -> Result<(), ProduceError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(ProduceError::Exit {
                status: output.status,
                stderr,
            });
        }
        if !stderr.is_empty() {
            tracing::warn!(program = %self.program, %stderr, "Script wrote to stderr");
        }

        out.push(&output.stdout);
        Ok(())
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            format!("script `{}`", self.program)
        } else {
            format!("script `{} {}`", self.program, self.args.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    #[tokio::test]
    async fn fn_producer_writes_to_sink() {
        let producer = from_fn("greeting", |out: &mut OutputBuffer| {
            write!(out, "hello {}", 42).map_err(|e| ProduceError::failed(e.to_string()))
        });
        let mut out = OutputBuffer::new();
        producer.produce(&mut out).await.unwrap();
        assert_eq!(out.as_bytes(), b"hello 42");
        assert_eq!(producer.describe(), "greeting");
    }

    #[test]
    fn produce_error_labels() {
        assert_eq!(ProduceError::failed("x").label(), "failed");
        assert_eq!(ProduceError::Panicked("x".into()).label(), "panic");
        assert_eq!(ProduceError::from(io::Error::other("x")).label(), "io");
    }

    #[test]
    fn script_describe_includes_args() {
        assert_eq!(ScriptProducer::new("php").describe(), "script `php`");
        assert_eq!(
            ScriptProducer::new("php").with_args(["index.php"]).describe(),
            "script `php index.php`"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_producer_captures_stdout() {
        let producer = ScriptProducer::new("sh").with_args(["-c", "printf '<p>page</p>'"]);
        let mut out = OutputBuffer::new();
        producer.produce(&mut out).await.unwrap();
        assert_eq!(out.as_bytes(), b"<p>page</p>");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_producer_runs_in_dir() {
        let producer = ScriptProducer::new("sh")
            .with_args(["-c", "pwd"])
            .with_dir("/");
        let mut out = OutputBuffer::new();
        producer.produce(&mut out).await.unwrap();
        assert_eq!(out.as_bytes(), b"/\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_producer_fails_on_nonzero_exit() {
        let producer =
            ScriptProducer::new("sh").with_args(["-c", "printf partial; echo boom >&2; exit 3"]);
        let mut out = OutputBuffer::new();
        let err = producer.produce(&mut out).await.unwrap_err();

        assert_eq!(err.label(), "script_exit");
        let message = err.to_string();
        assert!(message.contains("boom"), "{message}");
        assert!(message.contains('3'), "{message}");
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn script_producer_missing_program_is_io_error() {
        let producer = ScriptProducer::new("/nonexistent/pagebridge-test-program");
        let mut out = OutputBuffer::new();
        let err = producer.produce(&mut out).await.unwrap_err();
        assert_eq!(err.label(), "io");
    }
}
