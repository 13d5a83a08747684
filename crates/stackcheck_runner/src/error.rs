//! Error types for the runner module.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur while invoking the IaC engine.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The engine process could not be started at all.
    #[error("Cannot invoke engine in {working_dir:?}: {reason}")]
    Invocation { working_dir: PathBuf, reason: String },

    /// The engine ran and reported failure.
    #[error("Engine `{subcommand}` exited with code {exit_code}: {}", last_line(.stderr))]
    Execution {
        subcommand: String,
        exit_code: i64,
        stdout: String,
        stderr: String,
    },

    /// Output captured before the process was killed is kept.
    #[error("Engine command timed out after {seconds} seconds")]
    Timeout {
        seconds: u64,
        stdout: String,
        stderr: String,
    },

    #[error("Engine command cancelled")]
    Cancelled { stdout: String, stderr: String },

    #[error("Variable serialization failed: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RunnerError {
    pub(crate) fn invocation(working_dir: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Invocation {
            working_dir: working_dir.into(),
            reason: reason.into(),
        }
    }

    /// Cancellation observed before any engine output existed.
    pub fn cancelled() -> Self {
        Self::Cancelled {
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Whether the error was caused by the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Engine output carried by the error, if the engine got to run.
    pub fn engine_output(&self) -> Option<(&str, &str)> {
        match self {
            Self::Execution { stdout, stderr, .. }
            | Self::Timeout { stdout, stderr, .. }
            | Self::Cancelled { stdout, stderr } => Some((stdout.as_str(), stderr.as_str())),
            _ => None,
        }
    }
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no diagnostic output")
}
