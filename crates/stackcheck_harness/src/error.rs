//! Error types for the harness.

use std::path::PathBuf;

use thiserror::Error;

use crate::outputs::CoercionError;

/// Result type alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that can occur while testing a stack.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Engine init failed in {working_dir:?} (exit {exit_code}): {stderr}")]
    Init {
        working_dir: PathBuf,
        exit_code: i64,
        stdout: String,
        stderr: String,
    },

    #[error("Engine apply failed in {working_dir:?} (exit {exit_code}): {stderr}")]
    Apply {
        working_dir: PathBuf,
        exit_code: i64,
        stdout: String,
        stderr: String,
    },

    #[error("Engine plan failed in {working_dir:?} (exit {exit_code}): {stderr}")]
    Plan {
        working_dir: PathBuf,
        exit_code: i64,
        stdout: String,
        stderr: String,
    },

    #[error("Output not found: {0}")]
    OutputNotFound(String),

    /// Destroy failed. Resources may have leaked.
    #[error("Teardown failed in {working_dir:?}: {reason}")]
    Teardown {
        working_dir: PathBuf,
        reason: String,
        stdout: String,
        stderr: String,
    },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Coercion failed: {0}")]
    Coercion(#[from] CoercionError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid suite: {0}")]
    Suite(String),

    #[error(transparent)]
    Runner(#[from] stackcheck_runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Captured engine output, when the error carries any.
    pub fn engine_output(&self) -> Option<(&str, &str)> {
        match self {
            Self::Init { stdout, stderr, .. }
            | Self::Apply { stdout, stderr, .. }
            | Self::Plan { stdout, stderr, .. }
            | Self::Teardown { stdout, stderr, .. } => Some((stdout.as_str(), stderr.as_str())),
            Self::Runner(e) => e.engine_output(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackcheck_runner::RunnerError;

    #[test]
    fn test_runner_errors_display_once() {
        let err = anyhow::Error::from(HarnessError::from(RunnerError::cancelled()));
        assert_eq!(format!("{:#}", err), "Engine command cancelled");
    }

    #[test]
    fn test_timeout_output_is_exposed() {
        let err = HarnessError::from(RunnerError::Timeout {
            seconds: 60,
            stdout: "module.vpc: Still creating...".to_string(),
            stderr: String::new(),
        });
        let (stdout, _) = err.engine_output().unwrap();
        assert_eq!(stdout, "module.vpc: Still creating...");
        assert!(HarnessError::OutputNotFound("x".to_string()).engine_output().is_none());
    }
}
