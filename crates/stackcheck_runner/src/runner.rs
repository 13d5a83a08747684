//! Engine runner trait and types.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelSignal;
use crate::config::RunConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::variables::VariableSet;

/// Engine subcommands the harness issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subcommand {
    Init,
    Plan,
    Apply,
    Destroy,
    Output,
}

impl Subcommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Output => "output",
        }
    }

    /// Fixed arguments for the subcommand, before variables and extra args.
    pub fn base_args(&self) -> &'static [&'static str] {
        match self {
            Self::Init => &["init", "-input=false", "-no-color"],
            Self::Plan => &["plan", "-input=false", "-no-color", "-detailed-exitcode"],
            Self::Apply => &["apply", "-auto-approve", "-input=false", "-no-color"],
            Self::Destroy => &["destroy", "-auto-approve", "-input=false", "-no-color"],
            Self::Output => &["output", "-json", "-no-color"],
        }
    }

    /// Whether input variables are passed to this subcommand.
    pub fn takes_variables(&self) -> bool {
        matches!(self, Self::Plan | Self::Apply | Self::Destroy)
    }

    /// Whether an exit code counts as success. `plan -detailed-exitcode`
    /// exits 2 when the plan contains changes.
    pub fn is_success(&self, exit_code: i64) -> bool {
        match self {
            Self::Plan => exit_code == 0 || exit_code == 2,
            _ => exit_code == 0,
        }
    }
}

impl fmt::Display for Subcommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One engine invocation.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    pub working_dir: PathBuf,
    pub subcommand: Subcommand,
    pub args: Vec<String>,
    pub variables: VariableSet,
}

impl EngineCommand {
    pub fn new(working_dir: impl Into<PathBuf>, subcommand: Subcommand) -> Self {
        Self {
            working_dir: working_dir.into(),
            subcommand,
            args: Vec::new(),
            variables: VariableSet::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn variables(mut self, variables: VariableSet) -> Self {
        self.variables = variables;
        self
    }

    /// Check the working directory before anything is spawned.
    pub fn check_working_dir(&self) -> RunnerResult<()> {
        check_dir(&self.working_dir)
    }
}

fn check_dir(dir: &Path) -> RunnerResult<()> {
    let meta = std::fs::metadata(dir)
        .map_err(|e| RunnerError::invocation(dir, format!("working directory unreadable: {}", e)))?;
    if !meta.is_dir() {
        return Err(RunnerError::invocation(dir, "working directory is not a directory"));
    }
    std::fs::read_dir(dir)
        .map_err(|e| RunnerError::invocation(dir, format!("working directory unreadable: {}", e)))?;
    Ok(())
}

/// Result of one engine execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Subcommand that produced this result
    pub subcommand: Subcommand,
    /// Exit code from the engine (-1 when killed by a signal)
    pub exit_code: i64,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Execution start time
    pub started_at: DateTime<Utc>,
    /// Execution end time
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Check if the subcommand succeeded.
    pub fn success(&self) -> bool {
        self.subcommand.is_success(self.exit_code)
    }

    /// Turn a failed execution into [`RunnerError::Execution`].
    pub fn ensure_success(self) -> RunnerResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(RunnerError::Execution {
                subcommand: self.subcommand.to_string(),
                exit_code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs the IaC engine.
#[async_trait]
pub trait EngineRunner: Send + Sync {
    /// Spawn one engine process and wait for it to finish, time out, or be
    /// cancelled. The result is returned whatever the exit code.
    async fn execute(
        &self,
        command: &EngineCommand,
        run_config: &RunConfig,
        cancel: &CancelSignal,
    ) -> RunnerResult<ExecutionResult>;

    /// Get the engine version string.
    async fn version(&self) -> RunnerResult<String>;

    /// Like [`EngineRunner::execute`], but a failing exit code is an error.
    async fn run(
        &self,
        command: &EngineCommand,
        run_config: &RunConfig,
        cancel: &CancelSignal,
    ) -> RunnerResult<ExecutionResult> {
        self.execute(command, run_config, cancel).await?.ensure_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(subcommand: Subcommand, exit_code: i64) -> ExecutionResult {
        ExecutionResult {
            subcommand,
            exit_code,
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 0,
        }
    }

    #[test]
    fn test_plan_exit_two_is_success() {
        assert!(result(Subcommand::Plan, 2).success());
        assert!(!result(Subcommand::Apply, 2).success());
        assert!(!result(Subcommand::Plan, 1).success());
    }

    #[test]
    fn test_ensure_success_wraps_stderr() {
        let err = result(Subcommand::Destroy, 1).ensure_success().unwrap_err();
        match err {
            RunnerError::Execution {
                subcommand,
                exit_code,
                stderr,
                ..
            } => {
                assert_eq!(subcommand, "destroy");
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "err");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_working_dir_is_invocation_error() {
        let cmd = EngineCommand::new("/definitely/not/here", Subcommand::Init);
        assert!(matches!(
            cmd.check_working_dir(),
            Err(RunnerError::Invocation { .. })
        ));
    }

    #[test]
    fn test_file_as_working_dir_is_invocation_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let cmd = EngineCommand::new(file.path(), Subcommand::Plan);
        assert!(matches!(
            cmd.check_working_dir(),
            Err(RunnerError::Invocation { .. })
        ));
    }

    #[test]
    fn test_only_mutating_commands_take_variables() {
        assert!(!Subcommand::Init.takes_variables());
        assert!(!Subcommand::Output.takes_variables());
        assert!(Subcommand::Destroy.takes_variables());
    }
}
