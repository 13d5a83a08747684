//! Subprocess-based engine runner.
//!
//! Spawns the engine binary (Terraform or a compatible CLI) with the stack
//! directory as its current directory, streams its output and enforces the
//! timeout and cancellation signal.

use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelSignal;
use crate::config::{EngineConfig, RunConfig, VarPassing};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{EngineCommand, EngineRunner, ExecutionResult, Subcommand};

/// Log output from an engine process.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: chrono::DateTime<Utc>,
    pub stream: LogStream,
    pub message: String,
}

/// Log stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Log handler callback type.
pub type LogHandler = Arc<dyn Fn(LogLine) + Send + Sync>;

/// Engine runner that spawns real processes.
pub struct ProcessRunner {
    config: EngineConfig,
    log_handler: Option<LogHandler>,
}

impl ProcessRunner {
    pub fn new(config: EngineConfig) -> Self {
        info!("Using IaC engine: {}", config.binary);
        Self {
            config,
            log_handler: None,
        }
    }

    /// Set a log handler for streaming logs.
    pub fn with_log_handler(mut self, handler: LogHandler) -> Self {
        self.log_handler = Some(handler);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build the full argument list. `var_file` is the path of an already
    /// written variable file when variables are passed by file.
    fn build_args(&self, command: &EngineCommand, var_file: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = command
            .subcommand
            .base_args()
            .iter()
            .map(|s| s.to_string())
            .collect();

        if command.subcommand.takes_variables() && !command.variables.is_empty() {
            match var_file {
                Some(path) => args.push(format!("-var-file={}", path)),
                None => args.extend(command.variables.to_cli_args()),
            }
        }

        args.extend(command.args.iter().cloned());
        args
    }

    /// Format command for logging.
    fn format_command(&self, args: &[String]) -> String {
        let mut cmd = self.config.binary.clone();
        for arg in args {
            if arg.contains(' ') || arg.contains('=') {
                cmd.push_str(&format!(" '{}'", arg));
            } else {
                cmd.push_str(&format!(" {}", arg));
            }
        }
        cmd
    }

    fn write_var_file(&self, command: &EngineCommand) -> RunnerResult<Option<tempfile::NamedTempFile>> {
        if self.config.var_passing != VarPassing::File
            || !command.subcommand.takes_variables()
            || command.variables.is_empty()
        {
            return Ok(None);
        }
        let mut file = tempfile::Builder::new()
            .prefix("stackcheck-")
            .suffix(".tfvars.json")
            .tempfile()?;
        file.write_all(command.variables.to_var_file_json()?.as_bytes())?;
        file.flush()?;
        Ok(Some(file))
    }
}

/// Collect a stream line by line, echoing it when streaming is enabled.
async fn collect_stream<R>(
    reader: R,
    stream: LogStream,
    echo: bool,
    ci_mode: bool,
    handler: Option<LogHandler>,
) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut output = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        output.push_str(&line);
        output.push('\n');

        if !echo && handler.is_none() {
            continue;
        }
        let log_line = LogLine {
            timestamp: Utc::now(),
            stream,
            message: line,
        };
        if echo {
            if ci_mode {
                println!(
                    "[{}] [{}] {}",
                    log_line.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                    stream,
                    log_line.message
                );
            } else {
                match stream {
                    LogStream::Stdout => println!("{}", log_line.message),
                    LogStream::Stderr => eprintln!("{}", log_line.message),
                }
            }
        }
        if let Some(handler) = &handler {
            handler(log_line);
        }
    }
    output
}

/// How long to wait for output after killing the engine. Grandchildren
/// that inherited the pipes can keep them open past the kill.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Collect whatever a killed process wrote.
async fn drain_output(
    stdout_task: JoinHandle<String>,
    stderr_task: JoinHandle<String>,
) -> (String, String) {
    let collect = async {
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        (stdout, stderr)
    };
    tokio::time::timeout(OUTPUT_DRAIN_GRACE, collect)
        .await
        .unwrap_or_default()
}

enum Finished {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl EngineRunner for ProcessRunner {
    async fn execute(
        &self,
        command: &EngineCommand,
        run_config: &RunConfig,
        cancel: &CancelSignal,
    ) -> RunnerResult<ExecutionResult> {
        command.check_working_dir()?;

        if cancel.is_cancelled() {
            return Err(RunnerError::cancelled());
        }

        let var_file = self.write_var_file(command)?;
        let var_file_path = var_file
            .as_ref()
            .map(|f| f.path().to_string_lossy().into_owned());
        let args = self.build_args(command, var_file_path.as_deref());
        let cmd_str = self.format_command(&args);

        info!(
            "Running {} {} in {:?}",
            self.config.binary, command.subcommand, command.working_dir
        );
        debug!("Command: {}", cmd_str);

        if self.config.dry_run {
            info!("[DRY-RUN] Would execute: {}", cmd_str);
            let now = Utc::now();
            // `output -json` must still be a parseable (empty) document.
            let stdout = match command.subcommand {
                Subcommand::Output => "{}".to_string(),
                _ => format!("[DRY-RUN] Command: {}", cmd_str),
            };
            return Ok(ExecutionResult {
                subcommand: command.subcommand,
                exit_code: 0,
                stdout,
                stderr: String::new(),
                started_at: now,
                finished_at: now,
                duration_ms: 0,
            });
        }

        let mut cmd = Command::new(&self.config.binary);
        cmd.args(&args)
            .current_dir(&command.working_dir)
            .envs(&self.config.env)
            .env("TF_IN_AUTOMATION", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started_at = Utc::now();
        let mut child = cmd.spawn().map_err(|e| {
            RunnerError::invocation(
                &command.working_dir,
                format!("failed to spawn {}: {}", self.config.binary, e),
            )
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::invocation(&command.working_dir, "stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::invocation(&command.working_dir, "stderr not captured"))?;

        let stdout_task = tokio::spawn(collect_stream(
            stdout,
            LogStream::Stdout,
            run_config.stream_logs,
            self.config.ci_mode,
            self.log_handler.clone(),
        ));
        let stderr_task = tokio::spawn(collect_stream(
            stderr,
            LogStream::Stderr,
            run_config.stream_logs,
            self.config.ci_mode,
            self.log_handler.clone(),
        ));

        let timeout = async {
            if run_config.timeout_seconds > 0 {
                tokio::time::sleep(Duration::from_secs(run_config.timeout_seconds)).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        let finished = tokio::select! {
            status = child.wait() => Finished::Exited(status?),
            _ = timeout => Finished::TimedOut,
            _ = cancel.cancelled() => Finished::Cancelled,
        };

        let status = match finished {
            Finished::Exited(status) => status,
            Finished::TimedOut => {
                warn!(
                    "{} {} timed out after {}s, killing",
                    self.config.binary, command.subcommand, run_config.timeout_seconds
                );
                let _ = child.kill().await;
                let (stdout, stderr) = drain_output(stdout_task, stderr_task).await;
                return Err(RunnerError::Timeout {
                    seconds: run_config.timeout_seconds,
                    stdout,
                    stderr,
                });
            }
            Finished::Cancelled => {
                warn!("{} {} cancelled, killing", self.config.binary, command.subcommand);
                let _ = child.kill().await;
                let (stdout, stderr) = drain_output(stdout_task, stderr_task).await;
                return Err(RunnerError::Cancelled { stdout, stderr });
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        drop(var_file);

        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        let exit_code = status.code().unwrap_or(-1) as i64;

        if command.subcommand.is_success(exit_code) {
            info!("{} completed in {}ms", command.subcommand, duration_ms);
        } else {
            error!(
                "{} failed with exit code {} after {}ms",
                command.subcommand, exit_code, duration_ms
            );
        }

        Ok(ExecutionResult {
            subcommand: command.subcommand,
            exit_code,
            stdout,
            stderr,
            started_at,
            finished_at,
            duration_ms,
        })
    }

    async fn version(&self) -> RunnerResult<String> {
        let output = Command::new(&self.config.binary)
            .arg("-version")
            .output()
            .await
            .map_err(|e| {
                RunnerError::invocation(".", format!("failed to spawn {}: {}", self.config.binary, e))
            })?;

        if output.status.success() {
            let text = String::from_utf8_lossy(&output.stdout);
            Ok(text.lines().next().unwrap_or_default().trim().to_string())
        } else {
            Err(RunnerError::Execution {
                subcommand: "version".to_string(),
                exit_code: output.status.code().unwrap_or(-1) as i64,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }
}
