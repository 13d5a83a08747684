//! Mock engine runner for testing.
//!
//! Provides a configurable in-memory stand-in for the IaC engine so that
//! lifecycle and scenario tests run without a real engine or cloud account.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};

use crate::cancel::CancelSignal;
use crate::config::RunConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{EngineCommand, EngineRunner, ExecutionResult, Subcommand};

/// Predefined mock response for an engine execution.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    /// Position of the call across every working directory, from 0
    pub seq: usize,
    pub subcommand: Subcommand,
    pub working_dir: PathBuf,
    pub args: Vec<String>,
    /// Rendered `-var` arguments
    pub variables: Vec<String>,
}

/// Start and finish markers, in the order the engine observed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Started(Subcommand, PathBuf),
    Finished(Subcommand, PathBuf),
}

/// Mock engine runner for testing.
///
/// Responses are queued per subcommand. When a queue is empty the mock
/// answers with a success; `output` answers with the configured outputs
/// document. Successful applies and destroys are tracked per working
/// directory so tests can assert nothing was left provisioned.
#[derive(Clone)]
pub struct MockEngine {
    responses: Arc<RwLock<HashMap<Subcommand, VecDeque<MockResponse>>>>,
    outputs: Arc<RwLock<Map<String, Value>>>,
    delays: Arc<RwLock<HashMap<Subcommand, Duration>>>,
    calls: Arc<RwLock<Vec<CapturedCall>>>,
    events: Arc<RwLock<Vec<MockEvent>>>,
    provisioned: Arc<RwLock<HashSet<PathBuf>>>,
    invocation_failure: Arc<RwLock<Option<String>>>,
    call_counter: Arc<AtomicUsize>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(RwLock::new(HashMap::new())),
            outputs: Arc::new(RwLock::new(Map::new())),
            delays: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            events: Arc::new(RwLock::new(Vec::new())),
            provisioned: Arc::new(RwLock::new(HashSet::new())),
            invocation_failure: Arc::new(RwLock::new(None)),
            call_counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a response for the next call of `subcommand`.
    pub fn respond(self, subcommand: Subcommand, response: MockResponse) -> Self {
        self.responses
            .write()
            .entry(subcommand)
            .or_default()
            .push_back(response);
        self
    }

    /// Expose a stack output through `output -json`.
    pub fn with_output(self, name: impl Into<String>, value: Value) -> Self {
        let kind = type_name(&value);
        self.outputs.write().insert(
            name.into(),
            json!({ "sensitive": false, "type": kind, "value": value }),
        );
        self
    }

    /// Make every call of `subcommand` take `delay`.
    pub fn with_delay(self, subcommand: Subcommand, delay: Duration) -> Self {
        self.delays.write().insert(subcommand, delay);
        self
    }

    /// Fail every call before it "spawns", as if the binary were missing.
    pub fn fail_invocation(self, message: impl Into<String>) -> Self {
        *self.invocation_failure.write() = Some(message.into());
        self
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.calls.read().clone()
    }

    /// Subcommands in call order.
    pub fn subcommands(&self) -> Vec<Subcommand> {
        self.calls.read().iter().map(|c| c.subcommand).collect()
    }

    /// Number of calls of one subcommand.
    pub fn count(&self, subcommand: Subcommand) -> usize {
        self.calls
            .read()
            .iter()
            .filter(|c| c.subcommand == subcommand)
            .count()
    }

    /// Calls made against one working directory.
    pub fn calls_for(&self, dir: &Path) -> Vec<CapturedCall> {
        self.calls
            .read()
            .iter()
            .filter(|c| c.working_dir == dir)
            .cloned()
            .collect()
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.events.read().clone()
    }

    /// Whether a successful apply in `dir` has not been destroyed yet.
    pub fn is_provisioned(&self, dir: &Path) -> bool {
        self.provisioned.read().contains(dir)
    }

    /// Total number of calls made.
    pub fn call_count(&self) -> usize {
        self.call_counter.load(Ordering::SeqCst)
    }

    fn next_response(&self, subcommand: Subcommand) -> MockResponse {
        if let Some(response) = self
            .responses
            .write()
            .get_mut(&subcommand)
            .and_then(|queue| queue.pop_front())
        {
            return response;
        }
        match subcommand {
            Subcommand::Output => {
                let doc = Value::Object(self.outputs.read().clone());
                MockResponse::success(doc.to_string())
            }
            Subcommand::Plan => MockResponse::success(
                "No changes. Your infrastructure matches the configuration.",
            ),
            _ => MockResponse::success(""),
        }
    }

    fn record_state(&self, subcommand: Subcommand, dir: &Path, exit_code: i64) {
        match subcommand {
            Subcommand::Apply if exit_code == 0 => {
                self.provisioned.write().insert(dir.to_path_buf());
            }
            Subcommand::Destroy if exit_code == 0 => {
                self.provisioned.write().remove(dir);
            }
            _ => {}
        }
    }
}

fn type_name(value: &Value) -> Value {
    match value {
        Value::String(_) => json!("string"),
        Value::Number(_) => json!("number"),
        Value::Bool(_) => json!("bool"),
        Value::Array(_) => json!(["list", "dynamic"]),
        Value::Object(_) => json!(["map", "dynamic"]),
        Value::Null => json!("dynamic"),
    }
}

#[async_trait]
impl EngineRunner for MockEngine {
    async fn execute(
        &self,
        command: &EngineCommand,
        _run_config: &RunConfig,
        cancel: &CancelSignal,
    ) -> RunnerResult<ExecutionResult> {
        if let Some(msg) = self.invocation_failure.read().clone() {
            return Err(RunnerError::Invocation {
                working_dir: command.working_dir.clone(),
                reason: msg,
            });
        }
        if cancel.is_cancelled() {
            return Err(RunnerError::cancelled());
        }

        {
            // Numbered under the lock so `seq` matches the order of `calls`.
            let mut calls = self.calls.write();
            calls.push(CapturedCall {
                seq: self.call_counter.fetch_add(1, Ordering::SeqCst),
                subcommand: command.subcommand,
                working_dir: command.working_dir.clone(),
                args: command.args.clone(),
                variables: command.variables.to_cli_args(),
            });
        }
        self.events
            .write()
            .push(MockEvent::Started(command.subcommand, command.working_dir.clone()));

        let started_at = Utc::now();
        let delay = self.delays.read().get(&command.subcommand).copied();
        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    self.events
                        .write()
                        .push(MockEvent::Finished(command.subcommand, command.working_dir.clone()));
                    return Err(RunnerError::cancelled());
                }
            }
        }

        let response = self.next_response(command.subcommand);
        self.record_state(command.subcommand, &command.working_dir, response.exit_code);
        self.events
            .write()
            .push(MockEvent::Finished(command.subcommand, command.working_dir.clone()));

        let finished_at = Utc::now();
        Ok(ExecutionResult {
            subcommand: command.subcommand,
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        })
    }

    async fn version(&self) -> RunnerResult<String> {
        Ok("Terraform v1.6.0 (mock)".to_string())
    }
}
