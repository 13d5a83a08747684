//! Lifecycle orchestration: init, apply, verify, destroy.
//!
//! `apply_and_run` is a scoped acquisition. Once apply has been attempted a
//! [`TeardownGuard`] is armed, and the caller's body only ever sees the stack
//! through an [`AppliedStack`] handle. Destroy runs after the body on every
//! exit path: success, error, panic and cancellation.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stackcheck_runner::{
    CancelSignal, EngineCommand, EngineRunner, RunConfig, RunnerError, Subcommand,
};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::{HarnessError, HarnessResult};
use crate::invocation::StackInvocation;
use crate::locks::{LockTable, WorkdirGuard};
use crate::outputs::{OutputResolver, OutputValue};
use crate::plan::PlanSummary;

/// Lifecycle state of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Init,
    Planned,
    Applied,
    /// Teardown succeeded (or nothing needed tearing down).
    Destroyed,
    /// Teardown itself failed. Resources may have leaked.
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Planned => "planned",
            Self::Applied => "applied",
            Self::Destroyed => "destroyed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What the apply step produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleResult {
    pub applied: bool,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// Populated only when `applied` is true.
    pub outputs: BTreeMap<String, OutputValue>,
}

/// Everything `apply_and_run` observed.
///
/// The body's result and the teardown error are kept side by side: a
/// failed destroy never hides a failed assertion, and vice versa.
#[derive(Debug)]
pub struct LifecycleOutcome<T> {
    pub result: anyhow::Result<T>,
    pub lifecycle: LifecycleResult,
    pub state: LifecycleState,
    pub teardown_error: Option<HarnessError>,
}

impl<T> LifecycleOutcome<T> {
    pub fn teardown_failed(&self) -> bool {
        self.teardown_error.is_some()
    }

    /// Collapse into a single result. A teardown failure wins, with the
    /// body's error attached as context.
    pub fn into_result(self) -> anyhow::Result<T> {
        match (self.result, self.teardown_error) {
            (result, None) => result,
            (Ok(_), Some(teardown)) => Err(teardown.into()),
            (Err(body), Some(teardown)) => {
                Err(anyhow::Error::from(teardown).context(format!("body failed first: {:#}", body)))
            }
        }
    }
}

/// Handle given to the body of `apply_and_run` while the stack is applied.
#[derive(Clone)]
pub struct AppliedStack {
    invocation: StackInvocation,
    resolver: OutputResolver,
    outputs: BTreeMap<String, OutputValue>,
    cancel: CancelSignal,
}

impl AppliedStack {
    pub fn invocation(&self) -> &StackInvocation {
        &self.invocation
    }

    /// Outputs read right after apply.
    pub fn outputs(&self) -> &BTreeMap<String, OutputValue> {
        &self.outputs
    }

    /// Query one output from the engine.
    pub async fn resolve(&self, name: &str) -> HarnessResult<OutputValue> {
        self.resolver
            .resolve(&self.invocation, name, &self.cancel)
            .await
    }

    /// Query one output that must be a string.
    pub async fn resolve_str(&self, name: &str) -> HarnessResult<String> {
        Ok(self.resolve(name).await?.as_str()?.to_string())
    }

    /// Query one output that must be a number.
    pub async fn resolve_f64(&self, name: &str) -> HarnessResult<f64> {
        Ok(self.resolve(name).await?.as_f64()?)
    }
}

/// Destroys spawned by guards whose owning future was dropped.
///
/// A detached task dies with its runtime, so these must be awaited with
/// [`LifecycleOrchestrator::wait_for_teardowns`] before the runtime ends.
#[derive(Clone, Default)]
struct AbandonedTeardowns {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AbandonedTeardowns {
    fn push(&self, handle: JoinHandle<()>) {
        self.handles.lock().push(handle);
    }

    async fn wait(&self) -> usize {
        let mut waited = 0;
        loop {
            let handles = std::mem::take(&mut *self.handles.lock());
            if handles.is_empty() {
                return waited;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("Background teardown task failed: {}", e);
                }
                waited += 1;
            }
        }
    }
}

/// Destroy that has been registered but not yet run.
///
/// Holds the working-directory lock until destroy finishes. If dropped
/// while still armed (the owning future was dropped), destroy is spawned
/// onto the current runtime and tracked by the orchestrator.
pub struct TeardownGuard {
    pending: Option<PendingTeardown>,
    abandoned: AbandonedTeardowns,
}

struct PendingTeardown {
    runner: Arc<dyn EngineRunner>,
    command: EngineCommand,
    run_config: RunConfig,
    lock: Option<WorkdirGuard>,
}

impl TeardownGuard {
    fn arm(
        runner: Arc<dyn EngineRunner>,
        command: EngineCommand,
        run_config: RunConfig,
        lock: Option<WorkdirGuard>,
        abandoned: AbandonedTeardowns,
    ) -> Self {
        info!("Teardown registered for {:?}", command.working_dir);
        Self {
            pending: Some(PendingTeardown {
                runner,
                command,
                run_config,
                lock,
            }),
            abandoned,
        }
    }

    /// Nothing was created; give the lock back without destroying.
    fn disarm(mut self) -> Option<WorkdirGuard> {
        self.pending.take().and_then(|p| p.lock)
    }

    /// Run destroy to completion. The work runs on its own task so it
    /// finishes even if the caller stops waiting.
    pub async fn run(mut self) -> HarnessResult<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let dir = pending.command.working_dir.clone();
        match tokio::spawn(pending.destroy()).await {
            Ok(result) => result,
            Err(join) => Err(HarnessError::Teardown {
                working_dir: dir,
                reason: format!("teardown task failed: {}", join),
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }
}

impl PendingTeardown {
    async fn destroy(self) -> HarnessResult<()> {
        let dir = self.command.working_dir.clone();
        info!("Destroying stack in {:?}", dir);
        let outcome = self
            .runner
            .run(&self.command, &self.run_config, &CancelSignal::never())
            .await;
        drop(self.lock);

        match outcome {
            Ok(_) => {
                info!("Stack in {:?} destroyed", dir);
                Ok(())
            }
            Err(RunnerError::Execution {
                exit_code,
                stdout,
                stderr,
                ..
            }) => {
                error!(
                    "Destroy failed in {:?} with exit code {}; resources may have leaked",
                    dir, exit_code
                );
                Err(HarnessError::Teardown {
                    working_dir: dir,
                    reason: format!("destroy exited with code {}", exit_code),
                    stdout,
                    stderr,
                })
            }
            Err(e) => {
                error!("Destroy could not run in {:?}: {}; resources may have leaked", dir, e);
                let (stdout, stderr) = e.engine_output().unwrap_or_default();
                Err(HarnessError::Teardown {
                    working_dir: dir,
                    reason: e.to_string(),
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                })
            }
        }
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        error!(
            "Teardown for {:?} abandoned by its caller, destroying in the background",
            pending.command.working_dir
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.abandoned.push(handle.spawn(async move {
                    let _ = pending.destroy().await;
                }));
            }
            Err(_) => error!(
                "No runtime available; stack in {:?} was NOT destroyed",
                pending.command.working_dir
            ),
        }
    }
}

/// Drives the engine through the stack lifecycle.
#[derive(Clone)]
pub struct LifecycleOrchestrator {
    runner: Arc<dyn EngineRunner>,
    locks: Arc<LockTable>,
    run_config: RunConfig,
    teardown_config: RunConfig,
    cancel: CancelSignal,
    abandoned: AbandonedTeardowns,
}

impl LifecycleOrchestrator {
    /// Orchestrator using the process-wide lock table, so every orchestrator
    /// built this way serializes on the same working directories.
    pub fn new(runner: Arc<dyn EngineRunner>) -> Self {
        Self {
            runner,
            locks: LockTable::shared(),
            run_config: RunConfig::default(),
            teardown_config: RunConfig::default(),
            cancel: CancelSignal::new(),
            abandoned: AbandonedTeardowns::default(),
        }
    }

    /// Use a separate lock table instead of the process-wide one.
    pub fn with_locks(mut self, locks: Arc<LockTable>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_run_config(mut self, run_config: RunConfig) -> Self {
        self.run_config = run_config;
        self
    }

    /// Run configuration for destroy. Destroy ignores the cancel signal.
    pub fn with_teardown_config(mut self, run_config: RunConfig) -> Self {
        self.teardown_config = run_config;
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    pub fn runner(&self) -> &Arc<dyn EngineRunner> {
        &self.runner
    }

    /// Wait for destroys started by dropped `apply_and_run` futures, and
    /// return how many there were. Prefer cancelling through the
    /// [`CancelSignal`] to dropping the future; when a future is dropped,
    /// call this before the runtime shuts down.
    pub async fn wait_for_teardowns(&self) -> usize {
        self.abandoned.wait().await
    }

    /// Run engine `init`. Nothing is created, so nothing needs cleanup.
    pub async fn init(&self, invocation: &StackInvocation) -> HarnessResult<()> {
        let command = invocation.command(Subcommand::Init);
        let result = self
            .runner
            .execute(&command, &self.run_config, &self.cancel)
            .await?;
        if !result.success() {
            return Err(HarnessError::Init {
                working_dir: invocation.working_dir().to_path_buf(),
                exit_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
        Ok(())
    }

    /// Run init then plan. Never applies or destroys, and takes no lock.
    pub async fn plan_only(&self, invocation: &StackInvocation) -> HarnessResult<PlanSummary> {
        let span = info_span!("plan_only", run_id = %invocation.id());
        async {
            info!("Planning {:?} ({})", invocation.working_dir(), LifecycleState::Init);
            self.init(invocation).await?;

            let command = invocation.command(Subcommand::Plan);
            let result = self
                .runner
                .execute(&command, &self.run_config, &self.cancel)
                .await?;
            if !result.success() {
                return Err(HarnessError::Plan {
                    working_dir: invocation.working_dir().to_path_buf(),
                    exit_code: result.exit_code,
                    stdout: result.stdout,
                    stderr: result.stderr,
                });
            }

            let summary = PlanSummary::from_execution(&result);
            info!(
                "{:?} {}: {} to add, {} to change, {} to destroy",
                invocation.working_dir(),
                LifecycleState::Planned,
                summary.to_add,
                summary.to_change,
                summary.to_destroy
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Init and apply the stack, run `body` against it, then destroy it.
    ///
    /// Destroy runs whenever apply was attempted, including after a failed
    /// apply, since a partial apply may have created resources.
    pub async fn apply_and_run<T, F, Fut>(
        &self,
        invocation: &StackInvocation,
        body: F,
    ) -> LifecycleOutcome<T>
    where
        F: FnOnce(AppliedStack) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Send,
    {
        let span = info_span!(
            "apply_and_run",
            run_id = %invocation.id(),
            dir = ?invocation.working_dir()
        );
        self.apply_and_run_inner(invocation, body)
            .instrument(span)
            .await
    }

    async fn apply_and_run_inner<T, F, Fut>(
        &self,
        invocation: &StackInvocation,
        body: F,
    ) -> LifecycleOutcome<T>
    where
        F: FnOnce(AppliedStack) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Send,
    {
        let mut lifecycle = LifecycleResult::default();
        let early = |state, err: HarnessError, lifecycle| LifecycleOutcome {
            result: Err(err.into()),
            lifecycle,
            state,
            teardown_error: None,
        };

        let lock = tokio::select! {
            lock = self.locks.acquire(invocation.working_dir()) => lock,
            _ = self.cancel.cancelled() => {
                return early(LifecycleState::Init, RunnerError::cancelled().into(), lifecycle);
            }
        };

        info!("State {}", LifecycleState::Init);
        if let Err(e) = self.init(invocation).await {
            return early(LifecycleState::Init, e, lifecycle);
        }

        let guard = TeardownGuard::arm(
            self.runner.clone(),
            invocation.command(Subcommand::Destroy),
            self.teardown_config.clone(),
            Some(lock),
            self.abandoned.clone(),
        );

        let apply = self
            .runner
            .execute(
                &invocation.command(Subcommand::Apply),
                &self.run_config,
                &self.cancel,
            )
            .await;

        let result = match apply {
            // The engine never started, so nothing can exist.
            Err(e @ RunnerError::Invocation { .. }) => {
                drop(guard.disarm());
                return early(LifecycleState::Init, e.into(), lifecycle);
            }
            Err(e) => Err(HarnessError::from(e).into()),
            Ok(apply) => {
                lifecycle.exit_code = apply.exit_code;
                lifecycle.stdout = apply.stdout;
                lifecycle.stderr = apply.stderr;

                if lifecycle.exit_code != 0 {
                    warn!("Apply failed, tearing down any partially created resources");
                    Err(HarnessError::Apply {
                        working_dir: invocation.working_dir().to_path_buf(),
                        exit_code: lifecycle.exit_code,
                        stdout: lifecycle.stdout.clone(),
                        stderr: lifecycle.stderr.clone(),
                    }
                    .into())
                } else {
                    lifecycle.applied = true;
                    info!("State {}", LifecycleState::Applied);
                    self.run_body(invocation, &mut lifecycle, body).await
                }
            }
        };

        let teardown_error = guard.run().await.err();
        let state = if teardown_error.is_some() {
            LifecycleState::Failed
        } else {
            LifecycleState::Destroyed
        };
        info!("State {}", state);

        LifecycleOutcome {
            result,
            lifecycle,
            state,
            teardown_error,
        }
    }

    async fn run_body<T, F, Fut>(
        &self,
        invocation: &StackInvocation,
        lifecycle: &mut LifecycleResult,
        body: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce(AppliedStack) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Send,
    {
        let resolver = OutputResolver::new(self.runner.clone(), self.run_config.clone());
        lifecycle.outputs = resolver.resolve_all(invocation, &self.cancel).await?;

        let stack = AppliedStack {
            invocation: invocation.clone(),
            resolver,
            outputs: lifecycle.outputs.clone(),
            cancel: self.cancel.clone(),
        };

        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| body(stack))) {
            Ok(future) => future,
            Err(panic) => return Err(anyhow!("body panicked: {}", panic_message(&*panic))),
        };

        tokio::select! {
            outcome = AssertUnwindSafe(future).catch_unwind() => match outcome {
                Ok(result) => result,
                Err(panic) => Err(anyhow!("body panicked: {}", panic_message(&*panic))),
            },
            _ = self.cancel.cancelled() => {
                warn!("Body cancelled, proceeding to teardown");
                Err(HarnessError::from(RunnerError::cancelled()).into())
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
