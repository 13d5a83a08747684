//! Scenarios: named groups of checks against one stack invocation.
//!
//! Each scenario runs on its own task and fails alone. Apply scenarios
//! that share a working directory queue on its lock; plan-only scenarios
//! run side by side. The report lists scenarios in registration order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{info, info_span, warn, Instrument};

use crate::assertion::{AssertionSink, CheckResult, Predicate};
use crate::error::{HarnessError, HarnessResult};
use crate::invocation::{StackInvocation, StackMode};
use crate::lifecycle::LifecycleOrchestrator;
use crate::report::{Report, ScenarioReport};

/// One expectation: a named output and a predicate over it.
#[derive(Debug, Clone)]
pub struct Check {
    pub output_name: String,
    pub predicate: Predicate,
}

/// A named group of checks against one stack invocation.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub invocation: StackInvocation,
    pub checks: Vec<Check>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, invocation: StackInvocation) -> Self {
        Self {
            name: name.into(),
            invocation,
            checks: Vec::new(),
        }
    }

    /// Add a check. Checks run in the order they are added.
    pub fn check(mut self, output_name: impl Into<String>, predicate: Predicate) -> Self {
        self.checks.push(Check {
            output_name: output_name.into(),
            predicate,
        });
        self
    }

    pub fn mode(&self) -> StackMode {
        self.invocation.mode()
    }
}

/// Runs registered scenarios and aggregates their results.
pub struct ScenarioRunner {
    orchestrator: LifecycleOrchestrator,
    scenarios: Vec<Scenario>,
    max_parallel: usize,
    suite_timeout: Option<Duration>,
}

impl ScenarioRunner {
    pub fn new(orchestrator: LifecycleOrchestrator) -> Self {
        Self {
            orchestrator,
            scenarios: Vec::new(),
            max_parallel: 4,
            suite_timeout: None,
        }
    }

    /// Maximum number of scenarios running at once (at least 1).
    pub fn max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n.max(1);
        self
    }

    /// Cancel the run after `timeout`. Pending teardown still runs.
    pub fn suite_timeout(mut self, timeout: Duration) -> Self {
        self.suite_timeout = Some(timeout);
        self
    }

    pub fn orchestrator(&self) -> &LifecycleOrchestrator {
        &self.orchestrator
    }

    /// Add a scenario. Names must be unique and non-empty.
    pub fn register(&mut self, scenario: Scenario) -> HarnessResult<()> {
        if scenario.name.trim().is_empty() {
            return Err(HarnessError::Suite("scenario name must not be empty".to_string()));
        }
        if self.scenarios.iter().any(|s| s.name == scenario.name) {
            return Err(HarnessError::Suite(format!(
                "duplicate scenario name `{}`",
                scenario.name
            )));
        }
        self.scenarios.push(scenario);
        Ok(())
    }

    /// Register several scenarios, stopping at the first rejected one.
    pub fn register_all(
        &mut self,
        scenarios: impl IntoIterator<Item = Scenario>,
    ) -> HarnessResult<()> {
        for scenario in scenarios {
            self.register(scenario)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Run every registered scenario. The report keeps registration order.
    pub async fn run_all(&self) -> Report {
        let scenarios = self.scenarios.clone();
        let started_at = Utc::now();
        info!("Running {} scenarios", scenarios.len());

        let sink = AssertionSink::new();
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        // The suite timeout only cancels this run. The orchestrator's own
        // signal stays usable for later runs and direct calls.
        let cancel = self.orchestrator.cancel_signal().child();
        let run_orchestrator = self.orchestrator.clone().with_cancel_signal(cancel.clone());

        let timer = self.suite_timeout.map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Suite timeout of {:?} reached, cancelling", timeout);
                cancel.cancel();
            })
        });

        let mut handles = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            let name = scenario.name.clone();
            let mode = scenario.mode();
            let checks = scenario.checks.clone();
            let orchestrator = run_orchestrator.clone();
            let sink = sink.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let span = info_span!("scenario", name = %name, mode = %mode);

            let handle = tokio::spawn(
                async move {
                    let permit = tokio::select! {
                        permit = semaphore.acquire_owned() => permit.ok(),
                        _ = cancel.cancelled() => None,
                    };
                    let Some(_permit) = permit else {
                        return not_started(&sink, &scenario, "cancelled before it started");
                    };
                    run_scenario(&orchestrator, &sink, scenario).await
                }
                .instrument(span),
            );
            handles.push((name, mode, checks, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (name, mode, checks, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(join) => {
                    warn!("Scenario {} task failed: {}", name, join);
                    let mut report = ScenarioReport::new(&name, mode);
                    report.error = Some(format!("scenario task failed: {}", join));
                    record_skipped(&sink, &name, &checks, "scenario task failed");
                    report.checks = sink.results_for(&name);
                    report.finalize()
                }
            };
            reports.push(report);
        }

        if let Some(timer) = timer {
            timer.abort();
        }
        let abandoned = self.orchestrator.wait_for_teardowns().await;
        if abandoned > 0 {
            warn!("Waited for {} background teardowns", abandoned);
        }

        let report = Report {
            scenarios: reports,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            "Scenarios finished: {} of {} passed",
            report.scenarios.iter().filter(|s| s.passed()).count(),
            report.scenarios.len()
        );
        report
    }
}

/// Record every check that has no result yet as failed, so each check
/// produces exactly one result.
fn record_skipped(sink: &AssertionSink, scenario: &str, checks: &[Check], reason: &str) {
    let recorded = sink.results_for(scenario).len();
    for check in checks.iter().skip(recorded) {
        sink.record(CheckResult {
            scenario_name: scenario.to_string(),
            output_name: check.output_name.clone(),
            passed: false,
            detail: format!("{} not evaluated: {}", check.output_name, reason),
        });
    }
}

fn not_started(sink: &AssertionSink, scenario: &Scenario, reason: &str) -> ScenarioReport {
    record_skipped(sink, &scenario.name, &scenario.checks, reason);
    let mut report = ScenarioReport::new(&scenario.name, scenario.mode());
    report.error = Some(format!("scenario {}", reason));
    report.checks = sink.results_for(&scenario.name);
    report.finalize()
}

async fn run_scenario(
    orchestrator: &LifecycleOrchestrator,
    sink: &AssertionSink,
    scenario: Scenario,
) -> ScenarioReport {
    let started = Instant::now();
    info!("Scenario {} started", scenario.name);

    let mut report = match scenario.mode() {
        StackMode::PlanOnly => run_plan_only(orchestrator, sink, &scenario).await,
        StackMode::Apply => run_apply(orchestrator, sink, &scenario).await,
    };

    report.checks = sink.results_for(&scenario.name);
    report.duration_ms = started.elapsed().as_millis() as u64;
    let report = report.finalize();
    info!("Scenario {} {}", scenario.name, report.state);
    report
}

async fn run_plan_only(
    orchestrator: &LifecycleOrchestrator,
    sink: &AssertionSink,
    scenario: &Scenario,
) -> ScenarioReport {
    let report = ScenarioReport::new(&scenario.name, StackMode::PlanOnly);

    match orchestrator.plan_only(&scenario.invocation).await {
        Ok(summary) => {
            let values = summary.as_outputs();
            for check in &scenario.checks {
                let actual = values
                    .get(&check.output_name)
                    .cloned()
                    .ok_or_else(|| HarnessError::OutputNotFound(check.output_name.clone()));
                sink.check(&scenario.name, &check.output_name, actual, &check.predicate);
            }
            report.with_engine_output(&summary.stdout, &summary.stderr)
        }
        Err(e) => {
            record_skipped(sink, &scenario.name, &scenario.checks, "plan failed");
            let mut report = match e.engine_output() {
                Some((stdout, stderr)) => report.with_engine_output(stdout, stderr),
                None => report,
            };
            report.error = Some(e.to_string());
            report
        }
    }
}

async fn run_apply(
    orchestrator: &LifecycleOrchestrator,
    sink: &AssertionSink,
    scenario: &Scenario,
) -> ScenarioReport {
    let name = scenario.name.clone();
    let checks = scenario.checks.clone();
    let body_sink = sink.clone();

    let outcome = orchestrator
        .apply_and_run(&scenario.invocation, move |stack| async move {
            for check in &checks {
                let actual = stack.resolve(&check.output_name).await;
                body_sink.check(&name, &check.output_name, actual, &check.predicate);
            }
            Ok::<(), anyhow::Error>(())
        })
        .await;

    let mut report = ScenarioReport::new(&scenario.name, StackMode::Apply)
        .with_engine_output(&outcome.lifecycle.stdout, &outcome.lifecycle.stderr);

    if let Err(e) = &outcome.result {
        record_skipped(sink, &scenario.name, &scenario.checks, "scenario aborted");
        if let Some((stdout, stderr)) = e
            .downcast_ref::<HarnessError>()
            .and_then(|h| h.engine_output())
        {
            report = report.with_engine_output(stdout, stderr);
        }
        report.error = Some(format!("{:#}", e));
    }

    if let Some(teardown) = &outcome.teardown_error {
        if let Some((stdout, stderr)) = teardown.engine_output() {
            report = report.with_engine_output(stdout, stderr);
        }
        report.teardown_error = Some(teardown.to_string());
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::OutputValue;
    use crate::report::ScenarioState;
    use serde_json::json;
    use stackcheck_runner::{MockEngine, MockResponse, Subcommand};

    fn runner(engine: &MockEngine) -> ScenarioRunner {
        ScenarioRunner::new(LifecycleOrchestrator::new(Arc::new(engine.clone())))
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let engine = MockEngine::new();
        let inv = StackInvocation::builder("/stacks/a").plan_only().build();
        let mut runner = runner(&engine);

        runner.register(Scenario::new("same", inv.clone())).unwrap();
        let err = runner.register(Scenario::new("same", inv)).unwrap_err();

        assert!(matches!(err, HarnessError::Suite(_)));
        assert_eq!(runner.len(), 1);
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test]
    async fn test_plan_only_checks_use_plan_summary() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new().respond(
            Subcommand::Plan,
            MockResponse {
                exit_code: 2,
                stdout: "Plan: 4 to add, 0 to change, 0 to destroy.".to_string(),
                stderr: String::new(),
            },
        );
        let inv = StackInvocation::builder(dir.path()).plan_only().build();
        let scenario = Scenario::new("iam-networking", inv)
            .check("to_add", Predicate::number_at_least(1.0))
            .check("to_destroy", Predicate::equals(OutputValue::Number(0.0)));

        let mut runner = runner(&engine);
        runner.register(scenario).unwrap();
        let report = runner.run_all().await;

        assert!(report.passed(), "{}", report);
        assert_eq!(report.scenarios[0].checks.len(), 2);
        assert_eq!(engine.count(Subcommand::Apply), 0);
    }

    #[tokio::test]
    async fn test_setup_failure_records_every_check() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new()
            .respond(Subcommand::Apply, MockResponse::failure(1, "Error: quota exceeded"));
        let inv = StackInvocation::builder(dir.path()).build();
        let scenario = Scenario::new("landing-zone", inv)
            .check("vpc_network", Predicate::not_empty())
            .check("project_ids", Predicate::not_empty());

        let mut runner = runner(&engine);
        runner.register(scenario).unwrap();
        let report = runner.run_all().await;
        let scenario = &report.scenarios[0];

        assert_eq!(scenario.state, ScenarioState::Failed);
        assert_eq!(scenario.checks.len(), 2);
        assert!(scenario.checks.iter().all(|c| !c.passed));
        assert!(scenario.stderr_excerpt.contains("quota exceeded"));
        assert_eq!(engine.count(Subcommand::Destroy), 1);
    }

    #[tokio::test]
    async fn test_teardown_failure_state() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new()
            .with_output("vpc_network", json!("vpc-1"))
            .respond(Subcommand::Destroy, MockResponse::failure(1, "Error: network in use"));
        let inv = StackInvocation::builder(dir.path()).build();
        let scenario = Scenario::new("net", inv).check("vpc_network", Predicate::not_empty());

        let mut runner = runner(&engine);
        runner.register(scenario).unwrap();
        let report = runner.run_all().await;
        let scenario = &report.scenarios[0];

        assert_eq!(scenario.state, ScenarioState::TeardownFailed);
        assert!(scenario.checks[0].passed);
        assert!(scenario.stderr_excerpt.contains("network in use"));
    }
}
