//! Integration tests for the engine invocation layer.
//!
//! These tests drive the runner through the `EngineRunner` trait object,
//! the way the harness does, using the mock engine.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use stackcheck_runner::{
    CancelSignal, EngineCommand, EngineRunner, MockEngine, MockEvent, MockResponse, RunConfig,
    RunnerError, Subcommand, VariableSet,
};

fn landing_zone_vars() -> VariableSet {
    VariableSet::new()
        .set("project_id", "test-project-123")
        .unwrap()
        .set("organization_id", "123456789012")
        .unwrap()
        .set("billing_account", "ABCDEF-123456-GHIJKL")
        .unwrap()
        .set("environment", "test")
        .unwrap()
}

/// Variables reach the engine as sorted `-var` arguments.
#[tokio::test]
async fn test_variables_are_passed_to_apply() {
    let engine = MockEngine::new();
    let runner: Arc<dyn EngineRunner> = Arc::new(engine.clone());

    let command = EngineCommand::new("/stacks/landing-zone", Subcommand::Apply)
        .variables(landing_zone_vars());
    runner
        .run(&command, &RunConfig::default(), &CancelSignal::never())
        .await
        .unwrap();

    let calls = engine.get_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].variables,
        vec![
            "-var",
            "billing_account=ABCDEF-123456-GHIJKL",
            "-var",
            "environment=test",
            "-var",
            "organization_id=123456789012",
            "-var",
            "project_id=test-project-123",
        ]
    );
}

/// `run` turns a non-zero exit into an execution error carrying stderr.
#[tokio::test]
async fn test_run_surfaces_execution_error() {
    let engine = MockEngine::new().respond(
        Subcommand::Init,
        MockResponse::failure(1, "Error: Failed to query available provider packages"),
    );

    let command = EngineCommand::new("/stacks/broken", Subcommand::Init);
    let err = engine
        .run(&command, &RunConfig::default(), &CancelSignal::never())
        .await
        .unwrap_err();

    match err {
        RunnerError::Execution {
            subcommand,
            exit_code,
            stderr,
            ..
        } => {
            assert_eq!(subcommand, "init");
            assert_eq!(exit_code, 1);
            assert!(stderr.contains("provider packages"));
        }
        other => panic!("Expected execution error, got {other}"),
    }
}

/// A plan with pending changes (exit 2) is not an error.
#[tokio::test]
async fn test_plan_with_changes_is_success() {
    let engine = MockEngine::new().respond(
        Subcommand::Plan,
        MockResponse {
            exit_code: 2,
            stdout: "Plan: 3 to add, 0 to change, 0 to destroy.".to_string(),
            stderr: String::new(),
        },
    );

    let command = EngineCommand::new("/stacks/net", Subcommand::Plan);
    let result = engine
        .run(&command, &RunConfig::default(), &CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(result.exit_code, 2);
    assert!(result.success());
}

/// Events keep start/finish order per directory.
#[tokio::test]
async fn test_events_record_order() {
    let engine = MockEngine::new().with_output("vpc_network", json!("vpc-1"));
    let never = CancelSignal::never();
    let dir = Path::new("/stacks/a");

    for sub in [Subcommand::Init, Subcommand::Apply, Subcommand::Output, Subcommand::Destroy] {
        engine
            .run(&EngineCommand::new(dir, sub), &RunConfig::default(), &never)
            .await
            .unwrap();
    }

    let events = engine.events();
    assert_eq!(events.len(), 8);
    assert_eq!(events[0], MockEvent::Started(Subcommand::Init, dir.to_path_buf()));
    assert_eq!(events[7], MockEvent::Finished(Subcommand::Destroy, dir.to_path_buf()));
    assert!(!engine.is_provisioned(dir));
    assert_eq!(engine.calls_for(dir).len(), 4);
}

/// A cancelled signal stops commands before they reach the engine.
#[tokio::test]
async fn test_cancelled_signal_short_circuits() {
    let engine = MockEngine::new();
    let cancel = CancelSignal::new();
    cancel.cancel();

    let err = engine
        .execute(
            &EngineCommand::new("/stacks/a", Subcommand::Apply),
            &RunConfig::default(),
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(engine.count(Subcommand::Apply), 0);
}
