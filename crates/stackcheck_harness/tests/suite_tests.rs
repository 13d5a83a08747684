use std::sync::Arc;

use serde_json::json;
use stackcheck_harness::{
    HarnessConfig, LifecycleOrchestrator, ScenarioRunner, ScenarioState, StackMode, Suite,
};
use stackcheck_runner::{MockEngine, Subcommand};

const SUITE: &str = r#"
scenarios:
  - name: landing-zone
    dir: stacks/landing-zone
    vars:
      project_id: test-project-123
      environment: test
      labels:
        team: platform
    checks:
      - output: vpc_network
        expect: matches
        value: "^projects/test-project-123/"
      - output: subnet_count
        expect: at_least
        value: 2
  - name: security-compliance
    dir: stacks/security
    mode: plan_only
    checks:
      - output: changes_present
        expect: equals
        value: false
"#;

#[tokio::test]
async fn test_suite_file_runs_against_mock() {
    let root = tempfile::tempdir().unwrap();
    let path = root.path().join("suite.yaml");
    std::fs::write(&path, SUITE).unwrap();

    let suite = Suite::load(&path).unwrap();
    assert_eq!(suite.scenarios[1].mode(), StackMode::PlanOnly);
    assert_eq!(
        suite.scenarios[0].invocation.working_dir(),
        root.path().join("stacks/landing-zone")
    );

    let engine = MockEngine::new()
        .with_output("vpc_network", json!("projects/test-project-123/global/networks/main"))
        .with_output("subnet_count", json!(3));
    let config = HarnessConfig::from_yaml("max_parallel: 2").unwrap();
    let mut runner: ScenarioRunner =
        config.scenario_runner(LifecycleOrchestrator::new(Arc::new(engine.clone())));
    suite.register_into(&mut runner).unwrap();

    let report = runner.run_all().await;

    assert!(report.passed(), "{}", report);
    assert_eq!(report.count(ScenarioState::Passed), 2);
    assert_eq!(engine.count(Subcommand::Destroy), 1);

    let json = report.to_json().unwrap();
    assert!(json.contains("security-compliance"));
}

#[test]
fn test_duplicate_suite_names_rejected() {
    let yaml = "scenarios:\n  - name: a\n    dir: x\n  - name: a\n    dir: y\n";
    let suite = Suite::parse(yaml, std::path::Path::new(".")).unwrap();
    let engine = MockEngine::new();
    let mut runner = ScenarioRunner::new(LifecycleOrchestrator::new(Arc::new(engine)));

    assert!(suite.register_into(&mut runner).is_err());
    assert_eq!(runner.len(), 1);
}
