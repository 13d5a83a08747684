//! # stackcheck_harness
//!
//! Lifecycle testing for infrastructure-as-code stacks.
//!
//! A stack is provisioned with a real (or mock) engine, its outputs are
//! checked, and it is destroyed again, whatever happened in between.
//!
//! ## Features
//!
//! - Scoped `init → apply → body → destroy` with guaranteed teardown
//! - Plan-only validation that never mutates infrastructure
//! - Per-directory locking so concurrent applies never interleave
//! - Loosely typed outputs with explicit coercions
//! - Scenario runner with isolated failures and an ordered report
//! - YAML suites and configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use stackcheck_harness::{
//!     LifecycleOrchestrator, Predicate, Scenario, ScenarioRunner, StackInvocation,
//! };
//! use stackcheck_runner::{EngineConfig, ProcessRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     stackcheck_harness::telemetry::init_test_logging();
//!
//!     let engine = ProcessRunner::new(EngineConfig::default());
//!     let orchestrator = LifecycleOrchestrator::new(Arc::new(engine));
//!
//!     let invocation = StackInvocation::builder("./infra/landing-zone")
//!         .var("project_id", "test-project-123")?
//!         .var("environment", "test")?
//!         .build();
//!
//!     let mut runner = ScenarioRunner::new(orchestrator);
//!     runner.register(
//!         Scenario::new("landing-zone", invocation)
//!             .check("vpc_network", Predicate::not_empty())
//!             .check("project_ids", Predicate::contains("test-project-123")),
//!     )?;
//!
//!     let report = runner.run_all().await;
//!     println!("{}", report);
//!     assert!(report.passed());
//!     Ok(())
//! }
//! ```

pub mod assertion;
pub mod config;
pub mod error;
pub mod invocation;
pub mod lifecycle;
pub mod locks;
pub mod outputs;
pub mod plan;
pub mod report;
pub mod scenario;
pub mod suite;
pub mod telemetry;

pub use assertion::{AssertionSink, CheckResult, Predicate};
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use invocation::{StackInvocation, StackInvocationBuilder, StackMode};
pub use lifecycle::{
    AppliedStack, LifecycleOrchestrator, LifecycleOutcome, LifecycleResult, LifecycleState,
    TeardownGuard,
};
pub use locks::{LockTable, WorkdirGuard};
pub use outputs::{parse_outputs, CoercionError, OutputResolver, OutputValue};
pub use plan::PlanSummary;
pub use report::{Report, ScenarioReport, ScenarioState};
pub use scenario::{Check, Scenario, ScenarioRunner};
pub use suite::Suite;
