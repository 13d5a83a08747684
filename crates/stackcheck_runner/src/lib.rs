//! # stackcheck_runner
//!
//! IaC engine invocation for stackcheck.
//!
//! This crate runs a Terraform-compatible engine as a subprocess and
//! captures what it reports. Everything above it talks to the
//! [`EngineRunner`] trait, so tests can swap in the [`MockEngine`].
//!
//! # Features
//!
//! - **Process runner**: spawns the engine with timeouts and cancellation
//! - **Variable sets**: validated input variables, passed as flags or a file
//! - **Dry-run mode**: log commands without executing them
//! - **Mock engine**: scripted responses and captured calls for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use stackcheck_runner::{
//!     CancelSignal, EngineCommand, EngineConfig, EngineRunner, ProcessRunner, RunConfig,
//!     Subcommand, VariableSet,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = ProcessRunner::new(EngineConfig::default());
//!     let vars = VariableSet::new().set("environment", "test")?;
//!
//!     let command = EngineCommand::new("./infrastructure", Subcommand::Plan).variables(vars);
//!     let result = runner
//!         .run(&command, &RunConfig::default(), &CancelSignal::never())
//!         .await?;
//!     println!("Exit code: {}", result.exit_code);
//!
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod mock;
pub mod process;
pub mod runner;
pub mod variables;

pub use cancel::CancelSignal;
pub use config::{EngineConfig, RunConfig, VarPassing};
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockEngine, MockEvent, MockResponse};
pub use process::{LogHandler, LogLine, LogStream, ProcessRunner};
pub use runner::{EngineCommand, EngineRunner, ExecutionResult, Subcommand};
pub use variables::VariableSet;
