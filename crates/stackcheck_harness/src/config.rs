//! Harness configuration.
//!
//! Loaded from YAML, then overridden from `STACKCHECK_*` environment
//! variables. Engine credentials never live here; the engine reads them
//! from the process environment.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stackcheck_runner::{EngineConfig, ProcessRunner, RunConfig, VarPassing};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::lifecycle::LifecycleOrchestrator;
use crate::scenario::ScenarioRunner;

/// Top-level harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Engine binary, `terraform` or `tofu`
    pub engine: String,
    /// Timeout for init, plan, apply and output
    pub command_timeout_secs: u64,
    /// Timeout for destroy
    pub teardown_timeout_secs: u64,
    /// Whole-run timeout (0 = none)
    pub suite_timeout_secs: u64,
    pub max_parallel: usize,
    pub stream_logs: bool,
    pub var_passing: VarPassing,
    /// Extra environment for the engine process
    pub env: HashMap<String, String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::TERRAFORM.to_string(),
            command_timeout_secs: 1800,
            teardown_timeout_secs: 1800,
            suite_timeout_secs: 0,
            max_parallel: 4,
            stream_logs: false,
            var_passing: VarPassing::Flags,
            env: HashMap::new(),
        }
    }
}

impl HarnessConfig {
    pub const ENV_ENGINE: &'static str = "STACKCHECK_ENGINE";
    pub const ENV_MAX_PARALLEL: &'static str = "STACKCHECK_MAX_PARALLEL";
    pub const ENV_SUITE_TIMEOUT: &'static str = "STACKCHECK_SUITE_TIMEOUT";

    /// Load from a YAML file and validate.
    pub fn load(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml(&content)?;
        debug!("Loaded harness config from {:?}", path.as_ref());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> HarnessResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> HarnessResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `STACKCHECK_*` overrides on top of this config.
    pub fn with_env_overrides(self) -> HarnessResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> HarnessResult<Self> {
        if let Some(engine) = lookup(Self::ENV_ENGINE) {
            self.engine = engine;
        }

        if let Some(value) = lookup(Self::ENV_MAX_PARALLEL) {
            self.max_parallel = value.trim().parse().map_err(|_| {
                HarnessError::Config(format!(
                    "{} must be a positive integer, got `{}`",
                    Self::ENV_MAX_PARALLEL,
                    value
                ))
            })?;
        }

        if let Some(value) = lookup(Self::ENV_SUITE_TIMEOUT) {
            self.suite_timeout_secs = value.trim().parse().map_err(|_| {
                HarnessError::Config(format!(
                    "{} must be a number of seconds, got `{}`",
                    Self::ENV_SUITE_TIMEOUT,
                    value
                ))
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.engine.trim().is_empty() {
            return Err(HarnessError::Config("engine must not be empty".to_string()));
        }
        if self.max_parallel == 0 {
            return Err(HarnessError::Config(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if self.teardown_timeout_secs == 0 {
            return Err(HarnessError::Config(
                "teardown_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if let Some(key) = self.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(HarnessError::Config(format!(
                "invalid environment variable name `{}`",
                key
            )));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(&self.engine).var_passing(self.var_passing);
        for (key, value) in &self.env {
            config = config.env(key, value);
        }
        config
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig::default()
            .timeout(self.command_timeout_secs)
            .stream_logs(self.stream_logs)
    }

    pub fn teardown_config(&self) -> RunConfig {
        RunConfig::default()
            .timeout(self.teardown_timeout_secs)
            .stream_logs(self.stream_logs)
    }

    pub fn suite_timeout(&self) -> Option<Duration> {
        (self.suite_timeout_secs > 0).then(|| Duration::from_secs(self.suite_timeout_secs))
    }

    /// Orchestrator driving the configured engine binary.
    pub fn orchestrator(&self) -> LifecycleOrchestrator {
        let runner = ProcessRunner::new(self.engine_config());
        LifecycleOrchestrator::new(Arc::new(runner))
            .with_run_config(self.run_config())
            .with_teardown_config(self.teardown_config())
    }

    /// Scenario runner using `orchestrator` with this config's limits.
    pub fn scenario_runner(&self, orchestrator: LifecycleOrchestrator) -> ScenarioRunner {
        let runner = ScenarioRunner::new(orchestrator).max_parallel(self.max_parallel);
        match self.suite_timeout() {
            Some(timeout) => runner.suite_timeout(timeout),
            None => runner,
        }
    }
}
