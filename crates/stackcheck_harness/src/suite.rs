//! Declarative scenario suites.
//!
//! A suite is a YAML file listing scenarios:
//!
//! ```yaml
//! scenarios:
//!   - name: landing-zone
//!     dir: ../infra/landing-zone
//!     vars:
//!       project_id: test-project-123
//!       environment: test
//!     checks:
//!       - output: vpc_network
//!         expect: not_empty
//!       - output: project_ids
//!         expect: contains
//!         value: test-project-123
//!   - name: iam-networking
//!     dir: ../infra/modules/iam
//!     mode: plan_only
//!     checks:
//!       - output: to_destroy
//!         expect: equals
//!         value: 0
//! ```
//!
//! Directories are relative to the suite file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assertion::Predicate;
use crate::error::{HarnessError, HarnessResult};
use crate::invocation::{StackInvocation, StackMode};
use crate::outputs::OutputValue;
use crate::scenario::{Scenario, ScenarioRunner};

/// Predicate names usable in a suite file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    NotEmpty,
    Equals,
    Contains,
    Matches,
    AtLeast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSpec {
    pub output: String,
    pub expect: CheckKind,
    #[serde(default)]
    pub value: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub name: String,
    pub dir: PathBuf,
    #[serde(default)]
    pub mode: StackMode,
    #[serde(default)]
    pub vars: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub checks: Vec<CheckSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteFile {
    #[serde(default)]
    pub scenarios: Vec<ScenarioSpec>,
}

/// Scenarios loaded from a suite file.
#[derive(Debug, Clone)]
pub struct Suite {
    pub scenarios: Vec<Scenario>,
}

impl Suite {
    pub fn load(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let suite = Self::parse(&content, base_dir)?;
        info!("Loaded {} scenarios from {:?}", suite.scenarios.len(), path);
        Ok(suite)
    }

    /// Parse suite YAML, resolving scenario directories against `base_dir`.
    pub fn parse(content: &str, base_dir: &Path) -> HarnessResult<Self> {
        let file: SuiteFile = serde_yaml::from_str(content)?;
        let scenarios = file
            .scenarios
            .into_iter()
            .map(|spec| spec.into_scenario(base_dir))
            .collect::<HarnessResult<Vec<_>>>()?;
        Ok(Self { scenarios })
    }

    /// Register every scenario with `runner`.
    pub fn register_into(self, runner: &mut ScenarioRunner) -> HarnessResult<()> {
        runner.register_all(self.scenarios)
    }
}

impl ScenarioSpec {
    fn into_scenario(self, base_dir: &Path) -> HarnessResult<Scenario> {
        let dir = if self.dir.is_absolute() {
            self.dir
        } else {
            base_dir.join(&self.dir)
        };

        let mut builder = StackInvocation::builder(dir).mode(self.mode);
        for (key, value) in self.vars {
            builder = builder.var(key.as_str(), value).map_err(|e| {
                HarnessError::Suite(format!("scenario `{}`, variable `{}`: {}", self.name, key, e))
            })?;
        }

        let mut scenario = Scenario::new(self.name.as_str(), builder.build());
        for check in self.checks {
            let predicate = check.predicate().map_err(|reason| {
                HarnessError::Suite(format!(
                    "scenario `{}`, check on `{}`: {}",
                    self.name, check.output, reason
                ))
            })?;
            scenario = scenario.check(check.output, predicate);
        }
        Ok(scenario)
    }
}

impl CheckSpec {
    fn predicate(&self) -> Result<Predicate, String> {
        let value = match &self.value {
            Some(v) => Some(OutputValue::from(
                serde_json::to_value(v).map_err(|e| e.to_string())?,
            )),
            None => None,
        };

        match (self.expect, value) {
            (CheckKind::NotEmpty, _) => Ok(Predicate::not_empty()),
            (CheckKind::Equals, Some(v)) => Ok(Predicate::equals(v)),
            (CheckKind::Contains, Some(OutputValue::String(s))) => Ok(Predicate::contains(s)),
            (CheckKind::Matches, Some(OutputValue::String(s))) => Ok(Predicate::matches(s)),
            (CheckKind::AtLeast, Some(OutputValue::Number(n))) => Ok(Predicate::number_at_least(n)),
            (CheckKind::Equals, None) => Err("`equals` needs a value".to_string()),
            (CheckKind::Contains | CheckKind::Matches, _) => {
                Err("expected a string value".to_string())
            }
            (CheckKind::AtLeast, _) => Err("expected a numeric value".to_string()),
        }
    }
}
