//! Stack invocations: what to run, where, and with which inputs.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stackcheck_runner::{EngineCommand, Subcommand, VariableSet};
use uuid::Uuid;

use crate::error::HarnessResult;

/// Validation mode of an invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackMode {
    /// Provision, verify, then destroy.
    #[default]
    Apply,
    /// Compute a plan only. Never mutates infrastructure.
    PlanOnly,
}

impl fmt::Display for StackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::PlanOnly => write!(f, "plan-only"),
        }
    }
}

/// One instantiation of a stack. Immutable once built.
#[derive(Debug, Clone)]
pub struct StackInvocation {
    id: Uuid,
    working_dir: PathBuf,
    variables: VariableSet,
    mode: StackMode,
}

impl StackInvocation {
    pub fn builder(working_dir: impl Into<PathBuf>) -> StackInvocationBuilder {
        StackInvocationBuilder {
            working_dir: working_dir.into(),
            variables: VariableSet::new(),
            mode: StackMode::Apply,
        }
    }

    /// Run id, used to correlate log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    pub fn mode(&self) -> StackMode {
        self.mode
    }

    /// Engine command for `subcommand` against this stack.
    pub fn command(&self, subcommand: Subcommand) -> EngineCommand {
        EngineCommand::new(self.working_dir.clone(), subcommand).variables(self.variables.clone())
    }
}

/// Builder for [`StackInvocation`].
#[derive(Debug, Clone)]
pub struct StackInvocationBuilder {
    working_dir: PathBuf,
    variables: VariableSet,
    mode: StackMode,
}

impl StackInvocationBuilder {
    /// Add an input variable.
    pub fn var(mut self, name: impl Into<String>, value: impl Serialize) -> HarnessResult<Self> {
        self.variables.insert(name, value)?;
        Ok(self)
    }

    /// Replace the whole variable set.
    pub fn variables(mut self, variables: VariableSet) -> Self {
        self.variables = variables;
        self
    }

    pub fn mode(mut self, mode: StackMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn plan_only(self) -> Self {
        self.mode(StackMode::PlanOnly)
    }

    pub fn build(self) -> StackInvocation {
        StackInvocation {
            id: Uuid::new_v4(),
            working_dir: self.working_dir,
            variables: self.variables,
            mode: self.mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    #[test]
    fn test_builder_defaults_to_apply() {
        let invocation = StackInvocation::builder("/stacks/landing-zone")
            .var("project_id", "test-project-123")
            .unwrap()
            .build();

        assert_eq!(invocation.mode(), StackMode::Apply);
        assert_eq!(invocation.working_dir(), Path::new("/stacks/landing-zone"));
        assert_eq!(invocation.variables().len(), 1);
    }

    #[test]
    fn test_invalid_variable_is_rejected() {
        let err = StackInvocation::builder("/stacks/a").var("", 1).unwrap_err();
        assert!(matches!(err, HarnessError::Runner(_)));
    }

    #[test]
    fn test_command_carries_variables() {
        let invocation = StackInvocation::builder("/stacks/a")
            .var("environment", "test")
            .unwrap()
            .plan_only()
            .build();

        let cmd = invocation.command(Subcommand::Plan);
        assert_eq!(cmd.subcommand, Subcommand::Plan);
        assert_eq!(cmd.variables.render("environment").as_deref(), Some("test"));
        assert_eq!(invocation.mode(), StackMode::PlanOnly);
    }

    #[test]
    fn test_each_build_gets_a_fresh_id() {
        let builder = StackInvocation::builder("/stacks/a");
        assert_ne!(builder.clone().build().id(), builder.build().id());
    }
}
