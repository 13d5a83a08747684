//! Scenario reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assertion::CheckResult;
use crate::error::{HarnessError, HarnessResult};
use crate::invocation::StackMode;

/// Number of trailing engine output lines kept in a report.
pub const EXCERPT_LINES: usize = 20;

/// Final state of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Passed,
    Failed,
    /// Destroy failed. Takes precedence over `Failed`: leaked
    /// infrastructure needs attention even when checks also failed.
    TeardownFailed,
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::Failed => write!(f, "FAILED"),
            Self::TeardownFailed => write!(f, "TEARDOWN FAILED"),
        }
    }
}

/// Result of one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub mode: StackMode,
    pub state: ScenarioState,
    pub checks: Vec<CheckResult>,
    /// Setup or body error, if any
    pub error: Option<String>,
    pub teardown_error: Option<String>,
    pub stdout_excerpt: String,
    pub stderr_excerpt: String,
    pub duration_ms: u64,
}

impl ScenarioReport {
    pub fn new(name: impl Into<String>, mode: StackMode) -> Self {
        Self {
            name: name.into(),
            mode,
            state: ScenarioState::Passed,
            checks: Vec::new(),
            error: None,
            teardown_error: None,
            stdout_excerpt: String::new(),
            stderr_excerpt: String::new(),
            duration_ms: 0,
        }
    }

    /// Derive the state from checks and errors.
    pub fn finalize(mut self) -> Self {
        self.state = if self.teardown_error.is_some() {
            ScenarioState::TeardownFailed
        } else if self.error.is_some() || self.checks.iter().any(|c| !c.passed) {
            ScenarioState::Failed
        } else {
            ScenarioState::Passed
        };
        self
    }

    pub fn with_engine_output(mut self, stdout: &str, stderr: &str) -> Self {
        self.stdout_excerpt = excerpt(stdout, EXCERPT_LINES);
        self.stderr_excerpt = excerpt(stderr, EXCERPT_LINES);
        self
    }

    pub fn passed(&self) -> bool {
        self.state == ScenarioState::Passed
    }
}

/// Last `lines` non-empty lines of `text`.
pub fn excerpt(text: &str, lines: usize) -> String {
    let kept: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join("\n")
}

/// Report for a whole run, in registration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub scenarios: Vec<ScenarioReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.scenarios.iter().all(|s| s.passed())
    }

    pub fn count(&self, state: ScenarioState) -> usize {
        self.scenarios.iter().filter(|s| s.state == state).count()
    }

    pub fn get(&self, name: &str) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.name.as_str()).collect()
    }

    /// `Err(HarnessError::Assertion)` naming every scenario that did not pass.
    pub fn ensure_passed(&self) -> HarnessResult<()> {
        let failed: Vec<String> = self
            .scenarios
            .iter()
            .filter(|s| !s.passed())
            .map(|s| format!("{} ({})", s.name, s.state))
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Assertion(format!(
                "{} of {} scenarios did not pass: {}",
                failed.len(),
                self.scenarios.len(),
                failed.join(", ")
            )))
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Scenario Results:")?;
        writeln!(f, "{}", "-".repeat(50))?;
        for scenario in &self.scenarios {
            let icon = match scenario.state {
                ScenarioState::Passed => "✅",
                ScenarioState::Failed => "❌",
                ScenarioState::TeardownFailed => "🔥",
            };
            writeln!(
                f,
                "{} {} [{}] {} ({}ms)",
                icon, scenario.name, scenario.mode, scenario.state, scenario.duration_ms
            )?;
            for check in &scenario.checks {
                let mark = if check.passed { "✓" } else { "✗" };
                writeln!(f, "   {} {}", mark, check.detail)?;
            }
            if let Some(error) = &scenario.error {
                writeln!(f, "   error: {}", error)?;
            }
            if let Some(error) = &scenario.teardown_error {
                writeln!(f, "   teardown: {}", error)?;
            }
            if !scenario.passed() && !scenario.stderr_excerpt.is_empty() {
                writeln!(f, "   stderr:")?;
                for line in scenario.stderr_excerpt.lines() {
                    writeln!(f, "     | {}", line)?;
                }
            }
        }
        writeln!(f, "{}", "-".repeat(50))?;
        write!(
            f,
            "Summary: {} passed, {} failed, {} teardown failed",
            self.count(ScenarioState::Passed),
            self.count(ScenarioState::Failed),
            self.count(ScenarioState::TeardownFailed)
        )
    }
}
