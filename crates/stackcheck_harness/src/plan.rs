//! Plan summaries from `plan -detailed-exitcode`.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use stackcheck_runner::ExecutionResult;

use crate::outputs::OutputValue;

/// What a plan would do, without doing it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    /// Engine exit code (0 = no changes, 2 = changes present)
    pub exit_code: i64,
    pub changes_present: bool,
    pub to_add: u64,
    pub to_change: u64,
    pub to_destroy: u64,
    pub stdout: String,
    pub stderr: String,
}

const PLAN_LINE: &str = r"Plan: (\d+) to add, (\d+) to change, (\d+) to destroy";

impl PlanSummary {
    /// Build a summary from a successful plan execution.
    pub fn from_execution(result: &ExecutionResult) -> Self {
        let mut summary = Self {
            exit_code: result.exit_code,
            changes_present: result.exit_code == 2,
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            ..Self::default()
        };

        let captures = Regex::new(PLAN_LINE)
            .ok()
            .and_then(|re| re.captures(&result.stdout));
        if let Some(caps) = captures {
            let count = |i: usize| caps[i].parse::<u64>().unwrap_or(0);
            summary.to_add = count(1);
            summary.to_change = count(2);
            summary.to_destroy = count(3);
            let total = summary.total_changes();
            summary.changes_present |= total > 0;
        }
        summary
    }

    pub fn total_changes(&self) -> u64 {
        self.to_add + self.to_change + self.to_destroy
    }

    /// The summary as named values, so plan-only checks can address it the
    /// same way apply checks address stack outputs.
    pub fn as_outputs(&self) -> BTreeMap<String, OutputValue> {
        let mut values = BTreeMap::new();
        values.insert(
            "changes_present".to_string(),
            OutputValue::Bool(self.changes_present),
        );
        values.insert("to_add".to_string(), OutputValue::Number(self.to_add as f64));
        values.insert(
            "to_change".to_string(),
            OutputValue::Number(self.to_change as f64),
        );
        values.insert(
            "to_destroy".to_string(),
            OutputValue::Number(self.to_destroy as f64),
        );
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stackcheck_runner::Subcommand;

    fn plan(exit_code: i64, stdout: &str) -> ExecutionResult {
        ExecutionResult {
            subcommand: Subcommand::Plan,
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 0,
        }
    }

    #[test]
    fn test_counts_parsed() {
        let summary = PlanSummary::from_execution(&plan(
            2,
            "...\nPlan: 12 to add, 1 to change, 0 to destroy.\n",
        ));

        assert!(summary.changes_present);
        assert_eq!(summary.to_add, 12);
        assert_eq!(summary.to_change, 1);
        assert_eq!(summary.to_destroy, 0);
        assert_eq!(summary.total_changes(), 13);
    }

    #[test]
    fn test_no_changes() {
        let summary = PlanSummary::from_execution(&plan(
            0,
            "No changes. Your infrastructure matches the configuration.",
        ));

        assert!(!summary.changes_present);
        assert_eq!(summary.total_changes(), 0);
        assert_eq!(summary.as_outputs()["changes_present"], OutputValue::Bool(false));
    }
}
