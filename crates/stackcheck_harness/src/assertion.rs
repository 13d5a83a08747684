//! Predicates over outputs and the sink that records their results.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HarnessResult;
use crate::lifecycle::panic_message;
use crate::outputs::OutputValue;

type CheckFn = dyn Fn(&OutputValue) -> Result<(), String> + Send + Sync;

/// A named expectation about an output value.
#[derive(Clone)]
pub struct Predicate {
    description: String,
    check: Arc<CheckFn>,
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("description", &self.description)
            .finish()
    }
}

impl Predicate {
    fn new(
        description: impl Into<String>,
        check: impl Fn(&OutputValue) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            check: Arc::new(check),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The value is not an empty string, list, mapping or null.
    pub fn not_empty() -> Self {
        Self::new("is not empty", |v| {
            if v.is_empty() {
                Err(format!("expected a non-empty value, got {} `{}`", v.kind(), v))
            } else {
                Ok(())
            }
        })
    }

    pub fn equals(expected: impl Into<OutputValue>) -> Self {
        let expected = expected.into();
        Self::new(format!("equals `{}`", expected), move |v| {
            if *v == expected {
                Ok(())
            } else {
                Err(format!("expected `{}`, got `{}`", expected, v))
            }
        })
    }

    /// Substring of a string, element of a list, or key of a mapping.
    pub fn contains(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self::new(format!("contains `{}`", needle), move |v| {
            let found = match v {
                OutputValue::String(s) => s.contains(needle.as_str()),
                OutputValue::List(items) => items
                    .iter()
                    .any(|i| matches!(i, OutputValue::String(s) if *s == needle)),
                OutputValue::Mapping(map) => map.contains_key(&needle),
                other => return Err(format!("cannot search a {} for `{}`", other.kind(), needle)),
            };
            if found {
                Ok(())
            } else {
                Err(format!("`{}` not found in `{}`", needle, v))
            }
        })
    }

    /// A string value matching a regular expression.
    pub fn matches(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let compiled = Regex::new(&pattern).map_err(|e| e.to_string());
        Self::new(format!("matches /{}/", pattern), move |v| {
            let re = compiled
                .as_ref()
                .map_err(|e| format!("invalid pattern: {}", e))?;
            let s = v.as_str().map_err(|e| e.to_string())?;
            if re.is_match(s) {
                Ok(())
            } else {
                Err(format!("`{}` does not match /{}/", s, re.as_str()))
            }
        })
    }

    pub fn number_at_least(min: f64) -> Self {
        Self::new(format!("is at least {}", min), move |v| {
            let n = v.as_f64().map_err(|e| e.to_string())?;
            if n >= min {
                Ok(())
            } else {
                Err(format!("expected at least {}, got {}", min, n))
            }
        })
    }

    /// Arbitrary check. `Ok(false)` and `Err` both fail the check.
    pub fn custom(
        description: impl Into<String>,
        check: impl Fn(&OutputValue) -> anyhow::Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self::new(description, move |v| match check(v) {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!("predicate rejected `{}`", v)),
            Err(e) => Err(format!("predicate error: {:#}", e)),
        })
    }

    /// Evaluate without ever unwinding into the caller.
    pub fn evaluate(&self, value: &OutputValue) -> Result<(), String> {
        match std::panic::catch_unwind(AssertUnwindSafe(|| (self.check)(value))) {
            Ok(result) => result,
            Err(panic) => Err(format!("predicate panicked: {}", panic_message(&*panic))),
        }
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub scenario_name: String,
    pub output_name: String,
    pub passed: bool,
    pub detail: String,
}

/// Collects check results. Cheap to clone; clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct AssertionSink {
    results: Arc<Mutex<Vec<CheckResult>>>,
}

impl AssertionSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate `predicate` against `actual` and record exactly one result.
    pub fn check(
        &self,
        scenario_name: &str,
        output_name: &str,
        actual: HarnessResult<OutputValue>,
        predicate: &Predicate,
    ) -> CheckResult {
        let (passed, detail) = match actual {
            Ok(value) => match predicate.evaluate(&value) {
                Ok(()) => (true, format!("{} {}", output_name, predicate.description())),
                Err(reason) => (false, format!("{} {}: {}", output_name, predicate.description(), reason)),
            },
            Err(e) => (false, format!("{} could not be read: {}", output_name, e)),
        };

        if passed {
            debug!("[{}] PASS {}", scenario_name, detail);
        } else {
            warn!("[{}] FAIL {}", scenario_name, detail);
        }

        let result = CheckResult {
            scenario_name: scenario_name.to_string(),
            output_name: output_name.to_string(),
            passed,
            detail,
        };
        self.results.lock().push(result.clone());
        result
    }

    /// Record a result produced elsewhere.
    pub fn record(&self, result: CheckResult) {
        self.results.lock().push(result);
    }

    pub fn results(&self) -> Vec<CheckResult> {
        self.results.lock().clone()
    }

    pub fn results_for(&self, scenario_name: &str) -> Vec<CheckResult> {
        self.results
            .lock()
            .iter()
            .filter(|r| r.scenario_name == scenario_name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use serde_json::json;

    #[test]
    fn test_not_empty() {
        assert!(Predicate::not_empty().evaluate(&"vpc-1".into()).is_ok());
        assert!(Predicate::not_empty().evaluate(&"".into()).is_err());
        assert!(Predicate::not_empty().evaluate(&OutputValue::Null).is_err());
    }

    #[test]
    fn test_contains_on_each_shape() {
        let list = OutputValue::from(json!(["prod", "dev"]));
        let map = OutputValue::from(json!({"prod": "folders/1"}));

        assert!(Predicate::contains("dev").evaluate(&list).is_ok());
        assert!(Predicate::contains("prod").evaluate(&map).is_ok());
        assert!(Predicate::contains("net").evaluate(&"my-network".into()).is_ok());
        assert!(Predicate::contains("x").evaluate(&OutputValue::Bool(true)).is_err());
    }

    #[test]
    fn test_matches_and_invalid_pattern() {
        let value = OutputValue::from("projects/test-project-123/global/networks/main");
        assert!(Predicate::matches(r"^projects/[\w-]+/global/networks/").evaluate(&value).is_ok());

        let err = Predicate::matches("(").evaluate(&value).unwrap_err();
        assert!(err.contains("invalid pattern"));
    }

    #[test]
    fn test_number_at_least() {
        assert!(Predicate::number_at_least(2.0).evaluate(&OutputValue::Number(3.0)).is_ok());
        assert!(Predicate::number_at_least(2.0).evaluate(&OutputValue::Number(1.0)).is_err());
        assert!(Predicate::number_at_least(2.0).evaluate(&"3".into()).is_err());
    }

    #[test]
    fn test_sink_records_panicking_predicate_as_failure() {
        let sink = AssertionSink::new();
        let predicate = Predicate::custom("explodes", |_| panic!("bad predicate"));

        let result = sink.check("net", "vpc_network", Ok("vpc-1".into()), &predicate);

        assert!(!result.passed);
        assert!(result.detail.contains("bad predicate"));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_sink_records_resolution_errors() {
        let sink = AssertionSink::new();
        let result = sink.check(
            "net",
            "subnets",
            Err(HarnessError::OutputNotFound("subnets".to_string())),
            &Predicate::not_empty(),
        );

        assert!(!result.passed);
        assert!(result.detail.contains("Output not found"));
    }

    #[test]
    fn test_custom_error_is_failure() {
        let predicate = Predicate::custom("is a list of two", |v| Ok(v.as_list()?.len() == 2));
        assert!(predicate.evaluate(&OutputValue::from(json!([1, 2]))).is_ok());
        let err = predicate.evaluate(&"x".into()).unwrap_err();
        assert!(err.contains("expected list"));
    }

    #[test]
    fn test_results_for_scenario() {
        let sink = AssertionSink::new();
        sink.check("a", "x", Ok("1".into()), &Predicate::not_empty());
        sink.check("b", "y", Ok("".into()), &Predicate::not_empty());

        assert_eq!(sink.results_for("a").len(), 1);
        assert!(!sink.results_for("b")[0].passed);
    }
}
