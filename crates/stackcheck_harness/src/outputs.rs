//! Stack outputs and the resolver that reads them from the engine.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stackcheck_runner::{CancelSignal, EngineRunner, RunConfig, Subcommand};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};
use crate::invocation::StackInvocation;

/// A loosely-typed output value as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OutputValue {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<OutputValue>),
    Mapping(BTreeMap<String, OutputValue>),
    /// The engine reported `null`, e.g. an optional resource that was not created.
    Null,
}

/// A value did not have the shape the caller asked for.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("expected {expected}, found {found}")]
pub struct CoercionError {
    pub expected: &'static str,
    pub found: &'static str,
}

impl OutputValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Bool(_) => "bool",
            Self::List(_) => "list",
            Self::Mapping(_) => "mapping",
            Self::Null => "null",
        }
    }

    fn mismatch(&self, expected: &'static str) -> CoercionError {
        CoercionError {
            expected,
            found: self.kind(),
        }
    }

    pub fn as_str(&self) -> Result<&str, CoercionError> {
        match self {
            Self::String(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_f64(&self) -> Result<f64, CoercionError> {
        match self {
            Self::Number(n) => Ok(*n),
            other => Err(other.mismatch("number")),
        }
    }

    /// Integer view of a number. Fails on fractional values.
    pub fn as_i64(&self) -> Result<i64, CoercionError> {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => Ok(*n as i64),
            Self::Number(_) => Err(CoercionError {
                expected: "integer",
                found: "fractional number",
            }),
            other => Err(other.mismatch("integer")),
        }
    }

    pub fn as_bool(&self) -> Result<bool, CoercionError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_list(&self) -> Result<&[OutputValue], CoercionError> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(other.mismatch("list")),
        }
    }

    pub fn as_mapping(&self) -> Result<&BTreeMap<String, OutputValue>, CoercionError> {
        match self {
            Self::Mapping(map) => Ok(map),
            other => Err(other.mismatch("mapping")),
        }
    }

    /// Empty strings, lists, mappings and null count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::String(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Mapping(map) => map.is_empty(),
            Self::Null => true,
            Self::Number(_) | Self::Bool(_) => false,
        }
    }
}

impl From<Value> for OutputValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::String(s),
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::Bool(b) => Self::Bool(b),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Mapping(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
            Value::Null => Self::Null,
        }
    }
}

impl From<&str> for OutputValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Null => write!(f, "null"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Self::Mapping(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// One entry of the `output -json` document. Unknown keys are ignored.
#[derive(Debug, Deserialize)]
struct RawOutput {
    #[serde(default)]
    value: Value,
    #[serde(default)]
    sensitive: bool,
}

/// Parse an `output -json` document into name → value.
pub fn parse_outputs(document: &str) -> HarnessResult<BTreeMap<String, OutputValue>> {
    if document.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let raw: BTreeMap<String, Value> = serde_json::from_str(document)?;
    let mut outputs = BTreeMap::new();
    for (name, entry) in raw {
        // Entries that are not objects are skipped rather than failing the
        // whole document.
        let Ok(entry) = serde_json::from_value::<RawOutput>(entry) else {
            debug!("Skipping malformed output entry {}", name);
            continue;
        };
        if entry.sensitive {
            debug!("Output {} is marked sensitive", name);
        }
        outputs.insert(name, OutputValue::from(entry.value));
    }
    Ok(outputs)
}

/// Reads named outputs of an applied stack from the engine.
#[derive(Clone)]
pub struct OutputResolver {
    runner: Arc<dyn EngineRunner>,
    run_config: RunConfig,
}

impl OutputResolver {
    pub fn new(runner: Arc<dyn EngineRunner>, run_config: RunConfig) -> Self {
        Self { runner, run_config }
    }

    /// All outputs of the stack.
    pub async fn resolve_all(
        &self,
        invocation: &StackInvocation,
        cancel: &CancelSignal,
    ) -> HarnessResult<BTreeMap<String, OutputValue>> {
        let command = invocation.command(Subcommand::Output);
        let result = self.runner.run(&command, &self.run_config, cancel).await?;
        parse_outputs(&result.stdout)
    }

    /// One named output.
    pub async fn resolve(
        &self,
        invocation: &StackInvocation,
        name: &str,
        cancel: &CancelSignal,
    ) -> HarnessResult<OutputValue> {
        info!("Resolving output {} of {:?}", name, invocation.working_dir());
        let mut outputs = self.resolve_all(invocation, cancel).await?;
        outputs
            .remove(name)
            .ok_or_else(|| HarnessError::OutputNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stackcheck_runner::{MockEngine, MockResponse};

    #[test]
    fn test_parse_tolerates_unknown_and_absent_keys() {
        let doc = r#"{
            "vpc_network": {"sensitive": false, "type": "string", "value": "vpc-1", "extra": 1},
            "project_ids": {"value": ["a", "b"]},
            "no_value": {"type": "string"},
            "garbage": 42
        }"#;

        let outputs = parse_outputs(doc).unwrap();

        assert_eq!(outputs["vpc_network"], OutputValue::from("vpc-1"));
        assert_eq!(outputs["project_ids"].as_list().unwrap().len(), 2);
        assert_eq!(outputs["no_value"], OutputValue::Null);
        assert!(!outputs.contains_key("garbage"));
    }

    #[test]
    fn test_parse_empty_document() {
        assert!(parse_outputs("").unwrap().is_empty());
        assert!(parse_outputs("{}").unwrap().is_empty());
    }

    #[test]
    fn test_coercions() {
        let value = OutputValue::from(json!({"folders": ["prod", "dev"], "count": 2}));
        let map = value.as_mapping().unwrap();

        assert_eq!(map["count"].as_i64().unwrap(), 2);
        assert_eq!(map["folders"].as_list().unwrap()[0].as_str().unwrap(), "prod");
        assert_eq!(
            map["count"].as_str().unwrap_err(),
            CoercionError {
                expected: "string",
                found: "number"
            }
        );
        assert!(OutputValue::Number(1.5).as_i64().is_err());
    }

    #[test]
    fn test_is_empty() {
        assert!(OutputValue::from("").is_empty());
        assert!(OutputValue::List(vec![]).is_empty());
        assert!(OutputValue::Null.is_empty());
        assert!(!OutputValue::Bool(false).is_empty());
    }

    #[test]
    fn test_display() {
        let value = OutputValue::from(json!({"a": [1, "x"]}));
        assert_eq!(value.to_string(), "{a = [1, x]}");
    }

    #[tokio::test]
    async fn test_resolve_missing_output() {
        let engine = MockEngine::new().with_output("vpc_network", json!("vpc-1"));
        let resolver = OutputResolver::new(Arc::new(engine), RunConfig::default());
        let invocation = StackInvocation::builder("/stacks/a").build();

        let err = resolver
            .resolve(&invocation, "subnet_ids", &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::OutputNotFound(name) if name == "subnet_ids"));
    }

    #[tokio::test]
    async fn test_resolve_engine_failure_is_not_output_not_found() {
        let engine = MockEngine::new()
            .respond(Subcommand::Output, MockResponse::failure(1, "No state file"));
        let resolver = OutputResolver::new(Arc::new(engine), RunConfig::default());
        let invocation = StackInvocation::builder("/stacks/a").build();

        let err = resolver
            .resolve(&invocation, "vpc_network", &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Runner(_)));
    }
}
