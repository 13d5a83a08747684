//! Input variables for a stack invocation.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::{RunnerError, RunnerResult};

/// A validated set of named input variables.
///
/// Values are held as JSON and rendered into the form the engine's
/// `-var` flag or `.tfvars.json` file expects. Iteration order is by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSet {
    values: BTreeMap<String, Value>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable, replacing any previous value of the same name.
    pub fn set(mut self, name: impl Into<String>, value: impl Serialize) -> RunnerResult<Self> {
        self.insert(name, value)?;
        Ok(self)
    }

    /// Add a variable in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Serialize) -> RunnerResult<()> {
        let name = name.into();
        validate_name(&name)?;
        let value = serde_json::to_value(value).map_err(|e| {
            RunnerError::Serialization(format!("variable `{}`: {}", name, e))
        })?;
        validate_value(&name, &value)?;
        self.values.insert(name, value);
        Ok(())
    }

    /// Build a set from any serializable mapping.
    pub fn from_map<I, K, V>(entries: I) -> RunnerResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Serialize,
    {
        let mut set = Self::new();
        for (name, value) in entries {
            set.insert(name, value)?;
        }
        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    /// Render a single value the way the engine reads it on the command line.
    pub fn render(&self, name: &str) -> Option<String> {
        self.values.get(name).map(render_value)
    }

    /// `-var name=value` pairs for every variable.
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.values.len() * 2);
        for (name, value) in &self.values {
            args.push("-var".to_string());
            args.push(format!("{}={}", name, render_value(value)));
        }
        args
    }

    /// The document for a `.tfvars.json` variable file.
    pub fn to_var_file_json(&self) -> RunnerResult<String> {
        Ok(serde_json::to_string_pretty(&self.values)?)
    }
}

fn validate_name(name: &str) -> RunnerResult<()> {
    if name.trim().is_empty() {
        return Err(RunnerError::Serialization(
            "variable name must not be empty".to_string(),
        ));
    }
    if name.contains('=') {
        return Err(RunnerError::Serialization(format!(
            "variable name `{}` must not contain '='",
            name
        )));
    }
    Ok(())
}

fn validate_value(name: &str, value: &Value) -> RunnerResult<()> {
    match value {
        Value::Null => Err(RunnerError::Serialization(format!(
            "variable `{}` has no value; omit it instead of passing null",
            name
        ))),
        Value::Array(items) => items.iter().try_for_each(|v| validate_value(name, v)),
        Value::Object(map) => map.values().try_for_each(|v| validate_value(name, v)),
        _ => Ok(()),
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        // Lists and maps use JSON syntax, which the engine's expression
        // parser accepts for complex-typed variables.
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_scalar_rendering() {
        let vars = VariableSet::new()
            .set("project_id", "test-project-123")
            .unwrap()
            .set("node_count", 3)
            .unwrap()
            .set("enable_logging", true)
            .unwrap();

        assert_eq!(vars.render("project_id").as_deref(), Some("test-project-123"));
        assert_eq!(vars.render("node_count").as_deref(), Some("3"));
        assert_eq!(vars.render("enable_logging").as_deref(), Some("true"));
    }

    #[test]
    fn test_structured_values_render_as_json() {
        let mut labels = HashMap::new();
        labels.insert("team", "platform");

        let vars = VariableSet::new()
            .set("zones", vec!["us-central1-a", "us-central1-b"])
            .unwrap()
            .set("labels", labels)
            .unwrap();

        assert_eq!(
            vars.render("zones").as_deref(),
            Some(r#"["us-central1-a","us-central1-b"]"#)
        );
        assert_eq!(vars.render("labels").as_deref(), Some(r#"{"team":"platform"}"#));
    }

    #[test]
    fn test_cli_args_sorted_by_name() {
        let vars = VariableSet::from_map([("environment", "test"), ("billing", "ABC")]).unwrap();

        assert_eq!(
            vars.to_cli_args(),
            vec!["-var", "billing=ABC", "-var", "environment=test"]
        );
    }

    #[test]
    fn test_rejects_empty_name() {
        let err = VariableSet::new().set("  ", "x").unwrap_err();
        assert!(matches!(err, RunnerError::Serialization(_)));
    }

    #[test]
    fn test_rejects_name_with_equals() {
        assert!(VariableSet::new().set("a=b", "x").is_err());
    }

    #[test]
    fn test_rejects_null_values() {
        assert!(VariableSet::new().set("region", Option::<String>::None).is_err());
        assert!(VariableSet::new().set("zones", vec![Some("a"), None]).is_err());
    }

    #[test]
    fn test_rejects_non_string_map_keys() {
        let mut map = HashMap::new();
        map.insert(vec![1u8], "x");
        let err = VariableSet::new().set("bad", map).unwrap_err();
        assert!(matches!(err, RunnerError::Serialization(_)));
    }

    #[test]
    fn test_var_file_json() {
        let vars = VariableSet::new().set("count", 2).unwrap();
        let json: Value = serde_json::from_str(&vars.to_var_file_json().unwrap()).unwrap();
        assert_eq!(json["count"], 2);
    }
}
