//! Engine and run configuration types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How input variables reach the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarPassing {
    /// One `-var key=value` flag per variable.
    #[default]
    Flags,
    /// A temporary `*.tfvars.json` file passed with `-var-file`.
    File,
}

/// Configuration of the engine binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine executable (looked up on `PATH` when not absolute)
    pub binary: String,
    /// Extra environment variables, added on top of the inherited environment
    pub env: HashMap<String, String>,
    /// How variables are passed
    pub var_passing: VarPassing,
    /// Log commands instead of executing them
    pub dry_run: bool,
    /// Prefix echoed log lines with timestamps (CI systems)
    pub ci_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: EngineConfig::TERRAFORM.to_string(),
            env: HashMap::new(),
            var_passing: VarPassing::Flags,
            dry_run: false,
            ci_mode: std::env::var("CI").is_ok(),
        }
    }
}

impl EngineConfig {
    pub const TERRAFORM: &'static str = "terraform";
    pub const TOFU: &'static str = "tofu";

    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn var_passing(mut self, mode: VarPassing) -> Self {
        self.var_passing = mode;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn ci_mode(mut self, enabled: bool) -> Self {
        self.ci_mode = enabled;
        self
    }
}

/// Per-command run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Timeout in seconds (0 = no timeout)
    pub timeout_seconds: u64,
    /// Echo engine output while it runs
    pub stream_logs: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 1800, // 30 minutes, applies can be slow
            stream_logs: false,
        }
    }
}

impl RunConfig {
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Enable or disable log streaming.
    pub fn stream_logs(mut self, enabled: bool) -> Self {
        self.stream_logs = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::new(EngineConfig::TOFU)
            .env("TF_LOG", "DEBUG")
            .var_passing(VarPassing::File)
            .dry_run();

        assert_eq!(config.binary, "tofu");
        assert_eq!(config.env.get("TF_LOG"), Some(&"DEBUG".to_string()));
        assert_eq!(config.var_passing, VarPassing::File);
        assert!(config.dry_run);
    }

    #[test]
    fn test_var_passing_serde() {
        let mode: VarPassing = serde_json::from_str("\"file\"").unwrap();
        assert_eq!(mode, VarPassing::File);
    }
}
