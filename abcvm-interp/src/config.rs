//! Interpreter configuration loaded from YAML.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Interpreter limits and modes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterpreterConfig {
    /// Maximum number of live frames per invocation.
    pub max_stack_depth: usize,

    /// Maximum number of registers across all live frames.
    pub max_stack_vregs: usize,

    /// Trace every instruction and call the runtime's debug hook.
    pub debug: bool,

    /// Count taken / not-taken outcomes of conditional branches.
    pub profiling: bool,

    /// Validate a method's instruction stream before its first execution.
    pub verify_on_entry: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 1024,
            max_stack_vregs: 1 << 16,
            debug: false,
            profiling: false,
            verify_on_entry: true,
        }
    }
}

impl InterpreterConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string. Missing keys keep their
    /// defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg = InterpreterConfig::from_yaml("max_stack_depth: 8\nprofiling: true\n").unwrap();
        assert_eq!(cfg.max_stack_depth, 8);
        assert!(cfg.profiling);
        assert_eq!(cfg.max_stack_vregs, InterpreterConfig::default().max_stack_vregs);
        assert!(cfg.verify_on_entry);
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(InterpreterConfig::from_yaml("").unwrap(), InterpreterConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = InterpreterConfig::from_yaml("max_depth: 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)), "got {err}");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = InterpreterConfig::from_yaml_file("/nonexistent/abcvm.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
