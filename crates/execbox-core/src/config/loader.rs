//! Configuration loading and persistence.

use super::{Config, LimitMode};
use crate::env;
use crate::error::ConfigError;
use crate::paths;
use std::fs;
use std::path::Path;
use tracing::warn;

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::config_file()?;
        Self::load(&path)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Serialize to JSON5 string.
    pub fn to_json5(&self) -> Result<String, ConfigError> {
        // json5 doesn't have a serializer, so we use serde_json with pretty print
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from `path` if given, else from the default location.
    ///
    /// A missing file yields defaults; environment overrides are applied last.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let loaded = match path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        };

        let mut config = match loaded {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => Self::default(),
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `EXECBOX_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(interpreter) = env::get_var(env::vars::INTERPRETER) {
            self.worker.interpreter = interpreter;
        }

        if let Some(strategy) = env::get_var(env::vars::LIMIT_STRATEGY) {
            match strategy.parse::<LimitMode>() {
                Ok(mode) => self.limits.strategy = mode,
                Err(e) => warn!("Ignoring {}: {}", env::vars::LIMIT_STRATEGY, e),
            }
        }
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        // 1. Timeouts
        if self.execution.default_timeout_secs == 0 {
            errors.push("Default timeout must be greater than 0".to_string());
        }
        if self.execution.max_timeout_secs < self.execution.default_timeout_secs {
            errors.push(format!(
                "Max timeout ({}s) is lower than the default timeout ({}s)",
                self.execution.max_timeout_secs, self.execution.default_timeout_secs
            ));
        }
        if self.execution.staleness_ceiling_secs < self.execution.max_timeout_secs {
            errors.push(format!(
                "Staleness ceiling ({}s) must be at least the max timeout ({}s)",
                self.execution.staleness_ceiling_secs, self.execution.max_timeout_secs
            ));
        }

        // 2. Limits
        if self.limits.cpu_time_secs == 0 {
            errors.push("CPU time limit must be greater than 0".to_string());
        }
        if self.limits.memory_bytes < 16 * 1024 * 1024 {
            errors.push(format!(
                "Memory limit {} bytes is below the 16 MB minimum",
                self.limits.memory_bytes
            ));
        }
        if self.limits.monitor_interval_ms == 0 {
            errors.push("Monitor interval must be greater than 0".to_string());
        }

        // 3. Worker
        if self.worker.interpreter.trim().is_empty() {
            errors.push("Worker interpreter must not be empty".to_string());
        }
        if self.worker.max_output_bytes == 0 {
            errors.push("Max output size must be greater than 0".to_string());
        }

        // 4. Pre-check entries must be non-empty tokens
        for (i, entry) in self.precheck.blocked_imports.iter().enumerate() {
            if entry.trim().is_empty() || entry.chars().any(char::is_whitespace) {
                errors.push(format!(
                    "Pre-check blocked_imports[{}]: '{}' is not a module or call name",
                    i, entry
                ));
            }
        }

        // 5. Retention
        if self.retention.sweep_interval_secs == 0 {
            errors.push("Retention sweep interval must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }
}
