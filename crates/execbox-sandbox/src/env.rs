//! Environment policy for worker processes.

use crate::error::SandboxError;
use crate::Result;
use execbox_core::config::WorkerConfig;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;

/// Rules that decide which variables a worker sees.
#[derive(Debug, Clone)]
pub struct EnvironmentRules {
    /// Inherit the supervisor's environment.
    pub inherit: bool,

    /// Variables never passed to a worker and never accepted as overrides.
    pub blocked: HashSet<String>,

    /// Variables always set for the worker.
    pub set: HashMap<String, String>,
}

impl Default for EnvironmentRules {
    fn default() -> Self {
        Self {
            inherit: true,
            blocked: Self::default_blocked(),
            set: Self::worker_defaults(),
        }
    }
}

impl EnvironmentRules {
    /// Build rules from the worker configuration.
    ///
    /// Configured `blocked_env` entries extend the built-in list.
    pub fn from_config(config: &WorkerConfig) -> Self {
        let mut blocked = Self::default_blocked();
        blocked.extend(config.blocked_env.iter().cloned());

        Self {
            inherit: config.inherit_env,
            blocked,
            set: Self::worker_defaults(),
        }
    }

    /// Get default blocked environment variables.
    pub fn default_blocked() -> HashSet<String> {
        [
            // Dynamic linker injection
            "LD_PRELOAD",
            "LD_LIBRARY_PATH",
            "LD_AUDIT",
            "DYLD_INSERT_LIBRARIES",
            "DYLD_LIBRARY_PATH",
            // Interpreter injection
            "PYTHONSTARTUP",
            "PYTHONPATH",
            "PYTHONHOME",
            "PYTHONINSPECT",
            "PYTHONBREAKPOINT",
            // Other dangerous
            "BASH_ENV",
            "GCONV_PATH",
            "SSLKEYLOGFILE",
        ]
        .iter()
        .map(|var| (*var).to_string())
        .collect()
    }

    fn worker_defaults() -> HashMap<String, String> {
        let mut set = HashMap::new();
        set.insert("PYTHONIOENCODING".to_string(), "utf-8".to_string());
        set.insert("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string());
        set
    }

    /// Check whether a variable is blocked.
    pub fn is_blocked(&self, key: &str) -> bool {
        self.blocked.contains(key)
    }

    /// Validate caller-supplied overrides.
    pub fn check_overrides(&self, overrides: &HashMap<String, String>) -> Result<()> {
        for (key, value) in overrides {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(SandboxError::invalid_request(format!(
                    "invalid environment variable name '{}'",
                    key
                )));
            }
            if value.contains('\0') {
                return Err(SandboxError::invalid_request(format!(
                    "environment variable '{}' contains a NUL byte",
                    key
                )));
            }
            if self.is_blocked(key) {
                return Err(SandboxError::invalid_request(format!(
                    "environment variable '{}' is blocked",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Compute the complete environment for one worker.
    ///
    /// Overrides win over inherited values. Blocked variables are always
    /// removed, whatever their source. Inherited values are passed through
    /// as raw OS strings, so non-UTF-8 host variables reach the worker intact.
    pub fn build(&self, overrides: &HashMap<String, String>) -> HashMap<OsString, OsString> {
        let mut env: HashMap<OsString, OsString> = if self.inherit {
            std::env::vars_os()
                .filter(|(key, _)| !key.to_str().is_some_and(|key| self.is_blocked(key)))
                .collect()
        } else {
            ["PATH", "HOME", "LANG", "TMPDIR"]
                .iter()
                .filter_map(|key| std::env::var_os(key).map(|v| (OsString::from(key), v)))
                .collect()
        };

        for (key, value) in self.set.iter().chain(overrides) {
            env.insert(OsString::from(key), OsString::from(value));
        }
        for var in &self.blocked {
            env.remove(std::ffi::OsStr::new(var));
        }

        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(env: &'a HashMap<OsString, OsString>, key: &str) -> Option<&'a str> {
        env.get(std::ffi::OsStr::new(key)).and_then(|v| v.to_str())
    }

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_blocked_contains_injection_vars() {
        let rules = EnvironmentRules::default();
        assert!(rules.is_blocked("LD_PRELOAD"));
        assert!(rules.is_blocked("PYTHONPATH"));
        assert!(!rules.is_blocked("HOME"));
    }

    #[test]
    fn test_config_extends_blocked() {
        let config = WorkerConfig {
            blocked_env: vec!["AWS_SECRET_ACCESS_KEY".to_string()],
            ..Default::default()
        };
        let rules = EnvironmentRules::from_config(&config);
        assert!(rules.is_blocked("AWS_SECRET_ACCESS_KEY"));
        assert!(rules.is_blocked("LD_PRELOAD"));
    }

    #[test]
    fn test_check_overrides_rejects_blocked() {
        let rules = EnvironmentRules::default();
        let err = rules
            .check_overrides(&overrides(&[("LD_PRELOAD", "/tmp/evil.so")]))
            .unwrap_err();
        assert!(err.to_string().contains("LD_PRELOAD"));

        assert!(rules
            .check_overrides(&overrides(&[("BAD=NAME", "x")]))
            .is_err());
        assert!(rules.check_overrides(&overrides(&[("", "x")])).is_err());
        assert!(rules
            .check_overrides(&overrides(&[("TEST_VAR", "ok")]))
            .is_ok());
    }

    #[test]
    fn test_build_applies_overrides() {
        let rules = EnvironmentRules::default();
        let env = rules.build(&overrides(&[("TEST_VAR", "test_value")]));
        assert_eq!(lookup(&env, "TEST_VAR"), Some("test_value"));
        assert_eq!(lookup(&env, "PYTHONIOENCODING"), Some("utf-8"));
        assert!(lookup(&env, "LD_PRELOAD").is_none());
    }

    #[test]
    fn test_build_without_inherit() {
        let rules = EnvironmentRules {
            inherit: false,
            ..Default::default()
        };
        let env = rules.build(&HashMap::new());
        let allowed = ["PATH", "HOME", "LANG", "TMPDIR", "PYTHONIOENCODING", "PYTHONDONTWRITEBYTECODE"];
        assert!(env
            .keys()
            .all(|key| key.to_str().is_some_and(|key| allowed.contains(&key))));
    }

    #[cfg(unix)]
    #[test]
    fn test_build_passes_non_utf8_host_variables() {
        use std::os::unix::ffi::OsStrExt;

        let name = "EXECBOX_TEST_NON_UTF8";
        let value = std::ffi::OsStr::from_bytes(b"\xff\xfe");
        std::env::set_var(name, value);
        let env = EnvironmentRules::default().build(&overrides(&[("TEST_VAR", "ok")]));
        std::env::remove_var(name);

        assert_eq!(env.get(std::ffi::OsStr::new(name)).map(|v| v.as_bytes()), Some(&b"\xff\xfe"[..]));
        assert_eq!(lookup(&env, "TEST_VAR"), Some("ok"));
    }
}
