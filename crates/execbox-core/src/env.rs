//! Environment variable handling.

use std::env;

/// Environment variable names recognized by execbox.
pub mod vars {
    /// Path to the config file.
    pub const CONFIG: &str = "EXECBOX_CONFIG";
    /// Interpreter override.
    pub const INTERPRETER: &str = "EXECBOX_INTERPRETER";
    /// Limit strategy override (`auto`, `rlimit`, `monitor`, `off`).
    pub const LIMIT_STRATEGY: &str = "EXECBOX_LIMIT_STRATEGY";
}

/// Get an environment variable, returning None if not set or empty.
pub fn get_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Parse a `KEY=value` pair.
pub fn parse_assignment(s: &str) -> Option<(String, String)> {
    let (key, value) = s.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}
