//! Path resolution utilities.

use crate::error::ConfigError;
use std::path::PathBuf;

/// Get the execbox base directory (~/.execbox).
pub fn base_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::Validation("Could not determine home directory".to_string())
    })?;
    Ok(home.join(".execbox"))
}

/// Get the main config file path (~/.execbox/execbox.json5).
///
/// `EXECBOX_CONFIG` takes precedence when set.
pub fn config_file() -> Result<PathBuf, ConfigError> {
    if let Some(path) = crate::env::get_var(crate::env::vars::CONFIG) {
        return Ok(PathBuf::from(path));
    }
    Ok(base_dir()?.join("execbox.json5"))
}
