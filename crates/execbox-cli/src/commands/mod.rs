//! CLI command implementations.

pub mod check;
pub mod config;
pub mod doctor;
pub mod run;

use anyhow::Context;
use execbox_core::config::Config;
use std::io::Read;
use std::path::Path;

/// Load and validate the configuration the command should use.
pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = Config::load_from(path).context("Failed to load config")?;
    config.validate().context("Configuration error")?;
    Ok(config)
}

/// Read Python source from a file, or from stdin when `path` is `-`.
pub(crate) fn read_source(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read source from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
