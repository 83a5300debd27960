//! Aho-Corasick based static pre-check for submitted source.
//!
//! This is a lint that catches obvious misuse. It is not a security boundary:
//! aliasing (`import os as o; o.system(...)`) and dynamic access
//! (`__import__("subprocess")`) pass straight through.

use crate::error::SandboxError;
use crate::Result;
use aho_corasick::{AhoCorasick, MatchKind};
use execbox_core::config::PrecheckConfig;
use execbox_core::ConfigError;

/// Modules and calls rejected in import-style statements.
pub const DEFAULT_BLOCKED: &[&str] = &["subprocess", "os.system", "shutil.rmtree", "sys.exit"];

/// Denylist scanner for import statements.
#[derive(Debug, Clone)]
pub struct Precheck {
    /// Automaton over `import X` and `from X` for every blocked entry.
    automaton: AhoCorasick,
    /// Blocked entry for each automaton pattern index.
    entries: Vec<String>,
}

impl Precheck {
    /// Build a pre-check over the default denylist.
    pub fn new() -> Result<Self> {
        Self::with_blocked(DEFAULT_BLOCKED.iter().map(|s| s.to_string()))
    }

    /// Build a pre-check over the default denylist plus configured additions.
    pub fn from_config(config: &PrecheckConfig) -> Result<Self> {
        Self::with_blocked(
            DEFAULT_BLOCKED
                .iter()
                .map(|s| s.to_string())
                .chain(config.blocked_imports.iter().cloned()),
        )
    }

    /// Build a pre-check over exactly the given entries.
    pub fn with_blocked(blocked: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut entries = Vec::new();
        let mut patterns = Vec::new();
        for entry in blocked {
            if entry.is_empty() || entries.contains(&entry) {
                continue;
            }
            patterns.push(format!("import {}", entry));
            patterns.push(format!("from {}", entry));
            entries.push(entry);
        }

        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostFirst)
            .build(&patterns)
            .map_err(|e| {
                SandboxError::Config(ConfigError::Validation(format!(
                    "invalid pre-check denylist: {}",
                    e
                )))
            })?;

        Ok(Self { automaton, entries })
    }

    /// Blocked entries, in configuration order.
    pub fn blocked(&self) -> &[String] {
        &self.entries
    }

    /// Return the source unchanged, or the leftmost blocked entry it uses.
    pub fn check<'a>(&self, source: &'a str) -> Result<&'a str> {
        match self.automaton.find(source) {
            Some(found) => Err(SandboxError::Blocked {
                pattern: self.entries[found.pattern().as_usize() / 2].clone(),
            }),
            None => Ok(source),
        }
    }
}
