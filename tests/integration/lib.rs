//! Shared helpers for the execbox integration tests.

use execbox_core::config::Config;
use std::path::PathBuf;

/// Check for a usable `python3`, printing a skip notice when it is missing.
pub fn require_python(test: &str) -> bool {
    let available = execbox_sandbox::worker::python_available();
    if !available {
        eprintln!("python3 not found - skipping {}", test);
    }
    available
}

/// Configuration with short grace periods so failure paths finish quickly.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.execution.terminate_grace_ms = 200;
    config.execution.drain_grace_ms = 200;
    config
}

/// Locate the compiled `execbox` binary.
///
/// Integration tests in another package cannot use `CARGO_BIN_EXE_*`, so
/// this looks in the workspace target directory. Returns `None` when the
/// binary has not been built.
pub fn execbox_bin() -> Option<PathBuf> {
    let target = match std::env::var_os("CARGO_TARGET_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .parent()?
            .parent()?
            .join("target"),
    };
    let name = if cfg!(windows) { "execbox.exe" } else { "execbox" };
    let bin = target.join("debug").join(name);
    if bin.exists() {
        Some(bin)
    } else {
        eprintln!(
            "execbox binary not found at {}; run `cargo build -p execbox-cli` first",
            bin.display()
        );
        None
    }
}
