//! CLI binary integration tests.
//!
//! These run the compiled `execbox` binary to check command routing, exit
//! codes and output formats.

use execbox_integration_tests::{execbox_bin, require_python};
use std::io::Write;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Build a command isolated from the user's config file.
fn execbox_cmd(config_dir: &TempDir) -> Option<Command> {
    let mut cmd = Command::new(execbox_bin()?);
    cmd.env("EXECBOX_CONFIG", config_dir.path().join("execbox.json5"))
        .env_remove("EXECBOX_INTERPRETER")
        .env_remove("EXECBOX_LIMIT_STRATEGY")
        .env("RUST_LOG", "off");
    Some(cmd)
}

fn run_with_stdin(mut cmd: Command, input: &str) -> Output {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to run execbox");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    let Some(mut cmd) = execbox_cmd(&dir) else { return };
    let output = cmd.arg("version").output().expect("failed to run execbox");
    assert!(output.status.success(), "version command should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("execbox"),
        "version output should contain 'execbox', got: {}",
        stdout
    );
}

#[test]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    let Some(mut cmd) = execbox_cmd(&dir) else { return };
    let output = cmd.arg("--help").output().expect("failed to run execbox");
    assert!(output.status.success(), "--help should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["run", "check", "config", "doctor"] {
        assert!(
            stdout.contains(command),
            "help output should mention '{}', got: {}",
            command,
            stdout
        );
    }
}

#[test]
fn test_cli_unknown_command() {
    let dir = TempDir::new().unwrap();
    let Some(mut cmd) = execbox_cmd(&dir) else { return };
    let output = cmd.arg("nonexistent-command").output().unwrap();
    assert!(
        !output.status.success(),
        "unknown command should return non-zero exit code"
    );
}

#[test]
fn test_cli_config_path_follows_env() {
    let dir = TempDir::new().unwrap();
    let Some(mut cmd) = execbox_cmd(&dir) else { return };
    let output = cmd.args(["config", "path"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        dir.path().join("execbox.json5").display().to_string()
    );
}

#[test]
fn test_cli_config_init_then_validate() {
    let dir = TempDir::new().unwrap();
    let Some(mut init) = execbox_cmd(&dir) else { return };
    assert!(init.args(["config", "init"]).output().unwrap().status.success());
    assert!(dir.path().join("execbox.json5").exists());

    let mut again = execbox_cmd(&dir).unwrap();
    let output = again.args(["config", "init"]).output().unwrap();
    assert!(!output.status.success(), "init without --force must not overwrite");

    let mut validate = execbox_cmd(&dir).unwrap();
    let output = validate.args(["config", "validate"]).output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("valid"));
}

#[test]
fn test_cli_check_blocked_import() {
    let dir = TempDir::new().unwrap();
    let Some(mut cmd) = execbox_cmd(&dir) else { return };
    cmd.args(["check", "--json", "-"]);
    let output = run_with_stdin(cmd, "import subprocess\nsubprocess.run(['ls'])\n");
    assert!(!output.status.success());

    let verdict: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(verdict["passed"], false);
    assert_eq!(verdict["blocked"], "subprocess");
}

#[test]
fn test_cli_check_clean_source() {
    let dir = TempDir::new().unwrap();
    let Some(mut cmd) = execbox_cmd(&dir) else { return };
    cmd.arg("check");
    let output = run_with_stdin(cmd, "print(sum(range(10)))\n");
    assert!(output.status.success());
}

#[test]
fn test_cli_run_json_success() {
    if !require_python("test_cli_run_json_success") {
        return;
    }
    let dir = TempDir::new().unwrap();
    let Some(mut cmd) = execbox_cmd(&dir) else { return };
    cmd.args(["run", "--json", "--env", "GREETING=hello"]);
    let output = run_with_stdin(cmd, "import os\nprint(os.environ['GREETING'])\n");
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["output"], "hello\n");
    assert!(result["error"].is_null());
    assert!(result["execution_time"].as_f64().unwrap() > 0.0);
    assert!(result["execution_id"].is_string());
}

#[test]
fn test_cli_run_failure_exit_code() {
    if !require_python("test_cli_run_failure_exit_code") {
        return;
    }
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("boom.py");
    std::fs::write(&script, "raise ValueError('This is a test error')\n").unwrap();

    let Some(mut cmd) = execbox_cmd(&dir) else { return };
    let output = cmd
        .args(["run", "--json"])
        .arg(&script)
        .output()
        .unwrap();
    assert!(!output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["success"], false);
    assert_eq!(result["failure"], "runtime");
    assert!(result["error"]
        .as_str()
        .unwrap()
        .contains("ValueError: This is a test error"));
}

#[test]
fn test_cli_run_detached_timeout() {
    if !require_python("test_cli_run_detached_timeout") {
        return;
    }
    let dir = TempDir::new().unwrap();
    let Some(mut cmd) = execbox_cmd(&dir) else { return };
    cmd.args(["run", "--detach", "--json", "--timeout", "1"]);
    let output = run_with_stdin(cmd, "while True:\n    pass\n");
    assert!(!output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["failure"], "timeout");
    assert_eq!(result["error"], "Execution timed out after 1 seconds");
}

#[test]
fn test_cli_run_rejects_excessive_timeout() {
    let dir = TempDir::new().unwrap();
    let Some(mut cmd) = execbox_cmd(&dir) else { return };
    cmd.args(["run", "--timeout", "100000"]);
    let output = run_with_stdin(cmd, "print(1)\n");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("exceeds the maximum"));
}
