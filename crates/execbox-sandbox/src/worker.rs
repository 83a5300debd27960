//! Worker process launcher.
//!
//! Each run gets a fresh interpreter process in its own process group. The
//! source is delivered on stdin; the outcome comes back as a single frame on
//! stdout (see [`crate::channel`]).

use crate::channel::{self, ResultReceiver};
use crate::env::EnvironmentRules;
use crate::error::SandboxError;
use crate::limits::{LimitStrategy, ResourceLimits};
use crate::process;
use crate::Result;
use execbox_core::config::Config;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Python program that runs the submitted source and emits the frame.
const BOOTSTRAP: &str = include_str!("bootstrap.py");

/// Cap on retained worker stderr.
pub const STDERR_TAIL_BYTES: usize = 64 * 1024;

/// Creates worker processes.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    interpreter: String,
    interpreter_args: Vec<String>,
    working_dir: PathBuf,
    max_output_bytes: usize,
    limits: ResourceLimits,
    strategy: LimitStrategy,
    env_rules: EnvironmentRules,
}

impl WorkerLauncher {
    /// Create a launcher from configuration, resolving the limit strategy.
    pub fn from_config(config: &Config) -> Result<Self> {
        let strategy = LimitStrategy::resolve(config.limits.strategy)?;
        Ok(Self {
            interpreter: config.worker.interpreter.clone(),
            interpreter_args: config.worker.interpreter_args.clone(),
            working_dir: std::env::temp_dir(),
            max_output_bytes: usize::try_from(config.worker.max_output_bytes).unwrap_or(usize::MAX),
            limits: ResourceLimits::from_config(&config.limits),
            strategy,
            env_rules: EnvironmentRules::from_config(&config.worker),
        })
    }

    /// Active limit strategy.
    pub fn strategy(&self) -> LimitStrategy {
        self.strategy
    }

    /// Caps applied to every worker.
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Interpreter executable.
    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Reject environment overrides the policy forbids.
    pub fn check_env(&self, overrides: &HashMap<String, String>) -> Result<()> {
        self.env_rules.check_overrides(overrides)
    }

    /// Start a worker for `source`.
    pub fn launch(&self, source: &str, env: &HashMap<String, String>) -> Result<(Worker, ResultReceiver)> {
        let marker = format!("@@execbox-result-{}@@", execbox_core::id::uuid());

        let mut cmd = Command::new(&self.interpreter);
        cmd.args(&self.interpreter_args)
            .arg("-c")
            .arg(BOOTSTRAP)
            .arg(&marker)
            .arg(self.max_output_bytes.to_string())
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_clear()
            .envs(self.env_rules.build(env))
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            cmd.process_group(0);
            if self.strategy == LimitStrategy::Rlimit {
                let limits = self.limits;
                // SAFETY: apply_rlimits only calls setrlimit, which is
                // async-signal-safe.
                unsafe {
                    cmd.pre_exec(move || crate::limits::apply_rlimits(&limits));
                }
            }
        }

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                SandboxError::launch(format!("interpreter '{}' not found", self.interpreter))
            }
            _ => SandboxError::launch(format!("failed to spawn '{}': {}", self.interpreter, e)),
        })?;
        let pgid = child.id();
        debug!(pid = ?pgid, strategy = %self.strategy, "Worker started");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::launch("worker stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::launch("worker stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::launch("worker stderr unavailable"))?;

        let source = source.to_string();
        tokio::spawn(async move {
            let mut stdin = stdin;
            if let Err(e) = stdin.write_all(source.as_bytes()).await {
                // The worker died before reading its input; the supervisor
                // sees that as a lost worker.
                debug!("Failed to deliver source to worker: {}", e);
            }
            drop(stdin);
        });

        let frame_limit = self
            .max_output_bytes
            .saturating_mul(6)
            .saturating_add(64 * 1024);
        let (receiver, reader) = channel::spawn_reader(stdout, marker, frame_limit);
        let stderr = tokio::spawn(read_tail(stderr, STDERR_TAIL_BYTES));

        Ok((
            Worker {
                child,
                pgid,
                reader,
                stderr: Some(stderr),
            },
            receiver,
        ))
    }
}

/// A running worker process.
#[derive(Debug)]
pub struct Worker {
    child: Child,
    pgid: Option<u32>,
    reader: JoinHandle<()>,
    stderr: Option<JoinHandle<String>>,
}

impl Worker {
    /// OS process id (also the process group id).
    pub fn pid(&self) -> Option<u32> {
        self.pgid
    }

    /// Wait for the worker to exit. Cancel-safe.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Terminate the worker's whole process tree.
    pub async fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        process::terminate_tree(&mut self.child, self.pgid, grace).await
    }

    /// Collect the tail of the worker's raw stderr, waiting at most `grace`.
    pub async fn stderr_tail(&mut self, grace: Duration) -> String {
        let Some(handle) = self.stderr.take() else {
            return String::new();
        };
        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(tail)) => tail,
            Ok(Err(e)) => {
                warn!("Stderr reader failed: {}", e);
                String::new()
            }
            Err(_) => String::new(),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(handle) = self.stderr.take() {
            handle.abort();
        }
        self.reader.abort();
    }
}

/// Read a stream to the end, keeping only the last `cap` bytes.
async fn read_tail<R: AsyncRead + Unpin>(mut stream: R, cap: usize) -> String {
    let mut tail = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > cap * 2 {
                    tail.drain(..tail.len() - cap);
                }
            }
            Err(e) => {
                debug!("Stopped reading worker stderr: {}", e);
                break;
            }
        }
    }
    if tail.len() > cap {
        tail.drain(..tail.len() - cap);
    }
    String::from_utf8_lossy(&tail).into_owned()
}

/// Ask the interpreter for its version.
pub async fn interpreter_version(interpreter: &str) -> Result<String> {
    let output = Command::new(interpreter)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| SandboxError::launch(format!("interpreter '{}' unavailable: {}", interpreter, e)))?;

    if !output.status.success() {
        return Err(SandboxError::launch(format!(
            "interpreter '{}' failed: {}",
            interpreter,
            process::describe_exit(&output.status)
        )));
    }

    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    Ok(String::from_utf8_lossy(&text).trim().to_string())
}

/// Check whether `python3` is on PATH. Used by tests that need a real worker.
#[doc(hidden)]
pub fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
