//! Configuration schema definitions.

use serde::{Deserialize, Serialize};

/// Main execbox configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Timeouts and supervision timings.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// CPU and memory caps for workers.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Worker process settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Static pre-check settings.
    #[serde(default)]
    pub precheck: PrecheckConfig,

    /// Retention of finished execution records.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Timeout applied when a request does not carry one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Largest timeout a request may ask for.
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL when terminating a worker.
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,

    /// How long to wait for a late result after the worker exits.
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,

    /// Running records older than this are reported as failed on the next read.
    #[serde(default = "default_staleness_ceiling_secs")]
    pub staleness_ceiling_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_timeout_secs() -> u64 {
    300
}

fn default_terminate_grace_ms() -> u64 {
    1000
}

fn default_drain_grace_ms() -> u64 {
    500
}

fn default_staleness_ceiling_secs() -> u64 {
    300 // 5 minutes
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            terminate_grace_ms: default_terminate_grace_ms(),
            drain_grace_ms: default_drain_grace_ms(),
            staleness_ceiling_secs: default_staleness_ceiling_secs(),
        }
    }
}

/// How resource limits are enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitMode {
    /// Use OS limits where available, otherwise fall back to monitoring.
    #[default]
    Auto,
    /// Require OS-level limits.
    Rlimit,
    /// Sample the worker externally and kill it on violation.
    Monitor,
    /// Do not enforce CPU or memory caps.
    Off,
}

impl std::str::FromStr for LimitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "rlimit" => Ok(Self::Rlimit),
            "monitor" => Ok(Self::Monitor),
            "off" => Ok(Self::Off),
            other => Err(format!("unknown limit strategy '{}'", other)),
        }
    }
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum CPU time in seconds.
    #[serde(default = "default_cpu_time")]
    pub cpu_time_secs: u64,

    /// Maximum address space in bytes.
    #[serde(default = "default_memory")]
    pub memory_bytes: u64,

    /// Enforcement strategy.
    #[serde(default)]
    pub strategy: LimitMode,

    /// Sampling interval for the monitor strategy.
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

fn default_cpu_time() -> u64 {
    30
}

fn default_memory() -> u64 {
    512 * 1024 * 1024 // 512 MB
}

fn default_monitor_interval_ms() -> u64 {
    100
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            cpu_time_secs: default_cpu_time(),
            memory_bytes: default_memory(),
            strategy: LimitMode::default(),
            monitor_interval_ms: default_monitor_interval_ms(),
        }
    }
}

/// Worker process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Interpreter executable.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Arguments passed to the interpreter before the bootstrap.
    #[serde(default = "default_interpreter_args")]
    pub interpreter_args: Vec<String>,

    /// Maximum captured stdout in bytes.
    #[serde(default = "default_max_output")]
    pub max_output_bytes: u64,

    /// Inherit the host environment (minus blocked variables).
    #[serde(default = "default_true")]
    pub inherit_env: bool,

    /// Additional environment variables that may never reach a worker.
    #[serde(default)]
    pub blocked_env: Vec<String>,
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_interpreter_args() -> Vec<String> {
    vec!["-I".to_string()]
}

fn default_max_output() -> u64 {
    10 * 1024 * 1024 // 10 MB
}

fn default_true() -> bool {
    true
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            interpreter_args: default_interpreter_args(),
            max_output_bytes: default_max_output(),
            inherit_env: true,
            blocked_env: Vec::new(),
        }
    }
}

/// Static pre-check configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrecheckConfig {
    /// Modules or calls blocked in addition to the built-in denylist.
    #[serde(default)]
    pub blocked_imports: Vec<String>,
}

/// Retention configuration for finished executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Age after which finished records are evicted.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Sweep period.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_window_secs() -> u64 {
    3600 // 1 hour
}

fn default_sweep_interval_secs() -> u64 {
    300 // 5 minutes
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
