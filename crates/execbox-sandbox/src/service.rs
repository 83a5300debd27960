//! Execution service: the operations offered to callers.
//!
//! Transport is out of scope; a CLI, HTTP layer or test drives this type
//! directly.

use crate::error::SandboxError;
use crate::limits::LimitStrategy;
use crate::record::{ExecutionId, ExecutionRecord, ExecutionStatus, FailureKind, Outcome};
use crate::registry::ExecutionRegistry;
use crate::supervisor::Supervisor;
use crate::sweeper::RetentionSweeper;
use crate::Result;
use execbox_core::config::Config;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Timeout used when a request does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A request to run source text.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Source text to run.
    pub source: String,
    /// Wall-clock limit for the run.
    pub timeout: Duration,
    /// Environment overrides for this run only.
    pub env: HashMap<String, String>,
}

impl ExecutionRequest {
    /// Create a request with the default timeout and no overrides.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timeout: DEFAULT_TIMEOUT,
            env: HashMap::new(),
        }
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables.
    pub fn with_envs(mut self, vars: HashMap<String, String>) -> Self {
        self.env.extend(vars);
        self
    }
}

fn as_secs_f64<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Final result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    #[serde(rename = "execution_time", serialize_with = "as_secs_f64")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    fn from_record(record: &ExecutionRecord) -> Self {
        Self {
            execution_id: record.id().clone(),
            success: record.status() == ExecutionStatus::Completed,
            output: record.output().to_string(),
            error: record.error().map(str::to_string),
            elapsed: record.elapsed(),
            failure: record.failure(),
        }
    }
}

/// Poll response for a run.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
    #[serde(rename = "execution_time", serialize_with = "as_secs_f64")]
    pub elapsed: Duration,
    /// True once the run is in any terminal state.
    pub completed: bool,
}

/// Response to a stop request.
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub success: bool,
    pub message: String,
}

/// Liveness probe response.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub status: String,
    pub version: String,
    pub active_executions: usize,
    pub limit_strategy: LimitStrategy,
}

/// Background sweeper owned by a started service.
struct SweeperHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs executions and tracks their records.
pub struct ExecutionService {
    registry: Arc<ExecutionRegistry>,
    supervisor: Supervisor,
    max_timeout: Duration,
    staleness_ceiling: Duration,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl ExecutionService {
    /// Build a service without starting the retention sweeper.
    pub fn new(config: &Config) -> Result<Self> {
        let registry = Arc::new(ExecutionRegistry::new());
        let supervisor = Supervisor::from_config(Arc::clone(&registry), config)?;
        Ok(Self::with_supervisor(registry, supervisor, config))
    }

    /// Build a service around an existing registry and supervisor.
    pub fn with_supervisor(registry: Arc<ExecutionRegistry>, supervisor: Supervisor, config: &Config) -> Self {
        Self {
            registry,
            supervisor,
            max_timeout: Duration::from_secs(config.execution.max_timeout_secs),
            staleness_ceiling: Duration::from_secs(config.execution.staleness_ceiling_secs),
            sweeper: Mutex::new(None),
        }
    }

    /// Build a service and start its retention sweeper.
    pub fn start(config: &Config) -> Result<Self> {
        let service = Self::new(config)?;
        let shutdown = CancellationToken::new();
        let task = RetentionSweeper::from_config(Arc::clone(&service.registry), &config.retention)
            .spawn(shutdown.clone());
        *service.sweeper.lock() = Some(SweeperHandle { shutdown, task });
        info!(
            strategy = %service.supervisor.launcher().strategy(),
            "Execution service started"
        );
        Ok(service)
    }

    /// The record store.
    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.registry
    }

    /// The supervisor used for every run.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    fn validate(&self, request: &ExecutionRequest) -> Result<()> {
        if request.timeout.is_zero() {
            return Err(SandboxError::invalid_request("timeout must be greater than zero"));
        }
        if request.timeout > self.max_timeout {
            return Err(SandboxError::invalid_request(format!(
                "timeout of {} seconds exceeds the maximum of {} seconds",
                crate::format_secs(request.timeout),
                crate::format_secs(self.max_timeout)
            )));
        }
        self.supervisor.launcher().check_env(&request.env)
    }

    fn admit(&self, request: &ExecutionRequest) -> Result<(ExecutionId, CancellationToken)> {
        self.validate(request)?;
        let id = ExecutionId::generate();
        let cancel = self.registry.create(ExecutionRecord::new(id.clone()))?;
        Ok((id, cancel))
    }

    /// Run a request and wait for its result.
    ///
    /// The run is tracked like any other, so it can be polled or stopped
    /// from elsewhere while this call waits.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let (id, cancel) = self.admit(&request)?;
        match self.supervisor.run(id.clone(), request, cancel).await {
            Some(record) => Ok(ExecutionResult::from_record(&record)),
            None => Err(SandboxError::NotFound(id)),
        }
    }

    /// Start a request in the background and return its id immediately.
    pub fn submit(&self, request: ExecutionRequest) -> Result<ExecutionId> {
        let (id, cancel) = self.admit(&request)?;
        let supervisor = self.supervisor.clone();
        let run_id = id.clone();
        tokio::spawn(async move {
            supervisor.run(run_id, request, cancel).await;
        });
        info!(execution_id = %id, "Execution submitted");
        Ok(id)
    }

    /// Poll a run.
    pub fn status(&self, id: &ExecutionId) -> Result<StatusReport> {
        self.resolve_staleness(id);
        let record = self.registry.get(id)?;
        Ok(StatusReport {
            execution_id: record.id().clone(),
            status: record.status(),
            elapsed: record.elapsed(),
            completed: record.status().is_terminal(),
        })
    }

    /// Fetch the result of a finished run.
    pub fn result(&self, id: &ExecutionId) -> Result<ExecutionResult> {
        self.resolve_staleness(id);
        let record = self.registry.get(id)?;
        if record.is_running() {
            return Err(SandboxError::InProgress(id.clone()));
        }
        Ok(ExecutionResult::from_record(&record))
    }

    /// Stop a run. Succeeds for runs in any state.
    pub fn stop(&self, id: &ExecutionId) -> Result<StopReport> {
        let record = self.registry.force_stop(id, Instant::now())?;
        info!(execution_id = %id, elapsed_ms = record.elapsed().as_millis() as u64, "Execution stopped");
        Ok(StopReport {
            success: true,
            message: "Execution stopped".to_string(),
        })
    }

    /// Liveness probe. Read-only.
    pub fn probe(&self) -> ServiceStatus {
        ServiceStatus {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            active_executions: self.registry.running_count(),
            limit_strategy: self.supervisor.launcher().strategy(),
        }
    }

    /// Stop the sweeper and every running execution.
    pub async fn shutdown(&self) {
        let handle = self.sweeper.lock().take();

        let now = Instant::now();
        let running = self.registry.running_ids();
        for id in &running {
            if let Err(e) = self.registry.force_stop(id, now) {
                warn!(execution_id = %id, "Failed to stop execution during shutdown: {}", e);
            }
        }

        if let Some(SweeperHandle { shutdown, task }) = handle {
            shutdown.cancel();
            if let Err(e) = task.await {
                warn!("Retention sweeper task failed: {}", e);
            }
        }
        info!(stopped = running.len(), "Execution service shut down");
    }

    /// Reclassify a running record that outlived the staleness ceiling.
    fn resolve_staleness(&self, id: &ExecutionId) {
        let now = Instant::now();
        let ceiling = self.staleness_ceiling;
        let staled = self.registry.update(id, |record| {
            record.is_running()
                && record.running_for(now) > ceiling
                && record.finish(
                    Outcome::failure(
                        FailureKind::Stale,
                        format!(
                            "Execution exceeded the staleness ceiling of {} seconds",
                            crate::format_secs(ceiling)
                        ),
                    ),
                    now,
                )
        });
        if staled == Some(true) {
            warn!(execution_id = %id, "Stale execution marked as failed");
            self.registry.cancel(id);
        }
    }
}
