//! Execution supervisor: owns the outcome race for one run.

use crate::channel::ChannelError;
use crate::limits::LimitStrategy;
use crate::monitor::{ResourceMonitor, ResourceViolation};
use crate::precheck::Precheck;
use crate::process;
use crate::record::{ExecutionId, ExecutionRecord, FailureKind, Outcome};
use crate::registry::ExecutionRegistry;
use crate::service::ExecutionRequest;
use crate::worker::{Worker, WorkerLauncher};
use crate::Result;
use execbox_core::config::Config;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What ended the race.
enum RaceOutcome {
    Cancelled,
    TimedOut,
    LimitExceeded(ResourceViolation),
    Received(std::result::Result<crate::channel::WorkerOutcome, ChannelError>),
    Exited(std::io::Result<ExitStatus>),
}

/// Drives runs from pre-check to their single terminal transition.
#[derive(Clone)]
pub struct Supervisor {
    registry: Arc<ExecutionRegistry>,
    precheck: Precheck,
    launcher: WorkerLauncher,
    terminate_grace: Duration,
    drain_grace: Duration,
    monitor_interval: Duration,
}

impl Supervisor {
    /// Create a supervisor with default grace periods.
    pub fn new(registry: Arc<ExecutionRegistry>, precheck: Precheck, launcher: WorkerLauncher) -> Self {
        Self {
            registry,
            precheck,
            launcher,
            terminate_grace: Duration::from_secs(1),
            drain_grace: Duration::from_millis(500),
            monitor_interval: Duration::from_millis(100),
        }
    }

    /// Build a supervisor and its collaborators from configuration.
    pub fn from_config(registry: Arc<ExecutionRegistry>, config: &Config) -> Result<Self> {
        Ok(Self::new(
            registry,
            Precheck::from_config(&config.precheck)?,
            WorkerLauncher::from_config(config)?,
        )
        .with_terminate_grace(Duration::from_millis(config.execution.terminate_grace_ms))
        .with_drain_grace(Duration::from_millis(config.execution.drain_grace_ms))
        .with_monitor_interval(Duration::from_millis(config.limits.monitor_interval_ms)))
    }

    /// Set the SIGTERM to SIGKILL grace period.
    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    /// Set how long to wait for a late frame after the worker exits.
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Set the sampling interval of the monitor strategy.
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// The launcher used for workers.
    pub fn launcher(&self) -> &WorkerLauncher {
        &self.launcher
    }

    /// The pre-check applied to every submission.
    pub fn precheck(&self) -> &Precheck {
        &self.precheck
    }

    /// Run one execution to its terminal state.
    ///
    /// The record must already exist in the registry. Returns the record as
    /// it stands afterwards, or `None` if it was evicted meanwhile.
    #[instrument(name = "execution", skip(self, id, request, cancel), fields(execution_id = %id))]
    pub async fn run(
        &self,
        id: ExecutionId,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Option<ExecutionRecord> {
        if let Err(e) = self.precheck.check(&request.source) {
            info!("Rejected by pre-check: {}", e);
            return self.finalize(
                &id,
                Outcome::failure(FailureKind::Validation, format!("Code validation error: {}", e)),
            );
        }

        if cancel.is_cancelled() {
            debug!("Cancelled before launch");
            return self.settle_cancelled(&id);
        }

        self.registry.mark_started(&id, Instant::now());
        let (mut worker, mut rx) = match self.launcher.launch(&request.source, &request.env) {
            Ok(pair) => pair,
            Err(e) => {
                error!("Failed to launch worker: {}", e);
                return self.finalize(
                    &id,
                    Outcome::failure(FailureKind::Supervisor, format!("Error running code: {}", e)),
                );
            }
        };

        let monitor = match (self.launcher.strategy(), worker.pid()) {
            (LimitStrategy::Monitor, Some(pid)) => Some(ResourceMonitor::new(
                pid,
                *self.launcher.limits(),
                self.monitor_interval,
            )),
            _ => None,
        };

        let race = tokio::select! {
            biased;
            _ = cancel.cancelled() => RaceOutcome::Cancelled,
            _ = tokio::time::sleep(request.timeout) => RaceOutcome::TimedOut,
            violation = watch(monitor.as_ref()) => RaceOutcome::LimitExceeded(violation),
            delivery = rx.recv() => RaceOutcome::Received(delivery),
            status = worker.wait() => RaceOutcome::Exited(status),
        };

        match race {
            RaceOutcome::Cancelled => {
                debug!("Cancelled - terminating worker");
                worker.terminate(self.terminate_grace).await;
                self.settle_cancelled(&id)
            }
            RaceOutcome::TimedOut => {
                info!(timeout_ms = request.timeout.as_millis() as u64, "Execution timed out");
                worker.terminate(self.terminate_grace).await;
                self.finalize(&id, Outcome::timeout(request.timeout))
            }
            RaceOutcome::LimitExceeded(violation) => {
                warn!("Resource limit exceeded: {}", violation);
                worker.terminate(self.terminate_grace).await;
                self.finalize(
                    &id,
                    Outcome::failure(FailureKind::ResourceLimit, violation.to_string()),
                )
            }
            RaceOutcome::Received(Ok(frame)) => {
                worker.terminate(self.terminate_grace).await;
                self.finalize(&id, frame.into_outcome())
            }
            RaceOutcome::Received(Err(ChannelError::Closed)) => {
                let status = match tokio::time::timeout(self.drain_grace, worker.wait()).await {
                    Ok(Ok(status)) => Some(status),
                    _ => None,
                };
                self.worker_lost(&id, &mut worker, status).await
            }
            RaceOutcome::Received(Err(e)) => {
                error!("Result channel failed: {}", e);
                worker.terminate(self.terminate_grace).await;
                self.finalize(
                    &id,
                    Outcome::failure(FailureKind::Supervisor, format!("Error running code: {}", e)),
                )
            }
            RaceOutcome::Exited(Ok(status)) => {
                // The frame may still be in the pipe when the exit is observed.
                match tokio::time::timeout(self.drain_grace, rx.recv()).await {
                    Ok(Ok(frame)) => {
                        worker.terminate(self.terminate_grace).await;
                        self.finalize(&id, frame.into_outcome())
                    }
                    _ => self.worker_lost(&id, &mut worker, Some(status)).await,
                }
            }
            RaceOutcome::Exited(Err(e)) => {
                error!("Failed to wait for worker: {}", e);
                worker.terminate(self.terminate_grace).await;
                self.finalize(
                    &id,
                    Outcome::failure(FailureKind::Supervisor, format!("Error running code: {}", e)),
                )
            }
        }
    }

    async fn worker_lost(
        &self,
        id: &ExecutionId,
        worker: &mut Worker,
        status: Option<ExitStatus>,
    ) -> Option<ExecutionRecord> {
        let status = match worker.terminate(self.terminate_grace).await {
            Some(terminated) => status.or(Some(terminated)),
            None => status,
        };
        let tail = worker.stderr_tail(self.drain_grace).await;

        let outcome = match status {
            Some(status) if process::hit_cpu_limit(&status) => Outcome::failure(
                FailureKind::ResourceLimit,
                format!(
                    "CPU time limit exceeded (limit {}s)",
                    self.launcher.limits().cpu_time_secs
                ),
            ),
            Some(status) => {
                let mut message = format!(
                    "Worker exited without a result ({})",
                    process::describe_exit(&status)
                );
                let tail = tail.trim_end();
                if !tail.is_empty() {
                    message.push('\n');
                    message.push_str(tail);
                }
                Outcome::failure(FailureKind::WorkerLost, message)
            }
            None => Outcome::failure(FailureKind::WorkerLost, "Execution failed with unknown error"),
        };
        warn!(status = ?status, "Worker lost");
        self.finalize(id, outcome)
    }

    fn settle_cancelled(&self, id: &ExecutionId) -> Option<ExecutionRecord> {
        let now = Instant::now();
        self.registry.update(id, |record| {
            if record.is_running() {
                record.stop(now);
            }
            record.clone()
        })
    }

    fn finalize(&self, id: &ExecutionId, outcome: Outcome) -> Option<ExecutionRecord> {
        let record = self.registry.finalize(id, outcome, Instant::now());
        match &record {
            Some(record) => info!(
                status = %record.status(),
                elapsed_ms = record.elapsed().as_millis() as u64,
                "Execution finished"
            ),
            None => debug!("Record evicted before finalization"),
        }
        record
    }
}

async fn watch(monitor: Option<&ResourceMonitor>) -> ResourceViolation {
    match monitor {
        Some(monitor) => monitor.watch().await,
        None => std::future::pending().await,
    }
}
