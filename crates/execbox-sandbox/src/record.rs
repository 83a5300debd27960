//! Execution records and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Elapsed time assumed for a stopped run that never recorded a start.
const UNSTARTED_ELAPSED: Duration = Duration::from_secs(1);

/// Opaque execution identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(execbox_core::id::uuid())
    }

    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ExecutionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// The run has not finished.
    Running,
    /// The worker returned a success frame.
    Completed,
    /// The run failed; see the record's failure kind.
    Error,
    /// The run was cancelled by an explicit stop request.
    Stopped,
}

impl ExecutionStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Get the status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run did not complete successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rejected by the static pre-check; no worker was spawned.
    Validation,
    /// Uncaught exception inside the worker.
    Runtime,
    /// The timeout elapsed before a result arrived.
    Timeout,
    /// A CPU or memory cap was hit.
    ResourceLimit,
    /// External stop request.
    Stopped,
    /// The worker exited without delivering a result.
    WorkerLost,
    /// A running record outlived the staleness ceiling.
    Stale,
    /// Internal failure unrelated to the submitted code.
    Supervisor,
}

impl FailureKind {
    /// Get the kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Runtime => "runtime",
            Self::Timeout => "timeout",
            Self::ResourceLimit => "resource_limit",
            Self::Stopped => "stopped",
            Self::WorkerLost => "worker_lost",
            Self::Stale => "stale",
            Self::Supervisor => "supervisor",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal payload written into a record exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Successful run with its captured stdout.
    Success { output: String },
    /// Failed run with a human-readable diagnostic.
    Failure { kind: FailureKind, message: String },
}

impl Outcome {
    /// Create a failure outcome.
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    /// Timeout failure naming the configured timeout.
    pub fn timeout(timeout: Duration) -> Self {
        Self::failure(
            FailureKind::Timeout,
            format!(
                "Execution timed out after {} seconds",
                crate::format_secs(timeout)
            ),
        )
    }

    /// Check if this is a success outcome.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Persisted state for one run.
///
/// Fields are read through accessors; transitions happen only inside the
/// registry so that every write is serialized with readers and the sweeper.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    id: ExecutionId,
    status: ExecutionStatus,
    output: String,
    error: Option<String>,
    failure: Option<FailureKind>,
    created_at: DateTime<Utc>,
    #[serde(skip)]
    submitted_at: Instant,
    #[serde(skip)]
    started_at: Option<Instant>,
    #[serde(skip)]
    completed_at: Option<Instant>,
    #[serde(skip)]
    final_elapsed: Option<Duration>,
}

impl ExecutionRecord {
    /// Create a new running record.
    pub fn new(id: ExecutionId) -> Self {
        Self {
            id,
            status: ExecutionStatus::Running,
            output: String::new(),
            error: None,
            failure: None,
            created_at: Utc::now(),
            submitted_at: Instant::now(),
            started_at: None,
            completed_at: None,
            final_elapsed: None,
        }
    }

    /// Get the execution ID.
    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    /// Get the current status.
    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Captured standard output (empty until terminal).
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Diagnostic text for failed or stopped runs.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Failure classification, if the run failed.
    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    /// Wall-clock creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Monotonic submission time.
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Monotonic start time, once the supervisor has begun the run.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Monotonic completion time; set iff the record is terminal.
    pub fn completed_at(&self) -> Option<Instant> {
        self.completed_at
    }

    /// Check whether the run is still in flight.
    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    /// Elapsed run time as observed at `now`.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        if let Some(elapsed) = self.final_elapsed {
            return elapsed;
        }
        match self.started_at {
            Some(started) => now.saturating_duration_since(started),
            None => Duration::ZERO,
        }
    }

    /// Elapsed run time as observed now.
    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    /// Age of a running record, measured from its start (or submission).
    pub(crate) fn running_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at.unwrap_or(self.submitted_at))
    }

    pub(crate) fn mark_started(&mut self, at: Instant) {
        if self.is_running() && self.started_at.is_none() {
            self.started_at = Some(at);
        }
    }

    /// Apply the single terminal transition. Returns false if already terminal.
    pub(crate) fn finish(&mut self, outcome: Outcome, at: Instant) -> bool {
        if !self.is_running() {
            return false;
        }

        match outcome {
            Outcome::Success { output } => {
                self.status = ExecutionStatus::Completed;
                self.output = output;
            }
            Outcome::Failure { kind, message } => {
                self.status = ExecutionStatus::Error;
                self.failure = Some(kind);
                self.error = Some(message);
            }
        }
        let started = self.started_at.unwrap_or(self.submitted_at);
        self.stamp_completion(started, at);
        true
    }

    /// Force the record into `stopped`, whatever its current status.
    ///
    /// Output and error text of an already-terminal record are kept.
    pub(crate) fn stop(&mut self, at: Instant) {
        if self.is_running() {
            self.failure = Some(FailureKind::Stopped);
            self.error = Some("Execution stopped by request".to_string());
        }
        self.status = ExecutionStatus::Stopped;
        let started = self
            .started_at
            .unwrap_or_else(|| at.checked_sub(UNSTARTED_ELAPSED).unwrap_or(at));
        self.stamp_completion(started, at);
    }

    fn stamp_completion(&mut self, started: Instant, at: Instant) {
        self.completed_at = Some(at);
        self.final_elapsed = Some(at.saturating_duration_since(started));
    }
}
