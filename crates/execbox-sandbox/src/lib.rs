//! Isolated execution engine for execbox.
//!
//! This crate runs untrusted source text in a separate worker process and
//! tracks each run as a stateful record:
//! - Static pre-check: best-effort denylist applied before anything is spawned
//! - Worker launcher: one interpreter process per run, with CPU/memory caps
//! - Supervisor: races result, timeout and cancellation, then finalizes exactly once
//! - Registry and sweeper: concurrent record store with time-based retention
//!
//! The isolation boundary is the OS process plus coarse resource limits. It is
//! not a defence against a determined adversary.

pub mod channel;
pub mod env;
pub mod error;
pub mod limits;
pub mod monitor;
pub mod precheck;
pub mod process;
pub mod record;
pub mod registry;
pub mod service;
pub mod supervisor;
pub mod sweeper;
pub mod worker;

pub use error::SandboxError;
pub use limits::{LimitStrategy, ResourceLimits};
pub use precheck::Precheck;
pub use record::{ExecutionId, ExecutionRecord, ExecutionStatus, FailureKind};
pub use registry::ExecutionRegistry;
pub use service::{
    ExecutionRequest, ExecutionResult, ExecutionService, ServiceStatus, StatusReport, StopReport,
};
pub use supervisor::Supervisor;
pub use sweeper::RetentionSweeper;
pub use worker::WorkerLauncher;

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Render a duration in seconds, dropping the fraction when whole ("1", "1.25").
pub(crate) fn format_secs(duration: std::time::Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        duration.as_secs_f64().to_string()
    }
}
