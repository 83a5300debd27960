//! Sandbox error types.

use crate::record::ExecutionId;
use std::io;
use thiserror::Error;

/// Errors surfaced to callers of the sandbox.
///
/// Failures of the submitted code itself (exceptions, timeouts, resource
/// limits) are not errors at this level: they become terminal execution
/// records. See [`crate::record::FailureKind`].
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Source text matched the pre-check denylist.
    #[error("Blocked import detected: {pattern}")]
    Blocked { pattern: String },

    /// Unknown execution id.
    #[error("Execution not found: {0}")]
    NotFound(ExecutionId),

    /// The execution has not reached a terminal state.
    #[error("Execution still in progress: {0}")]
    InProgress(ExecutionId),

    /// An execution with this id already exists.
    #[error("Execution already exists: {0}")]
    AlreadyExists(ExecutionId),

    /// The request was rejected before submission.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The worker process could not be started.
    #[error("Failed to launch worker: {0}")]
    Launch(String),

    /// The result channel failed.
    #[error("Result channel failure: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] execbox_core::ConfigError),

    /// Requested feature is not available on this platform.
    #[error("Sandbox feature not supported on this platform: {0}")]
    UnsupportedPlatform(String),
}

impl SandboxError {
    /// Create a new launch error.
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    /// Create a new channel error.
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    /// Create a new invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Check if this error refers to an unknown execution.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
