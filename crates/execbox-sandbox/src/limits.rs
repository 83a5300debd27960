//! Resource limits for worker processes.

use crate::error::SandboxError;
use crate::Result;
use execbox_core::config::{LimitMode, LimitsConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// CPU and memory caps for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum CPU time in seconds.
    #[serde(default = "default_cpu_time")]
    pub cpu_time_secs: u64,

    /// Maximum address space in bytes.
    #[serde(default = "default_memory")]
    pub memory_bytes: u64,
}

fn default_cpu_time() -> u64 {
    30
}

fn default_memory() -> u64 {
    512 * 1024 * 1024 // 512 MB
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_time_secs: default_cpu_time(),
            memory_bytes: default_memory(),
        }
    }
}

impl ResourceLimits {
    /// Create new resource limits with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the caps from the limits configuration.
    pub fn from_config(config: &LimitsConfig) -> Self {
        Self {
            cpu_time_secs: config.cpu_time_secs,
            memory_bytes: config.memory_bytes,
        }
    }

    /// Builder-style method to set CPU time limit.
    pub fn with_cpu_time(mut self, secs: u64) -> Self {
        self.cpu_time_secs = secs;
        self
    }

    /// Builder-style method to set memory limit.
    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    /// CPU cap as a duration.
    pub fn cpu_time(&self) -> Duration {
        Duration::from_secs(self.cpu_time_secs)
    }
}

/// How the caps are enforced for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitStrategy {
    /// Kernel-enforced `setrlimit` in the child before exec.
    Rlimit,
    /// The supervisor samples the worker and kills it on violation.
    Monitor,
    /// Only the wall-clock timeout applies.
    Unenforced,
}

impl LimitStrategy {
    /// Pick the strategy for a configured mode on this platform.
    ///
    /// `auto` never fails; explicit modes fail when the platform lacks the
    /// mechanism.
    pub fn resolve(mode: LimitMode) -> Result<Self> {
        match mode {
            LimitMode::Auto => Ok(if cfg!(unix) {
                Self::Rlimit
            } else if crate::monitor::is_supported() {
                Self::Monitor
            } else {
                Self::Unenforced
            }),
            LimitMode::Rlimit if cfg!(unix) => Ok(Self::Rlimit),
            LimitMode::Rlimit => Err(SandboxError::UnsupportedPlatform(
                "rlimit strategy requires a Unix host".to_string(),
            )),
            LimitMode::Monitor if crate::monitor::is_supported() => Ok(Self::Monitor),
            LimitMode::Monitor => Err(SandboxError::UnsupportedPlatform(
                "monitor strategy requires a readable /proc".to_string(),
            )),
            LimitMode::Off => Ok(Self::Unenforced),
        }
    }

    /// Get the strategy name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rlimit => "rlimit",
            Self::Monitor => "monitor",
            Self::Unenforced => "unenforced",
        }
    }

    /// Check whether memory is capped under this strategy.
    pub fn enforces_memory(&self) -> bool {
        match self {
            Self::Rlimit => cfg!(any(target_os = "linux", target_os = "android")),
            Self::Monitor => true,
            Self::Unenforced => false,
        }
    }
}

impl fmt::Display for LimitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply the caps to the calling process.
///
/// Runs in the forked child before exec, so it only makes raw syscalls.
#[cfg(unix)]
pub(crate) fn apply_rlimits(limits: &ResourceLimits) -> std::io::Result<()> {
    fn set(resource: libc::c_int, soft: u64, hard: u64) -> std::io::Result<()> {
        let limit = libc::rlimit {
            rlim_cur: soft as libc::rlim_t,
            rlim_max: hard as libc::rlim_t,
        };
        // SAFETY: setrlimit only reads the struct we pass.
        if unsafe { libc::setrlimit(resource as _, &limit) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    // The kernel sends SIGKILL instead of SIGXCPU when both limits are equal.
    set(
        libc::RLIMIT_CPU as libc::c_int,
        limits.cpu_time_secs,
        limits.cpu_time_secs.saturating_add(1),
    )?;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    set(
        libc::RLIMIT_AS as libc::c_int,
        limits.memory_bytes,
        limits.memory_bytes,
    )?;

    set(libc::RLIMIT_CORE as libc::c_int, 0, 0)?;
    Ok(())
}
