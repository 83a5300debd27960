//! External resource monitoring for the `monitor` limit strategy.
//!
//! Samples `/proc/<pid>/stat` of the worker on an interval and reports the
//! first cap it exceeds. Only the worker process itself is sampled, not its
//! descendants.

use crate::limits::ResourceLimits;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

/// Check whether this host can sample processes through `/proc`.
pub fn is_supported() -> bool {
    cfg!(target_os = "linux") && std::path::Path::new("/proc/self/stat").exists()
}

/// Resource usage at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSnapshot {
    /// User plus system CPU time.
    pub cpu_time: Duration,
    /// Virtual memory size in bytes.
    pub virtual_memory_bytes: u64,
}

/// Kind of cap that was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationType {
    CpuExceeded,
    MemoryExceeded,
}

/// A cap exceeded by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceViolation {
    pub violation_type: ViolationType,
    /// Observed value (seconds or bytes).
    pub current_value: u64,
    /// Configured cap (seconds or bytes).
    pub limit_value: u64,
}

impl fmt::Display for ResourceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.violation_type {
            ViolationType::CpuExceeded => write!(
                f,
                "CPU time limit exceeded ({}s used, limit {}s)",
                self.current_value, self.limit_value
            ),
            ViolationType::MemoryExceeded => write!(
                f,
                "Memory limit exceeded ({} used, limit {})",
                format_bytes(self.current_value),
                format_bytes(self.limit_value)
            ),
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    if bytes >= MB {
        format!("{} MB", bytes / MB)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Compare a snapshot against the caps.
///
/// CPU is checked first. A cap of zero is treated as unset.
pub fn check_limits(snapshot: &ResourceSnapshot, limits: &ResourceLimits) -> Option<ResourceViolation> {
    if limits.cpu_time_secs > 0 && snapshot.cpu_time > limits.cpu_time() {
        return Some(ResourceViolation {
            violation_type: ViolationType::CpuExceeded,
            current_value: snapshot.cpu_time.as_secs(),
            limit_value: limits.cpu_time_secs,
        });
    }
    if limits.memory_bytes > 0 && snapshot.virtual_memory_bytes > limits.memory_bytes {
        return Some(ResourceViolation {
            violation_type: ViolationType::MemoryExceeded,
            current_value: snapshot.virtual_memory_bytes,
            limit_value: limits.memory_bytes,
        });
    }
    None
}

/// Parse the contents of `/proc/<pid>/stat`.
///
/// The command name may contain spaces and parentheses, so fields are
/// counted from the last `)`.
pub fn parse_stat(content: &str, ticks_per_sec: u64) -> Option<ResourceSnapshot> {
    let rest = &content[content.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();

    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let vsize: u64 = fields.get(20)?.parse().ok()?;

    let ticks = utime.saturating_add(stime);
    let ticks_per_sec = ticks_per_sec.max(1);
    let cpu_time = Duration::from_secs(ticks / ticks_per_sec)
        + Duration::from_nanos((ticks % ticks_per_sec) * 1_000_000_000 / ticks_per_sec);

    Some(ResourceSnapshot {
        cpu_time,
        virtual_memory_bytes: vsize,
    })
}

/// Clock ticks per second used by `/proc` CPU counters.
#[cfg(unix)]
fn clock_ticks() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as u64
    } else {
        100
    }
}

#[cfg(not(unix))]
fn clock_ticks() -> u64 {
    100
}

/// Take one sample of a process. `None` once the process is gone.
pub fn sample(pid: u32) -> Option<ResourceSnapshot> {
    let content = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_stat(&content, clock_ticks())
}

/// Interval sampler for a single worker.
#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    pid: u32,
    limits: ResourceLimits,
    interval: Duration,
}

impl ResourceMonitor {
    /// Create a monitor for a worker process.
    pub fn new(pid: u32, limits: ResourceLimits, interval: Duration) -> Self {
        Self {
            pid,
            limits,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Resolve with the first violation.
    ///
    /// Never resolves if the worker stays within its caps or goes away; the
    /// caller races this against the worker's exit.
    pub async fn watch(&self) -> ResourceViolation {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(snapshot) = sample(self.pid) else {
                debug!(pid = self.pid, "Worker no longer sampleable - monitor idle");
                return std::future::pending().await;
            };
            trace!(
                pid = self.pid,
                cpu_ms = snapshot.cpu_time.as_millis() as u64,
                vsize = snapshot.virtual_memory_bytes,
                "Resource sample"
            );
            if let Some(violation) = check_limits(&snapshot, &self.limits) {
                return violation;
            }
        }
    }
}
