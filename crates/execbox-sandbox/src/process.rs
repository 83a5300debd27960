//! Process-group signalling and termination.

use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Send a signal to every process in a group.
///
/// Returns false when the group no longer exists.
#[cfg(unix)]
pub fn signal_group(pgid: u32, signal: nix::sys::signal::Signal) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            warn!(pgid, signal = %signal, "Failed to signal process group: {}", e);
            false
        }
    }
}

/// Terminate a worker and everything it spawned.
///
/// Sends SIGTERM to the group, waits up to `grace` for the leader to exit,
/// then sends SIGKILL to whatever is left. The group is swept with SIGKILL
/// even when the leader exited on its own, since children may outlive it.
/// Returns the leader's exit status when it could be collected.
#[cfg(unix)]
pub async fn terminate_tree(child: &mut Child, pgid: Option<u32>, grace: Duration) -> Option<ExitStatus> {
    use nix::sys::signal::Signal;

    if let Ok(Some(status)) = child.try_wait() {
        if let Some(pgid) = pgid {
            signal_group(pgid, Signal::SIGKILL);
        }
        return Some(status);
    }

    match pgid {
        Some(pgid) => {
            signal_group(pgid, Signal::SIGTERM);
        }
        None => {
            let _ = child.start_kill();
        }
    }

    let status = match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            warn!("Failed to wait for worker: {}", e);
            None
        }
        Err(_) => {
            debug!(grace_ms = grace.as_millis() as u64, "Grace period expired - killing worker");
            None
        }
    };

    if let Some(pgid) = pgid {
        signal_group(pgid, Signal::SIGKILL);
    }

    match status {
        Some(status) => Some(status),
        None => {
            let _ = child.start_kill();
            child.wait().await.ok()
        }
    }
}

#[cfg(not(unix))]
pub async fn terminate_tree(child: &mut Child, _pgid: Option<u32>, grace: Duration) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }
    let _ = child.start_kill();
    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        _ => None,
    }
}

/// Signal that ended the process, if any.
pub fn exit_signal(status: &ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        None
    }
}

/// Check whether the process died from the CPU-time cap.
pub fn hit_cpu_limit(status: &ExitStatus) -> bool {
    #[cfg(unix)]
    {
        exit_signal(status) == Some(libc::SIGXCPU)
    }
    #[cfg(not(unix))]
    {
        let _ = status;
        false
    }
}

/// Human-readable exit description ("exit code 1", "signal 9 (SIGKILL)").
pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {}", code);
    }
    match exit_signal(status) {
        Some(signal) => match signal_name(signal) {
            Some(name) => format!("signal {} ({})", signal, name),
            None => format!("signal {}", signal),
        },
        None => "unknown exit status".to_string(),
    }
}

#[cfg(unix)]
fn signal_name(signal: i32) -> Option<&'static str> {
    nix::sys::signal::Signal::try_from(signal)
        .ok()
        .map(|s| s.as_str())
}

#[cfg(not(unix))]
fn signal_name(_signal: i32) -> Option<&'static str> {
    None
}
