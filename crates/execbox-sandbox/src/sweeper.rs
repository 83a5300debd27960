//! Time-based retention for finished execution records.

use crate::registry::ExecutionRegistry;
use execbox_core::config::RetentionConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodically evicts terminal records older than the retention window.
pub struct RetentionSweeper {
    registry: Arc<ExecutionRegistry>,
    window: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    /// Create a sweeper.
    pub fn new(registry: Arc<ExecutionRegistry>, window: Duration, interval: Duration) -> Self {
        Self {
            registry,
            window,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Create a sweeper from the retention configuration.
    pub fn from_config(registry: Arc<ExecutionRegistry>, config: &RetentionConfig) -> Self {
        Self::new(
            registry,
            Duration::from_secs(config.window_secs),
            Duration::from_secs(config.sweep_interval_secs),
        )
    }

    /// Evict every terminal record that completed more than one window before `now`.
    ///
    /// Returns the number of records evicted. Records that vanish between the
    /// scan and the eviction are logged and skipped.
    pub fn sweep_once(&self, now: Instant) -> usize {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return 0;
        };

        let mut evicted = 0;
        for id in self.registry.list_ids_older_than(cutoff) {
            match self.registry.evict(&id) {
                Ok(_) => evicted += 1,
                Err(e) => warn!(execution_id = %id, "Failed to evict execution: {}", e),
            }
        }

        if evicted > 0 {
            info!(evicted, remaining = self.registry.len(), "Swept old executions");
        } else {
            debug!(remaining = self.registry.len(), "Nothing to sweep");
        }
        evicted
    }

    /// Sweep on every interval until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Retention sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_once(Instant::now());
                }
            }
        }
    }

    /// Run the sweeper as a background task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        info!(
            window_secs = self.window.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Starting retention sweeper"
        );
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
