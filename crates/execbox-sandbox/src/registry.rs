//! Concurrency-safe store of execution records.

use crate::error::SandboxError;
use crate::record::{ExecutionId, ExecutionRecord, Outcome};
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A record plus the token that cancels its supervisor.
struct Slot {
    record: ExecutionRecord,
    cancel: CancellationToken,
}

/// Registry mapping execution IDs to their records.
///
/// One mutex guards the whole map. It is held only for in-memory work and
/// never across an `.await`, so contention stays negligible next to the cost
/// of running a worker.
pub struct ExecutionRegistry {
    slots: Mutex<HashMap<ExecutionId, Slot>>,
}

impl ExecutionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::with_capacity(16)),
        }
    }

    /// Insert a new record. Returns the cancellation token for its run.
    pub fn create(&self, record: ExecutionRecord) -> Result<CancellationToken> {
        let mut slots = self.slots.lock();
        if slots.contains_key(record.id()) {
            return Err(SandboxError::AlreadyExists(record.id().clone()));
        }

        let cancel = CancellationToken::new();
        let id = record.id().clone();
        slots.insert(
            id,
            Slot {
                record,
                cancel: cancel.clone(),
            },
        );
        Ok(cancel)
    }

    /// Get a snapshot of a record.
    pub fn get(&self, id: &ExecutionId) -> Result<ExecutionRecord> {
        self.slots
            .lock()
            .get(id)
            .map(|slot| slot.record.clone())
            .ok_or_else(|| SandboxError::NotFound(id.clone()))
    }

    /// Atomically inspect or transition a record.
    ///
    /// Returns `None` when the record no longer exists (for example because the
    /// sweeper evicted it concurrently).
    pub fn update<R>(
        &self,
        id: &ExecutionId,
        mutator: impl FnOnce(&mut ExecutionRecord) -> R,
    ) -> Option<R> {
        let mut slots = self.slots.lock();
        slots.get_mut(id).map(|slot| mutator(&mut slot.record))
    }

    /// Record the moment the supervisor started the run.
    pub fn mark_started(&self, id: &ExecutionId, at: Instant) {
        self.update(id, |record| record.mark_started(at));
    }

    /// Apply the terminal transition for a run.
    ///
    /// Returns the record as it stands afterwards, or `None` if it was evicted.
    /// A record that is no longer running is left untouched, so a late
    /// supervisor result never overwrites a stop.
    pub fn finalize(
        &self,
        id: &ExecutionId,
        outcome: Outcome,
        at: Instant,
    ) -> Option<ExecutionRecord> {
        self.update(id, |record| {
            if !record.finish(outcome, at) {
                debug!(execution_id = %id, status = %record.status(), "Ignoring late finalization");
            }
            record.clone()
        })
    }

    /// Force a record into `stopped` and cancel its supervisor.
    ///
    /// Succeeds for records in any state; stopping twice re-stamps the
    /// completion time and leaves the status `stopped`.
    pub fn force_stop(&self, id: &ExecutionId, at: Instant) -> Result<ExecutionRecord> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(id)
            .ok_or_else(|| SandboxError::NotFound(id.clone()))?;

        slot.record.stop(at);
        slot.cancel.cancel();
        Ok(slot.record.clone())
    }

    /// Cancel the supervisor of a record without changing the record.
    pub fn cancel(&self, id: &ExecutionId) {
        if let Some(slot) = self.slots.lock().get(id) {
            slot.cancel.cancel();
        }
    }

    /// IDs of terminal records that completed before `cutoff`.
    ///
    /// Running records are never returned, however old.
    pub fn list_ids_older_than(&self, cutoff: Instant) -> Vec<ExecutionId> {
        self.slots
            .lock()
            .values()
            .filter(|slot| {
                slot.record
                    .completed_at()
                    .map(|completed| completed < cutoff)
                    .unwrap_or(false)
            })
            .map(|slot| slot.record.id().clone())
            .collect()
    }

    /// IDs of all records that are still running.
    pub fn running_ids(&self) -> Vec<ExecutionId> {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.record.is_running())
            .map(|slot| slot.record.id().clone())
            .collect()
    }

    /// Remove a record.
    pub fn evict(&self, id: &ExecutionId) -> Result<ExecutionRecord> {
        self.slots
            .lock()
            .remove(id)
            .map(|slot| slot.record)
            .ok_or_else(|| SandboxError::NotFound(id.clone()))
    }

    /// Number of running records.
    pub fn running_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.record.is_running())
            .count()
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Check if the registry holds no records.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl Default for ExecutionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
