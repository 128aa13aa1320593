//! Run status storage.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use super::record::{RunRecord, RunStatus};

/// Errors raised by a [`JobStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No record exists for the run.
    #[error("run {0} not found")]
    NotFound(String),

    /// The write would move a run backwards or re-register it.
    #[error("run {run_id} cannot move from {from} to {to}")]
    Conflict {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },
}

/// Registry of run records keyed by run id.
///
/// Implementations must be safe for many concurrent readers and writers and
/// must never expose a partially written record. Callers never hold a store
/// lock across an `.await`.
pub trait JobStore: Send + Sync + std::fmt::Debug {
    /// Insert a new record or replace an existing one.
    ///
    /// A new run must start as `RUNNING`; an existing run may only move from
    /// `RUNNING` to a terminal state.
    fn put(&self, run_id: &str, record: RunRecord) -> Result<(), StoreError>;

    /// Snapshot of the current record.
    fn get(&self, run_id: &str) -> Result<RunRecord, StoreError>;

    /// Drop a record regardless of its state.
    fn remove(&self, run_id: &str) -> Option<RunRecord>;

    /// Drop terminal records whose last transition happened before `cutoff`.
    ///
    /// Returns the number of records removed. Running records are kept.
    fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize;

    /// Number of tracked runs.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local [`JobStore`] guarded by a single `RwLock`.
///
/// Records are replaced wholesale, so a poisoned lock still holds consistent
/// data and is recovered rather than propagated.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    runs: RwLock<HashMap<String, RunRecord>>,
}

impl InMemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn put(&self, run_id: &str, record: RunRecord) -> Result<(), StoreError> {
        let mut guard = self.runs.write().unwrap_or_else(PoisonError::into_inner);

        match guard.get(run_id) {
            Some(current) if !current.status.can_transition_to(record.status) => {
                return Err(StoreError::Conflict {
                    run_id: run_id.to_string(),
                    from: current.status,
                    to: record.status,
                });
            }
            None if record.status != RunStatus::Running => {
                return Err(StoreError::NotFound(run_id.to_string()));
            }
            _ => {}
        }

        guard.insert(run_id.to_string(), record);
        Ok(())
    }

    fn get(&self, run_id: &str) -> Result<RunRecord, StoreError> {
        let guard = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))
    }

    fn remove(&self, run_id: &str) -> Option<RunRecord> {
        let mut guard = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(run_id)
    }

    fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut guard = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.retain(|_, record| !(record.is_terminal() && record.timestamp < cutoff));
        before - guard.len()
    }

    fn len(&self) -> usize {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
