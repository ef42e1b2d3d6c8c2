//! In-memory run table.
//!
//! One mutex covers the whole map. Operations across different run ids
//! serialize against each other, but every critical section is a handful of
//! field writes and the table is never iterated under the lock, so the coarse
//! grain is acceptable. The lock is never held across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use uuid::Uuid;

use crate::models::run::{RunState, StepName, StepState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {0} already exists")]
    DuplicateRun(Uuid),
}

/// Handle to the shared run table. Cloning is cheap and all clones see the
/// same underlying map.
#[derive(Clone, Default)]
pub struct RunStore {
    runs: Arc<Mutex<HashMap<Uuid, RunState>>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, RunState>> {
        // A poisoned lock only means a panic mid-write elsewhere; the table
        // holds plain data, so recover the guard rather than propagate.
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a new run. Callers generate fresh ids, so a collision is a bug.
    pub fn create(&self, run: RunState) -> Result<(), StoreError> {
        let mut runs = self.lock();
        if runs.contains_key(&run.run_id) {
            return Err(StoreError::DuplicateRun(run.run_id));
        }
        runs.insert(run.run_id, run);
        Ok(())
    }

    /// Returns a cloned snapshot of the run, or `None` if unknown. The clone
    /// is consistent at the moment of the read; no staleness guarantee beyond
    /// that.
    pub fn get(&self, run_id: Uuid) -> Option<RunState> {
        self.lock().get(&run_id).cloned()
    }

    /// Applies a read-modify-write closure to the whole record under the
    /// table lock. No-op if the run is missing.
    pub fn update<F>(&self, run_id: Uuid, f: F)
    where
        F: FnOnce(&mut RunState),
    {
        if let Some(run) = self.lock().get_mut(&run_id) {
            f(run);
        }
    }

    /// Applies a closure to one named step slot. No-op if the run is missing.
    pub fn update_step<F>(&self, run_id: Uuid, step: StepName, f: F)
    where
        F: FnOnce(&mut StepState),
    {
        if let Some(run) = self.lock().get_mut(&run_id) {
            f(run.steps.get_mut(step));
        }
    }
}
