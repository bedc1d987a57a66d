//! The current-job slot: the single piece of shared mutable state.
//!
//! At most one occupant at any instant — serial job execution is a design
//! requirement, not a limitation. The mutex is held only for O(1)
//! reads/writes, never across I/O.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// The job currently being processed
#[derive(Debug)]
pub struct ActiveJob {
    pub job_id: String,
    /// Cancelling this token terminates the running transcode
    pub cancel: CancellationToken,
    pub started_at: Instant,
}

/// Mutex-guarded optional holding the at-most-one running job
#[derive(Debug, Default)]
pub struct JobSlot {
    inner: Mutex<Option<ActiveJob>>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        self.inner.lock().expect("job slot mutex poisoned")
    }

    /// Atomically fill the slot if it is empty.
    ///
    /// Returns false (and changes nothing) when a job already occupies it.
    pub fn try_occupy(&self, job_id: &str, cancel: CancellationToken) -> bool {
        let mut guard = self.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(ActiveJob {
            job_id: job_id.to_string(),
            cancel,
            started_at: Instant::now(),
        });
        true
    }

    /// Take the occupant out, emptying the slot
    pub fn clear(&self) -> Option<ActiveJob> {
        self.lock().take()
    }

    /// Job id of the occupant, if any
    pub fn current_job_id(&self) -> Option<String> {
        self.lock().as_ref().map(|active| active.job_id.clone())
    }

    /// Milliseconds since the occupant was accepted
    pub fn elapsed_ms(&self) -> Option<u64> {
        self.lock()
            .as_ref()
            .map(|active| active.started_at.elapsed().as_millis() as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// Cancel the occupant's transcode, if any.
    ///
    /// The slot stays occupied: the executor clears it once the job has
    /// been finalized.
    pub fn cancel_current(&self) -> bool {
        match self.lock().as_ref() {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }
}
