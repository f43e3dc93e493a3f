//! # Active task tracker.
//!
//! Counts units of work that are in flight, globally and per task name, so the
//! service can tell when it is quiescent and safe to shut down.
//!
//! ## Architecture
//! ```text
//! TestPackageTask ──► begin("test-package") ──┐
//! CheckSubmissions ─► begin("check-...")  ────┤  LockRegistry[TRACKER_LOCK]
//!                                             ▼
//!                              TrackerState { active, tasks: name → count }
//!                                             ▲
//! ShutdownAfterWork ──► has_active_tasks() ───┘  (short probe, fail-safe = "active")
//! ```
//!
//! ## Rules
//! - Every mutation and read happens under the reserved named lock [`TRACKER_LOCK`].
//! - `active == sum(tasks.values())`; counts never go negative.
//! - An entry is removed (not zeroed) once its count returns to 0.
//! - A completion without a matching begin is logged and ignored.
//! - `has_active_tasks()` reports `true` when the lock cannot be obtained in time.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::LockError;
use crate::sync::locks::LockRegistry;

/// Reserved lock name guarding the tracker state.
pub const TRACKER_LOCK: &str = "__active_task_tracker";

/// Default bound for [`ActiveTaskTracker::has_active_tasks`].
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct TrackerState {
    active: usize,
    tasks: BTreeMap<String, usize>,
}

/// Thread-safe tracker of in-flight work.
pub struct ActiveTaskTracker {
    locks: Arc<LockRegistry>,
    state: Mutex<TrackerState>,
    probe_timeout: Duration,
}

impl ActiveTaskTracker {
    /// Creates a tracker coordinated through `locks`.
    pub fn new(locks: Arc<LockRegistry>) -> Self {
        Self::with_probe_timeout(locks, DEFAULT_PROBE_TIMEOUT)
    }

    /// Creates a tracker with an explicit probe bound for [`has_active_tasks`](Self::has_active_tasks).
    pub fn with_probe_timeout(locks: Arc<LockRegistry>, probe_timeout: Duration) -> Self {
        Self {
            locks,
            state: Mutex::new(TrackerState::default()),
            probe_timeout,
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records that a unit of work for `task_name` has started.
    pub async fn work_begin(&self, task_name: &str) -> Result<(), LockError> {
        let _guard = self
            .locks
            .lock(TRACKER_LOCK, self.locks.default_timeout())
            .await?;

        let mut state = self.state();
        state.active += 1;
        *state.tasks.entry(task_name.to_owned()).or_insert(0) += 1;
        debug!(task = task_name, active = state.active, "work started");
        Ok(())
    }

    /// Records that a unit of work for `task_name` has finished.
    pub async fn work_complete(&self, task_name: &str) -> Result<(), LockError> {
        let _guard = self
            .locks
            .lock(TRACKER_LOCK, self.locks.default_timeout())
            .await?;

        let mut state = self.state();
        let remaining = match state.tasks.get_mut(task_name) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => {
                warn!(task = task_name, "work completed without a matching begin; ignoring");
                return Ok(());
            }
        };
        if remaining == 0 {
            state.tasks.remove(task_name);
        }
        state.active = state.active.saturating_sub(1);
        debug!(task = task_name, active = state.active, "work completed");
        Ok(())
    }

    /// Returns sorted names of tasks with work in flight.
    ///
    /// The returned vector is an owned snapshot.
    pub async fn active_tasks(&self) -> Result<Vec<String>, LockError> {
        let _guard = self
            .locks
            .lock(TRACKER_LOCK, self.locks.default_timeout())
            .await?;
        Ok(self.state().tasks.keys().cloned().collect())
    }

    /// Returns true if any work is in flight.
    ///
    /// Fail-safe: if the tracker lock cannot be taken within the probe bound,
    /// the answer is `true`.
    pub async fn has_active_tasks(&self) -> bool {
        match self.locks.lock(TRACKER_LOCK, Some(self.probe_timeout)).await {
            Ok(_guard) => self.state().active > 0,
            Err(e) => {
                debug!(error = %e, "tracker busy; reporting active");
                true
            }
        }
    }

    /// Global in-flight count as last observed (diagnostics only).
    pub fn active_count(&self) -> usize {
        self.state().active
    }

    /// Starts tracked work and returns a guard that completes it.
    pub async fn begin(self: &Arc<Self>, task_name: impl Into<String>) -> Result<WorkGuard, LockError> {
        let name = task_name.into();
        self.work_begin(&name).await?;
        Ok(WorkGuard {
            tracker: Arc::clone(self),
            name,
            open: true,
        })
    }

    /// Runs `work` registered under `task_name`.
    ///
    /// The work is completed on every exit path of `work`.
    pub async fn track<F>(self: &Arc<Self>, task_name: &str, work: F) -> Result<F::Output, LockError>
    where
        F: Future,
    {
        let guard = self.begin(task_name).await?;
        let out = work.await;
        if let Err(e) = guard.complete().await {
            warn!(task = task_name, error = %e, "deferred work completion");
        }
        Ok(out)
    }
}

/// Pairs a [`ActiveTaskTracker::work_begin`] with its completion.
///
/// Call [`complete`](Self::complete) on the normal path. A guard dropped
/// while still open (panic, cancelled future) schedules the completion on the
/// current runtime.
#[must_use = "dropping the guard completes the work immediately"]
pub struct WorkGuard {
    tracker: Arc<ActiveTaskTracker>,
    name: String,
    open: bool,
}

impl WorkGuard {
    /// Task name this guard was opened for.
    pub fn task_name(&self) -> &str {
        &self.name
    }

    /// Completes the work.
    ///
    /// If the tracker lock cannot be obtained, the completion is retried in the
    /// background when the guard drops, and the error is returned.
    pub async fn complete(mut self) -> Result<(), LockError> {
        self.tracker.work_complete(&self.name).await?;
        self.open = false;
        Ok(())
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let tracker = Arc::clone(&self.tracker);
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if let Err(e) = tracker.work_complete(&name).await {
                        error!(task = %name, error = %e, "unable to complete abandoned work");
                    }
                });
            }
            Err(_) => {
                error!(task = %name, "work guard dropped outside a runtime; tracker left active");
            }
        }
    }
}
