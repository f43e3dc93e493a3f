//! Synchronization primitives shared by all tasks.
//!
//! - [`LockRegistry`]: name-keyed, timeout-bounded mutual exclusion.
//! - [`ActiveTaskTracker`]: in-flight work counters used for quiescence detection.

mod locks;
mod tracker;

pub use locks::{LockRegistry, NamedLockGuard, DEFAULT_KILL_TIMEOUT, DEFAULT_LOCK_TIMEOUT};
pub use tracker::{ActiveTaskTracker, WorkGuard, DEFAULT_PROBE_TIMEOUT, TRACKER_LOCK};
