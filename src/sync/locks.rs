//! # Named lock registry.
//!
//! [`LockRegistry`] maps an arbitrary, case-sensitive name to a single-permit
//! monitor and hands out timeout-bounded mutual exclusion on that name.
//!
//! ## Architecture
//! ```text
//! acquire("sandbox", 1s) ──► lock_for("sandbox") ──► get-or-create under map mutex
//!                                  │
//!                                  ▼
//!                           NamedLock { permit: Semaphore(1) }
//!                                  │
//!                     ┌────────────┴────────────┐
//!                     ▼                         ▼
//!             permit taken → true       deadline elapsed → false
//!
//! release("sandbox", true) ──► permit returned (only if currently held)
//! ```
//!
//! ## Rules
//! - Exactly one [`NamedLock`] exists per name for the registry's lifetime; idle locks are retained.
//! - A name has at most one holder; waiters are woken in the runtime's default order.
//! - `release(name, false)` is a no-op so it can run unconditionally after `acquire`.
//! - Releasing a lock that is not held never creates a second permit.
//! - Locks are **not** reentrant: acquiring a held name from its holder waits for the timeout.
//! - Every acquisition starts a new generation. A guard only releases the generation it
//!   acquired, so a guard outliving a forced [`kill`](LockRegistry::kill) cannot free the next holder.
//!
//! Prefer [`LockRegistry::lock`] / [`LockRegistry::with_lock`]: the guard releases
//! on every exit path, including panics and dropped futures.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time;
use tracing::{debug, warn};

use crate::error::LockError;

/// Default wait bound for scoped acquisition.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(120);

/// Wait bound used by [`LockRegistry::kill`] before forcing the release.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// Identity wrapper around a name plus its single permit.
struct NamedLock {
    name: Arc<str>,
    permit: Semaphore,
    /// Bumped on every acquisition and on every forced release.
    generation: AtomicU64,
    /// Serializes the held-check and the permit return in `release`.
    release_gate: Mutex<()>,
}

impl NamedLock {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            permit: Semaphore::new(1),
            generation: AtomicU64::new(0),
            release_gate: Mutex::new(()),
        }
    }

    fn is_held(&self) -> bool {
        self.permit.available_permits() == 0
    }
}

/// Registry of name-keyed locks.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<NamedLock>>>,
    active: AtomicUsize,
    default_timeout: Option<Duration>,
    kill_timeout: Duration,
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LockRegistry {
    /// Creates a registry with [`DEFAULT_LOCK_TIMEOUT`] and [`DEFAULT_KILL_TIMEOUT`].
    pub fn new() -> Self {
        Self::with_timeouts(Some(DEFAULT_LOCK_TIMEOUT), DEFAULT_KILL_TIMEOUT)
    }

    /// Creates a registry with explicit timeouts.
    ///
    /// - `default_timeout`: bound used by callers that have no specific one (`None` = wait forever)
    /// - `kill_timeout`: how long [`kill`](Self::kill) waits before forcing the release
    pub fn with_timeouts(default_timeout: Option<Duration>, kill_timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            default_timeout,
            kill_timeout,
        }
    }

    /// The bound used when a caller has no specific timeout.
    #[inline]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Resolves or creates the lock for `name`; first writer wins.
    fn lock_for(&self, name: &str) -> Arc<NamedLock> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = locks.get(name) {
            return Arc::clone(existing);
        }
        let created = Arc::new(NamedLock::new(name));
        locks.insert(name.to_owned(), Arc::clone(&created));
        created
    }

    /// Waits until `name` is free or `timeout` elapses.
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` is a single try.
    /// Returns `true` iff the lock was acquired. Every `true` must be paired
    /// with exactly one [`release`](Self::release).
    pub async fn acquire(&self, name: &str, timeout: Option<Duration>) -> bool {
        self.acquire_generation(name, timeout).await.is_some()
    }

    /// Like [`acquire`](Self::acquire), returning the generation of the new hold.
    async fn acquire_generation(&self, name: &str, timeout: Option<Duration>) -> Option<u64> {
        debug!(lock = name, ?timeout, "attempting to enter lock");
        let lock = self.lock_for(name);

        let acquired = match timeout {
            Some(dur) => match time::timeout(dur, lock.permit.acquire()).await {
                Ok(Ok(permit)) => {
                    permit.forget();
                    true
                }
                _ => false,
            },
            None => match lock.permit.acquire().await {
                Ok(permit) => {
                    permit.forget();
                    true
                }
                Err(_) => false,
            },
        };

        if !acquired {
            debug!(lock = %lock.name, ?timeout, "lock not acquired within timeout");
            return None;
        }
        let generation = lock.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(lock = %lock.name, generation, active, "entered lock");
        Some(generation)
    }

    /// Returns the lock for `name`.
    ///
    /// No-op when `was_acquired` is `false`. Releasing a lock that is not held
    /// is logged and ignored.
    pub fn release(&self, name: &str, was_acquired: bool) {
        if !was_acquired {
            return;
        }
        self.release_generation(name, None);
    }

    /// Returns the permit of `name`.
    ///
    /// With `Some(generation)` the release only happens while that hold is
    /// still current; `None` releases whichever hold is current.
    fn release_generation(&self, name: &str, generation: Option<u64>) {
        let lock = self.lock_for(name);
        let _gate = lock
            .release_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !lock.is_held() {
            warn!(lock = name, "release requested for a lock that is not held; ignoring");
            return;
        }
        if let Some(generation) = generation {
            let current = lock.generation.load(Ordering::Acquire);
            if current != generation {
                warn!(lock = name, generation, current, "stale release after kill; ignoring");
                return;
            }
        }
        lock.permit.add_permits(1);
        let active = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .map_or(0, |prev| prev.saturating_sub(1));
        debug!(lock = name, active, "exited lock");
    }

    /// Acquires `name` and returns a guard that releases it on drop.
    pub async fn lock(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<NamedLockGuard<'_>, LockError> {
        match self.acquire_generation(name, timeout).await {
            Some(generation) => Ok(NamedLockGuard {
                registry: self,
                name: name.to_owned(),
                generation,
            }),
            None => Err(LockError::Timeout {
                name: name.to_owned(),
                timeout,
            }),
        }
    }

    /// Runs `body` while holding `name`.
    ///
    /// `body` is not polled when acquisition fails; the lock is released on
    /// every exit path of `body`.
    pub async fn with_lock<F>(
        &self,
        name: &str,
        timeout: Option<Duration>,
        body: F,
    ) -> Result<F::Output, LockError>
    where
        F: Future,
    {
        let _guard = self.lock(name, timeout).await?;
        Ok(body.await)
    }

    /// Clears a possibly abandoned lock.
    ///
    /// Waits up to the kill timeout for the current holder, then releases
    /// regardless of the outcome. A guard still held by the evicted holder
    /// no longer releases anything. Never fails.
    pub async fn kill(&self, name: &str) {
        if let Some(generation) = self.acquire_generation(name, Some(self.kill_timeout)).await {
            self.release_generation(name, Some(generation));
            return;
        }
        warn!(lock = name, timeout = ?self.kill_timeout, "lock still held; forcing release");
        let lock = self.lock_for(name);
        {
            let _gate = lock
                .release_gate
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            lock.generation.fetch_add(1, Ordering::AcqRel);
        }
        self.release_generation(name, None);
    }

    /// Number of locks currently held (diagnostics only).
    pub fn active_locks(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Returns true if `name` exists and is currently held.
    pub fn is_held(&self, name: &str) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .is_some_and(|l| l.is_held())
    }
}

/// Scoped hold on a named lock; releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct NamedLockGuard<'a> {
    registry: &'a LockRegistry,
    name: String,
    generation: u64,
}

impl NamedLockGuard<'_> {
    /// Name of the held lock.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NamedLockGuard<'_> {
    fn drop(&mut self) {
        self.registry
            .release_generation(&self.name, Some(self.generation));
    }
}
