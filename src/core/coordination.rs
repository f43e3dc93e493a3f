//! # Shared coordination context.
//!
//! [`Coordination`] bundles the services every task needs. It is built once
//! from [`CoordinationConfig`] and cloned into each task, so nothing in the
//! crate relies on global state.
//!
//! ```text
//! Coordination
//!   ├── locks:     Arc<LockRegistry>
//!   ├── tracker:   Arc<ActiveTaskTracker>   (guarded by locks[TRACKER_LOCK])
//!   ├── bus:       EventBus                 (delivery errors → faults)
//!   ├── faults:    Arc<FaultSink>
//!   └── scheduler: Scheduler
//! ```

use std::sync::Arc;

use crate::config::CoordinationConfig;
use crate::core::faults::FaultSink;
use crate::core::scheduler::Scheduler;
use crate::events::EventBus;
use crate::sync::{ActiveTaskTracker, LockRegistry};

/// Services shared by the host and all tasks.
#[derive(Clone)]
pub struct Coordination {
    pub locks: Arc<LockRegistry>,
    pub tracker: Arc<ActiveTaskTracker>,
    pub bus: EventBus,
    pub faults: Arc<FaultSink>,
    pub scheduler: Scheduler,
}

impl Coordination {
    /// Builds a fresh context.
    ///
    /// Delivery errors of subscriptions without their own error handler are
    /// recorded in [`faults`](Self::faults) under the error's label.
    pub fn new(config: &CoordinationConfig) -> Self {
        let locks = Arc::new(LockRegistry::with_timeouts(
            config.lock_timeout(),
            config.kill_timeout(),
        ));
        let tracker = Arc::new(ActiveTaskTracker::with_probe_timeout(
            Arc::clone(&locks),
            config.tracker_probe(),
        ));
        let faults = Arc::new(FaultSink::new());

        let bus = {
            let faults = Arc::clone(&faults);
            EventBus::with_reporter(config.bus_queue_capacity, move |err| {
                faults.record(err.as_label(), err.to_string());
            })
        };

        Self {
            locks,
            tracker,
            bus,
            faults,
            scheduler: Scheduler::new(),
        }
    }
}

impl Default for Coordination {
    fn default() -> Self {
        Self::new(&CoordinationConfig::default())
    }
}
