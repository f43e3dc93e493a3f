//! Bookkeeping shared by the built-in tasks: lifecycle state plus the
//! subscriptions and jobs a task must release on shutdown.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::core::ScheduledJob;
use crate::events::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Created,
    Initialized,
    ShutDown,
}

#[derive(Default)]
struct Held {
    subscriptions: Vec<Subscription>,
    jobs: Vec<ScheduledJob>,
}

pub(crate) struct Lifecycle {
    stage: Mutex<Stage>,
    held: Mutex<Held>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            stage: Mutex::new(Stage::Created),
            held: Mutex::new(Held::default()),
        }
    }
}

impl Lifecycle {
    fn held(&self) -> MutexGuard<'_, Held> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves `Created → Initialized`. Returns false (and logs) otherwise.
    pub(crate) fn begin_initialize(&self, task: &str) -> bool {
        let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
        match *stage {
            Stage::Created => {
                *stage = Stage::Initialized;
                true
            }
            Stage::Initialized => {
                warn!(task, "already initialized; ignoring");
                false
            }
            Stage::ShutDown => {
                warn!(task, "initialize after shutdown; ignoring");
                false
            }
        }
    }

    pub(crate) fn hold_subscription(&self, subscription: Subscription) {
        debug!(message = subscription.message_kind(), "holding subscription");
        self.held().subscriptions.push(subscription);
    }

    pub(crate) fn hold_job(&self, job: ScheduledJob) {
        self.held().jobs.push(job);
    }

    /// Cancels jobs whose name is `name`, keeping the rest.
    pub(crate) fn cancel_job(&self, name: &str) {
        self.held().jobs.retain(|j| {
            if j.name() == name {
                j.cancel();
                false
            } else {
                true
            }
        });
    }

    pub(crate) fn has_job(&self, name: &str) -> bool {
        self.held().jobs.iter().any(|j| j.name() == name && !j.is_finished())
    }

    /// Disposes everything held and moves to `ShutDown`. Idempotent.
    pub(crate) fn release(&self, task: &str) {
        let previous = {
            let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *stage, Stage::ShutDown)
        };
        let Held { subscriptions, jobs } = std::mem::take(&mut *self.held());
        for s in &subscriptions {
            s.dispose();
        }
        for j in &jobs {
            j.cancel();
        }
        if previous == Stage::ShutDown {
            debug!(task, "already shut down");
        } else {
            info!(
                task,
                subscriptions = subscriptions.len(),
                jobs = jobs.len(),
                "task shut down"
            );
        }
    }
}
