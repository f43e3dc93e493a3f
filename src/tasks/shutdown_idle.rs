//! # Shutdown once all queued work is done.
//!
//! ```text
//! SubmissionsQueuedMessage ──► arm: first check after `initial`, then every `follow_up`
//!                                   │
//!                         tracker quiescent && bus.pending() == 0 ?
//!                            ├─ yes ─► ShutdownMessage (once)
//!                            └─ no  ─► log still-active tasks
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::core::Coordination;
use crate::error::TaskError;
use crate::events::{ShutdownMessage, SubmissionsQueuedMessage};
use crate::tasks::lifecycle::Lifecycle;
use crate::tasks::Task;

const CHECK_JOB: &str = "shutdown_after_work_completed.check";

struct Watcher {
    coord: Coordination,
    initial: Duration,
    follow_up: Duration,
    lifecycle: Lifecycle,
    signalled: AtomicBool,
}

impl Watcher {
    fn arm(self: &Arc<Self>) {
        if self.lifecycle.has_job(CHECK_JOB) {
            return;
        }
        let watcher = Arc::clone(self);
        let job = self.coord.scheduler.every(CHECK_JOB, self.initial, self.follow_up, move || {
            let watcher = Arc::clone(&watcher);
            async move {
                watcher.synchronize().await;
                Ok(())
            }
        });
        self.lifecycle.hold_job(job);
        info!(
            task = ShutdownAfterWorkCompletedTask::NAME,
            first_check = ?self.initial,
            "will check back to see if the system can shut down"
        );
    }

    async fn synchronize(&self) {
        let pending = self.coord.bus.pending();
        if pending == 0 && !self.coord.tracker.has_active_tasks().await {
            if !self.signalled.swap(true, Ordering::AcqRel) {
                info!("signalling for shutdown; all tasks have completed");
                self.coord.bus.publish(ShutdownMessage);
            }
            self.lifecycle.cancel_job(CHECK_JOB);
            return;
        }

        let active = self.coord.tracker.active_tasks().await.unwrap_or_default();
        info!(
            active = %active.join("; "),
            pending,
            next_check = ?self.follow_up,
            "still waiting on work before shutting down"
        );
    }
}

/// Publishes [`ShutdownMessage`] once the queued submissions have been processed.
pub struct ShutdownAfterWorkCompletedTask {
    watcher: Arc<Watcher>,
}

impl ShutdownAfterWorkCompletedTask {
    pub const NAME: &'static str = "shutdown_after_work_completed";

    pub fn new(coord: Coordination, initial: Duration, follow_up: Duration) -> Self {
        Self {
            watcher: Arc::new(Watcher {
                coord,
                initial,
                follow_up,
                lifecycle: Lifecycle::default(),
                signalled: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl Task for ShutdownAfterWorkCompletedTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn initialize(&self) -> Result<(), TaskError> {
        let lifecycle = &self.watcher.lifecycle;
        if !lifecycle.begin_initialize(Self::NAME) {
            return Ok(());
        }
        let watcher = Arc::clone(&self.watcher);
        let subscription = self
            .watcher
            .coord
            .bus
            .subscribe(move |_: Arc<SubmissionsQueuedMessage>| {
                watcher.arm();
                async { Ok(()) }
            });
        lifecycle.hold_subscription(subscription);
        info!(task = Self::NAME, "ready and waiting for queued submissions");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TaskError> {
        self.watcher.lifecycle.release(Self::NAME);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SubmitPackageMessage;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio::time;

    fn task(coord: &Coordination) -> ShutdownAfterWorkCompletedTask {
        ShutdownAfterWorkCompletedTask::new(
            coord.clone(),
            Duration::from_secs(240),
            Duration::from_secs(120),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_after_initial_delay_when_idle() {
        let coord = Coordination::default();
        let (tx, mut rx) = unbounded_channel();
        let _sub = coord.bus.subscribe(move |_: Arc<ShutdownMessage>| {
            let _ = tx.send(time::Instant::now());
            async { Ok(()) }
        });
        let t = task(&coord);
        t.initialize().await.unwrap();

        let started = time::Instant::now();
        coord.bus.publish(SubmissionsQueuedMessage { count: 0 });

        let at = rx.recv().await.unwrap();
        let waited = at - started;
        assert!(waited >= Duration::from_secs(240) && waited < Duration::from_secs(245));

        time::sleep(Duration::from_secs(600)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_active_work() {
        let coord = Coordination::default();
        let (tx, mut rx) = unbounded_channel();
        let _sub = coord.bus.subscribe(move |_: Arc<ShutdownMessage>| {
            let _ = tx.send(time::Instant::now());
            async { Ok(()) }
        });
        let t = task(&coord);
        t.initialize().await.unwrap();

        let work = coord.tracker.begin("test_package").await.unwrap();
        let started = time::Instant::now();
        coord.bus.publish(SubmissionsQueuedMessage { count: 1 });

        // Checks at 240s and 360s see active work.
        time::sleep(Duration::from_secs(400)).await;
        assert!(rx.try_recv().is_err());
        work.complete().await.unwrap();

        let at = rx.recv().await.unwrap();
        let waited = at - started;
        assert!(waited >= Duration::from_secs(480) && waited < Duration::from_secs(485));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_delivery_not_yet_tracked() {
        let coord = Coordination::default();
        let (tx, mut rx) = unbounded_channel();
        let _sub = coord.bus.subscribe(move |_: Arc<ShutdownMessage>| {
            let _ = tx.send(time::Instant::now());
            async { Ok(()) }
        });
        let tracker = Arc::clone(&coord.tracker);
        let _verify = coord.bus.subscribe(move |_: Arc<SubmitPackageMessage>| {
            let tracker = Arc::clone(&tracker);
            async move {
                // Dequeued but not registered with the tracker until after the first check.
                time::sleep(Duration::from_secs(300)).await;
                tracker
                    .track("test_package", time::sleep(Duration::from_secs(10)))
                    .await?;
                Ok(())
            }
        });
        let t = task(&coord);
        t.initialize().await.unwrap();

        let started = time::Instant::now();
        coord.bus.publish(SubmitPackageMessage::new("git", "2.0.0"));
        coord.bus.publish(SubmissionsQueuedMessage { count: 1 });

        // Check at 240s sees the running delivery, 360s sees nothing left.
        let at = rx.recv().await.unwrap();
        let waited = at - started;
        assert!(waited >= Duration::from_secs(360) && waited < Duration::from_secs(365));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_armed_without_queued_submissions() {
        let coord = Coordination::default();
        let (tx, mut rx) = unbounded_channel();
        let _sub = coord.bus.subscribe(move |_: Arc<ShutdownMessage>| {
            let _ = tx.send(());
            async { Ok(()) }
        });
        let t = task(&coord);
        t.initialize().await.unwrap();

        time::sleep(Duration::from_secs(3600)).await;
        assert!(rx.try_recv().is_err());

        t.shutdown().await.unwrap();
        coord.bus.publish(SubmissionsQueuedMessage { count: 0 });
        time::sleep(Duration::from_secs(3600)).await;
        assert!(rx.try_recv().is_err());
    }
}
