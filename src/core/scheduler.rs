//! # Timer-driven jobs.
//!
//! [`Scheduler`] runs one-shot and periodic jobs as Tokio tasks. Every job gets
//! a child of the scheduler's root [`CancellationToken`], so cancelling one job
//! leaves the others running while [`Scheduler::shutdown`] stops all of them.
//!
//! ```text
//! every(name, first, period, job):
//!   sleep(first) ─► job() ─► sleep(period) ─► job() ─► ...
//!        ▲                        ▲
//!        └── cancelled? exit ─────┘   (checked only between runs)
//! ```
//!
//! ## Rules
//! - The next delay is measured from the end of the previous run, so runs of one job never overlap.
//! - A running job is never interrupted; cancellation is observed while sleeping.
//! - Job errors and panics are logged and do not stop the schedule.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::TaskError;

/// Owner of all timer-driven jobs.
#[derive(Clone, Default)]
pub struct Scheduler {
    token: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `job` after `first`, then repeatedly `period` after each run completes.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn every<F, Fut>(
        &self,
        name: impl Into<String>,
        first: Duration,
        period: Duration,
        mut job: F,
    ) -> ScheduledJob
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let name = name.into();
        let token = self.token.child_token();

        let handle = tokio::spawn({
            let name = name.clone();
            let token = token.clone();
            async move {
                let mut delay = first;
                while sleep_or_cancel(&token, delay).await {
                    run_job(&name, job()).await;
                    delay = period;
                }
                debug!(job = %name, "periodic job stopped");
            }
        });

        debug!(job = %name, first = ?first, period = ?period, "periodic job scheduled");
        ScheduledJob { name, token, handle }
    }

    /// Runs `job` once after `delay`, unless cancelled first.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn once<Fut>(&self, name: impl Into<String>, delay: Duration, job: Fut) -> ScheduledJob
    where
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let name = name.into();
        let token = self.token.child_token();

        let handle = tokio::spawn({
            let name = name.clone();
            let token = token.clone();
            async move {
                if sleep_or_cancel(&token, delay).await {
                    run_job(&name, job).await;
                }
            }
        });

        debug!(job = %name, delay = ?delay, "one-shot job scheduled");
        ScheduledJob { name, token, handle }
    }

    /// Cancels every job created by this scheduler and its clones.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Sleeps for `delay`; returns false if `token` was cancelled first.
async fn sleep_or_cancel(token: &CancellationToken, delay: Duration) -> bool {
    if token.is_cancelled() {
        return false;
    }
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    select! {
        _ = &mut sleep => !token.is_cancelled(),
        _ = token.cancelled() => false,
    }
}

async fn run_job<Fut>(name: &str, job: Fut)
where
    Fut: Future<Output = Result<(), TaskError>>,
{
    match AssertUnwindSafe(job).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_retryable() => {
            warn!(job = %name, label = e.as_label(), error = %e, "scheduled job failed; retrying next run")
        }
        Ok(Err(e)) => error!(job = %name, label = e.as_label(), error = %e, "scheduled job failed"),
        Err(_) => error!(job = %name, "scheduled job panicked"),
    }
}

/// Handle to a scheduled job.
///
/// Dropping the handle cancels the job.
#[must_use = "dropping a ScheduledJob cancels it"]
pub struct ScheduledJob {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledJob {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops future runs. A run in progress completes.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the job will not run again and its task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledJob {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() -> futures::future::Ready<Result<(), TaskError>>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, move || {
            h.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(()))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_after_delay() {
        let sched = Scheduler::new();
        let (fired_tx, fired_rx) = tokio::sync::oneshot::channel();
        let _job = sched.once("startup", Duration::from_secs(15), async move {
            let _ = fired_tx.send(time::Instant::now());
            Ok(())
        });

        let started = time::Instant::now();
        let fired_at = fired_rx.await.unwrap();
        assert_eq!(fired_at - started, Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_runs_at_first_then_period() {
        let sched = Scheduler::new();
        let (hits, job) = counter();
        let _job = sched.every("poll", Duration::from_secs(240), Duration::from_secs(120), job);

        time::sleep(Duration::from_secs(239)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_job_keeps_schedule() {
        let sched = Scheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _job = sched.every("flaky", Duration::from_secs(1), Duration::from_secs(1), move || {
            let n = h.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    panic!("first run explodes");
                }
                Err(TaskError::fail("still failing"))
            }
        });

        time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop_stop_runs() {
        let sched = Scheduler::new();
        let (hits, job) = counter();
        let handle = sched.every("tick", Duration::from_secs(1), Duration::from_secs(1), job);

        time::sleep(Duration::from_millis(1500)).await;
        handle.cancel();
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());

        let (hits, job) = counter();
        drop(sched.every("dropped", Duration::from_secs(1), Duration::from_secs(1), job));
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_all_jobs() {
        let sched = Scheduler::new();
        let (a, job_a) = counter();
        let (b, job_b) = counter();
        let _a = sched.every("a", Duration::from_secs(1), Duration::from_secs(1), job_a);
        let _b = sched.clone().every("b", Duration::from_secs(2), Duration::from_secs(2), job_b);

        sched.shutdown();
        assert!(sched.is_shut_down());
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(a.load(Ordering::SeqCst) + b.load(Ordering::SeqCst), 0);
    }
}
