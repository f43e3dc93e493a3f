//! # Host: owns the tasks and drives their lifecycle.
//!
//! The [`Host`] initializes every registered [`Task`](crate::Task) on start,
//! shuts each down on stop, and periodically flushes the [`FaultSink`](crate::FaultSink).
//!
//! ## Lifecycle
//! ```text
//! HostBuilder::new(coord).with_task(..).build()
//!        │
//!        ▼
//! run_until_shutdown()
//!   ├─► start():  task.initialize() for each task   (failures logged, others continue)
//!   │             schedule fault summary every `fault_interval`
//!   ├─► wait:     OS termination signal  |  ShutdownMessage on the bus
//!   └─► stop():   task.shutdown() for each task     (failures logged, others continue)
//!                 final fault summary
//!                 scheduler.shutdown()  → cancels all remaining timers
//! ```
//!
//! ## Rules
//! - A task failing (or panicking) in `initialize`/`shutdown` never affects the other tasks.
//! - `start()` and `stop()` run at most once each; repeated calls are logged no-ops.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::core::coordination::Coordination;
use crate::core::scheduler::ScheduledJob;
use crate::core::shutdown;
use crate::error::{RuntimeError, TaskError};
use crate::events::ShutdownMessage;
use crate::tasks::TaskRef;

/// Default interval of the unhandled-fault summary.
pub const DEFAULT_FAULT_INTERVAL: Duration = Duration::from_secs(300);

const FAULT_SUMMARY_JOB: &str = "fault_summary";

/// Builder for [`Host`].
pub struct HostBuilder {
    coord: Coordination,
    tasks: Vec<TaskRef>,
    fault_interval: Duration,
}

impl HostBuilder {
    pub fn new(coord: Coordination) -> Self {
        Self {
            coord,
            tasks: Vec::new(),
            fault_interval: DEFAULT_FAULT_INTERVAL,
        }
    }

    /// Registers a task; tasks start and stop in registration order.
    pub fn with_task(mut self, task: TaskRef) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_tasks(mut self, tasks: impl IntoIterator<Item = TaskRef>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn with_fault_interval(mut self, interval: Duration) -> Self {
        self.fault_interval = interval;
        self
    }

    pub fn build(self) -> Host {
        Host {
            coord: self.coord,
            tasks: self.tasks,
            fault_interval: self.fault_interval,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            fault_job: Mutex::new(None),
        }
    }
}

/// Owner of all tasks of the service.
pub struct Host {
    coord: Coordination,
    tasks: Vec<TaskRef>,
    fault_interval: Duration,
    started: AtomicBool,
    stopped: AtomicBool,
    fault_job: Mutex<Option<ScheduledJob>>,
}

impl Host {
    pub fn builder(coord: Coordination) -> HostBuilder {
        HostBuilder::new(coord)
    }

    pub fn coordination(&self) -> &Coordination {
        &self.coord
    }

    /// Names of the registered tasks, in registration order.
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name().to_string()).collect()
    }

    /// Initializes every task.
    ///
    /// Returns the names of tasks whose initialization failed.
    pub async fn start(&self) -> Vec<String> {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("host already started; ignoring");
            return Vec::new();
        }
        info!(tasks = self.tasks.len(), "starting host");

        let mut failed = Vec::new();
        for task in &self.tasks {
            let name = task.name();
            match guarded(task.initialize()).await {
                Ok(()) => info!(task = name, "task initialized"),
                Err(e) => {
                    error!(task = name, label = e.as_label(), error = %e, "task failed to initialize");
                    self.coord
                        .faults
                        .record(e.as_label(), format!("{name} initialize: {e}"));
                    failed.push(name.to_string());
                }
            }
        }

        let faults = Arc::clone(&self.coord.faults);
        let job = self.coord.scheduler.every(
            FAULT_SUMMARY_JOB,
            self.fault_interval,
            self.fault_interval,
            move || {
                faults.report_summary();
                futures::future::ready(Ok(()))
            },
        );
        *self.fault_job.lock().unwrap_or_else(PoisonError::into_inner) = Some(job);
        failed
    }

    /// Shuts every task down, flushes faults and stops all timers.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            warn!("host already stopped; ignoring");
            return;
        }
        info!(tasks = self.tasks.len(), "stopping host");

        for task in &self.tasks {
            let name = task.name();
            match guarded(task.shutdown()).await {
                Ok(()) => info!(task = name, "task stopped"),
                Err(e) => {
                    error!(task = name, label = e.as_label(), error = %e, "task failed to shut down");
                    self.coord
                        .faults
                        .record(e.as_label(), format!("{name} shutdown: {e}"));
                }
            }
        }

        if let Some(job) = self
            .fault_job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            job.cancel();
        }
        self.coord.faults.report_summary();
        self.coord.scheduler.shutdown();
        info!("host stopped");
    }

    /// Starts, waits for an OS termination signal or a [`ShutdownMessage`], then stops.
    pub async fn run_until_shutdown(&self) -> Result<(), RuntimeError> {
        self.run_until(async { shutdown::wait_for_termination().await.map(|_| ()) })
            .await
    }

    /// Same as [`run_until_shutdown`](Self::run_until_shutdown) with a custom external stop signal.
    ///
    /// An error from `signal` still stops the host and is then returned.
    pub async fn run_until<F>(&self, signal: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let requested = Arc::new(Notify::new());
        let _shutdown = {
            let requested = Arc::clone(&requested);
            self.coord.bus.subscribe(move |_: Arc<ShutdownMessage>| {
                requested.notify_one();
                futures::future::ready(Ok(()))
            })
        };

        self.start().await;

        let result = tokio::select! {
            res = signal => res.map_err(RuntimeError::from),
            _ = requested.notified() => {
                info!("shutdown requested on the bus");
                Ok(())
            }
        };

        self.stop().await;
        result
    }
}

/// Runs a task lifecycle future, turning a panic into a fatal error.
async fn guarded<F>(fut: F) -> Result<(), TaskError>
where
    F: Future<Output = Result<(), TaskError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(res) => res,
        Err(_) => Err(TaskError::fatal("panicked")),
    }
}
