//! # package-verifier
//!
//! Orchestration core of a service that verifies software packages end-to-end
//! in a disposable virtual-machine sandbox. It detects newly submitted
//! packages, installs and uninstalls each one inside the sandbox, collects the
//! logs and publishes a result for downstream reporting.
//!
//! The crate provides:
//! - a typed publish/subscribe [`EventBus`] decoupling long-lived background tasks;
//! - a [`LockRegistry`] of named, timeout-bounded locks;
//! - an [`ActiveTaskTracker`] that tells when the service is quiescent.
//!
//! ## Architecture
//! ```text
//!                          ┌───────────────────────────────┐
//!                          │ Coordination                  │
//!                          │  locks · tracker · bus ·      │
//!                          │  faults · scheduler           │
//!                          └──────────────┬────────────────┘
//!                                         │ cloned into every task
//!      ┌──────────────────┬───────────────┼──────────────────┬──────────────────────┐
//!      ▼                  ▼               ▼                  ▼                      ▼
//! StartupTask   CheckForSubmitted   TestPackageTask   ShutdownAfterWork           Host
//!  (timer)      (event + timer)      (event)           (event + timer)    (start/stop/wait)
//!      │                  │               │                  │                      ▲
//!      └─ StartupMessage ─┘               │                  │                      │
//!                         ├─ SubmitPackageMessage ──►┘       │                      │
//!                         └─ SubmissionsQueuedMessage ──────►┘── ShutdownMessage ───┘
//!                                         │
//!                                         ▼
//!                         PackageVerifier (locks["sandbox"] + tracker)
//!                           prepare → reset → install → uninstall → report
//!                                         │
//!                                         └─► PackageTestResultMessage
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                           |
//! |-------------------|--------------------------------------------------------------|----------------------------------------------|
//! | **Locks**         | Named mutual exclusion with timeouts and kill.               | [`LockRegistry`], [`NamedLockGuard`]         |
//! | **Quiescence**    | In-flight work counters, fail-safe probe.                    | [`ActiveTaskTracker`], [`WorkGuard`]         |
//! | **Messaging**     | Typed pub/sub with per-subscription workers.                 | [`EventBus`], [`Message`], [`Subscription`]  |
//! | **Tasks**         | Uniform initialize/shutdown lifecycle, owned by the host.    | [`Task`], [`Host`], [`Scheduler`]            |
//! | **Verification**  | Sandbox workflow and result reporting.                       | [`PackageVerifier`], [`SandboxDriver`]       |
//! | **Errors**        | Typed errors with stable labels.                             | [`LockError`], [`TaskError`], [`RuntimeError`] |
//! | **Configuration** | Layered YAML + environment configuration.                    | [`Config`]                                   |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use package_verifier::{
//!     init_logging, run, Collaborators, Config, LocalFileStore, SandboxDriver, SubmissionSource,
//! };
//!
//! async fn serve(
//!     sandbox: Arc<dyn SandboxDriver>,
//!     submissions: Arc<dyn SubmissionSource>,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     init_logging(&config.logging)?;
//!
//!     run(
//!         config,
//!         Collaborators { sandbox, files: Arc::new(LocalFileStore), submissions },
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod logging;
mod service;
mod sync;
mod tasks;
mod workflow;

// ---- Public re-exports ----

pub use config::{
    render_command, Config, ConfigError, CoordinationConfig, LogFormat, LoggingConfig,
    ReportConfig, SandboxConfig, ScheduleConfig, DEFAULT_CONFIG_FILE, ENV_PREFIX,
};
pub use core::{
    wait_for_termination, Coordination, Fault, FaultSink, FaultSummary, Host, HostBuilder,
    ScheduledJob, Scheduler, DEFAULT_FAULT_INTERVAL,
};
pub use error::{DeliveryError, LockError, RuntimeError, TaskError};
pub use events::{
    EventBus, Message, PackageTestLog, PackageTestResultMessage, ShutdownMessage, StartupMessage,
    SubmissionsQueuedMessage, SubmitPackageMessage, SubscribeOptions, Subscription,
    DEFAULT_QUEUE_CAPACITY,
};
pub use logging::{init_logging, LOG_ENV};
pub use service::{build_host, run, Collaborators};
pub use sync::{
    ActiveTaskTracker, LockRegistry, NamedLockGuard, WorkGuard, DEFAULT_KILL_TIMEOUT,
    DEFAULT_LOCK_TIMEOUT, DEFAULT_PROBE_TIMEOUT, TRACKER_LOCK,
};
pub use tasks::{
    CheckForSubmittedPackagesTask, ShutdownAfterWorkCompletedTask, StartupTask, SubmissionSource,
    Task, TaskRef, TestPackageTask, CHECK_LOCK,
};
pub use workflow::{
    AbortReason, FailureSignatures, FileStore, LocalFileStore, PackageVerifier, ResultMessage,
    RunReport, SandboxDriver, SandboxRunResult, VerificationOutcome, VerifierSettings,
    WorkflowState, FILES_SNAPSHOT_LOG, INSTALL_LOG, REGISTRY_SNAPSHOT_LOG, SANDBOX_LOCK,
    SUMMARY_LOG, UNINSTALL_LOG, VERIFY_WORK,
};
