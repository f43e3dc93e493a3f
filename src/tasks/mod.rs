//! # Task abstraction and the built-in tasks.
//!
//! - [`Task`] - trait for long-lived background units
//! - [`TaskRef`] - shared reference to a task (`Arc<dyn Task>`)
//! - [`StartupTask`] - publishes `StartupMessage` shortly after start
//! - [`CheckForSubmittedPackagesTask`] - turns submissions into `SubmitPackageMessage`s
//! - [`TestPackageTask`] - verifies each submitted package in the sandbox
//! - [`ShutdownAfterWorkCompletedTask`] - publishes `ShutdownMessage` once idle

mod check_submissions;
mod lifecycle;
mod shutdown_idle;
mod startup;
mod task;
mod test_package;

pub use check_submissions::{CheckForSubmittedPackagesTask, SubmissionSource, CHECK_LOCK};
pub use shutdown_idle::ShutdownAfterWorkCompletedTask;
pub use startup::StartupTask;
pub use task::{Task, TaskRef};
pub use test_package::TestPackageTask;
