//! Runtime core: shared context, timers, fault buffer and the host.
//!
//! - [`coordination`]: the [`Coordination`] context handed to every task;
//! - [`scheduler`]: one-shot and periodic jobs with cancellation;
//! - [`faults`]: buffer of unhandled faults, summarized on a timer;
//! - [`host`]: starts and stops tasks, waits for shutdown;
//! - [`shutdown`]: OS termination signals.

mod coordination;
mod faults;
mod host;
mod scheduler;
mod shutdown;

pub use coordination::Coordination;
pub use faults::{Fault, FaultSink, FaultSummary};
pub use host::{Host, HostBuilder, DEFAULT_FAULT_INTERVAL};
pub use scheduler::{ScheduledJob, Scheduler};
pub use shutdown::wait_for_termination;
