//! Standard wiring of the verifier service from [`Config`].

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::core::{Coordination, Host};
use crate::error::RuntimeError;
use crate::tasks::{
    CheckForSubmittedPackagesTask, ShutdownAfterWorkCompletedTask, StartupTask, SubmissionSource,
    TaskRef, TestPackageTask,
};
use crate::workflow::{FileStore, PackageVerifier, SandboxDriver, VerifierSettings};

/// External systems the service drives.
#[derive(Clone)]
pub struct Collaborators {
    pub sandbox: Arc<dyn SandboxDriver>,
    pub files: Arc<dyn FileStore>,
    pub submissions: Arc<dyn SubmissionSource>,
}

/// Builds a host with the built-in tasks configured from `config`.
///
/// `ShutdownAfterWorkCompletedTask` is only registered when
/// `schedule.shutdown_when_idle` is set.
pub fn build_host(config: &Config, coord: Coordination, collaborators: Collaborators) -> Host {
    let verifier = Arc::new(PackageVerifier::new(
        coord.clone(),
        collaborators.sandbox,
        collaborators.files,
        VerifierSettings::from_config(&config.sandbox, &config.report),
    ));

    let schedule = &config.schedule;
    let mut tasks: Vec<TaskRef> = vec![
        Arc::new(StartupTask::new(coord.clone(), schedule.startup_delay())),
        Arc::new(CheckForSubmittedPackagesTask::new(
            coord.clone(),
            collaborators.submissions,
            schedule.check_interval(),
        )),
        Arc::new(TestPackageTask::new(coord.clone(), verifier)),
    ];
    if schedule.shutdown_when_idle {
        tasks.push(Arc::new(ShutdownAfterWorkCompletedTask::new(
            coord.clone(),
            schedule.shutdown_initial(),
            schedule.shutdown_follow_up(),
        )));
    }

    Host::builder(coord)
        .with_tasks(tasks)
        .with_fault_interval(config.coordination.fault_summary_interval())
        .build()
}

/// Runs the service until a termination signal or a `ShutdownMessage`.
///
/// Installs the panic hook feeding the fault buffer. Logging is left to the caller.
pub async fn run(config: Config, collaborators: Collaborators) -> Result<(), RuntimeError> {
    let coord = Coordination::new(&config.coordination);
    coord.faults.install_panic_hook();

    let host = build_host(&config, coord, collaborators);
    info!(tasks = ?host.task_names(), "package verifier starting");
    host.run_until_shutdown().await
}
