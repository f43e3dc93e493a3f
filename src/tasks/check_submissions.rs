//! # Submitted-package discovery.
//!
//! [`CheckForSubmittedPackagesTask`] asks a [`SubmissionSource`] for packages
//! awaiting verification, on [`StartupMessage`] and then on a fixed interval.
//!
//! ```text
//! StartupMessage ──┐
//! every interval ──┴─► check() ── lock CHECK_LOCK (single try) ── busy? skip
//!                         │
//!                         ├─► SubmitPackageMessage × N
//!                         └─► SubmissionsQueuedMessage { count: N }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::Coordination;
use crate::error::TaskError;
use crate::events::{StartupMessage, SubmissionsQueuedMessage, SubmitPackageMessage};
use crate::tasks::lifecycle::Lifecycle;
use crate::tasks::Task;

/// Lock serializing checks; a check that finds it held is skipped.
pub const CHECK_LOCK: &str = "check_for_submitted_packages";

/// Provider of packages awaiting verification.
#[async_trait]
pub trait SubmissionSource: Send + Sync + 'static {
    async fn submitted_packages(&self) -> Result<Vec<SubmitPackageMessage>, TaskError>;
}

struct Checker {
    coord: Coordination,
    source: Arc<dyn SubmissionSource>,
}

impl Checker {
    async fn check(&self) -> Result<(), TaskError> {
        let _guard = match self.coord.locks.lock(CHECK_LOCK, Some(Duration::ZERO)).await {
            Ok(guard) => guard,
            Err(_) => {
                debug!("a submission check is already running; skipping");
                return Ok(());
            }
        };

        self.coord
            .tracker
            .track(CheckForSubmittedPackagesTask::NAME, self.publish_submissions())
            .await?
    }

    async fn publish_submissions(&self) -> Result<(), TaskError> {
        info!("checking for submitted packages to test");
        let packages = self.source.submitted_packages().await?;

        let count = packages.len();
        for package in packages {
            info!(
                package = %package.package_id,
                version = %package.package_version,
                "found in submitted state"
            );
            self.coord.bus.publish(package);
        }
        self.coord.bus.publish(SubmissionsQueuedMessage { count });
        info!(count, "submitted packages queued");
        Ok(())
    }
}

/// Publishes submitted packages on startup and on a fixed interval.
pub struct CheckForSubmittedPackagesTask {
    checker: Arc<Checker>,
    interval: Duration,
    lifecycle: Lifecycle,
}

impl CheckForSubmittedPackagesTask {
    pub const NAME: &'static str = "check_for_submitted_packages";

    pub fn new(coord: Coordination, source: Arc<dyn SubmissionSource>, interval: Duration) -> Self {
        Self {
            checker: Arc::new(Checker { coord, source }),
            interval,
            lifecycle: Lifecycle::default(),
        }
    }

    /// Runs one check immediately.
    pub async fn check_now(&self) -> Result<(), TaskError> {
        self.checker.check().await
    }
}

#[async_trait]
impl Task for CheckForSubmittedPackagesTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn initialize(&self) -> Result<(), TaskError> {
        if !self.lifecycle.begin_initialize(Self::NAME) {
            return Ok(());
        }
        let coord = &self.checker.coord;

        let checker = Arc::clone(&self.checker);
        let subscription = coord.bus.subscribe(move |_: Arc<StartupMessage>| {
            let checker = Arc::clone(&checker);
            async move { checker.check().await }
        });
        self.lifecycle.hold_subscription(subscription);

        let checker = Arc::clone(&self.checker);
        let job = coord
            .scheduler
            .every(Self::NAME, self.interval, self.interval, move || {
                let checker = Arc::clone(&checker);
                async move { checker.check().await }
            });
        self.lifecycle.hold_job(job);

        info!(
            task = Self::NAME,
            interval = ?self.interval,
            "will check for new package submissions periodically"
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TaskError> {
        self.lifecycle.release(Self::NAME);
        Ok(())
    }
}
