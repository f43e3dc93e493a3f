//! Runs the verification workflow for every [`SubmitPackageMessage`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::core::Coordination;
use crate::error::TaskError;
use crate::events::SubmitPackageMessage;
use crate::tasks::lifecycle::Lifecycle;
use crate::tasks::Task;
use crate::workflow::{PackageVerifier, SANDBOX_LOCK};

/// Event-driven wrapper around [`PackageVerifier`].
///
/// Submissions are handled one at a time, in publish order.
pub struct TestPackageTask {
    coord: Coordination,
    verifier: Arc<PackageVerifier>,
    lifecycle: Lifecycle,
}

impl TestPackageTask {
    pub const NAME: &'static str = "test_package";

    pub fn new(coord: Coordination, verifier: Arc<PackageVerifier>) -> Self {
        Self {
            coord,
            verifier,
            lifecycle: Lifecycle::default(),
        }
    }
}

#[async_trait]
impl Task for TestPackageTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn initialize(&self) -> Result<(), TaskError> {
        if !self.lifecycle.begin_initialize(Self::NAME) {
            return Ok(());
        }
        let verifier = Arc::clone(&self.verifier);
        let subscription = self.coord.bus.subscribe(move |m: Arc<SubmitPackageMessage>| {
            let verifier = Arc::clone(&verifier);
            async move { verifier.verify(&m).await.map(|_| ()) }
        });
        self.lifecycle.hold_subscription(subscription);
        info!(task = Self::NAME, "ready and waiting for submitted packages");
        Ok(())
    }

    /// Stops taking submissions, shuts the sandbox down and clears its lock.
    async fn shutdown(&self) -> Result<(), TaskError> {
        self.lifecycle.release(Self::NAME);
        self.verifier.sandbox().shutdown().await;
        self.coord.locks.kill(SANDBOX_LOCK).await;
        Ok(())
    }
}
