//! Publishes [`StartupMessage`] once, shortly after the host has started.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::core::Coordination;
use crate::error::TaskError;
use crate::events::StartupMessage;
use crate::tasks::lifecycle::Lifecycle;
use crate::tasks::Task;

/// One-shot startup signal.
pub struct StartupTask {
    coord: Coordination,
    delay: Duration,
    lifecycle: Lifecycle,
}

impl StartupTask {
    pub const NAME: &'static str = "startup";

    pub fn new(coord: Coordination, delay: Duration) -> Self {
        Self {
            coord,
            delay,
            lifecycle: Lifecycle::default(),
        }
    }
}

#[async_trait]
impl Task for StartupTask {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn initialize(&self) -> Result<(), TaskError> {
        if !self.lifecycle.begin_initialize(Self::NAME) {
            return Ok(());
        }
        let bus = self.coord.bus.clone();
        let job = self.coord.scheduler.once(Self::NAME, self.delay, async move {
            info!("publishing startup message");
            bus.publish(StartupMessage);
            Ok(())
        });
        self.lifecycle.hold_job(job);
        info!(task = Self::NAME, delay = ?self.delay, "startup message scheduled");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TaskError> {
        self.lifecycle.release(Self::NAME);
        Ok(())
    }
}
