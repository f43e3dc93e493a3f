//! # Messages routed through the [`EventBus`](crate::EventBus).
//!
//! A message is an immutable value identified by its concrete type: the bus
//! routes on [`TypeId`](std::any::TypeId), and two published instances of the
//! same type are two independent occurrences.
//!
//! ## Domain messages
//! ```text
//! StartupTask ──────────► StartupMessage
//!                              │
//! CheckForSubmitted ◄──────────┘
//!      ├──► SubmitPackageMessage ───────► TestPackageTask ──► PackageTestResultMessage
//!      └──► SubmissionsQueuedMessage ───► ShutdownAfterWorkCompleted ──► ShutdownMessage ──► Host
//! ```

use std::any::Any;
use std::fmt::Debug;

use chrono::{DateTime, Utc};

/// A value that can be published on the bus.
pub trait Message: Any + Debug + Send + Sync {
    /// Stable, human-readable message kind used in logs and delivery errors.
    const KIND: &'static str;
}

/// Published once, shortly after the host has started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupMessage;

impl Message for StartupMessage {
    const KIND: &'static str = "startup";
}

/// A package version submitted for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitPackageMessage {
    pub package_id: String,
    pub package_version: String,
}

impl SubmitPackageMessage {
    pub fn new(package_id: impl Into<String>, package_version: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
            package_version: package_version.into(),
        }
    }
}

impl Message for SubmitPackageMessage {
    const KIND: &'static str = "submit_package";
}

/// All submissions found by one check have been published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionsQueuedMessage {
    pub count: usize,
}

impl Message for SubmissionsQueuedMessage {
    const KIND: &'static str = "submissions_queued";
}

/// One named log artifact of a verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageTestLog {
    pub name: String,
    pub contents: String,
}

impl PackageTestLog {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

/// Outcome of a completed verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageTestResultMessage {
    pub package_id: String,
    pub package_version: String,
    /// Human-readable platform, e.g. "Windows Server 2012 R2 x64".
    pub platform_name: String,
    /// Short sandbox label, e.g. "win2012r2x64".
    pub machine_name: String,
    pub tested_at: DateTime<Utc>,
    pub logs: Vec<PackageTestLog>,
    pub success: bool,
}

impl PackageTestResultMessage {
    /// Returns the log artifact called `name`, if present.
    pub fn log(&self, name: &str) -> Option<&PackageTestLog> {
        self.logs.iter().find(|l| l.name == name)
    }
}

impl Message for PackageTestResultMessage {
    const KIND: &'static str = "package_test_result";
}

/// The service may stop: no work is in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownMessage;

impl Message for ShutdownMessage {
    const KIND: &'static str = "shutdown";
}
