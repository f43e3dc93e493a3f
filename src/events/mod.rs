//! Domain messages and the typed publish/subscribe bus.
//!
//! ## Contents
//! - [`Message`] and the domain message types
//! - [`EventBus`], [`Subscription`], [`SubscribeOptions`]
//!
//! ## Quick reference
//! - **Publishers**: tasks (`StartupTask`, `CheckForSubmittedPackagesTask`,
//!   `ShutdownAfterWorkCompletedTask`) and the package verifier.
//! - **Consumers**: tasks and the host (waiting for [`ShutdownMessage`]).

mod bus;
mod message;

pub use bus::{EventBus, SubscribeOptions, Subscription, DEFAULT_QUEUE_CAPACITY};
pub use message::{
    Message, PackageTestLog, PackageTestResultMessage, ShutdownMessage, StartupMessage,
    SubmissionsQueuedMessage, SubmitPackageMessage,
};
