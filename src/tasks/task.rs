//! # Task abstraction.
//!
//! A [`Task`] is a long-lived background unit owned by the [`Host`](crate::Host).
//! It is driven by timers, by bus messages, or both, and has a uniform
//! lifecycle:
//!
//! ```text
//! Created ──initialize()──► Initialized ──(timer / message)──► Active ─┐
//!                                ▲                                     │
//!                                └─────────────────────────────────────┘
//! any state ──shutdown()──► ShutDown
//! ```
//!
//! `initialize` only registers subscriptions and timers and returns promptly.
//! `shutdown` disposes them and releases external resources; it is safe to
//! call without a prior `initialize`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TaskError;

/// # Long-lived background unit.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use package_verifier::{Task, TaskError};
///
/// struct Heartbeat;
///
/// #[async_trait]
/// impl Task for Heartbeat {
///     fn name(&self) -> &str { "heartbeat" }
///
///     async fn initialize(&self) -> Result<(), TaskError> {
///         // subscribe / schedule...
///         Ok(())
///     }
///
///     async fn shutdown(&self) -> Result<(), TaskError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Returns a stable, human-readable task name.
    fn name(&self) -> &str;

    /// Registers subscriptions and timers. A second call is a logged no-op.
    async fn initialize(&self) -> Result<(), TaskError>;

    /// Disposes subscriptions, stops timers and releases resources.
    async fn shutdown(&self) -> Result<(), TaskError>;
}

/// Shared handle to a task.
pub type TaskRef = Arc<dyn Task>;
