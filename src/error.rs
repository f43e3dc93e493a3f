//! Error types used by the coordination core, the event bus and tasks.
//!
//! - [`LockError`]: a named lock could not be obtained in time.
//! - [`TaskError`]: a task activation, initialization or shutdown failed.
//! - [`DeliveryError`]: a message could not be handled by one subscription.
//! - [`RuntimeError`]: the host itself could not run.
//!
//! Each type provides `as_label` (short, stable, snake_case) for logs and for
//! keying the [`FaultSink`](crate::FaultSink).

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the named lock registry.
///
/// A timeout is a recoverable condition: the caller decides whether the
/// operation is retried later.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The lock was still held by someone else when the deadline elapsed.
    #[error("was not able to acquire a lock on '{name}' within {timeout:?}")]
    Timeout {
        /// Name of the lock.
        name: String,
        /// The bound that was waited for (`None` = waited indefinitely).
        timeout: Option<Duration>,
    },
}

impl LockError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use package_verifier::LockError;
    /// use std::time::Duration;
    ///
    /// let err = LockError::Timeout { name: "sandbox".into(), timeout: Some(Duration::from_secs(1)) };
    /// assert_eq!(err.as_label(), "lock_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            LockError::Timeout { .. } => "lock_timeout",
        }
    }

    /// Name of the lock the error refers to.
    pub fn lock_name(&self) -> &str {
        match self {
            LockError::Timeout { name, .. } => name,
        }
    }
}

/// # Errors produced by task code.
///
/// Returned from [`Task::initialize`](crate::Task::initialize),
/// [`Task::shutdown`](crate::Task::shutdown) and from message handlers.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// The operation failed but the task may succeed on a later activation.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Non-recoverable error (misconfiguration, broken invariant).
    #[error("fatal error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// A named lock the operation needed could not be obtained.
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for [`TaskError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        TaskError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use package_verifier::TaskError;
    ///
    /// assert_eq!(TaskError::fail("boom").as_label(), "task_failed");
    /// assert_eq!(TaskError::fatal("nope").as_label(), "task_fatal");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Lock(e) => e.as_label(),
        }
    }

    /// Indicates whether a later activation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Fail { .. } | TaskError::Lock(_))
    }
}

/// # Errors reported to a subscription's error handler.
///
/// Never propagated to the publisher.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    /// The handler returned an error.
    #[error("handler for {message} failed: {error}")]
    HandlerFailed {
        /// Message kind being delivered.
        message: &'static str,
        /// Rendered handler error.
        error: String,
    },

    /// The handler (or the filter) panicked.
    #[error("handler for {message} panicked: {info}")]
    HandlerPanicked {
        /// Message kind being delivered.
        message: &'static str,
        /// Panic payload, if it was a string.
        info: String,
    },

    /// The subscription queue was full; the message was dropped for this subscription only.
    #[error("queue for {message} subscription is full; message dropped")]
    Overflow {
        /// Message kind that was dropped.
        message: &'static str,
    },
}

impl DeliveryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DeliveryError::HandlerFailed { .. } => "delivery_handler_failed",
            DeliveryError::HandlerPanicked { .. } => "delivery_handler_panicked",
            DeliveryError::Overflow { .. } => "delivery_overflow",
        }
    }
}

/// # Errors produced by the host runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// OS signal listeners could not be registered.
    #[error("failed to register shutdown signal handlers: {0}")]
    Signal(#[from] std::io::Error),

    /// The global tracing subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Signal(_) => "runtime_signal",
            RuntimeError::Logging(_) => "runtime_logging",
        }
    }
}
