//! # Sandbox driver seam.
//!
//! The verifier never talks to a virtual machine directly; it drives a
//! [`SandboxDriver`]. Provisioning mechanics live behind the trait.

use std::fmt;

use async_trait::async_trait;

/// A structured line reported by the sandbox for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultMessage {
    Note(String),
    Error(String),
}

impl ResultMessage {
    pub fn is_error(&self) -> bool {
        matches!(self, ResultMessage::Error(_))
    }

    pub fn text(&self) -> &str {
        match self {
            ResultMessage::Note(t) | ResultMessage::Error(t) => t,
        }
    }
}

impl fmt::Display for ResultMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultMessage::Note(t) => write!(f, "note: {t}"),
            ResultMessage::Error(t) => write!(f, "error: {t}"),
        }
    }
}

/// Outcome of one command executed in the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxRunResult {
    /// Process exit code; `0` is success, `-1` means the command never finished.
    pub exit_code: i32,
    /// Combined output of the command.
    pub log: String,
    pub messages: Vec<ResultMessage>,
}

impl SandboxRunResult {
    pub fn new(exit_code: i32, log: impl Into<String>) -> Self {
        Self {
            exit_code,
            log: log.into(),
            messages: Vec::new(),
        }
    }

    /// Failed result for a command that exceeded its time bound.
    pub fn timed_out(command: &str, after: std::time::Duration) -> Self {
        let text = format!("command '{command}' did not finish within {after:?}");
        Self {
            exit_code: -1,
            log: text.clone(),
            messages: vec![ResultMessage::Error(text)],
        }
    }

    pub fn with_message(mut self, message: ResultMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .filter(|m| m.is_error())
            .map(ResultMessage::text)
    }
}

/// Disposable virtual machine used to install and uninstall packages.
///
/// Callers serialize all use through the `"sandbox"` named lock.
#[async_trait]
pub trait SandboxDriver: Send + Sync + 'static {
    /// Brings the machine up. Returns false when it cannot be used.
    async fn prepare(&self) -> bool;

    /// Rolls the machine back to its clean snapshot.
    async fn reset(&self) -> bool;

    /// Runs `command` inside the machine and waits for it.
    async fn run_command(&self, command: &str) -> SandboxRunResult;

    /// Tears a broken machine down so the next `prepare` starts fresh.
    async fn destroy(&self);

    /// Stops the machine when the service shuts down.
    async fn shutdown(&self);
}

/// Log substrings identifying a sandbox infrastructure failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSignatures {
    patterns: Vec<String>,
}

impl FailureSignatures {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    /// Returns the first signature contained in `log`.
    pub fn detect(&self, log: &str) -> Option<&str> {
        if log.trim().is_empty() {
            return None;
        }
        self.patterns
            .iter()
            .find(|p| log.contains(p.as_str()))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_detect_returns_matching_signature() {
        let sigs = FailureSignatures::new(["An action 'provision' was attempted", "VBoxManage.exe: error:"]);
        let log = "==> default: booting\nVBoxManage.exe: error: The machine is locked";
        assert_eq!(sigs.detect(log), Some("VBoxManage.exe: error:"));
        assert_eq!(sigs.detect("Chocolatey installed 1/1 packages."), None);
        assert_eq!(sigs.detect("   "), None);
    }

    #[test]
    fn test_empty_patterns_never_match() {
        let sigs = FailureSignatures::new(["", "boom"]);
        assert_eq!(sigs.detect("all good"), None);
        assert_eq!(sigs.detect("boom"), Some("boom"));
    }

    #[test]
    fn test_timed_out_result_is_failure() {
        let r = SandboxRunResult::timed_out("choco install git", Duration::from_secs(5));
        assert!(!r.success());
        assert_eq!(r.exit_code, -1);
        assert_eq!(r.errors().count(), 1);
    }
}
