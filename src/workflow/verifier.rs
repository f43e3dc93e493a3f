//! # Package verification workflow.
//!
//! [`PackageVerifier::verify`] drives one submitted package through the
//! sandbox and publishes a [`PackageTestResultMessage`].
//!
//! ## State machine
//! ```text
//!            tracker.track("test_package") + locks["sandbox"]
//!  ┌──────────────────────────────────────────────────────────────────────┐
//!  │ Idle ─► Prepping ─► InstallTesting ─► UninstallTesting ─► Reporting ─┼─► Idle
//!  │            │              │         (exit 0 only)  │                 │
//!  │            ▼              ▼                        ▼                 │
//!  │         Aborted       Aborted ◄─── failure signature: destroy + cool-down
//!  └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - The whole sequence runs under the `"sandbox"` named lock and is tracked as active work.
//! - `reset()` only runs after a successful `prepare()`; either failing aborts before any command.
//! - Install exit code `0` governs the verdict; a failed uninstall is reported as allowed.
//! - A sandbox failure publishes nothing for the attempt.
//! - Unreadable snapshot artifacts are logged and reported empty.
//! - The result is published before the working subdirectories are deleted.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::{render_command, ReportConfig, SandboxConfig};
use crate::core::Coordination;
use crate::error::TaskError;
use crate::events::{PackageTestResultMessage, SubmitPackageMessage};
use crate::workflow::files::FileStore;
use crate::workflow::sandbox::{FailureSignatures, SandboxDriver, SandboxRunResult};
use crate::workflow::summary::RunReport;

/// Named lock serializing every use of the sandbox.
pub const SANDBOX_LOCK: &str = "sandbox";

/// Tracker name of a verification in flight.
pub const VERIFY_WORK: &str = "test_package";

/// Stage of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Idle,
    Prepping,
    InstallTesting,
    UninstallTesting,
    Reporting,
    Aborted,
}

/// Why an attempt ended without a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// `prepare()` or `reset()` returned false.
    SandboxUnavailable,
    /// A command log contained a sandbox failure signature.
    SandboxFailure { signature: String },
    /// The sandbox lock was not obtained in time.
    LockTimeout,
}

/// Result of one [`PackageVerifier::verify`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// A [`PackageTestResultMessage`] was published.
    Reported { success: bool },
    /// Nothing was published.
    Aborted {
        stage: WorkflowState,
        reason: AbortReason,
    },
}

/// Settings of the workflow, usually derived from [`SandboxConfig`] and [`ReportConfig`].
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    pub lock_timeout: Option<Duration>,
    pub command_timeout: Duration,
    pub cooldown: Duration,
    pub signatures: FailureSignatures,
    pub install_command: String,
    pub uninstall_command: String,
    pub files_dir: PathBuf,
    pub report: ReportConfig,
}

impl VerifierSettings {
    pub fn from_config(sandbox: &SandboxConfig, report: &ReportConfig) -> Self {
        Self {
            lock_timeout: sandbox.lock_timeout(),
            command_timeout: sandbox.command_timeout(),
            cooldown: sandbox.cooldown(),
            signatures: FailureSignatures::new(sandbox.failure_signatures.iter().cloned()),
            install_command: sandbox.install_command.clone(),
            uninstall_command: sandbox.uninstall_command.clone(),
            files_dir: sandbox.files_dir.clone(),
            report: report.clone(),
        }
    }

    fn package_dir(&self, package: &SubmitPackageMessage) -> PathBuf {
        self.files_dir
            .join(format!("{}.{}", package.package_id, package.package_version))
    }
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default(), &ReportConfig::default())
    }
}

/// Drives submitted packages through the sandbox.
pub struct PackageVerifier {
    coord: Coordination,
    sandbox: Arc<dyn SandboxDriver>,
    files: Arc<dyn FileStore>,
    settings: VerifierSettings,
    state: Mutex<WorkflowState>,
}

impl PackageVerifier {
    pub fn new(
        coord: Coordination,
        sandbox: Arc<dyn SandboxDriver>,
        files: Arc<dyn FileStore>,
        settings: VerifierSettings,
    ) -> Self {
        Self {
            coord,
            sandbox,
            files,
            settings,
            state: Mutex::new(WorkflowState::Idle),
        }
    }

    /// Current stage; `Aborted` persists until the next attempt starts.
    pub fn state(&self) -> WorkflowState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: WorkflowState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(from = ?*state, to = ?next, "workflow transition");
        *state = next;
    }

    pub fn sandbox(&self) -> &Arc<dyn SandboxDriver> {
        &self.sandbox
    }

    /// Verifies one package.
    ///
    /// Fails only when the work could not be registered with the tracker;
    /// every sandbox problem is an [`VerificationOutcome::Aborted`].
    pub async fn verify(
        &self,
        package: &SubmitPackageMessage,
    ) -> Result<VerificationOutcome, TaskError> {
        info!(
            "========== {} v{} ==========",
            package.package_id, package.package_version
        );

        let outcome = self
            .coord
            .tracker
            .track(VERIFY_WORK, async {
                let locked = self
                    .coord
                    .locks
                    .with_lock(SANDBOX_LOCK, self.settings.lock_timeout, self.run(package))
                    .await;
                match locked {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(
                            package = %package.package_id,
                            lock = e.lock_name(),
                            error = %e,
                            "sandbox is busy"
                        );
                        self.coord.faults.record(e.as_label(), e.to_string());
                        VerificationOutcome::Aborted {
                            stage: WorkflowState::Idle,
                            reason: AbortReason::LockTimeout,
                        }
                    }
                }
            })
            .await?;
        Ok(outcome)
    }

    async fn run(&self, package: &SubmitPackageMessage) -> VerificationOutcome {
        let id = package.package_id.as_str();
        let version = package.package_version.as_str();
        info!(package = id, version, "testing package");

        self.set_state(WorkflowState::Prepping);
        if !self.sandbox.prepare().await || !self.sandbox.reset().await {
            return self.abort(package, WorkflowState::Prepping, AbortReason::SandboxUnavailable);
        }

        self.set_state(WorkflowState::InstallTesting);
        info!(package = id, "checking install");
        let install = self
            .run_command(&render_command(&self.settings.install_command, id, version))
            .await;
        info!(
            package = id,
            exit_code = install.exit_code,
            "install was {}",
            if install.success() { "successful" } else { "not successful" }
        );
        if let Some(outcome) = self
            .detect_sandbox_failure(package, WorkflowState::InstallTesting, &install)
            .await
        {
            return outcome;
        }

        let uninstall = if install.success() {
            self.set_state(WorkflowState::UninstallTesting);
            info!(package = id, "now checking uninstall");
            let uninstall = self
                .run_command(&render_command(&self.settings.uninstall_command, id, version))
                .await;
            info!(
                package = id,
                exit_code = uninstall.exit_code,
                "uninstall was {}",
                if uninstall.success() { "successful" } else { "not successful" }
            );
            if let Some(outcome) = self
                .detect_sandbox_failure(package, WorkflowState::UninstallTesting, &uninstall)
                .await
            {
                return outcome;
            }
            Some(uninstall)
        } else {
            None
        };

        self.set_state(WorkflowState::Reporting);
        let dir = self.settings.package_dir(package);
        let report = RunReport {
            package,
            tested_at: Utc::now(),
            install: &install,
            uninstall: uninstall.as_ref(),
            registry_snapshot: self.read_artifact(&dir.join(".registry")).await,
            files_snapshot: self.read_artifact(&dir.join(".files")).await,
        };
        let success = report.success();

        self.coord.bus.publish(PackageTestResultMessage {
            package_id: id.to_owned(),
            package_version: version.to_owned(),
            platform_name: self.settings.report.platform_name.clone(),
            machine_name: self.settings.report.machine_name.clone(),
            tested_at: report.tested_at,
            logs: report.logs(&self.settings.report),
            success,
        });
        info!(package = id, version, success, "package test result published");

        self.clean_working_dirs().await;
        self.set_state(WorkflowState::Idle);
        VerificationOutcome::Reported { success }
    }

    async fn run_command(&self, command: &str) -> SandboxRunResult {
        let bound = self.settings.command_timeout;
        match time::timeout(bound, self.sandbox.run_command(command)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(command, timeout = ?bound, "sandbox command timed out");
                SandboxRunResult::timed_out(command, bound)
            }
        }
    }

    /// Destroys the sandbox and cools down when `result` shows an infrastructure failure.
    async fn detect_sandbox_failure(
        &self,
        package: &SubmitPackageMessage,
        stage: WorkflowState,
        result: &SandboxRunResult,
    ) -> Option<VerificationOutcome> {
        let signature = self.settings.signatures.detect(&result.log)?.to_owned();

        warn!(
            package = %package.package_id,
            version = %package.package_version,
            signature = %signature,
            log = %result.log,
            "unable to use sandbox machine for testing"
        );
        self.sandbox.destroy().await;
        time::sleep(self.settings.cooldown).await;
        Some(self.abort(package, stage, AbortReason::SandboxFailure { signature }))
    }

    fn abort(
        &self,
        package: &SubmitPackageMessage,
        stage: WorkflowState,
        reason: AbortReason,
    ) -> VerificationOutcome {
        self.set_state(WorkflowState::Aborted);
        error!(
            package = %package.package_id,
            version = %package.package_version,
            ?stage,
            ?reason,
            "unable to test package due to sandbox issues"
        );
        self.coord.faults.record(
            "sandbox",
            format!(
                "{} v{} aborted during {stage:?}: {reason:?}",
                package.package_id, package.package_version
            ),
        );
        VerificationOutcome::Aborted { stage, reason }
    }

    /// Reads a snapshot file; any problem yields an empty artifact.
    async fn read_artifact(&self, path: &Path) -> String {
        if !self.files.exists(path).await {
            debug!(path = %path.display(), "snapshot artifact not present");
            return String::new();
        }
        match self.files.read_text(path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unable to read snapshot artifact");
                self.coord
                    .faults
                    .record("artifact_read", format!("{}: {e}", path.display()));
                String::new()
            }
        }
    }

    async fn clean_working_dirs(&self) {
        let dirs = match self.files.list_subdirectories(&self.settings.files_dir).await {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!(dir = %self.settings.files_dir.display(), error = %e, "unable to list working directory");
                self.coord.faults.record("cleanup", e.to_string());
                return;
            }
        };
        for dir in dirs {
            if let Err(e) = self.files.delete_recursive(&dir).await {
                warn!(dir = %dir.display(), error = %e, "unable to clean up working directory");
                self.coord
                    .faults
                    .record("cleanup", format!("{}: {e}", dir.display()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PackageTestResultMessage;
    use crate::workflow::summary::{INSTALL_LOG, SUMMARY_LOG, UNINSTALL_LOG};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::io;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    #[derive(Default)]
    struct FakeSandbox {
        prepare_ok: bool,
        reset_ok: bool,
        results: StdMutex<VecDeque<SandboxRunResult>>,
        calls: StdMutex<Vec<String>>,
        command_delay: Option<Duration>,
    }

    impl FakeSandbox {
        fn healthy(results: Vec<SandboxRunResult>) -> Self {
            Self {
                prepare_ok: true,
                reset_ok: true,
                results: StdMutex::new(results.into()),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl SandboxDriver for FakeSandbox {
        async fn prepare(&self) -> bool {
            self.record("prepare");
            self.prepare_ok
        }
        async fn reset(&self) -> bool {
            self.record("reset");
            self.reset_ok
        }
        async fn run_command(&self, command: &str) -> SandboxRunResult {
            self.record(format!("run {command}"));
            if let Some(delay) = self.command_delay {
                time::sleep(delay).await;
            }
            self.results.lock().unwrap().pop_front().unwrap_or_default()
        }
        async fn destroy(&self) {
            self.record("destroy");
        }
        async fn shutdown(&self) {
            self.record("shutdown");
        }
    }

    #[derive(Default)]
    struct MemoryFiles {
        files: StdMutex<HashMap<PathBuf, io::Result<String>>>,
        dirs: StdMutex<Vec<PathBuf>>,
        deleted: StdMutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl FileStore for MemoryFiles {
        async fn exists(&self, path: &Path) -> bool {
            self.files.lock().unwrap().contains_key(path)
        }
        async fn read_text(&self, path: &Path) -> io::Result<String> {
            match self.files.lock().unwrap().get(path) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(e)) => Err(io::Error::new(e.kind(), e.to_string())),
                None => Err(io::ErrorKind::NotFound.into()),
            }
        }
        async fn list_subdirectories(&self, _dir: &Path) -> io::Result<Vec<PathBuf>> {
            Ok(self.dirs.lock().unwrap().clone())
        }
        async fn delete_recursive(&self, dir: &Path) -> io::Result<()> {
            self.deleted.lock().unwrap().push(dir.to_path_buf());
            Ok(())
        }
    }

    struct Harness {
        coord: Coordination,
        sandbox: Arc<FakeSandbox>,
        files: Arc<MemoryFiles>,
        verifier: PackageVerifier,
        results: UnboundedReceiver<Arc<PackageTestResultMessage>>,
        _sub: crate::events::Subscription,
    }

    fn harness(sandbox: FakeSandbox) -> Harness {
        let coord = Coordination::default();
        let sandbox = Arc::new(sandbox);
        let files = Arc::new(MemoryFiles::default());
        let (tx, results) = unbounded_channel();
        let _sub = coord.bus.subscribe(move |m: Arc<PackageTestResultMessage>| {
            let _ = tx.send(m);
            async { Ok(()) }
        });
        let verifier = PackageVerifier::new(
            coord.clone(),
            sandbox.clone(),
            files.clone(),
            VerifierSettings::default(),
        );
        Harness {
            coord,
            sandbox,
            files,
            verifier,
            results,
            _sub,
        }
    }

    fn git() -> SubmitPackageMessage {
        SubmitPackageMessage::new("git", "2.1.0")
    }

    #[tokio::test(start_paused = true)]
    async fn test_passing_install_and_uninstall_reports_success() {
        let mut h = harness(FakeSandbox::healthy(vec![
            SandboxRunResult::new(0, "installed git"),
            SandboxRunResult::new(0, "uninstalled git"),
        ]));

        let outcome = h.verifier.verify(&git()).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Reported { success: true });
        assert_eq!(h.verifier.state(), WorkflowState::Idle);
        assert_eq!(
            h.sandbox.calls(),
            vec![
                "prepare",
                "reset",
                "run choco.exe install git --version 2.1.0 -fdvy",
                "run choco.exe uninstall git --version 2.1.0 -dvy",
            ]
        );

        let result = h.results.recv().await.unwrap();
        assert!(result.success);
        assert_eq!(result.machine_name, "win2012r2x64");
        assert!(result.log(SUMMARY_LOG).is_some());
        assert_eq!(result.log(INSTALL_LOG).unwrap().contents, "installed git");
        assert_eq!(result.log(UNINSTALL_LOG).unwrap().contents, "uninstalled git");
        assert!(!h.coord.tracker.has_active_tasks().await);
        assert!(!h.coord.locks.is_held(SANDBOX_LOCK));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sandbox_failure_destroys_and_publishes_nothing() {
        let mut h = harness(FakeSandbox::healthy(vec![SandboxRunResult::new(
            1,
            "VBoxManage.exe: error: Could not find a registered machine",
        )]));

        let started = time::Instant::now();
        let outcome = h.verifier.verify(&git()).await.unwrap();
        assert_eq!(
            outcome,
            VerificationOutcome::Aborted {
                stage: WorkflowState::InstallTesting,
                reason: AbortReason::SandboxFailure {
                    signature: "VBoxManage.exe: error:".into()
                },
            }
        );
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert_eq!(h.verifier.state(), WorkflowState::Aborted);
        assert_eq!(h.sandbox.calls().last().map(String::as_str), Some("destroy"));

        tokio::task::yield_now().await;
        assert!(h.results.try_recv().is_err());
        assert!(!h.coord.faults.is_empty());
        assert!(!h.coord.locks.is_held(SANDBOX_LOCK));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_failure_aborts_before_any_command() {
        let mut h = harness(FakeSandbox {
            prepare_ok: false,
            reset_ok: true,
            ..FakeSandbox::default()
        });

        let outcome = h.verifier.verify(&git()).await.unwrap();
        assert_eq!(
            outcome,
            VerificationOutcome::Aborted {
                stage: WorkflowState::Prepping,
                reason: AbortReason::SandboxUnavailable,
            }
        );
        assert_eq!(h.sandbox.calls(), vec!["prepare"]);
        tokio::task::yield_now().await;
        assert!(h.results.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_uninstall_is_allowed() {
        let mut h = harness(FakeSandbox::healthy(vec![
            SandboxRunResult::new(0, "installed"),
            SandboxRunResult::new(1, "uninstall failed"),
        ]));

        let outcome = h.verifier.verify(&git()).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Reported { success: true });

        let result = h.results.recv().await.unwrap();
        assert!(result.success);
        let summary = &result.log(SUMMARY_LOG).unwrap().contents;
        assert!(summary.contains("Uninstall failed (allowed)."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_install_skips_uninstall() {
        let mut h = harness(FakeSandbox::healthy(vec![SandboxRunResult::new(1603, "msi error")]));

        let outcome = h.verifier.verify(&git()).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Reported { success: false });
        assert_eq!(h.sandbox.calls().len(), 3);

        let result = h.results.recv().await.unwrap();
        assert!(!result.success);
        assert!(result.log(UNINSTALL_LOG).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timeout_yields_failed_install() {
        let mut sandbox = FakeSandbox::healthy(vec![SandboxRunResult::new(0, "never seen")]);
        sandbox.command_delay = Some(Duration::from_secs(3600));
        let mut h = harness(sandbox);

        let outcome = h.verifier.verify(&git()).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Reported { success: false });
        let result = h.results.recv().await.unwrap();
        assert!(result.log(SUMMARY_LOG).unwrap().contents.contains("Install error: command"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_are_read_and_working_dirs_cleaned() {
        let mut h = harness(FakeSandbox::healthy(vec![
            SandboxRunResult::new(0, "i"),
            SandboxRunResult::new(0, "u"),
        ]));
        let dir = PathBuf::from("files").join("git.2.1.0");
        {
            let mut files = h.files.files.lock().unwrap();
            files.insert(dir.join(".registry"), Ok("<registry/>".into()));
            files.insert(
                dir.join(".files"),
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked")),
            );
        }
        h.files.dirs.lock().unwrap().push(dir.clone());

        h.verifier.verify(&git()).await.unwrap();

        let result = h.results.recv().await.unwrap();
        assert_eq!(result.log("RegistrySnapshot.xml").unwrap().contents, "<registry/>");
        assert!(result.log("FilesSnapshot.xml").is_none());
        assert_eq!(*h.files.deleted.lock().unwrap(), vec![dir]);
        let faults = h.coord.faults.drain();
        assert_eq!(faults[0].category, "artifact_read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_sandbox_times_out() {
        let h = harness(FakeSandbox::healthy(vec![]));
        let settings = VerifierSettings {
            lock_timeout: Some(Duration::from_secs(1)),
            ..VerifierSettings::default()
        };
        let verifier = PackageVerifier::new(h.coord.clone(), h.sandbox.clone(), h.files.clone(), settings);
        let _held = h.coord.locks.lock(SANDBOX_LOCK, None).await.unwrap();

        let started = time::Instant::now();
        let outcome = verifier.verify(&git()).await.unwrap();
        assert_eq!(
            outcome,
            VerificationOutcome::Aborted {
                stage: WorkflowState::Idle,
                reason: AbortReason::LockTimeout,
            }
        );
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(2));
        assert!(h.sandbox.calls().is_empty());
        assert!(!h.coord.tracker.has_active_tasks().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_is_tracked_while_running() {
        let mut sandbox = FakeSandbox::healthy(vec![
            SandboxRunResult::new(0, "i"),
            SandboxRunResult::new(0, "u"),
        ]);
        sandbox.command_delay = Some(Duration::from_secs(60));
        let h = harness(sandbox);
        let verifier = Arc::new(h.verifier);

        let running = tokio::spawn({
            let verifier = Arc::clone(&verifier);
            async move { verifier.verify(&git()).await }
        });
        time::sleep(Duration::from_secs(30)).await;
        assert!(h.coord.tracker.has_active_tasks().await);
        assert_eq!(h.coord.tracker.active_tasks().await.unwrap(), vec![VERIFY_WORK]);
        assert!(h.coord.locks.is_held(SANDBOX_LOCK));
        assert_eq!(verifier.state(), WorkflowState::InstallTesting);

        running.await.unwrap().unwrap();
        assert!(!h.coord.tracker.has_active_tasks().await);
    }
}
