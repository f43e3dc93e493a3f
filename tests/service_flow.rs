//! End-to-end runs of the wired service with fake collaborators.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::unbounded_channel;

use package_verifier::{
    build_host, Collaborators, Config, Coordination, FileStore, LocalFileStore,
    PackageTestResultMessage,
    SandboxDriver, SandboxRunResult, SubmissionSource, SubmitPackageMessage, TaskError,
    SANDBOX_LOCK, SUMMARY_LOG,
};

#[derive(Default)]
struct ScriptedSandbox {
    calls: Mutex<Vec<String>>,
    broken_for: Option<&'static str>,
}

impl ScriptedSandbox {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxDriver for ScriptedSandbox {
    async fn prepare(&self) -> bool {
        self.calls.lock().unwrap().push("prepare".into());
        true
    }

    async fn reset(&self) -> bool {
        true
    }

    async fn run_command(&self, command: &str) -> SandboxRunResult {
        self.calls.lock().unwrap().push(command.to_string());
        match self.broken_for {
            Some(id) if command.contains(id) => {
                SandboxRunResult::new(1, "An action 'provision' was attempted on the machine")
            }
            _ => SandboxRunResult::new(0, format!("ran: {command}")),
        }
    }

    async fn destroy(&self) {
        self.calls.lock().unwrap().push("destroy".into());
    }

    async fn shutdown(&self) {
        self.calls.lock().unwrap().push("shutdown".into());
    }
}

struct Submissions(Vec<SubmitPackageMessage>);

#[async_trait]
impl SubmissionSource for Submissions {
    async fn submitted_packages(&self) -> Result<Vec<SubmitPackageMessage>, TaskError> {
        Ok(self.0.clone())
    }
}

/// Working directory that never holds anything.
struct EmptyFiles;

#[async_trait]
impl FileStore for EmptyFiles {
    async fn exists(&self, _path: &Path) -> bool {
        false
    }

    async fn read_text(&self, _path: &Path) -> io::Result<String> {
        Err(io::ErrorKind::NotFound.into())
    }

    async fn list_subdirectories(&self, _dir: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    async fn delete_recursive(&self, _dir: &Path) -> io::Result<()> {
        Ok(())
    }
}

fn config(files_dir: &Path) -> Config {
    let mut config = Config::default();
    config.sandbox.files_dir = files_dir.to_path_buf();
    config.schedule.startup_delay_secs = 1;
    config.schedule.shutdown_when_idle = true;
    config.schedule.shutdown_initial_secs = 1;
    config.schedule.shutdown_follow_up_secs = 1;
    config
}

// Real clock: the local file store does blocking I/O off the runtime.
#[tokio::test]
async fn test_submissions_are_verified_then_service_shuts_down() {
    let files = tempfile::tempdir().unwrap();
    tokio::fs::create_dir_all(files.path().join("git.2.1.0")).await.unwrap();
    tokio::fs::write(files.path().join("git.2.1.0").join(".registry"), "<registry/>")
        .await
        .unwrap();

    let coord = Coordination::default();
    let (tx, mut results) = unbounded_channel();
    let _results = coord
        .bus
        .subscribe(move |m: Arc<PackageTestResultMessage>| {
            let _ = tx.send(m);
            async { Ok(()) }
        });

    let sandbox = Arc::new(ScriptedSandbox::default());
    let host = build_host(
        &config(files.path()),
        coord.clone(),
        Collaborators {
            sandbox: sandbox.clone(),
            files: Arc::new(LocalFileStore),
            submissions: Arc::new(Submissions(vec![
                SubmitPackageMessage::new("git", "2.1.0"),
                SubmitPackageMessage::new("7zip", "9.20"),
            ])),
        },
    );
    assert_eq!(host.task_names().len(), 4);

    tokio::time::timeout(Duration::from_secs(30), host.run_until(std::future::pending()))
        .await
        .expect("service should shut itself down")
        .unwrap();

    let first = results.recv().await.unwrap();
    let second = results.recv().await.unwrap();
    assert_eq!(first.package_id, "git");
    assert!(first.success);
    assert_eq!(first.log("RegistrySnapshot.xml").unwrap().contents, "<registry/>");
    assert_eq!(second.package_id, "7zip");
    assert!(second.log(SUMMARY_LOG).unwrap().contents.starts_with("7zip v9.20 - Passed"));

    assert!(!files.path().join("git.2.1.0").exists());
    assert_eq!(sandbox.calls().last().map(String::as_str), Some("shutdown"));
    assert!(!coord.locks.is_held(SANDBOX_LOCK));
    assert!(!coord.tracker.has_active_tasks().await);
}

#[tokio::test(start_paused = true)]
async fn test_broken_sandbox_skips_only_that_package() {
    let coord = Coordination::default();
    let (tx, mut results) = unbounded_channel();
    let _results = coord
        .bus
        .subscribe(move |m: Arc<PackageTestResultMessage>| {
            let _ = tx.send(m.package_id.clone());
            async { Ok(()) }
        });

    let sandbox = Arc::new(ScriptedSandbox {
        broken_for: Some("flaky"),
        ..ScriptedSandbox::default()
    });
    let host = build_host(
        &config(Path::new("files")),
        coord.clone(),
        Collaborators {
            sandbox: sandbox.clone(),
            files: Arc::new(EmptyFiles),
            submissions: Arc::new(Submissions(vec![
                SubmitPackageMessage::new("flaky", "1.0"),
                SubmitPackageMessage::new("git", "2.1.0"),
            ])),
        },
    );

    tokio::time::timeout(Duration::from_secs(600), host.run_until(std::future::pending()))
        .await
        .expect("service should shut itself down")
        .unwrap();

    assert_eq!(results.recv().await.unwrap(), "git");
    assert!(results.try_recv().is_err());
    assert!(sandbox.calls().iter().any(|c| c == "destroy"));
}
