//! Markdown summary and log artifacts of a verification run.

use chrono::{DateTime, Utc};

use crate::config::ReportConfig;
use crate::events::{PackageTestLog, SubmitPackageMessage};
use crate::workflow::sandbox::SandboxRunResult;

pub const SUMMARY_LOG: &str = "_Summary.md";
pub const INSTALL_LOG: &str = "Install.txt";
pub const REGISTRY_SNAPSHOT_LOG: &str = "RegistrySnapshot.xml";
pub const FILES_SNAPSHOT_LOG: &str = "FilesSnapshot.xml";
pub const UNINSTALL_LOG: &str = "Uninstall.txt";

/// Everything a report is built from.
#[derive(Debug)]
pub struct RunReport<'a> {
    pub package: &'a SubmitPackageMessage,
    pub tested_at: DateTime<Utc>,
    pub install: &'a SandboxRunResult,
    /// `None` when the install failed and uninstall was skipped.
    pub uninstall: Option<&'a SandboxRunResult>,
    pub registry_snapshot: String,
    pub files_snapshot: String,
}

impl RunReport<'_> {
    /// The install outcome alone decides the verdict.
    pub fn success(&self) -> bool {
        self.install.success()
    }

    /// Renders the `_Summary.md` text.
    pub fn summary(&self, report: &ReportConfig) -> String {
        let id = &self.package.package_id;
        let version = &self.package.package_version;
        let url = ensure_trailing_slash(&report.packages_url);

        let mut lines = vec![
            format!(
                "{id} v{version} - {} - Package Test Results",
                if self.success() { "Passed" } else { "Failed" }
            ),
            format!(" * [{url}packages/{id}/{version}]({url}packages/{id}/{version})"),
            format!(" * Tested {} +00:00", self.tested_at.format("%d %b %Y %H:%M:%S")),
            format!(
                " * Tested against {} ({})",
                report.machine_name, report.platform_name
            ),
            format!(
                " * Install {}.",
                if self.install.success() { "was successful" } else { "failed" }
            ),
        ];
        if let Some(uninstall) = self.uninstall.filter(|u| !u.log.trim().is_empty()) {
            lines.push(format!(
                " * Uninstall {}.",
                if uninstall.success() { "was successful" } else { "failed (allowed)" }
            ));
        }

        lines.extend(self.install.errors().map(|e| format!(" * Install error: {e}")));
        if let Some(uninstall) = self.uninstall {
            lines.extend(uninstall.errors().map(|e| format!(" * Uninstall error: {e}")));
        }
        lines.join("\n")
    }

    /// Summary first, then every non-blank artifact.
    pub fn logs(&self, report: &ReportConfig) -> Vec<PackageTestLog> {
        let mut logs = vec![PackageTestLog::new(SUMMARY_LOG, self.summary(report))];
        let artifacts = [
            (INSTALL_LOG, self.install.log.as_str()),
            (REGISTRY_SNAPSHOT_LOG, self.registry_snapshot.as_str()),
            (FILES_SNAPSHOT_LOG, self.files_snapshot.as_str()),
            (UNINSTALL_LOG, self.uninstall.map_or("", |u| u.log.as_str())),
        ];
        logs.extend(
            artifacts
                .into_iter()
                .filter(|(_, contents)| !contents.trim().is_empty())
                .map(|(name, contents)| PackageTestLog::new(name, contents)),
        );
        logs
    }
}

fn ensure_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}
