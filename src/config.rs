//! # Service configuration.
//!
//! [`Config`] gathers every tunable of the verifier: coordination timeouts,
//! sandbox commands, report labels, task schedules and logging.
//!
//! ## Loading
//! Layers are merged lowest to highest precedence:
//! 1. [`Config::default`]
//! 2. `verifier.yaml` in the working directory (optional)
//! 3. `VERIFIER_*` environment variables, `__` separating sections
//!    (`VERIFIER_SANDBOX__COMMAND_TIMEOUT_SECS=600`)
//!
//! ## Sentinel values
//! - `coordination.lock_timeout_secs = 0` → wait indefinitely for named locks
//! - `sandbox.lock_timeout_secs = 0` → wait indefinitely for the sandbox lock
//!
//! Durations are stored as whole seconds; use the accessor helpers rather than
//! converting at call sites.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default config file looked up by [`Config::load`].
pub const DEFAULT_CONFIG_FILE: &str = "verifier.yaml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "VERIFIER_";

/// Errors produced while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Load(_) => "config_load",
            ConfigError::Invalid(_) => "config_invalid",
        }
    }
}

/// Complete service configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub coordination: CoordinationConfig,
    pub sandbox: SandboxConfig,
    pub report: ReportConfig,
    pub schedule: ScheduleConfig,
    pub logging: LoggingConfig,
}

/// Lock registry, tracker, bus and fault buffer settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Default bound for named lock acquisition (`0` = forever).
    pub lock_timeout_secs: u64,
    /// Bound used by the quiescence probe.
    pub tracker_probe_secs: u64,
    /// Bound used by `kill` before force-releasing a lock.
    pub kill_timeout_secs: u64,
    /// Per-subscription queue capacity (min 1).
    pub bus_queue_capacity: usize,
    /// Interval of the unhandled-fault summary.
    pub fault_summary_secs: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 120,
            tracker_probe_secs: 2,
            kill_timeout_secs: 2,
            bus_queue_capacity: 1024,
            fault_summary_secs: 300,
        }
    }
}

impl CoordinationConfig {
    #[inline]
    pub fn lock_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.lock_timeout_secs)
    }

    #[inline]
    pub fn tracker_probe(&self) -> Duration {
        Duration::from_secs(self.tracker_probe_secs)
    }

    #[inline]
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }

    #[inline]
    pub fn fault_summary_interval(&self) -> Duration {
        Duration::from_secs(self.fault_summary_secs)
    }
}

/// Sandbox workflow settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Bound for acquiring the sandbox lock (`0` = forever).
    pub lock_timeout_secs: u64,
    /// Upper bound of a single sandbox command.
    pub command_timeout_secs: u64,
    /// Pause after destroying a broken sandbox.
    pub cooldown_secs: u64,
    /// Substrings that mark a run as a sandbox failure rather than a package failure.
    pub failure_signatures: Vec<String>,
    /// Install command template; `{id}` and `{version}` are substituted.
    pub install_command: String,
    /// Uninstall command template; `{id}` and `{version}` are substituted.
    pub uninstall_command: String,
    /// Directory shared with the sandbox; snapshots live in `{id}.{version}/`.
    pub files_dir: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 0,
            command_timeout_secs: 1800,
            cooldown_secs: 20,
            failure_signatures: vec![
                "An action 'provision' was attempted".to_string(),
                "VBoxManage.exe: error:".to_string(),
            ],
            install_command: "choco.exe install {id} --version {version} -fdvy".to_string(),
            uninstall_command: "choco.exe uninstall {id} --version {version} -dvy".to_string(),
            files_dir: PathBuf::from("files"),
        }
    }
}

impl SandboxConfig {
    #[inline]
    pub fn lock_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.lock_timeout_secs)
    }

    #[inline]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    #[inline]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Labels and links written into results.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Base URL of the package gallery, with trailing slash.
    pub packages_url: String,
    pub platform_name: String,
    pub machine_name: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            packages_url: "https://chocolatey.org/".to_string(),
            platform_name: "Windows Server 2012 R2 x64".to_string(),
            machine_name: "win2012r2x64".to_string(),
        }
    }
}

/// Timer settings of the built-in tasks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Delay before `StartupMessage` is published.
    pub startup_delay_secs: u64,
    /// Interval of the submitted-packages check.
    pub check_interval_secs: u64,
    /// First quiescence check after submissions were queued.
    pub shutdown_initial_secs: u64,
    /// Interval of subsequent quiescence checks.
    pub shutdown_follow_up_secs: u64,
    /// Register the shutdown-when-idle task.
    pub shutdown_when_idle: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: 15,
            check_interval_secs: 900,
            shutdown_initial_secs: 240,
            shutdown_follow_up_secs: 120,
            shutdown_when_idle: false,
        }
    }
}

impl ScheduleConfig {
    #[inline]
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    #[inline]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    #[inline]
    pub fn shutdown_initial(&self) -> Duration {
        Duration::from_secs(self.shutdown_initial_secs)
    }

    #[inline]
    pub fn shutdown_follow_up(&self) -> Duration {
        Duration::from_secs(self.shutdown_follow_up_secs)
    }
}

/// Output format of the log subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level; `VERIFIER_LOG` overrides it with a full filter directive.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Loads defaults, `verifier.yaml` and `VERIFIER_*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Same as [`load`](Self::load) with an explicit YAML file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    /// Extracts and validates a config from an assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, template) in [
            ("install_command", &self.sandbox.install_command),
            ("uninstall_command", &self.sandbox.uninstall_command),
        ] {
            if template.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("sandbox.{name} cannot be empty")));
            }
            if !template.contains("{id}") {
                return Err(ConfigError::Invalid(format!(
                    "sandbox.{name} must reference {{id}}"
                )));
            }
        }
        if self.sandbox.failure_signatures.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::Invalid(
                "sandbox.failure_signatures cannot contain empty entries".to_string(),
            ));
        }
        if self.sandbox.command_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "sandbox.command_timeout_secs must be positive".to_string(),
            ));
        }

        let intervals = [
            ("schedule.check_interval_secs", self.schedule.check_interval_secs),
            ("schedule.shutdown_follow_up_secs", self.schedule.shutdown_follow_up_secs),
            ("coordination.fault_summary_secs", self.coordination.fault_summary_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }

        let levels = ["trace", "debug", "info", "warn", "error"];
        if !levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level '{}' must be one of: {}",
                self.logging.level,
                levels.join(", ")
            )));
        }
        Ok(())
    }
}

/// Substitutes `{id}` and `{version}` in a command template.
pub fn render_command(template: &str, package_id: &str, package_version: &str) -> String {
    template
        .replace("{id}", package_id)
        .replace("{version}", package_version)
}

#[inline]
fn non_zero_secs(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}
