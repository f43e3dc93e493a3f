//! Process-wide `tracing` subscriber.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::RuntimeError;

/// Environment variable holding a full filter directive (`VERIFIER_LOG=package_verifier=debug`).
pub const LOG_ENV: &str = "VERIFIER_LOG";

/// Installs the global subscriber writing to stderr.
///
/// `VERIFIER_LOG` takes precedence over `config.level`. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), RuntimeError> {
    let level: Level = config
        .level
        .parse()
        .map_err(|_| RuntimeError::Logging(format!("unknown log level '{}'", config.level)))?;

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    }
    .map_err(|e| RuntimeError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_level_is_rejected() {
        let config = LoggingConfig {
            level: "chatty".into(),
            ..LoggingConfig::default()
        };
        let err = init_logging(&config).unwrap_err();
        assert_eq!(err.as_label(), "runtime_logging");
    }
}
