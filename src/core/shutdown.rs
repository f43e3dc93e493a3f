//! OS termination signals.
//!
//! Unix: `SIGINT`, `SIGTERM` (service managers) and `SIGQUIT`.
//! Elsewhere: Ctrl-C via [`tokio::signal::ctrl_c`].

use tracing::info;

/// Completes with the name of the first termination signal received.
///
/// Fails if the listeners cannot be registered.
#[cfg(unix)]
pub async fn wait_for_termination() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    info!(signal = name, "termination signal received");
    Ok(name)
}

/// Completes with the name of the first termination signal received.
///
/// Fails if the listener cannot be registered.
#[cfg(not(unix))]
pub async fn wait_for_termination() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    info!(signal = "ctrl-c", "termination signal received");
    Ok("ctrl-c")
}
