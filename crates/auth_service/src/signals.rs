//! Operator signal handling.
//!
//! SIGINT, SIGTERM and SIGHUP all request a graceful stop. On non-Unix
//! platforms only Ctrl+C is observed.

use tokio::signal;

/// Waits for the first termination signal and returns its name.
///
/// # Errors
///
/// Fails if a signal handler cannot be installed.
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;

        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
            _ = sighup.recv() => "SIGHUP",
        };
        Ok(name)
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        Ok("Ctrl+C")
    }
}
