//! Auth service entry point.
//!
//! Loads layered configuration, starts the game service, applies hot
//! reloads and shuts down gracefully on SIGINT, SIGTERM or SIGHUP.

mod cli;
mod logging;
mod signals;

use std::process::ExitCode;
use std::sync::Arc;

use greatestworks_config::ConfigManager;
use greatestworks_server::{DoneReason, GameService, ServiceDependencies};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cli::CliArgs;
use crate::logging::setup_logging;
use crate::signals::wait_for_shutdown_signal;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Logging is not up yet, so a broken config goes to stderr.
    let manager = match ConfigManager::new(args.loader()) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = manager.config();
    if let Err(e) = setup_logging(&config.logging) {
        eprintln!("❌ Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let sources = manager
        .sources()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    info!(
        "🚀 Starting {} v{} ({} environment)",
        config.service.name, config.service.version, config.app.environment
    );
    info!("📂 Configuration sources: {sources}");

    match run(manager).await {
        Ok(DoneReason::StopRequested) => {
            info!("✅ Shutdown complete");
            ExitCode::SUCCESS
        }
        Ok(DoneReason::Fault(reason)) => {
            error!("❌ Service stopped after a fault: {reason}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Runs the service until a signal arrives or the service reports itself done.
async fn run(manager: ConfigManager) -> anyhow::Result<DoneReason> {
    let service = Arc::new(GameService::new(
        manager.config(),
        ServiceDependencies::in_memory(),
    ));

    let subscriber = service.clone();
    manager
        .on_change(move |next| {
            info!(
                "🔄 Configuration reloaded, service version {}",
                next.service.version
            );
            subscriber.update_config(next);
        })
        .await;

    let (cancel_watch, cancel_rx) = watch::channel(false);
    if manager.config().environment.hot_reload {
        manager.start_watching(cancel_rx)?;
        info!("👀 Watching configuration files for changes");
    }

    let addr = service.start().await?;
    info!("🌐 Listening on {addr}");

    let reason = tokio::select! {
        signal = wait_for_shutdown_signal() => {
            match signal {
                Ok(name) => info!("📡 Received {name}, shutting down"),
                Err(e) => warn!("⚠️ Signal handling failed, shutting down: {e}"),
            }
            service.request_stop();
            service.done().await
        }
        reason = service.done() => {
            warn!("🛑 Service reported done: {reason:?}");
            reason
        }
    };

    let _ = cancel_watch.send(true);
    manager.close();
    service.stop().await?;

    Ok(reason)
}
