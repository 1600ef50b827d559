use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::services::manager::ServiceManager;
use crate::utils::fmt_duration;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Run until a service exits or a shutdown signal arrives, then stop everything.
pub async fn handle_shutdown_signals(
    mut service_manager: ServiceManager,
    shutdown_timeout: Duration,
) -> ExitCode {
    let exit_code = tokio::select! {
        (name, result) = service_manager.run() => match result {
            Ok(()) => {
                warn!(service = name, "Service exited unexpectedly");
                ExitCode::FAILURE
            }
            Err(e) => {
                error!(service = name, error = ?e, "Service failed");
                ExitCode::FAILURE
            }
        },
        _ = shutdown_signal() => ExitCode::SUCCESS,
    };

    info!(
        timeout = fmt_duration(shutdown_timeout),
        "Shutting down services"
    );
    match service_manager.shutdown(shutdown_timeout).await {
        Ok(elapsed) => {
            info!(elapsed = fmt_duration(elapsed), "All services stopped");
            exit_code
        }
        Err(pending) => {
            warn!(?pending, "Forcing exit with services still running");
            ExitCode::FAILURE
        }
    }
}
