//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT (Ctrl+C) and SIGTERM
//! - In reload-worker mode, also treat EOF on stdin as a stop request
//!   (the supervisor closes the pipe to ask the worker to exit)
//! - Translate whichever comes first into a [`Shutdown`] trigger

use tokio::io::AsyncReadExt;

use crate::lifecycle::Shutdown;

/// Which source asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupt,
    Terminate,
    SupervisorClosed,
}

/// Wait for the first stop request.
///
/// `watch_stdin` is set for worker processes spawned by the reload supervisor.
pub async fn wait_for_stop(watch_stdin: bool) -> StopReason {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let supervisor = async {
        if !watch_stdin {
            return std::future::pending::<()>().await;
        }
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 64];
        // Anything written is ignored; only EOF or a broken pipe matters.
        while let Ok(n) = stdin.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => StopReason::Interrupt,
        _ = terminate => StopReason::Terminate,
        _ = supervisor => StopReason::SupervisorClosed,
    }
}

/// Spawn a task that triggers `shutdown` on the first stop request.
pub fn spawn_signal_listener(shutdown: Shutdown, watch_stdin: bool) {
    tokio::spawn(async move {
        let reason = wait_for_stop(watch_stdin).await;
        tracing::info!(reason = ?reason, "Shutdown signal received");
        shutdown.trigger();
    });
}
