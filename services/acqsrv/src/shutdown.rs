//! Shutdown signal handling

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for Ctrl+C, or SIGTERM on Unix
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("SIGTERM handler unavailable ({}); Ctrl+C only", e);
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Ctrl+C received"),
            _ = async {
                match term_signal {
                    Some(mut sig) => { sig.recv().await; },
                    None => std::future::pending::<()>().await,
                }
            } => info!("SIGTERM received"),
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C handler failed: {}", e);
        }
    }
}

/// Resolve on an OS shutdown signal or when `token` is cancelled, and cancel
/// `token` either way so every task sharing it stops.
pub async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        () = wait_for_shutdown() => {},
        () = token.cancelled() => {},
    }
    token.cancel();
}
