use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. If a handler cannot be installed, the error is logged and only
/// the remaining signal triggers shutdown.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate())
            .inspect_err(|err| tracing::error!(error = %err, "Failed to install SIGTERM handler"))
            .ok();
        let mut sigint = signal(SignalKind::interrupt())
            .inspect_err(|err| tracing::error!(error = %err, "Failed to install SIGINT handler"))
            .ok();

        tokio::select! {
            Some(_) = recv(&mut sigterm) => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            Some(_) = recv(&mut sigint) => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }

        token_clone.cancel();
    });

    token
}

async fn recv(signal: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match signal {
        Some(signal) => signal.recv().await,
        None => std::future::pending().await,
    }
}
