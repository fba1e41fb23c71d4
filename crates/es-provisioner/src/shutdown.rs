use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancels `token` on Ctrl+C or SIGTERM. The SIGTERM handler is installed
/// before this returns.
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    #[cfg(unix)]
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(sig) => Some(sig),
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            None
        }
    };

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match sigterm.as_mut() {
                Some(sig) => {
                    sig.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received ctrl-c, cancelling in-flight work"),
            _ = terminate => info!("received SIGTERM, cancelling in-flight work"),
        }
        token.cancel();
    })
}
