//! Graceful shutdown

use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Handler for graceful shutdown
///
/// Will listen to Ctrl+C and SIGTERM, then cancels the shutdown token so long running responses
/// (live capsule lists) end and the server can drain
pub async fn handler(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Valid CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Valid terminate handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
        () = shutdown.cancelled() => {},
    }

    tracing::info!("Terminate signal received, starting graceful shutdown");

    shutdown.cancel();
}
