//! Graceful shutdown coordination (spec §5: "on shutdown signal the
//! top-level context is cancelled; each stage drains its in-flight queue
//! up to a 10 s grace, then closes sockets, flushes the publisher, and
//! exits").

use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Resolves once SIGINT or (on unix) SIGTERM is received.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

/// Cancels `token` once a shutdown signal arrives. Spawn this once at
/// startup alongside the pipeline tasks.
pub async fn run(token: CancellationToken) {
    wait_for_signal().await;
    info!("shutdown signal received, cancelling pipeline");
    token.cancel();
}

/// Awaits `fut` up to `DRAIN_GRACE`, logging if the stage didn't finish
/// draining in time rather than hanging shutdown indefinitely.
pub async fn drain_with_grace<F: std::future::Future<Output = ()>>(stage: &str, fut: F) {
    if tokio::time::timeout(DRAIN_GRACE, fut).await.is_err() {
        tracing::warn!(stage, grace_secs = DRAIN_GRACE.as_secs(), "stage did not drain within grace period");
    }
}
