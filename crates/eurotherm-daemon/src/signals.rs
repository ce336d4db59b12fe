//! Signal handling for graceful daemon shutdown.
//!
//! Waits on SIGTERM/SIGINT (Unix) or Ctrl+C (all platforms) via
//! `tokio::signal`, the ecosystem-idiomatic replacement for the raw `libc`
//! handlers a soft-realtime scan loop would otherwise install — this daemon
//! has no cyclic scan loop to keep async-signal-safe, so there is nothing
//! gained from hand-rolled handlers here (see DESIGN.md).

use tracing::info;

/// Resolve once an operator-requested shutdown signal arrives.
///
/// On Unix this races SIGTERM against SIGINT; elsewhere it waits on Ctrl+C
/// alone. Either way the future is cancellation-safe to `tokio::select!`
/// against the RPC server's own graceful-shutdown future.
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut interrupt =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = terminate.recv() => info!("received SIGTERM"),
            _ = interrupt.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C");
    }
}
