//! Process termination signals.

use tracing::info;

/// Wait for SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = interrupt.recv() => info!("terminating: via SIGINT"),
        _ = terminate.recv() => info!("terminating: via SIGTERM"),
    }
}

#[cfg(not(unix))]
pub async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
    info!("terminating: via ctrl-c");
}
