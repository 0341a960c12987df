//! Shutdown signal handling.

use std::future::Future;
use std::io;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
///
/// The returned future resolves on the first of them to arrive. Handlers
/// are installed immediately, so a signal received before the future is
/// first polled is not lost.
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = hangup.recv() => "SIGHUP",
        };
        info!(signal = name, "Shutdown signal received");
    })
}
