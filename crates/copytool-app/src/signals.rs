//! Termination signal handling.

use std::io;

use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

async fn wait_for_termination() -> io::Result<&'static str> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = interrupt.recv() => Ok("SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

/// Cancel `cancel` on the first SIGINT or SIGTERM.
///
/// The caller aborts the returned task once serving ends without a signal.
pub(crate) fn spawn_termination_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_termination().await {
            Ok(name) => {
                info!(signal = name, "exiting");
                cancel.cancel();
            }
            Err(err) => warn!(error = %err, "cannot install signal handlers"),
        }
    })
}
