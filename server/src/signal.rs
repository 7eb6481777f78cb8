use std::io;

use tokio::{
    select,
    signal::unix::{signal, SignalKind},
};

/// Resolves on the first SIGINT or SIGTERM.
pub async fn signal_received() -> io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    select! {
        _ = sigint.recv() => {
            log::debug!("Received sigint");
        },
        _ = sigterm.recv() => {
            log::debug!("Received sigterm");
        }
    }
    Ok(())
}
