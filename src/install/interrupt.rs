//! SIGINT/SIGTERM handling for a whole install run
//!
//! Handlers are registered once, up front, so a signal arriving between
//! steps is recorded instead of lost. Long steps select on the token; short
//! ones call [`checkpoint`] before mutating the host. A second signal exits
//! immediately.

use log::{error, warn};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use super::InstallerError;

/// Exit status for a forced stop (128 + SIGINT)
const FORCED_EXIT: i32 = 130;

/// Register the handlers and return the token they cancel
pub fn watch() -> std::io::Result<CancellationToken> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let token = CancellationToken::new();
    let trip = token.clone();

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = sigint.recv() => "SIGINT",
                Some(()) = sigterm.recv() => "SIGTERM",
                else => break,
            };
            if trip.is_cancelled() {
                error!("Second {name}; exiting without cleanup");
                std::process::exit(FORCED_EXIT);
            }
            warn!("Received {name}; stopping before the next step");
            trip.cancel();
        }
    });

    Ok(token)
}

/// `Err(Interrupted)` once a signal has arrived
pub fn checkpoint(token: &CancellationToken) -> Result<(), InstallerError> {
    if token.is_cancelled() {
        Err(InstallerError::Interrupted)
    } else {
        Ok(())
    }
}
