//! Ctrl-C as a `watch` flag the driver and probes can select on.

use tokio::sync::watch;
use tracing::{info, warn};

/// Flag that flips to `true` on the first Ctrl-C.
///
/// If the handler cannot be installed the sender is dropped and the flag
/// never fires; runs then end on their own deadline.
pub fn on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping");
                let _ = tx.send(true);
            }
            Err(e) => warn!(error = %e, "cannot listen for ctrl-c"),
        }
    });
    rx
}
