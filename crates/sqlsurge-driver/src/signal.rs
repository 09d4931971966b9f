//! Cooperative stop signalling over `tokio::sync::watch`.

use std::time::Duration;

use sqlsurge_core::MAX_SPAN;
use tokio::sync::watch;
use tokio::time::Instant;

/// Resolve once `rx` observes `true`.
///
/// If every sender is gone the signal can never fire, so this pends
/// forever instead of resolving; callers race it against a deadline.
pub async fn triggered(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Non-blocking check of the current value.
pub fn is_set(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// `start + span`, capped at `start + MAX_SPAN` so an oversized span
/// cannot overflow the clock.
pub fn deadline(start: Instant, span: Duration) -> Instant {
    start
        .checked_add(span.min(MAX_SPAN))
        .unwrap_or(start)
}
