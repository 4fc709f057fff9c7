//! Session-wide cancellation signal.
//!
//! One `watch::channel(bool)` per running session. Every background task holds
//! a [`ShutdownListener`] and stops once the value flips to `true` or the
//! sender is dropped.

use tokio::sync::watch;

/// Creates a connected trigger/listener pair.
#[must_use]
pub fn channel() -> (ShutdownTrigger, ShutdownListener) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(tx), ShutdownListener(rx))
}

/// Sending half: flips the signal once.
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl ShutdownTrigger {
    /// Signals every listener. Returns `false` if it was already signalled.
    pub fn trigger(&self) -> bool {
        !self.0.send_replace(true)
    }

    /// Returns `true` once triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Creates another listener.
    #[must_use]
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener(self.0.subscribe())
    }
}

/// Receiving half, cloned into each task.
#[derive(Debug, Clone)]
pub struct ShutdownListener(watch::Receiver<bool>);

impl ShutdownListener {
    /// Returns `true` once shutdown was signalled.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes when shutdown is signalled or the trigger is gone.
    pub async fn wait(&mut self) {
        // `wait_for` errors only when the sender is dropped, which also means stop.
        let _ = self.0.wait_for(|stopped| *stopped).await;
    }
}
