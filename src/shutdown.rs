//! Single-fire shutdown signal
//!
//! Built on `tokio::sync::watch` so late subscribers still observe a signal
//! that already fired.

use tokio::sync::watch;

/// Trigger side of the signal
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Fire the signal
    ///
    /// Returns true only for the call that actually fired it.
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive side of the signal
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the signal fires
    ///
    /// Also returns when the trigger side was dropped: whatever it guarded is
    /// gone either way.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_trigger_fires_once() {
        let signal = ShutdownSignal::new();
        let mut listener = signal.subscribe();

        assert!(!listener.is_triggered());
        assert!(signal.trigger());
        assert!(!signal.trigger());

        tokio::time::timeout(Duration::from_secs(1), listener.wait())
            .await
            .unwrap();
        assert!(listener.is_triggered());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_signal() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        let mut listener = signal.subscribe();
        tokio::time::timeout(Duration::from_secs(1), listener.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_trigger_releases_waiters() {
        let signal = ShutdownSignal::new();
        let mut listener = signal.subscribe();
        drop(signal);

        tokio::time::timeout(Duration::from_secs(1), listener.wait())
            .await
            .unwrap();
    }
}
