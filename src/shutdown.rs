//! Cooperative stop flag shared by every relay loop
//!
//! Loops check `is_stopped()` once per iteration and use `sleep()` between
//! iterations so a stop request wakes them early. Work already in flight is
//! never cancelled.

use std::time::Duration;
use tokio::sync::watch;

/// Cloneable stop flag backed by a `watch` channel
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Request every holder of this flag to stop
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        // Sender lives in self, so wait_for only fails if that invariant breaks
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration` or until stopped. Returns true when woken by a stop.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_stopped(),
            _ = self.stopped() => true,
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_visible_to_clones() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        assert!(!clone.is_stopped());

        shutdown.trigger();
        assert!(clone.is_stopped());
    }

    #[tokio::test]
    async fn test_sleep_wakes_early() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();

        let handle =
            tokio::spawn(async move { waiter.sleep(Duration::from_secs(3600)).await });
        shutdown.trigger();

        let woken_by_stop = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sleep did not wake")
            .unwrap();
        assert!(woken_by_stop);
    }

    #[tokio::test]
    async fn test_sleep_elapses() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.sleep(Duration::from_millis(5)).await);
    }
}
