//! Cooperative shutdown signal.
//!
//! A single watch channel flipped once on SIGINT/SIGTERM. Consumers exit
//! their loops, producers drain once, and retry sleeps abort early.

use tokio::sync::watch;

/// Sender side, held by the process entrypoint.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Flip the signal. Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiver side, cloned into every task that must observe shutdown.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// A signal that never fires; for tests and one-shot tools.
    pub fn disarmed() -> Self {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel never closes.
        std::mem::forget(tx);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fires. Pends forever if it never does.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without firing; nothing will ever trigger.
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_waiters() {
        let (handle, shutdown) = shutdown_channel();
        assert!(!shutdown.is_triggered());

        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.triggered().await }
        });

        handle.trigger();
        waiter.await.unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn disarmed_never_fires() {
        let shutdown = Shutdown::disarmed();
        let timed = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            shutdown.triggered(),
        )
        .await;
        assert!(timed.is_err());
    }
}
