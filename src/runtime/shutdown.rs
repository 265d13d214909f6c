//! Graceful shutdown handling
//!
//! Broadcast-based signal. A listener created after the signal fired still
//! observes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shutdown signal broadcaster
///
/// Clone the signal for distribution; call `listener()` where you wait.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: Arc<broadcast::Sender<()>>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender: Arc::new(sender),
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        let _ = self.sender.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.sender.subscribe(),
            triggered: self.triggered.clone(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Waiting side of a [`ShutdownSignal`]
pub struct ShutdownListener {
    receiver: broadcast::Receiver<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownListener {
    /// Resolves once shutdown has been requested
    pub async fn wait(&mut self) {
        if self.triggered.load(Ordering::SeqCst) {
            return;
        }
        // Closed or lagged both mean the signal fired or can no longer fire
        let _ = self.receiver.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_signal() {
        let signal = ShutdownSignal::new();
        let mut listener = signal.listener();

        let handle = tokio::spawn(async move {
            listener.wait().await;
            42
        });

        signal.shutdown();
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_late_listener_sees_shutdown() {
        let signal = ShutdownSignal::new();
        signal.shutdown();
        signal.listener().wait().await;
        assert!(signal.is_triggered());
    }
}
