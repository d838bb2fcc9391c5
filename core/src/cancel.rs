//! Batch-wide cancellation signal.
//!
//! One token is created per batch and cloned into every session. Cancelling
//! is sticky: once set it stays set for the lifetime of the token.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request cancellation of every session holding a clone of this token
    pub fn cancel(&self) {
        if !self.tx.send_replace(true) {
            tracing::warn!("Batch cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender is owned by the token itself, so this cannot happen
                // while `self` is alive; never resolve rather than spin.
                std::future::pending::<()>().await;
            }
        }
    }
}
