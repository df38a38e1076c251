//! Cancellation scope shared by the control plane and its background tasks.
//!
//! A [`Shutdown`] is owned by whoever decides when things stop (the binary's
//! signal handler, or the orchestrator's `stop`). Every task that must stop
//! with it holds a [`ShutdownSignal`].

use std::sync::Arc;

use tokio::sync::watch;

/// Trigger side of the cancellation scope. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Create a new, untriggered scope.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Cancel the scope. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the scope has been cancelled.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// A receiver that resolves once the scope is cancelled.
    #[must_use]
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of the cancellation scope.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether the scope has been cancelled.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the scope is cancelled.
    ///
    /// If every [`Shutdown`] handle is dropped without triggering, this never
    /// resolves: nobody is left who could cancel.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
