//! Cooperative cancellation shared between the harness and engine processes.

use std::sync::Arc;

use futures_util::future::select_all;
use tokio::sync::watch;

/// A cloneable cancellation signal.
///
/// Every clone observes the same flag. Firing is one-way: once cancelled,
/// the signal stays cancelled. A [`child`](CancelSignal::child) also
/// observes its parent, but firing the child leaves the parent untouched.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
    /// Own flag first, then every ancestor's
    watched: Vec<watch::Receiver<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            watched: vec![rx],
        }
    }

    /// A signal that is never fired. Used for teardown commands, which must
    /// not be interrupted by the cancellation of the run that armed them.
    pub fn never() -> Self {
        Self::new()
    }

    /// A new signal that fires when this one does, or when cancelled itself.
    pub fn child(&self) -> Self {
        let (tx, rx) = watch::channel(false);
        let mut watched = Vec::with_capacity(self.watched.len() + 1);
        watched.push(rx);
        watched.extend(self.watched.iter().cloned());
        Self {
            tx: Arc::new(tx),
            watched,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.watched.iter().any(|rx| *rx.borrow())
    }

    /// Resolves once the signal (or an ancestor) fires.
    pub async fn cancelled(&self) {
        let waits = self.watched.iter().cloned().map(|rx| Box::pin(fired(rx)));
        select_all(waits).await;
    }
}

async fn fired(mut rx: watch::Receiver<bool>) {
    // Each sender lives as long as any clone of its signal, so the only
    // exit from this loop is the flag turning true.
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
