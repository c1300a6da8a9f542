//! "The credential store may have changed" signal.
//!
//! There is exactly one consumer at a time. Signals carry no payload and
//! coalesce: the consumer always re-reads the store, so one pending signal
//! covers any number of writes that happened before it was observed.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Process-wide change signal for the credential store.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    listener: Mutex<Option<mpsc::Sender<()>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the consumer, replacing (and closing) any previous one.
    pub fn subscribe(&self) -> ChangeSubscription {
        let (tx, rx) = mpsc::channel(1);
        let previous = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(tx);
        if previous.is_some() {
            tracing::debug!("replaced change listener");
        }
        ChangeSubscription { rx }
    }

    /// Drop the consumer. Its subscription observes the channel closing.
    pub fn unsubscribe(&self) {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn has_subscriber(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Signal the consumer, if any. Never blocks.
    pub fn emit(&self) {
        let mut guard = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => {
                tracing::debug!("change listener went away; dropping it");
                guard.take();
            }
        }
    }
}

/// Receiving half held by the single consumer.
#[derive(Debug)]
pub struct ChangeSubscription {
    rx: mpsc::Receiver<()>,
}

impl ChangeSubscription {
    /// Wait for the next signal. Returns `false` once this subscription has
    /// been replaced or removed.
    pub async fn changed(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Consume a pending signal without waiting.
    pub fn try_changed(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}
