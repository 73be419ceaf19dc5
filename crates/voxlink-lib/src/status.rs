//! Session status publisher shared by all components.

use std::sync::Arc;

use tokio::sync::watch;

use voxlink_core::types::SessionStatus;

/// Cloneable handle onto the session's status channel.
#[derive(Clone)]
pub struct StatusReporter {
    tx: Arc<watch::Sender<SessionStatus>>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionStatus::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn update(&self, f: impl FnOnce(&mut SessionStatus)) {
        self.tx.send_modify(f);
    }

    /// Replace the human-readable status line.
    pub fn message(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| s.message = message);
    }

    pub fn snapshot(&self) -> SessionStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.tx.subscribe()
    }
}
