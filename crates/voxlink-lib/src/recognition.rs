//! One-shot capture cycles.
//!
//! ```text
//! start_capture ─ Idle→Listening ─┬─ open ─ recognize_once ─┐
//!                                 └─ stop_capture ───────────┴─ release ─ Listening→Idle
//! ```
//!
//! The handle and the `Listening` state are both held by guards, so they are
//! released even when the caller drops the `start_capture` future. The
//! outcome line is written together with the return to `Idle`, so a later
//! cycle's status is never overwritten by an earlier one.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use voxlink_core::error::CaptureError;
use voxlink_core::types::{CaptureOutcome, CaptureState, Recognition};

use crate::provider::{CaptureHandle, ConversationBackend, RecognitionProvider};
use crate::status::StatusReporter;

pub struct RecognitionController {
    provider: Arc<dyn RecognitionProvider>,
    backend: Arc<dyn ConversationBackend>,
    slot: Mutex<CaptureSlot>,
    status: StatusReporter,
}

enum CaptureSlot {
    Idle,
    Listening { cancel: Option<oneshot::Sender<()>> },
}

/// Owns a capture handle for one cycle and releases it on drop.
struct CaptureGuard {
    handle: Box<dyn CaptureHandle>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.handle.release();
        debug!("capture handle released");
    }
}

/// Returns the controller to `Idle` when the cycle ends, however it ends,
/// publishing `message` in the same status update.
struct ListeningGuard<'a> {
    controller: &'a RecognitionController,
    message: Option<String>,
}

impl Drop for ListeningGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.controller.lock_slot();
        *slot = CaptureSlot::Idle;
        let message = self.message.take();
        self.controller.status.update(|s| {
            s.capture = CaptureState::Idle;
            if let Some(message) = message {
                s.message = message;
            }
        });
    }
}

impl RecognitionController {
    pub fn new(
        provider: Arc<dyn RecognitionProvider>,
        backend: Arc<dyn ConversationBackend>,
        status: StatusReporter,
    ) -> Self {
        Self {
            provider,
            backend,
            slot: Mutex::new(CaptureSlot::Idle),
            status,
        }
    }

    /// Run one capture cycle.
    ///
    /// Fails only with [`CaptureError::AlreadyListening`]; provider faults are
    /// reported as [`CaptureOutcome::ProviderError`]. Recognized text is sent
    /// to the backend on a spawned task.
    pub async fn start_capture(&self) -> Result<CaptureOutcome, CaptureError> {
        let cancel = self.begin()?;
        let mut listening = ListeningGuard {
            controller: self,
            message: None,
        };
        let outcome = self.run_cycle(cancel).await;

        info!("capture finished: {outcome:?}");
        listening.message = Some(outcome.status_message());
        drop(listening);

        if let CaptureOutcome::Recognized(text) = &outcome {
            self.forward(text.clone());
        }
        Ok(outcome)
    }

    /// Cancel the capture in progress. The cycle ends with
    /// [`CaptureOutcome::Cancelled`] through the normal release path.
    pub fn stop_capture(&self) -> Result<(), CaptureError> {
        match &mut *self.lock_slot() {
            CaptureSlot::Idle => Err(CaptureError::NotListening),
            CaptureSlot::Listening { cancel } => {
                if let Some(tx) = cancel.take() {
                    debug!("capture stop requested");
                    let _ = tx.send(());
                }
                Ok(())
            }
        }
    }

    pub fn state(&self) -> CaptureState {
        match *self.lock_slot() {
            CaptureSlot::Idle => CaptureState::Idle,
            CaptureSlot::Listening { .. } => CaptureState::Listening,
        }
    }

    fn begin(&self) -> Result<oneshot::Receiver<()>, CaptureError> {
        let mut slot = self.lock_slot();
        if matches!(*slot, CaptureSlot::Listening { .. }) {
            debug!("capture rejected: already listening");
            return Err(CaptureError::AlreadyListening);
        }
        let (tx, rx) = oneshot::channel();
        *slot = CaptureSlot::Listening { cancel: Some(tx) };
        self.status.update(|s| {
            s.capture = CaptureState::Listening;
            s.message = "Listening...".to_string();
        });
        Ok(rx)
    }

    async fn run_cycle(&self, mut cancel: oneshot::Receiver<()>) -> CaptureOutcome {
        let opened = tokio::select! {
            opened = self.provider.open() => opened,
            _ = &mut cancel => {
                debug!("capture stopped while opening");
                return CaptureOutcome::Cancelled;
            }
        };
        let mut guard = match opened {
            Ok(handle) => CaptureGuard { handle },
            Err(e) => {
                warn!("capture: failed to open device: {e}");
                return CaptureOutcome::ProviderError(e.to_string());
            }
        };

        let result = tokio::select! {
            result = guard.handle.recognize_once() => result,
            _ = cancel => return CaptureOutcome::Cancelled,
        };

        match result {
            Ok(Recognition::Recognized(text)) if !text.trim().is_empty() => {
                CaptureOutcome::Recognized(text)
            }
            Ok(_) => CaptureOutcome::NoMatch,
            Err(e) => {
                warn!("capture: {e}");
                CaptureOutcome::ProviderError(e.to_string())
            }
        }
    }

    fn forward(&self, text: String) {
        let backend = self.backend.clone();
        let status = self.status.clone();
        tokio::spawn(async move {
            match backend.send(&text).await {
                Ok(()) => debug!("sent {} chars to backend", text.len()),
                Err(e) => {
                    warn!("backend send failed: {e}");
                    // A newer capture owns the status line while it is listening.
                    status.update(|s| {
                        if s.capture == CaptureState::Idle {
                            s.message = format!("Message not delivered: {e}");
                        }
                    });
                }
            }
        });
    }

    fn lock_slot(&self) -> MutexGuard<'_, CaptureSlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}
