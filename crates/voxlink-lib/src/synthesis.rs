//! Playback ownership: at most one synthesis handle is ever open.
//!
//! ```text
//! speak(text) ─ lock slot ─ drop previous (release) ─ synthesize ─ store ─ unlock
//!                                                          │
//!                                  finished ─► finish(epoch) ─ release if still current
//! ```
//!
//! Each playback gets an epoch. Completions carry the epoch they were started
//! with, so a completion arriving after a newer `speak` or a mute is a no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use voxlink_core::error::SynthesisError;
use voxlink_core::types::PlaybackState;

use crate::provider::{Playback, PlaybackHandle, SynthesisProvider};
use crate::status::StatusReporter;

/// Cloneable handle to the playback slot.
#[derive(Clone)]
pub struct SynthesisController {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn SynthesisProvider>,
    slot: Mutex<Option<ActivePlayback>>,
    epoch: AtomicU64,
    status: StatusReporter,
}

/// The live playback. Dropping it releases the provider handle.
struct ActivePlayback {
    epoch: u64,
    handle: Box<dyn PlaybackHandle>,
}

impl Drop for ActivePlayback {
    fn drop(&mut self) {
        self.handle.release();
        debug!("playback {}: handle released", self.epoch);
    }
}

impl SynthesisController {
    pub fn new(provider: Arc<dyn SynthesisProvider>, status: StatusReporter) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                slot: Mutex::new(None),
                epoch: AtomicU64::new(0),
                status,
            }),
        }
    }

    /// Speak `text`, replacing any playback in progress.
    ///
    /// Release of the old handle and acquisition of the new one happen under
    /// one lock, so concurrent calls never interleave. Must be called from
    /// within a tokio runtime; completion is awaited on a spawned task.
    pub fn speak(&self, text: &str) -> Result<(), SynthesisError> {
        let mut slot = self.lock_slot();

        if let Some(previous) = slot.take() {
            debug!("playback {}: superseded", previous.epoch);
            drop(previous);
        }

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let Playback { handle, finished } = match self.inner.provider.synthesize(text) {
            Ok(playback) => playback,
            Err(e) => {
                drop(slot);
                warn!("playback {epoch}: synthesis failed to start: {e}");
                self.inner.status.update(|s| {
                    s.playback = PlaybackState::Idle;
                    s.message = format!("Speech output failed: {e}");
                });
                return Err(e);
            }
        };

        *slot = Some(ActivePlayback { epoch, handle });
        self.inner
            .status
            .update(|s| s.playback = PlaybackState::Speaking);
        drop(slot);
        debug!("playback {epoch}: speaking {} chars", text.len());

        let controller = self.clone();
        tokio::spawn(async move {
            let failure = match finished.await {
                Ok(Ok(())) => None,
                Ok(Err(SynthesisError::Cancelled)) => {
                    debug!("playback {epoch}: cancelled");
                    None
                }
                Ok(Err(e)) => Some(e),
                Err(_) => {
                    debug!("playback {epoch}: provider dropped completion");
                    None
                }
            };
            let was_current = controller.finish(epoch);
            if let Some(e) = failure {
                warn!("playback {epoch}: {e}");
                if was_current {
                    controller
                        .inner
                        .status
                        .message(format!("Speech output failed: {e}"));
                }
            }
        });

        Ok(())
    }

    /// Release the live playback, if any. Returns whether one was released.
    pub fn release_current(&self) -> bool {
        let mut slot = self.lock_slot();
        match slot.take() {
            Some(active) => {
                drop(active);
                self.inner
                    .status
                    .update(|s| s.playback = PlaybackState::Idle);
                true
            }
            None => false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        if self.lock_slot().is_some() {
            PlaybackState::Speaking
        } else {
            PlaybackState::Idle
        }
    }

    /// Completion path: release only if `epoch` is still the live playback.
    fn finish(&self, epoch: u64) -> bool {
        let mut slot = self.lock_slot();
        if !slot.as_ref().is_some_and(|active| active.epoch == epoch) {
            debug!("playback {epoch}: stale completion ignored");
            return false;
        }
        slot.take();
        self.inner
            .status
            .update(|s| s.playback = PlaybackState::Idle);
        true
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<ActivePlayback>> {
        self.inner.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}
