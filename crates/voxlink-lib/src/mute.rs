//! Mute gate: user-controlled switch in front of the synthesis controller.
//!
//! The unmuted check and the `speak` call run under the gate's lock, and
//! `toggle` takes the same lock, so no playback can start after mute engages.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use voxlink_core::error::SynthesisError;
use voxlink_core::types::MuteState;

use crate::status::StatusReporter;
use crate::synthesis::SynthesisController;

#[derive(Clone)]
pub struct MuteGate {
    muted: Arc<Mutex<bool>>,
    synthesis: SynthesisController,
    status: StatusReporter,
}

impl MuteGate {
    pub fn new(synthesis: SynthesisController, status: StatusReporter) -> Self {
        Self {
            muted: Arc::new(Mutex::new(false)),
            synthesis,
            status,
        }
    }

    /// Flip the mute state. Muting releases any live playback before returning.
    pub fn toggle(&self) -> MuteState {
        let mut muted = self.lock();
        *muted = !*muted;

        if *muted && self.synthesis.release_current() {
            info!("mute engaged, playback stopped");
        } else {
            info!("mute {}", if *muted { "engaged" } else { "released" });
        }

        let now = *muted;
        self.status.update(|s| s.muted = now);
        MuteState::from(now)
    }

    pub fn is_muted(&self) -> bool {
        *self.lock()
    }

    /// Speak `text` unless muted. `None` means the gate was closed and no
    /// synthesis handle was requested.
    pub fn speak_unmuted(&self, text: &str) -> Option<Result<(), SynthesisError>> {
        let muted = self.lock();
        if *muted {
            return None;
        }
        Some(self.synthesis.speak(text))
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.muted.lock().unwrap_or_else(|e| e.into_inner())
    }
}
