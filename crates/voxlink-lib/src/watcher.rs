//! Transcript watcher. Speaks each new assistant turn exactly once.
//!
//! Runs the [`SpokenMarker`] selection on every transcript notification and
//! hands eligible turns to the mute gate. The marker lock is held for the
//! whole notification so notifications never interleave.

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use voxlink_core::error::SynthesisError;
use voxlink_core::selection::{Selection, SpokenMarker};
use voxlink_core::types::{ReplayPolicy, TranscriptTurn};

use crate::mute::MuteGate;
use crate::status::StatusReporter;

/// What a notification led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Spoken { turn_id: String },
    /// Recorded while muted; will not be spoken later.
    Muted { turn_id: String },
    /// Recorded, but nothing left to say after sanitizing.
    Empty { turn_id: String },
    Failed { turn_id: String, error: SynthesisError },
    Ignored,
}

pub struct TranscriptWatcher {
    marker: Mutex<SpokenMarker>,
    gate: MuteGate,
    status: StatusReporter,
}

impl TranscriptWatcher {
    pub fn new(gate: MuteGate, status: StatusReporter) -> Self {
        Self {
            marker: Mutex::new(SpokenMarker::new()),
            gate,
            status,
        }
    }

    /// Reset the marker for a transcript that already has content.
    pub fn attach(&self, snapshot: &[TranscriptTurn], policy: ReplayPolicy) -> WatchOutcome {
        {
            let mut marker = self.lock();
            *marker = SpokenMarker::attach(snapshot, policy);
            self.publish_marker(&marker);
            debug!(
                "watcher attached ({policy:?}) at {} turn(s), marker={:?}",
                snapshot.len(),
                marker.last_spoken()
            );
        }
        match policy {
            ReplayPolicy::SkipHistory => WatchOutcome::Ignored,
            ReplayPolicy::SpeakLatest => self.on_transcript_changed(snapshot),
        }
    }

    pub fn on_transcript_changed(&self, snapshot: &[TranscriptTurn]) -> WatchOutcome {
        let mut marker = self.lock();
        let selection = marker.select(snapshot);
        if !matches!(selection, Selection::Skip) {
            self.publish_marker(&marker);
        }

        match selection {
            Selection::Skip => WatchOutcome::Ignored,
            Selection::Empty { turn_id } => {
                debug!("turn {turn_id}: nothing to speak");
                WatchOutcome::Empty { turn_id }
            }
            Selection::Speak { turn_id, text } => match self.gate.speak_unmuted(&text) {
                None => {
                    debug!("turn {turn_id}: muted, skipped");
                    WatchOutcome::Muted { turn_id }
                }
                Some(Ok(())) => {
                    debug!("turn {turn_id}: speaking");
                    WatchOutcome::Spoken { turn_id }
                }
                Some(Err(error)) => {
                    warn!("turn {turn_id}: {error}");
                    WatchOutcome::Failed { turn_id, error }
                }
            },
        }
    }

    pub fn last_spoken(&self) -> Option<String> {
        self.lock().last_spoken().map(str::to_string)
    }

    fn publish_marker(&self, marker: &SpokenMarker) {
        let id = marker.last_spoken().map(str::to_string);
        self.status.update(|s| s.last_spoken_turn_id = id);
    }

    fn lock(&self) -> MutexGuard<'_, SpokenMarker> {
        self.marker.lock().unwrap_or_else(|e| e.into_inner())
    }
}
