//! Spoken-turn selection. Decides which transcript turn, if any, gets spoken.
//!
//! Only the last turn of a snapshot is ever considered. A turn id, once
//! recorded, is never selected again no matter how often the same snapshot is
//! observed.

use crate::text_prep::sanitize;
use crate::types::{ReplayPolicy, Role, TranscriptTurn};

/// What the marker decided for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// New assistant turn with speakable text (already sanitized).
    Speak { turn_id: String, text: String },
    /// New assistant turn that sanitizes to nothing. Recorded, never spoken.
    Empty { turn_id: String },
    /// Last turn is not a new assistant turn.
    Skip,
}

/// Tracks the id of the last assistant turn handed to synthesis.
#[derive(Debug, Clone, Default)]
pub struct SpokenMarker {
    last_spoken: Option<String>,
}

impl SpokenMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a marker for a watcher attaching to an existing transcript.
    ///
    /// With [`ReplayPolicy::SkipHistory`] the marker is seeded from whatever
    /// turn is last, so nothing already present is replayed.
    pub fn attach(snapshot: &[TranscriptTurn], policy: ReplayPolicy) -> Self {
        let last_spoken = match policy {
            ReplayPolicy::SkipHistory => snapshot.last().map(|t| t.id.clone()),
            ReplayPolicy::SpeakLatest => None,
        };
        Self { last_spoken }
    }

    pub fn last_spoken(&self) -> Option<&str> {
        self.last_spoken.as_deref()
    }

    /// Apply the selection rule to a snapshot.
    ///
    /// The id is recorded before the caller gets a chance to synthesize, so a
    /// second notification for the same turn is already a no-op.
    pub fn select(&mut self, snapshot: &[TranscriptTurn]) -> Selection {
        let Some(turn) = snapshot.last() else {
            return Selection::Skip;
        };
        if turn.role != Role::Assistant || self.last_spoken.as_deref() == Some(turn.id.as_str()) {
            return Selection::Skip;
        }

        self.last_spoken = Some(turn.id.clone());

        let text = sanitize(&turn.text);
        if text.is_empty() {
            Selection::Empty {
                turn_id: turn.id.clone(),
            }
        } else {
            Selection::Speak {
                turn_id: turn.id.clone(),
                text,
            }
        }
    }
}
