//! Shared types for the voxlink voice session.
//!
//! Kept free of tokio and provider crates so the selection logic and the
//! HTTP/CLI surfaces can share them without pulling in audio dependencies.

use serde::{Deserialize, Serialize};

// ─── Transcript types ──────────────────────────────────────────────────────

/// Who authored a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in the conversational backend's transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub id: String,
    pub role: Role,
    pub text: String,
}

impl TranscriptTurn {
    pub fn new(id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            text: text.into(),
        }
    }

    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, Role::User, text)
    }

    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, Role::Assistant, text)
    }
}

/// Whether turns already present when the watcher attaches get spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    /// Seed the spoken marker from the last turn at attach time.
    #[default]
    SkipHistory,
    /// Treat the attach-time snapshot like a regular notification.
    SpeakLatest,
}

// ─── Capture types ─────────────────────────────────────────────────────────

/// Result reported by a recognition provider for one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    Recognized(String),
    NoMatch,
}

/// Terminal outcome of one capture cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CaptureOutcome {
    Recognized(String),
    NoMatch,
    ProviderError(String),
    /// The cycle was ended by `stop_capture`.
    Cancelled,
}

impl CaptureOutcome {
    /// Short human-readable status for this outcome.
    pub fn status_message(&self) -> String {
        match self {
            CaptureOutcome::Recognized(text) => format!("Heard: {text}"),
            CaptureOutcome::NoMatch => "Nothing recognized".to_string(),
            CaptureOutcome::ProviderError(detail) => format!("Recognition failed: {detail}"),
            CaptureOutcome::Cancelled => "Capture stopped".to_string(),
        }
    }
}

/// Observable capture state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    #[default]
    Idle,
    Listening,
}

// ─── Playback types ────────────────────────────────────────────────────────

/// Observable playback state. `Idle` means no playback session exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Idle,
    Speaking,
}

/// Mute state returned by a toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MuteState {
    Muted,
    Unmuted,
}

impl MuteState {
    pub fn is_muted(self) -> bool {
        self == MuteState::Muted
    }
}

impl From<bool> for MuteState {
    fn from(muted: bool) -> Self {
        if muted { MuteState::Muted } else { MuteState::Unmuted }
    }
}

// ─── Session status ────────────────────────────────────────────────────────

/// Status snapshot of a voice session.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub capture: CaptureState,
    pub playback: PlaybackState,
    pub muted: bool,
    pub last_spoken_turn_id: Option<String>,
    /// Short human-readable status line.
    pub message: String,
    /// Set when the conversational bridge could not be established.
    pub backend_error: Option<String>,
}
