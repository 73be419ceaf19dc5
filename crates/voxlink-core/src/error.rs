//! Error taxonomy for the voice session.
//!
//! Every variant is handled locally by the coordinator: logged, turned into a
//! status line, and never allowed to leave a provider handle open.

use thiserror::Error;

/// Speech capture and recognition failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("a capture is already in progress")]
    AlreadyListening,

    #[error("no capture is in progress")]
    NotListening,

    #[error("audio device error: {0}")]
    Device(String),

    #[error("recognition provider error: {0}")]
    Provider(String),
}

/// Speech synthesis and playback failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("synthesis provider error: {0}")]
    Provider(String),

    #[error("playback error: {0}")]
    Playback(String),

    #[error("synthesis cancelled")]
    Cancelled,
}

/// Conversational backend failures (token service or transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("token request failed: {0}")]
    Token(String),

    #[error("backend transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Unavailable(String),
}
